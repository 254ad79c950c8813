//! Occupation code detection and label association.
//!
//! Codes have the fixed shape `D-DD-DD-DD` (for example `1-01-01-01`). Once
//! every block has been scanned for a code, each coded block looks at the
//! next four blocks in document order for a descriptive label: first on the
//! same row (confidence 0.9), otherwise on the following row (0.7).

use crate::model::Block;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d-\d{2}-\d{2}-\d{2})\b").unwrap());

static NUMERIC_ONLY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\d\s\-.]+$").unwrap());

/// Role suffixes and words that mark a label as an occupation name.
const ROLE_KEYWORDS: &[&str] = &[
    "员", "师", "工", "长", "家", "人员", "技术", "管理", "操作", "专员", "主管",
];

pub const SAME_ROW_CONFIDENCE: f64 = 0.9;
pub const NEXT_ROW_CONFIDENCE: f64 = 0.7;
/// How many following blocks a coded block inspects.
pub const LOOKAHEAD: usize = 4;

/// First code in `text`, if any.
pub fn find_code(text: &str) -> Option<&str> {
    CODE_PATTERN.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// Every distinct code in `text`, sorted.
pub fn find_all_codes(text: &str) -> BTreeSet<String> {
    CODE_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

fn is_cjk_ideograph(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Whether `text` reads like an occupation label.
pub fn is_occupation_label(text: &str) -> bool {
    if text.is_empty() || NUMERIC_ONLY.is_match(text) {
        return false;
    }
    if ROLE_KEYWORDS.iter().any(|k| text.contains(k)) {
        return true;
    }
    let total = text.chars().count();
    let cjk = text.chars().filter(|c| is_cjk_ideograph(*c)).count();
    cjk as f64 / total as f64 > 0.5
}

/// Set `occupation_code` on every block whose text contains a code.
pub fn detect_codes(blocks: &mut [Block]) {
    for block in blocks.iter_mut() {
        block.occupation_code = find_code(&block.text).map(String::from);
    }
}

/// Attach a label and confidence to each coded block. `blocks` must be in
/// document order. Candidate blocks are never modified.
pub fn associate_labels(blocks: &mut [Block]) {
    for i in 0..blocks.len() {
        if blocks[i].occupation_code.is_none() {
            continue;
        }
        if let Some((label, confidence)) = find_label(blocks, i) {
            let block = &mut blocks[i];
            block.occupation_name = Some(label);
            block.confidence_score = Some(confidence);
        }
    }
}

fn find_label(blocks: &[Block], i: usize) -> Option<(String, f64)> {
    let anchor = &blocks[i];
    let end = (i + 1 + LOOKAHEAD).min(blocks.len());
    for candidate in &blocks[i + 1..end] {
        let dy = candidate.center_y - anchor.center_y;
        if dy.abs() < anchor.height {
            if is_occupation_label(&candidate.text) {
                return Some((candidate.text.clone(), SAME_ROW_CONFIDENCE));
            }
        } else if dy > 0.0 && dy < anchor.height * 2.0 && is_occupation_label(&candidate.text) {
            return Some((candidate.text.clone(), NEXT_ROW_CONFIDENCE));
        }
    }
    None
}

/// Detect codes, then associate labels.
pub fn associate(blocks: &mut [Block]) {
    detect_codes(blocks);
    associate_labels(blocks);
}
