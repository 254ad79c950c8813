//! Per-page structural aggregates.
//!
//! All heuristics work on block-level boxes in top-left coordinates:
//!
//! | Signal | Rule |
//! |--------|------|
//! | header | a block top above 10 % of the page height |
//! | footer | a block top below 90 % of the page height |
//! | columns | left-edge gaps wider than 10 % of the page width, between the bands, capped at 3 |
//! | tables | three or more block tops on the same 0.1 pt row |

use crate::source::{PageContent, Span};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const HEADER_BAND: f64 = 0.10;
pub const FOOTER_BAND: f64 = 0.90;
pub const COLUMN_GAP_RATIO: f64 = 0.10;
pub const MAX_COLUMNS: u8 = 3;
/// Blocks sharing a rounded top needed to call a row tabular.
pub const TABLE_ROW_MIN_BLOCKS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageLayout {
    pub text_blocks_count: usize,
    pub images_count: usize,
    /// 0 or 1.
    pub tables_count: u32,
    pub has_header: bool,
    pub has_footer: bool,
    pub columns_count: u8,
    pub primary_font: Option<String>,
    pub font_sizes: BTreeMap<u32, usize>,
}

pub fn analyze_page(page: &PageContent) -> PageLayout {
    let (has_header, has_footer, columns_count) = detect_layout(page.width, page.height, &page.blocks);
    let (primary_font, font_sizes) = font_statistics(&page.spans);
    PageLayout {
        text_blocks_count: page.blocks.len(),
        images_count: page.images.len(),
        tables_count: detect_tables(&page.blocks),
        has_header,
        has_footer,
        columns_count,
        primary_font,
        font_sizes,
    }
}

/// Header flag, footer flag and column count.
pub fn detect_layout(width: f64, height: f64, blocks: &[[f64; 4]]) -> (bool, bool, u8) {
    let header_limit = height * HEADER_BAND;
    let footer_limit = height * FOOTER_BAND;

    let has_header = blocks.iter().any(|b| b[1] < header_limit);
    let has_footer = blocks.iter().any(|b| b[1] > footer_limit);

    let mut lefts: Vec<f64> = blocks
        .iter()
        .filter(|b| b[1] > header_limit && b[1] < footer_limit)
        .map(|b| b[0])
        .collect();
    lefts.sort_by(|a, b| a.total_cmp(b));

    let min_gap = width * COLUMN_GAP_RATIO;
    let wide_gaps = lefts.windows(2).filter(|w| w[1] - w[0] > min_gap).count();
    let columns = (wide_gaps + 1).min(MAX_COLUMNS as usize) as u8;

    (has_header, has_footer, columns)
}

/// 1 when some row holds enough aligned blocks to look tabular, else 0.
pub fn detect_tables(blocks: &[[f64; 4]]) -> u32 {
    let mut rows: HashMap<i64, usize> = HashMap::new();
    for b in blocks {
        if !b[1].is_finite() {
            continue;
        }
        *rows.entry(row_key(b[1])).or_insert(0) += 1;
    }
    u32::from(rows.values().any(|n| *n >= TABLE_ROW_MIN_BLOCKS))
}

/// `y` rounded to one decimal, as an integer number of tenths.
fn row_key(y: f64) -> i64 {
    (y * 10.0).round_ties_even() as i64
}

/// Most frequent font (first seen wins ties) and the rounded size histogram.
pub fn font_statistics(spans: &[Span]) -> (Option<String>, BTreeMap<u32, usize>) {
    let mut fonts: Vec<(&str, usize)> = Vec::new();
    let mut sizes = BTreeMap::new();

    for span in spans {
        if !span.font.is_empty() {
            match fonts.iter_mut().find(|(name, _)| *name == span.font) {
                Some((_, n)) => *n += 1,
                None => fonts.push((span.font.as_str(), 1)),
            }
        }
        if span.size > 0.0 && span.size.is_finite() {
            *sizes.entry(span.size.round_ties_even() as u32).or_insert(0) += 1;
        }
    }

    let mut primary: Option<(&str, usize)> = None;
    for (name, n) in fonts {
        if primary.is_none_or(|(_, best)| n > best) {
            primary = Some((name, n));
        }
    }

    (primary.map(|(name, _)| name.to_string()), sizes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::span;

    const W: f64 = 600.0;
    const H: f64 = 800.0;

    fn at(x: f64, y: f64) -> [f64; 4] {
        [x, y, x + 50.0, y + 10.0]
    }

    #[test]
    fn header_and_footer_bands() {
        let (header, footer, _) = detect_layout(W, H, &[at(50.0, 0.05 * H), at(50.0, 400.0)]);
        assert!(header && !footer);
        let (header, footer, _) = detect_layout(W, H, &[at(50.0, 400.0), at(50.0, 0.95 * H)]);
        assert!(!header && footer);
    }

    #[test]
    fn empty_page_is_single_column() {
        assert_eq!(detect_layout(W, H, &[]), (false, false, 1));
    }

    #[test]
    fn two_columns_from_one_wide_gap() {
        let blocks = [at(50.0, 200.0), at(55.0, 300.0), at(320.0, 200.0), at(322.0, 300.0)];
        assert_eq!(detect_layout(W, H, &blocks).2, 2);
    }

    #[test]
    fn columns_are_capped_at_three() {
        let blocks: Vec<[f64; 4]> = (0..6).map(|i| at(i as f64 * 100.0, 300.0)).collect();
        assert_eq!(detect_layout(W, H, &blocks).2, 3);
    }

    #[test]
    fn band_blocks_do_not_count_for_columns() {
        let blocks = [at(50.0, 10.0), at(500.0, 790.0), at(50.0, 400.0)];
        assert_eq!(detect_layout(W, H, &blocks).2, 1);
    }

    #[test]
    fn three_blocks_on_one_row_is_a_table() {
        let blocks = [at(50.0, 300.02), at(200.0, 299.98), at(350.0, 300.0)];
        assert_eq!(detect_tables(&blocks), 1);
        assert_eq!(detect_tables(&blocks[..2]), 0);
        assert_eq!(detect_tables(&[at(50.0, 300.0), at(50.0, 320.0), at(50.0, 340.0)]), 0);
    }

    #[test]
    fn font_statistics_first_seen_wins_ties() {
        let spans = vec![
            span("a", [0.0; 4], "Times", 11.6, 0),
            span("b", [0.0; 4], "Arial", 12.4, 0),
            span("c", [0.0; 4], "Arial", 0.0, 0),
            span("d", [0.0; 4], "Times", 18.0, 0),
        ];
        let (primary, sizes) = font_statistics(&spans);
        assert_eq!(primary.as_deref(), Some("Times"));
        assert_eq!(sizes.get(&12), Some(&2));
        assert_eq!(sizes.get(&18), Some(&1));
        assert_eq!(sizes.len(), 2);
    }

    #[test]
    fn no_spans_means_no_font() {
        let (primary, sizes) = font_statistics(&[]);
        assert!(primary.is_none());
        assert!(sizes.is_empty());
    }

    #[test]
    fn analyze_page_counts() {
        let page = PageContent {
            width: W,
            height: H,
            blocks: vec![at(50.0, 20.0), at(50.0, 300.0)],
            spans: vec![span("x", [0.0; 4], "Helvetica", 10.0, 0)],
            ..Default::default()
        };
        let layout = analyze_page(&page);
        assert_eq!(layout.text_blocks_count, 2);
        assert!(layout.has_header);
        assert_eq!(layout.columns_count, 1);
        assert_eq!(layout.tables_count, 0);
        assert_eq!(layout.primary_font.as_deref(), Some("Helvetica"));
    }
}
