//! Outline depth inference.
//!
//! Every block gets a level from 1 (most prominent) to 4 (body text), from
//! two document-wide tier sets:
//!
//! 1. **Size tiers**: the distinct positive font sizes. The largest size is
//!    level 1, the second largest level 2, the third level 3, anything
//!    smaller level 4.
//! 2. **Indent tiers**: distinct left edges, greedily merged into at most
//!    four tiers. Each tier of indentation pushes a block one level deeper.
//!
//! Bold text is promoted one level, never above level 1.
//!
//! Both tier sets depend on the whole document, so classification can only
//! start once extraction has finished.

use crate::model::{Block, BlockRef};

/// A value further than this from the previous tier starts a new tier.
pub const INDENT_TIER_GAP: f64 = 15.0;
/// A value closer than this to a tier belongs to it.
pub const INDENT_MATCH_TOLERANCE: f64 = 10.0;
pub const MAX_INDENT_TIERS: usize = 4;
pub const DEEPEST_LEVEL: u8 = 4;

/// Document-wide tiers, computed once per document.
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyClassifier {
    /// Ascending.
    font_sizes: Vec<f64>,
    /// Tier representatives, ascending.
    indent_tiers: Vec<f64>,
}

impl HierarchyClassifier {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        Self {
            font_sizes: distinct_sorted(blocks.iter().map(|b| b.font_size).filter(|s| *s > 0.0)),
            indent_tiers: indent_tiers(blocks.iter().map(|b| b.indentation)),
        }
    }

    pub fn font_sizes(&self) -> &[f64] {
        &self.font_sizes
    }

    pub fn indent_tiers(&self) -> &[f64] {
        &self.indent_tiers
    }

    /// Level from font size alone.
    pub fn size_level(&self, size: f64) -> u8 {
        let fs = &self.font_sizes;
        let n = fs.len();
        if n == 0 || size <= 0.0 {
            return DEEPEST_LEVEL;
        }
        if size >= fs[n - 1] {
            1
        } else if n >= 2 && size >= fs[n - 2] {
            2
        } else if n >= 3 && size >= fs[n - 3] {
            3
        } else {
            DEEPEST_LEVEL
        }
    }

    /// Tier index for left edge `x`.
    pub fn indent_level(&self, x: f64) -> usize {
        let tiers = &self.indent_tiers;
        if let Some(i) = tiers
            .iter()
            .position(|t| (x - t).abs() < INDENT_MATCH_TOLERANCE)
        {
            return i;
        }
        match tiers.last() {
            Some(last) if x > *last => tiers.len(),
            _ => 0,
        }
    }

    pub fn level_for(&self, block: &Block) -> u8 {
        let indent = self.indent_level(block.indentation).min(DEEPEST_LEVEL as usize) as u8;
        let mut level = (self.size_level(block.font_size) + indent).min(DEEPEST_LEVEL);
        if block.is_bold && level > 1 {
            level -= 1;
        }
        level
    }

    /// Assign `hierarchy_level` to every block.
    pub fn classify(&self, blocks: &mut [Block]) {
        for block in blocks.iter_mut() {
            block.hierarchy_level = self.level_for(block);
        }
    }
}

/// Classify `blocks` in place and link each to its parent.
pub fn classify(blocks: &mut [Block]) {
    HierarchyClassifier::from_blocks(blocks).classify(blocks);
    assign_parents(blocks);
}

/// Point each block at the nearest preceding block, in document order, with
/// a strictly smaller level. Level-1 blocks have no parent.
pub fn assign_parents(blocks: &mut [Block]) {
    let mut order: Vec<usize> = (0..blocks.len()).collect();
    order.sort_by_key(|&i| (blocks[i].page_num, blocks[i].block_num));

    // last_seen[l] = (position in document order, block) of the latest level-l block
    let mut last_seen: [Option<(usize, BlockRef)>; DEEPEST_LEVEL as usize + 1] =
        [None; DEEPEST_LEVEL as usize + 1];

    for (pos, &i) in order.iter().enumerate() {
        let level = blocks[i].hierarchy_level.clamp(1, DEEPEST_LEVEL) as usize;
        blocks[i].parent = last_seen[1..level]
            .iter()
            .flatten()
            .max_by_key(|(p, _)| *p)
            .map(|(_, r)| *r);
        last_seen[level] = Some((pos, blocks[i].block_ref()));
    }
}

fn distinct_sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup();
    v
}

/// Greedy tiering of left edges: walk the distinct values upward and open a
/// new tier when a value sits more than [`INDENT_TIER_GAP`] past the current
/// tier's representative.
fn indent_tiers(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut tiers: Vec<f64> = Vec::new();
    for x in distinct_sorted(values) {
        match tiers.last() {
            None => tiers.push(x),
            Some(last) if x - last > INDENT_TIER_GAP => tiers.push(x),
            _ => {}
        }
    }
    tiers.truncate(MAX_INDENT_TIERS);
    tiers
}
