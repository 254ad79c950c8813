//! Persistent records: tasks, blocks and page snapshots.

use crate::config::ValidationLevel;
use crate::error::ValidatorError;
use crate::output::ResultSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Style flag bit set when the span's font is italic.
pub const FLAG_ITALIC: u32 = 1 << 1;
/// Style flag bit set when the span's font is bold.
pub const FLAG_BOLD: u32 = 1 << 4;

// ── Geometry ─────────────────────────────────────────────────────────────

/// Axis-aligned rectangle in page points, origin top-left, y grows down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    /// Build a box from two corners in any order.
    ///
    /// Returns `None` when a coordinate is not finite.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Option<Self> {
        if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        })
    }

    pub fn from_array(b: [f64; 4]) -> Option<Self> {
        Self::new(b[0], b[1], b[2], b[3])
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }
}

// ── Blocks ───────────────────────────────────────────────────────────────

/// Pointer to another block of the same task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRef {
    pub page_num: u32,
    pub block_num: u32,
}

/// One text span with its geometry, font attributes and inferred attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub task_id: String,
    /// 1-based.
    pub page_num: u32,
    /// 0-based, sequential within the page.
    pub block_num: u32,
    pub text: String,
    pub bbox: BBox,
    pub width: f64,
    pub height: f64,
    pub center_x: f64,
    pub center_y: f64,
    pub font_name: String,
    pub font_size: f64,
    pub font_flags: u32,
    pub is_bold: bool,
    pub is_italic: bool,
    /// 1 (most prominent) to 4 (body).
    pub hierarchy_level: u8,
    /// Left edge of the block; the x position used for indent tiers.
    pub indentation: f64,
    pub occupation_code: Option<String>,
    pub occupation_name: Option<String>,
    pub confidence_score: Option<f64>,
    pub parent: Option<BlockRef>,
}

impl Block {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: impl Into<String>,
        page_num: u32,
        block_num: u32,
        text: impl Into<String>,
        bbox: BBox,
        font_name: impl Into<String>,
        font_size: f64,
        font_flags: u32,
    ) -> Self {
        let (center_x, center_y) = bbox.center();
        Self {
            task_id: task_id.into(),
            page_num,
            block_num,
            text: text.into(),
            width: bbox.width(),
            height: bbox.height(),
            center_x,
            center_y,
            indentation: bbox.x0,
            bbox,
            font_name: font_name.into(),
            font_size,
            font_flags,
            is_bold: font_flags & FLAG_BOLD != 0,
            is_italic: font_flags & FLAG_ITALIC != 0,
            hierarchy_level: 4,
            occupation_code: None,
            occupation_name: None,
            confidence_score: None,
            parent: None,
        }
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef {
            page_num: self.page_num,
            block_num: self.block_num,
        }
    }
}

/// Query over a task's blocks. Empty fields do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockFilter {
    pub page_num: Option<u32>,
    pub hierarchy_level: Option<u8>,
    pub has_occupation_code: Option<bool>,
    pub font_size_min: Option<f64>,
    pub font_size_max: Option<f64>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl BlockFilter {
    pub fn matches(&self, block: &Block) -> bool {
        if self.page_num.is_some_and(|p| block.page_num != p) {
            return false;
        }
        if self.hierarchy_level.is_some_and(|l| block.hierarchy_level != l) {
            return false;
        }
        if let Some(want) = self.has_occupation_code {
            if block.occupation_code.is_some() != want {
                return false;
            }
        }
        if self.font_size_min.is_some_and(|min| block.font_size < min) {
            return false;
        }
        if self.font_size_max.is_some_and(|max| block.font_size > max) {
            return false;
        }
        true
    }

    /// Filter, order by (page, block), then page with offset/limit.
    pub fn apply<'a>(&self, blocks: impl IntoIterator<Item = &'a Block>) -> Vec<Block> {
        let mut hits: Vec<&Block> = blocks.into_iter().filter(|b| self.matches(b)).collect();
        hits.sort_by_key(|b| (b.page_num, b.block_num));
        hits.into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

/// Aggregate view over a task's blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    pub total_blocks: usize,
    pub page_count: usize,
    pub blocks_with_codes: usize,
    pub unique_codes: Vec<String>,
    pub hierarchy_distribution: BTreeMap<u8, usize>,
    /// Most used fonts, highest count first, at most ten.
    pub top_fonts: Vec<(String, usize)>,
}

impl BlockSummary {
    pub fn from_blocks(blocks: &[Block]) -> Self {
        let mut pages = std::collections::BTreeSet::new();
        let mut codes = std::collections::BTreeSet::new();
        let mut levels = BTreeMap::new();
        let mut fonts: BTreeMap<&str, usize> = BTreeMap::new();
        let mut with_codes = 0;

        for b in blocks {
            pages.insert(b.page_num);
            if let Some(code) = &b.occupation_code {
                with_codes += 1;
                codes.insert(code.clone());
            }
            *levels.entry(b.hierarchy_level).or_insert(0) += 1;
            *fonts.entry(b.font_name.as_str()).or_insert(0) += 1;
        }

        let mut top_fonts: Vec<(String, usize)> =
            fonts.into_iter().map(|(f, n)| (f.to_string(), n)).collect();
        top_fonts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_fonts.truncate(10);

        Self {
            total_blocks: blocks.len(),
            page_count: pages.len(),
            blocks_with_codes: with_codes,
            unique_codes: codes.into_iter().collect(),
            hierarchy_distribution: levels,
            top_fonts,
        }
    }
}

// ── Page snapshots ───────────────────────────────────────────────────────

/// Stored rendering of one page plus its layout statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub task_id: String,
    /// 1-based.
    pub page_num: u32,
    pub object_key: String,
    pub thumbnail_key: Option<String>,
    pub page_width: f64,
    pub page_height: f64,
    pub dpi: u32,
    pub image_width: u32,
    pub image_height: u32,
    pub image_format: String,
    pub image_size: u64,
    pub text_blocks_count: usize,
    pub images_count: usize,
    pub tables_count: u32,
    pub primary_font: Option<String>,
    /// Rounded point size to span count.
    pub font_sizes: BTreeMap<u32, usize>,
    pub has_header: bool,
    pub has_footer: bool,
    /// 1 to 3.
    pub columns_count: u8,
    pub created_at: DateTime<Utc>,
}

// ── Tasks ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A unit of validation work and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationTask {
    pub task_id: String,
    /// Local path, http(s) URL or object-store key.
    pub source: String,
    pub validation_level: ValidationLevel,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Failed attempts so far.
    pub retry_count: u32,
    pub max_retries: u32,
    pub result_summary: Option<ResultSummary>,
    pub error_message: Option<String>,
    /// Caller-supplied correlation id, echoed back untouched.
    pub correlation_id: Option<String>,
}

impl ValidationTask {
    pub fn new(
        task_id: impl Into<String>,
        source: impl Into<String>,
        validation_level: ValidationLevel,
        max_retries: u32,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            source: source.into(),
            validation_level,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries,
            result_summary: None,
            error_message: None,
            correlation_id: None,
        }
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), ValidatorError> {
        use TaskStatus::*;
        let allowed = matches!(
            (self.status, to),
            (Pending, Processing)
                // redelivery of a finished task re-runs it
                | (Completed, Processing)
                | (Failed, Processing)
                // an attempt whose final status update was lost
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Pending, Cancelled)
                | (Pending, Failed)
        );
        if !allowed {
            return Err(ValidatorError::InvalidTransition {
                task_id: self.task_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Mark the task dequeued and running. Re-running a finished task starts
    /// a fresh retry budget.
    pub fn start(&mut self) -> Result<(), ValidatorError> {
        let finished = matches!(self.status, TaskStatus::Completed | TaskStatus::Failed);
        self.transition(TaskStatus::Processing)?;
        if finished {
            self.retry_count = 0;
            self.error_message = None;
            self.completed_at = None;
        }
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete(&mut self, summary: ResultSummary) -> Result<(), ValidatorError> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        self.result_summary = Some(summary);
        self.error_message = None;
        Ok(())
    }

    /// Record a failed attempt and return the task to the queue.
    pub fn requeue(&mut self, error: impl Into<String>) -> Result<(), ValidatorError> {
        self.transition(TaskStatus::Pending)?;
        self.retry_count += 1;
        self.error_message = Some(error.into());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), ValidatorError> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(Utc::now());
        self.error_message = Some(error.into());
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), ValidatorError> {
        self.transition(TaskStatus::Cancelled)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}
