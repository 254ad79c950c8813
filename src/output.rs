//! Output types for validation runs.

use crate::config::ValidationLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-page facts collected during enhanced validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 1-based.
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    /// Degrees clockwise: 0, 90, 180 or 270.
    pub rotation: u16,
    /// Characters of extracted text.
    pub text_length: usize,
    pub has_images: bool,
    pub has_links: bool,
    /// Table heuristic result; `None` when table extraction is disabled.
    pub table_count: Option<u32>,
}

/// One embedded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    /// 1-based.
    pub page: u32,
    /// 0-based, within the page.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    pub colorspace: String,
    pub alpha: bool,
    /// Decoded sample bytes.
    pub size: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentStructure {
    pub has_toc: bool,
    pub toc_entries: usize,
    pub max_toc_level: u32,
    pub has_bookmarks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityChecks {
    /// Characters of text per page.
    pub text_to_page_ratio: f64,
    /// Mean page area in square points.
    pub average_page_size: f64,
    /// At most two distinct page sizes.
    pub consistent_page_sizes: bool,
    pub has_metadata: bool,
    /// Fraction of pages with non-empty text.
    pub text_extraction_success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfACompliance {
    /// Always false: full PDF/A conformance checking is out of reach here.
    pub is_compliant: bool,
    pub version: Option<String>,
    pub fonts_embedded: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accessibility {
    pub has_structure: bool,
    pub has_alt_text: bool,
    pub reading_order_defined: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integrity {
    pub is_complete: bool,
    pub all_pages_accessible: bool,
    pub no_corruption: bool,
    pub issues: Vec<String>,
}

impl Default for Integrity {
    fn default() -> Self {
        Self {
            is_complete: true,
            all_pages_accessible: true,
            no_corruption: true,
            issues: Vec::new(),
        }
    }
}

/// Everything the validation pipeline learns about one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub validation_level: ValidationLevel,
    pub is_valid: bool,
    pub page_count: usize,
    pub extracted_text: String,
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages_info: Vec<PageInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images_info: Vec<ImageInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_structure: Option<DocumentStructure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_checks: Option<QualityChecks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_a_compliance: Option<PdfACompliance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessibility: Option<Accessibility>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<Integrity>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// One persisted result per completed attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub task_id: String,
    pub source: String,
    pub file_size: u64,
    /// Wall-clock seconds spent in the attempt.
    pub processing_time: f64,
    #[serde(flatten)]
    pub report: ValidationReport,
    pub created_at: DateTime<Utc>,
}

// ── Task summary ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotTotals {
    pub extracted: usize,
    pub total_size: u64,
    pub with_thumbnails: usize,
}

/// What extraction, classification and snapshotting produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructureSummary {
    pub total_blocks: usize,
    pub with_occupation_code: usize,
    /// Distinct codes found anywhere in the page text, sorted.
    pub unique_occupation_codes: Vec<String>,
    pub hierarchy_levels: BTreeMap<u8, usize>,
    /// Distinct span font names, sorted.
    pub fonts_used: Vec<String>,
    pub page_snapshots: SnapshotTotals,
}

/// Compact outcome stored on the task row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub is_valid: bool,
    pub page_count: usize,
    pub text_length: usize,
    pub has_errors: bool,
    pub structure: StructureSummary,
}
