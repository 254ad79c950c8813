//! Three-level document validation.
//!
//! Each level runs the checks of the levels below it first. A failing
//! sub-check never throws away what earlier checks produced: it appends a
//! message to `errors` and the report carries on.
//!
//! Pages are read once and shared by every level through [`PageCache`].

use crate::config::ValidationLevel;
use crate::error::SectionError;
use crate::output::{
    Accessibility, DocumentStructure, ImageInfo, Integrity, PageInfo, PdfACompliance,
    QualityChecks, ValidationReport,
};
use crate::pipeline::layout;
use crate::source::{DocumentHandle, OutlineEntry, PageContent};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Pages scanned for embedded fonts in strict mode.
pub const FONT_SCAN_PAGES: usize = 5;
/// Metadata fields strict mode recommends.
pub const RECOMMENDED_METADATA: &[&str] = &["title", "author", "creator"];

/// Which optional enhanced sections to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationOptions {
    pub extract_images: bool,
    pub extract_tables: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            extract_images: true,
            extract_tables: true,
        }
    }
}

/// Page reads for one document, each attempted once.
pub struct PageCache {
    pages: Vec<Result<PageContent, SectionError>>,
}

impl PageCache {
    pub fn load(doc: &dyn DocumentHandle) -> Self {
        Self {
            pages: (0..doc.page_count()).map(|i| doc.page(i)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Result<PageContent, SectionError>> {
        self.pages.get(index)
    }

    /// Successfully read pages with their 0-based index.
    pub fn readable(&self) -> impl Iterator<Item = (usize, &PageContent)> {
        self.pages
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().ok().map(|p| (i, p)))
    }
}

/// Run validation at `level` over an opened document.
pub fn validate(
    doc: &dyn DocumentHandle,
    level: ValidationLevel,
    options: ValidationOptions,
) -> ValidationReport {
    let pages = PageCache::load(doc);
    validate_with_pages(doc, &pages, level, options)
}

/// Same as [`validate`], reusing pages already read.
pub fn validate_with_pages(
    doc: &dyn DocumentHandle,
    pages: &PageCache,
    level: ValidationLevel,
    options: ValidationOptions,
) -> ValidationReport {
    let mut report = ValidationReport {
        validation_level: level,
        is_valid: true,
        ..Default::default()
    };

    standard(doc, pages, &mut report);
    if level >= ValidationLevel::Enhanced {
        let outline = enhanced(doc, pages, options, &mut report);
        if level >= ValidationLevel::Strict {
            strict(doc, pages, outline.as_deref(), &mut report);
        }
    }

    debug!(
        "validation ({}): valid={}, {} errors, {} warnings",
        level,
        report.is_valid,
        report.errors.len(),
        report.warnings.len()
    );
    report
}

// ── Standard ─────────────────────────────────────────────────────────────

fn standard(doc: &dyn DocumentHandle, pages: &PageCache, report: &mut ValidationReport) {
    report.page_count = pages.len();
    report.metadata = doc.metadata();

    let mut texts = Vec::with_capacity(pages.len());
    for index in 0..pages.len() {
        match pages.get(index) {
            Some(Ok(page)) => texts.push(page.text.as_str()),
            Some(Err(e)) => {
                warn!("standard validation: {}", e);
                report.is_valid = false;
                report.errors.push(format!("text extraction failed: {e}"));
            }
            None => {}
        }
    }
    report.extracted_text = texts.join("\n");

    if report.page_count == 0 {
        report.warnings.push("document has no pages".into());
    }
    if report.extracted_text.trim().is_empty() {
        report
            .warnings
            .push("no text could be extracted (scanned document?)".into());
    }
}

// ── Enhanced ─────────────────────────────────────────────────────────────

/// Returns the outline when it could be read, for strict mode to reuse.
fn enhanced(
    doc: &dyn DocumentHandle,
    pages: &PageCache,
    options: ValidationOptions,
    report: &mut ValidationReport,
) -> Option<Vec<OutlineEntry>> {
    for index in 0..pages.len() {
        match pages.get(index) {
            Some(Ok(page)) => report.pages_info.push(PageInfo {
                page_number: index as u32 + 1,
                width: page.width,
                height: page.height,
                rotation: page.rotation,
                text_length: page.text.chars().count(),
                has_images: !page.images.is_empty(),
                has_links: page.link_count > 0,
                table_count: options
                    .extract_tables
                    .then(|| layout::detect_tables(&page.blocks)),
            }),
            Some(Err(e)) => report
                .errors
                .push(format!("page analysis skipped page {}: {e}", index + 1)),
            None => {}
        }
    }

    if options.extract_images {
        for (index, page) in pages.readable() {
            report
                .images_info
                .extend(page.images.iter().enumerate().map(|(i, img)| ImageInfo {
                    page: index as u32 + 1,
                    index: i,
                    width: img.width,
                    height: img.height,
                    colorspace: img.colorspace.clone(),
                    alpha: img.alpha,
                    size: img.sample_size,
                }));
        }
    }

    let outline = match doc.outline() {
        Ok(entries) => {
            report.document_structure = Some(structure_summary(&entries));
            Some(entries)
        }
        Err(e) => {
            warn!("enhanced validation: {}", e);
            report.errors.push(format!("structure analysis failed: {e}"));
            None
        }
    };

    report.quality_checks = Some(quality_checks(report));
    outline
}

fn structure_summary(entries: &[OutlineEntry]) -> DocumentStructure {
    DocumentStructure {
        has_toc: !entries.is_empty(),
        toc_entries: entries.len(),
        max_toc_level: entries.iter().map(|e| e.level).max().unwrap_or(0),
        has_bookmarks: entries.iter().any(|e| e.level == 1),
    }
}

fn quality_checks(report: &ValidationReport) -> QualityChecks {
    let page_count = report.page_count;
    let text_len = report.extracted_text.chars().count();

    let areas: Vec<f64> = report.pages_info.iter().map(|p| p.width * p.height).collect();
    let average_page_size = if areas.is_empty() {
        0.0
    } else {
        areas.iter().sum::<f64>() / areas.len() as f64
    };

    // Exact sizes; two distinct sizes still count as consistent.
    let distinct_sizes: BTreeSet<(u64, u64)> = report
        .pages_info
        .iter()
        .map(|p| (p.width.to_bits(), p.height.to_bits()))
        .collect();

    let pages_with_text = report.pages_info.iter().filter(|p| p.text_length > 0).count();

    QualityChecks {
        text_to_page_ratio: if page_count > 0 {
            text_len as f64 / page_count as f64
        } else {
            0.0
        },
        average_page_size,
        consistent_page_sizes: distinct_sizes.len() <= 2,
        has_metadata: !report.metadata.is_empty(),
        text_extraction_success_rate: if page_count > 0 {
            pages_with_text as f64 / page_count as f64
        } else {
            0.0
        },
    }
}

// ── Strict ───────────────────────────────────────────────────────────────

fn strict(
    doc: &dyn DocumentHandle,
    pages: &PageCache,
    outline: Option<&[OutlineEntry]>,
    report: &mut ValidationReport,
) {
    report.pdf_a_compliance = Some(font_embedding(pages));
    report.accessibility = Some(accessibility(outline));
    report.integrity = Some(integrity(doc));

    if report.extracted_text.trim().is_empty() {
        report.is_valid = false;
        report
            .errors
            .push("strict mode: document must contain extractable text".into());
    }
    if report.page_count == 0 {
        report.is_valid = false;
        report
            .errors
            .push("strict mode: document must contain at least one page".into());
    }

    for field in RECOMMENDED_METADATA {
        let present = report
            .metadata
            .get(*field)
            .is_some_and(|v| !v.trim().is_empty());
        if !present {
            report
                .warnings
                .push(format!("strict mode recommends metadata field '{field}'"));
        }
    }
}

fn font_embedding(pages: &PageCache) -> PdfACompliance {
    let mut compliance = PdfACompliance {
        fonts_embedded: true,
        ..Default::default()
    };
    for index in 0..pages.len().min(FONT_SCAN_PAGES) {
        match pages.get(index) {
            Some(Ok(page)) => {
                for font in page.fonts.iter().filter(|f| !f.embedded) {
                    compliance.fonts_embedded = false;
                    compliance.issues.push(format!(
                        "page {}: font '{}' is not embedded",
                        index + 1,
                        font.name
                    ));
                }
            }
            Some(Err(e)) => compliance
                .issues
                .push(format!("font check skipped: {e}")),
            None => {}
        }
    }
    compliance
}

fn accessibility(outline: Option<&[OutlineEntry]>) -> Accessibility {
    let has_structure = outline.is_some_and(|o| !o.is_empty());
    let mut issues = Vec::new();
    if !has_structure {
        issues.push("document has no structure tree or table of contents".to_string());
    }
    Accessibility {
        has_structure,
        has_alt_text: false,
        reading_order_defined: false,
        issues,
    }
}

/// Fresh read of every page, independent of the cached reads.
fn integrity(doc: &dyn DocumentHandle) -> Integrity {
    let mut integrity = Integrity::default();
    for index in 0..doc.page_count() {
        if let Err(e) = doc.page(index) {
            integrity.all_pages_accessible = false;
            integrity.issues.push(format!("page {} inaccessible: {e}", index + 1));
        }
    }
    integrity.no_corruption = integrity.all_pages_accessible;
    integrity.is_complete = integrity.issues.is_empty();
    integrity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::memory::{span, MemoryDocument, MemoryReader};
    use crate::source::{DocumentReader, FontUsage, RawImage};
    use std::path::Path;

    fn run(doc: MemoryDocument, level: ValidationLevel) -> ValidationReport {
        let reader = MemoryReader::new(doc);
        let handle = reader.open(Path::new("/doc.pdf"), None).unwrap();
        validate(handle.as_ref(), level, ValidationOptions::default())
    }

    fn text_page(text: &str) -> Vec<crate::source::Span> {
        vec![span(text, [72.0, 100.0, 300.0, 112.0], "Helvetica", 12.0, 0)]
    }

    fn sample() -> MemoryDocument {
        MemoryDocument::new()
            .with_page(612.0, 792.0, text_page("First page"))
            .with_page(612.0, 792.0, text_page("Second page"))
            .with_metadata("title", "Sample")
            .with_metadata("author", "Ops")
            .with_metadata("creator", "Writer")
            .with_outline(1, "Intro")
            .with_outline(2, "Details")
    }

    #[test]
    fn standard_joins_text_with_newlines() {
        let r = run(sample(), ValidationLevel::Standard);
        assert!(r.is_valid);
        assert_eq!(r.page_count, 2);
        assert_eq!(r.extracted_text, "First page\nSecond page");
        assert_eq!(r.metadata.get("title").map(String::as_str), Some("Sample"));
        assert!(r.pages_info.is_empty() && r.quality_checks.is_none());
        assert!(r.errors.is_empty() && r.warnings.is_empty());
    }

    #[test]
    fn empty_document_warns_but_stays_valid_in_standard() {
        let r = run(MemoryDocument::new(), ValidationLevel::Standard);
        assert!(r.is_valid);
        assert_eq!(r.warnings.len(), 2);
    }

    #[test]
    fn enhanced_collects_pages_images_structure_quality() {
        let mut page = PageContent {
            width: 612.0,
            height: 792.0,
            rotation: 90,
            text: "abc".into(),
            link_count: 2,
            ..Default::default()
        };
        page.images.push(RawImage {
            width: 10,
            height: 20,
            colorspace: "DeviceRGB".into(),
            alpha: false,
            sample_size: 600,
        });
        let doc = sample().with_content(page);
        let r = run(doc, ValidationLevel::Enhanced);

        assert_eq!(r.pages_info.len(), 3);
        let third = &r.pages_info[2];
        assert_eq!(third.page_number, 3);
        assert_eq!(third.rotation, 90);
        assert!(third.has_images && third.has_links);
        assert_eq!(third.table_count, Some(0));
        assert_eq!(r.images_info.len(), 1);
        assert_eq!(r.images_info[0].page, 3);

        let s = r.document_structure.as_ref().unwrap();
        assert!(s.has_toc && s.has_bookmarks);
        assert_eq!((s.toc_entries, s.max_toc_level), (2, 2));

        let q = r.quality_checks.as_ref().unwrap();
        assert!(q.consistent_page_sizes);
        assert!(q.has_metadata);
        assert!((q.text_extraction_success_rate - 1.0).abs() < 1e-9);
        assert!((q.average_page_size - 612.0 * 792.0).abs() < 1e-6);
    }

    #[test]
    fn three_page_sizes_are_inconsistent() {
        let doc = MemoryDocument::new()
            .with_page(612.0, 792.0, text_page("a"))
            .with_page(595.0, 842.0, text_page("b"))
            .with_page(420.0, 595.0, text_page("c"));
        let r = run(doc, ValidationLevel::Enhanced);
        assert!(!r.quality_checks.unwrap().consistent_page_sizes);
    }

    #[test]
    fn page_sizes_compare_exactly() {
        let doc = MemoryDocument::new()
            .with_page(612.0, 792.0, text_page("a"))
            .with_page(612.3, 792.0, text_page("b"))
            .with_page(611.8, 792.0, text_page("c"));
        let r = run(doc, ValidationLevel::Enhanced);
        assert!(!r.quality_checks.unwrap().consistent_page_sizes);

        let doc = MemoryDocument::new()
            .with_page(612.0, 792.0, text_page("a"))
            .with_page(612.3, 792.0, text_page("b"))
            .with_page(612.0, 792.0, text_page("c"));
        let r = run(doc, ValidationLevel::Enhanced);
        assert!(r.quality_checks.unwrap().consistent_page_sizes);
    }

    #[test]
    fn disabled_tables_and_images_are_absent() {
        let reader = MemoryReader::new(sample());
        let handle = reader.open(Path::new("/doc.pdf"), None).unwrap();
        let r = validate(
            handle.as_ref(),
            ValidationLevel::Enhanced,
            ValidationOptions {
                extract_images: false,
                extract_tables: false,
            },
        );
        assert!(r.pages_info.iter().all(|p| p.table_count.is_none()));
        assert!(r.images_info.is_empty());
    }

    #[test]
    fn broken_outline_degrades_only_structure() {
        let mut doc = sample();
        doc.broken_outline = true;
        let r = run(doc, ValidationLevel::Enhanced);
        assert!(r.document_structure.is_none());
        assert!(r.errors.iter().any(|e| e.contains("structure analysis failed")));
        assert_eq!(r.pages_info.len(), 2, "page info survives");
        assert!(r.quality_checks.is_some());
    }

    #[test]
    fn broken_page_keeps_other_pages() {
        let r = run(sample().with_broken_page(1), ValidationLevel::Enhanced);
        assert!(!r.is_valid);
        assert_eq!(r.extracted_text, "First page");
        assert_eq!(r.pages_info.len(), 1);
        assert!(r.errors.iter().any(|e| e.contains("page 2")));
    }

    #[test]
    fn strict_fails_empty_text() {
        let doc = MemoryDocument::new().with_page(612.0, 792.0, vec![]);
        let r = run(doc, ValidationLevel::Strict);
        assert!(!r.is_valid);
        assert!(r.errors.iter().any(|e| e.contains("extractable text")));
    }

    #[test]
    fn strict_fails_zero_pages() {
        let r = run(MemoryDocument::new(), ValidationLevel::Strict);
        assert!(!r.is_valid);
        assert!(r.errors.iter().any(|e| e.contains("at least one page")));
    }

    #[test]
    fn strict_missing_metadata_is_warning_only() {
        let doc = MemoryDocument::new()
            .with_page(612.0, 792.0, text_page("body"))
            .with_outline(1, "Intro");
        let r = run(doc, ValidationLevel::Strict);
        assert!(r.is_valid, "errors: {:?}", r.errors);
        assert_eq!(
            r.warnings
                .iter()
                .filter(|w| w.contains("recommends metadata"))
                .count(),
            3
        );
    }

    #[test]
    fn strict_reports_non_embedded_fonts_on_first_five_pages() {
        let page = |name: &str| PageContent {
            width: 612.0,
            height: 792.0,
            text: "x".into(),
            fonts: vec![FontUsage {
                name: name.into(),
                embedded: false,
            }],
            ..Default::default()
        };
        let mut doc = MemoryDocument::new();
        for i in 0..7 {
            doc = doc.with_content(page(&format!("Font{i}")));
        }
        let r = run(doc, ValidationLevel::Strict);
        let pdfa = r.pdf_a_compliance.unwrap();
        assert!(!pdfa.fonts_embedded);
        assert!(!pdfa.is_compliant);
        assert_eq!(pdfa.issues.len(), FONT_SCAN_PAGES);
        let access = r.accessibility.unwrap();
        assert!(!access.has_structure);
        assert_eq!(access.issues.len(), 1);
    }

    #[test]
    fn strict_integrity_flags_unreadable_pages() {
        let r = run(sample().with_broken_page(0), ValidationLevel::Strict);
        let integrity = r.integrity.unwrap();
        assert!(!integrity.all_pages_accessible);
        assert!(!integrity.is_complete);
        assert_eq!(integrity.issues.len(), 1);
        assert!(r.accessibility.unwrap().has_structure);
    }
}
