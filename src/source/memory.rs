//! In-memory document reader.
//!
//! Serves [`MemoryDocument`] fixtures through the same [`DocumentReader`]
//! contract pdfium satisfies, with knobs for injecting open, page and render
//! failures.

use super::{DocumentHandle, DocumentReader, OutlineEntry, PageContent, Span};
use crate::error::{SectionError, ValidatorError};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// A fixture document.
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    pub pages: Vec<PageContent>,
    pub metadata: BTreeMap<String, String>,
    pub outline: Vec<OutlineEntry>,
    /// 0-based pages whose reads fail.
    pub broken_pages: BTreeSet<usize>,
    /// 0-based pages whose renders fail.
    pub unrenderable_pages: BTreeSet<usize>,
    pub broken_outline: bool,
}

impl MemoryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a page assembled from spans. Each span also becomes one block
    /// box, and the page text is the span texts joined by newlines.
    pub fn with_page(mut self, width: f64, height: f64, spans: Vec<Span>) -> Self {
        let text = spans
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let blocks = spans
            .iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| s.bbox)
            .collect();
        self.pages.push(PageContent {
            width,
            height,
            text,
            spans,
            blocks,
            ..Default::default()
        });
        self
    }

    pub fn with_content(mut self, page: PageContent) -> Self {
        self.pages.push(page);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_outline(mut self, level: u32, title: &str) -> Self {
        self.outline.push(OutlineEntry {
            level,
            title: title.to_string(),
        });
        self
    }

    pub fn with_broken_page(mut self, index: usize) -> Self {
        self.broken_pages.insert(index);
        self
    }
}

/// Shorthand for building a span in tests and fixtures.
pub fn span(text: &str, bbox: [f64; 4], font: &str, size: f64, flags: u32) -> Span {
    Span {
        text: text.to_string(),
        bbox,
        font: font.to_string(),
        size,
        flags,
    }
}

/// A [`DocumentReader`] over fixtures.
///
/// Documents registered with [`MemoryReader::with_document`] are served by
/// path; anything else falls back to the default document, if set.
#[derive(Debug, Default)]
pub struct MemoryReader {
    default_document: Option<MemoryDocument>,
    documents: HashMap<PathBuf, MemoryDocument>,
    failing_opens: AtomicUsize,
    opens: AtomicUsize,
}

impl MemoryReader {
    /// Serve `document` for every path.
    pub fn new(document: MemoryDocument) -> Self {
        Self {
            default_document: Some(document),
            ..Default::default()
        }
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, document: MemoryDocument) -> Self {
        self.documents.insert(path.into(), document);
        self
    }

    /// Make the next `n` opens fail with a document-open error.
    pub fn fail_next_opens(self, n: usize) -> Self {
        self.failing_opens.store(n, Ordering::SeqCst);
        self
    }

    /// Number of `open` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl DocumentReader for MemoryReader {
    fn open<'a>(
        &'a self,
        path: &Path,
        _password: Option<&'a str>,
    ) -> Result<Box<dyn DocumentHandle + 'a>, ValidatorError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(ValidatorError::DocumentOpen {
                path: path.to_path_buf(),
                detail: "injected open failure".into(),
            });
        }

        let document = self
            .documents
            .get(path)
            .or(self.default_document.as_ref())
            .ok_or_else(|| ValidatorError::DocumentOpen {
                path: path.to_path_buf(),
                detail: "no fixture registered for path".into(),
            })?;
        Ok(Box::new(document))
    }
}

impl DocumentHandle for &MemoryDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        self.metadata.clone()
    }

    fn page(&self, index: usize) -> Result<PageContent, SectionError> {
        if self.broken_pages.contains(&index) {
            return Err(SectionError::PageRead {
                page: index + 1,
                detail: "injected page failure".into(),
            });
        }
        self.pages
            .get(index)
            .cloned()
            .ok_or_else(|| SectionError::PageRead {
                page: index + 1,
                detail: format!("page index out of range (total {})", self.pages.len()),
            })
    }

    fn outline(&self) -> Result<Vec<OutlineEntry>, SectionError> {
        if self.broken_outline {
            return Err(SectionError::Outline("injected outline failure".into()));
        }
        Ok(self.outline.clone())
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, SectionError> {
        let page = self.pages.get(index).ok_or_else(|| SectionError::Render {
            page: index + 1,
            detail: format!("page index out of range (total {})", self.pages.len()),
        })?;
        if self.unrenderable_pages.contains(&index) {
            return Err(SectionError::Render {
                page: index + 1,
                detail: "injected render failure".into(),
            });
        }
        let width = ((page.width * scale as f64).round() as u32).max(1);
        let height = ((page.height * scale as f64).round() as u32).max(1);
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb([255, 255, 255]),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> MemoryDocument {
        MemoryDocument::new()
            .with_page(
                612.0,
                792.0,
                vec![
                    span("Heading", [72.0, 72.0, 300.0, 90.0], "Helvetica-Bold", 18.0, 16),
                    span("   ", [72.0, 100.0, 80.0, 110.0], "Helvetica", 12.0, 0),
                ],
            )
            .with_metadata("title", "Fixture")
    }

    #[test]
    fn serves_default_document() {
        let reader = MemoryReader::new(doc());
        let handle = reader.open(Path::new("/any.pdf"), None).unwrap();
        assert_eq!(handle.page_count(), 1);
        let page = handle.page(0).unwrap();
        assert_eq!(page.spans.len(), 2);
        assert_eq!(page.blocks.len(), 1, "blank spans are not block boxes");
        assert_eq!(handle.metadata().get("title").map(String::as_str), Some("Fixture"));
    }

    #[test]
    fn injected_open_failures_run_out() {
        let reader = MemoryReader::new(doc()).fail_next_opens(2);
        assert!(reader.open(Path::new("/a.pdf"), None).is_err());
        assert!(reader.open(Path::new("/a.pdf"), None).is_err());
        assert!(reader.open(Path::new("/a.pdf"), None).is_ok());
        assert_eq!(reader.open_count(), 3);
    }

    #[test]
    fn render_scales_page_size() {
        let reader = MemoryReader::new(doc());
        let handle = reader.open(Path::new("/a.pdf"), None).unwrap();
        let img = handle.render_page(0, 2.0).unwrap();
        assert_eq!((img.width(), img.height()), (1224, 1584));
        assert!(handle.render_page(5, 1.0).is_err());
    }

    #[test]
    fn broken_page_reports_one_based_number() {
        let reader = MemoryReader::new(doc().with_broken_page(0));
        let handle = reader.open(Path::new("/a.pdf"), None).unwrap();
        let err = handle.page(0).unwrap_err();
        assert_eq!(err.page(), Some(1));
    }
}
