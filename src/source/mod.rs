//! Document reading seam.
//!
//! The pipeline never talks to pdfium directly. It consumes a
//! [`DocumentReader`] that opens a file into a [`DocumentHandle`], and every
//! page is materialised into an owned [`PageContent`] in top-left page
//! coordinates. [`pdfium::PdfiumReader`] is the production reader;
//! [`memory::MemoryReader`] serves fixtures.

pub mod memory;
pub mod pdfium;

use crate::error::{SectionError, ValidatorError};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One positioned text run as reported by the reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub text: String,
    /// `[x0, y0, x1, y1]`, origin top-left.
    pub bbox: [f64; 4],
    pub font: String,
    pub size: f64,
    /// Style bits: see [`crate::model::FLAG_BOLD`] and [`crate::model::FLAG_ITALIC`].
    pub flags: u32,
}

/// An embedded image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub colorspace: String,
    pub alpha: bool,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontUsage {
    pub name: String,
    pub embedded: bool,
}

/// Everything the pipeline needs from one page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    /// Points.
    pub width: f64,
    pub height: f64,
    pub rotation: u16,
    /// Full page text in reading order.
    pub text: String,
    pub spans: Vec<Span>,
    /// Block-level text boxes `[x0, y0, x1, y1]`, origin top-left.
    pub blocks: Vec<[f64; 4]>,
    pub images: Vec<RawImage>,
    pub link_count: usize,
    /// Distinct fonts used on the page.
    pub fonts: Vec<FontUsage>,
}

/// Table-of-contents entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineEntry {
    /// 1 for top-level entries.
    pub level: u32,
    pub title: String,
}

/// An opened document.
pub trait DocumentHandle {
    fn page_count(&self) -> usize;

    /// Non-empty metadata values keyed by `title`, `author`, `subject`,
    /// `keywords`, `creator`, `producer`, `creationDate`, `modDate`.
    fn metadata(&self) -> BTreeMap<String, String>;

    /// Read page `index` (0-based).
    fn page(&self, index: usize) -> Result<PageContent, SectionError>;

    fn outline(&self) -> Result<Vec<OutlineEntry>, SectionError>;

    /// Rasterise page `index` at `scale` times its point size.
    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, SectionError>;
}

/// Opens documents. Implementations are shared by all workers.
pub trait DocumentReader: Send + Sync {
    /// Open `path`. Encrypted documents are retried with the empty password
    /// when `password` does not unlock them.
    fn open<'a>(
        &'a self,
        path: &Path,
        password: Option<&'a str>,
    ) -> Result<Box<dyn DocumentHandle + 'a>, ValidatorError>;
}
