//! pdfium-backed document reader.
//!
//! pdfium reports geometry with the origin at the bottom-left corner of the
//! page. Everything leaving this module is flipped to a top-left origin
//! (`y = page_height - pdf_y`) so the layout heuristics can reason about
//! "top of page" the way a reader does.
//!
//! All methods here block; callers run them inside `spawn_blocking`.

use super::{DocumentHandle, DocumentReader, FontUsage, OutlineEntry, PageContent, RawImage, Span};
use crate::error::{SectionError, ValidatorError};
use crate::model::{FLAG_BOLD, FLAG_ITALIC};
use image::{ColorType, DynamicImage};
use pdfium_render::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Outlines deeper or longer than this are truncated (cyclic outline trees
/// exist in the wild).
const MAX_OUTLINE_ENTRIES: usize = 10_000;

/// Production [`DocumentReader`] built on pdfium-render.
pub struct PdfiumReader {
    pdfium: Pdfium,
}

impl PdfiumReader {
    /// Bind to the pdfium library at `lib_path`, or search the working
    /// directory and then the system library path.
    pub fn bind(lib_path: Option<&Path>) -> Result<Self, ValidatorError> {
        let bindings = match lib_path {
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library()),
        }
        .map_err(|e| ValidatorError::PdfiumBindingFailed(format!("{:?}", e)))?;

        info!("pdfium bound");
        Ok(Self {
            pdfium: Pdfium::new(bindings),
        })
    }
}

fn is_password_error(e: &PdfiumError) -> bool {
    let err_str = format!("{:?}", e);
    err_str.contains("Password") || err_str.contains("password")
}

impl DocumentReader for PdfiumReader {
    fn open<'a>(
        &'a self,
        path: &Path,
        password: Option<&'a str>,
    ) -> Result<Box<dyn DocumentHandle + 'a>, ValidatorError> {
        let document = match self.pdfium.load_pdf_from_file(path, password) {
            Ok(doc) => doc,
            Err(e) if is_password_error(&e) && password != Some("") => {
                debug!("{}: encrypted, trying empty password", path.display());
                self.pdfium
                    .load_pdf_from_file(path, Some(""))
                    .map_err(|_| ValidatorError::PasswordRequired {
                        path: path.to_path_buf(),
                    })?
            }
            Err(e) if is_password_error(&e) => {
                return Err(ValidatorError::PasswordRequired {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(ValidatorError::DocumentOpen {
                    path: path.to_path_buf(),
                    detail: format!("{:?}", e),
                })
            }
        };

        info!(
            "PDF loaded: {} ({} pages)",
            path.display(),
            document.pages().len()
        );
        Ok(Box::new(PdfiumDocument { document }))
    }
}

struct PdfiumDocument<'a> {
    document: PdfDocument<'a>,
}

impl PdfiumDocument<'_> {
    fn load_page(&self, index: usize) -> Result<PdfPage<'_>, String> {
        let index = u16::try_from(index).map_err(|_| format!("page index {index} out of range"))?;
        self.document.pages().get(index).map_err(|e| format!("{:?}", e))
    }
}

impl DocumentHandle for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        let metadata = self.document.metadata();
        let tags = [
            ("title", PdfDocumentMetadataTagType::Title),
            ("author", PdfDocumentMetadataTagType::Author),
            ("subject", PdfDocumentMetadataTagType::Subject),
            ("keywords", PdfDocumentMetadataTagType::Keywords),
            ("creator", PdfDocumentMetadataTagType::Creator),
            ("producer", PdfDocumentMetadataTagType::Producer),
            ("creationDate", PdfDocumentMetadataTagType::CreationDate),
            ("modDate", PdfDocumentMetadataTagType::ModificationDate),
        ];

        tags.into_iter()
            .filter_map(|(key, tag)| {
                metadata.get(tag).and_then(|t| {
                    let v = t.value().trim().to_string();
                    if v.is_empty() {
                        None
                    } else {
                        Some((key.to_string(), v))
                    }
                })
            })
            .collect()
    }

    fn page(&self, index: usize) -> Result<PageContent, SectionError> {
        let page_err = |detail: String| SectionError::PageRead {
            page: index + 1,
            detail,
        };

        let page = self.load_page(index).map_err(page_err)?;
        let width = page.width().value as f64;
        let height = page.height().value as f64;
        let rotation = match page.rotation() {
            Ok(PdfPageRenderRotation::Degrees90) => 90,
            Ok(PdfPageRenderRotation::Degrees180) => 180,
            Ok(PdfPageRenderRotation::Degrees270) => 270,
            _ => 0,
        };

        let flip = |left: f32, top: f32, right: f32, bottom: f32| -> [f64; 4] {
            [
                left as f64,
                height - top as f64,
                right as f64,
                height - bottom as f64,
            ]
        };

        let text_page = page.text().map_err(|e| page_err(format!("{:?}", e)))?;
        let text = text_page.all();
        let blocks: Vec<[f64; 4]> = text_page
            .segments()
            .iter()
            .filter(|segment| !segment.text().trim().is_empty())
            .map(|segment| {
                let b = segment.bounds();
                flip(b.left().value, b.top().value, b.right().value, b.bottom().value)
            })
            .collect();

        let mut spans = Vec::new();
        let mut images = Vec::new();
        let mut fonts: Vec<FontUsage> = Vec::new();

        for object in page.objects().iter() {
            if let Some(text_object) = object.as_text_object() {
                let bounds = match object.bounds() {
                    Ok(b) => b,
                    Err(e) => {
                        debug!("page {}: text object without bounds: {:?}", index + 1, e);
                        continue;
                    }
                };
                let font = text_object.font();
                let name = font.name();
                if !fonts.iter().any(|f| f.name == name) {
                    fonts.push(FontUsage {
                        name: name.clone(),
                        embedded: font.is_embedded().unwrap_or(false),
                    });
                }
                spans.push(Span {
                    text: text_object.text(),
                    bbox: flip(
                        bounds.left().value,
                        bounds.top().value,
                        bounds.right().value,
                        bounds.bottom().value,
                    ),
                    flags: style_flags(&name, &FontDescriptor::of(&font)),
                    font: name,
                    size: text_object.scaled_font_size().value as f64,
                });
            } else if let Some(image_object) = object.as_image_object() {
                match image_object.get_raw_image() {
                    Ok(img) => images.push(raw_image_info(&img)),
                    Err(e) => warn!("page {}: unreadable image: {:?}", index + 1, e),
                }
            }
        }

        debug!(
            "page {}: {} spans, {} blocks, {} images",
            index + 1,
            spans.len(),
            blocks.len(),
            images.len()
        );

        Ok(PageContent {
            width,
            height,
            rotation,
            text,
            spans,
            blocks,
            images,
            link_count: page.links().len() as usize,
            fonts,
        })
    }

    fn outline(&self) -> Result<Vec<OutlineEntry>, SectionError> {
        let mut entries = Vec::new();
        if let Some(root) = self.document.bookmarks().root() {
            collect_outline(root, 1, &mut entries);
        }
        Ok(entries)
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<DynamicImage, SectionError> {
        let render_err = |detail: String| SectionError::Render {
            page: index + 1,
            detail,
        };

        let page = self.load_page(index).map_err(render_err)?;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| render_err(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            index + 1,
            image.width(),
            image.height()
        );
        Ok(image)
    }
}

fn collect_outline(first: PdfBookmark<'_>, level: u32, out: &mut Vec<OutlineEntry>) {
    let mut current = Some(first);
    while let Some(bookmark) = current {
        if out.len() >= MAX_OUTLINE_ENTRIES {
            return;
        }
        out.push(OutlineEntry {
            level,
            title: bookmark.title().unwrap_or_default(),
        });
        if let Some(child) = bookmark.first_child() {
            collect_outline(child, level + 1, out);
        }
        current = bookmark.next_sibling();
    }
}

/// Weight and slant as declared by the font descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct FontDescriptor {
    /// `None` when the descriptor carries no usable weight.
    pub weight: Option<u32>,
    pub italic: bool,
}

impl FontDescriptor {
    fn of(font: &PdfFont<'_>) -> Self {
        let weight = font.weight().ok().map(weight_value).filter(|w| *w > 0);
        let italic = font.is_italic() || font.italic_angle().map(|a| a != 0).unwrap_or(false);
        Self { weight, italic }
    }
}

fn weight_value(weight: PdfFontWeight) -> u32 {
    match weight {
        PdfFontWeight::Weight100 => 100,
        PdfFontWeight::Weight200 => 200,
        PdfFontWeight::Weight300 => 300,
        PdfFontWeight::Weight400Normal => 400,
        PdfFontWeight::Weight500 => 500,
        PdfFontWeight::Weight600 => 600,
        PdfFontWeight::Weight700Bold => 700,
        PdfFontWeight::Weight800 => 800,
        PdfFontWeight::Weight900 => 900,
        PdfFontWeight::Custom(w) => w,
    }
}

/// Style bits for a span. A declared weight decides boldness; without one
/// the font name does. Italic is set by either the descriptor or the name.
pub(crate) fn style_flags(font_name: &str, descriptor: &FontDescriptor) -> u32 {
    let lower = font_name.to_ascii_lowercase();
    let mut flags = 0;
    let bold = match descriptor.weight {
        Some(weight) => weight >= 600,
        None => ["bold", "black", "heavy", "semibold", "demi"]
            .iter()
            .any(|k| lower.contains(k)),
    };
    if bold {
        flags |= FLAG_BOLD;
    }
    if descriptor.italic || lower.contains("italic") || lower.contains("oblique") {
        flags |= FLAG_ITALIC;
    }
    flags
}

fn raw_image_info(img: &DynamicImage) -> RawImage {
    let color = img.color();
    let colorspace = match color {
        ColorType::L8 | ColorType::L16 | ColorType::La8 | ColorType::La16 => "DeviceGray",
        _ => "DeviceRGB",
    };
    RawImage {
        width: img.width(),
        height: img.height(),
        colorspace: colorspace.to_string(),
        alpha: color.has_alpha(),
        sample_size: img.as_bytes().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_flags_fall_back_to_font_names() {
        let empty = FontDescriptor::default();
        assert_eq!(style_flags("Helvetica", &empty), 0);
        assert_eq!(style_flags("Helvetica-Bold", &empty), FLAG_BOLD);
        assert_eq!(style_flags("Arial-BoldItalicMT", &empty), FLAG_BOLD | FLAG_ITALIC);
        assert_eq!(style_flags("Times-Oblique", &empty), FLAG_ITALIC);
        assert_eq!(style_flags("SourceHanSans-Heavy", &empty), FLAG_BOLD);
    }

    #[test]
    fn declared_weight_overrides_font_name() {
        let heavy = FontDescriptor {
            weight: Some(700),
            italic: false,
        };
        let regular = FontDescriptor {
            weight: Some(400),
            italic: false,
        };
        assert_eq!(style_flags("F1", &heavy), FLAG_BOLD);
        assert_eq!(style_flags("Foo-Bold", &regular), 0);

        let slanted = FontDescriptor {
            weight: Some(400),
            italic: true,
        };
        assert_eq!(style_flags("F2", &slanted), FLAG_ITALIC);
        assert_eq!(weight_value(PdfFontWeight::Weight600), 600);
        assert_eq!(weight_value(PdfFontWeight::Custom(950)), 950);
    }

    #[test]
    fn reader_is_shareable_across_workers() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PdfiumReader>();
    }

    #[test]
    fn raw_image_info_reports_colorspace_and_alpha() {
        let rgba = DynamicImage::new_rgba8(4, 2);
        let info = raw_image_info(&rgba);
        assert_eq!((info.width, info.height), (4, 2));
        assert_eq!(info.colorspace, "DeviceRGB");
        assert!(info.alpha);
        assert_eq!(info.sample_size, 4 * 2 * 4);

        let gray = DynamicImage::new_luma8(3, 3);
        let info = raw_image_info(&gray);
        assert_eq!(info.colorspace, "DeviceGray");
        assert!(!info.alpha);
    }
}
