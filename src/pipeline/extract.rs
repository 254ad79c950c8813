//! Span → [`Block`] normalisation.
//!
//! Extraction is all-or-nothing: one unreadable page fails the whole
//! document, so a task never persists a partial block set.

use crate::error::ValidatorError;
use crate::model::{BBox, Block};
use crate::pipeline::validate::PageCache;
use crate::source::{DocumentHandle, Span};
use tracing::debug;

/// Extract blocks from every page, in page order then span order.
pub fn extract_blocks(task_id: &str, doc: &dyn DocumentHandle) -> Result<Vec<Block>, ValidatorError> {
    let mut blocks = Vec::new();
    for index in 0..doc.page_count() {
        let page = doc.page(index).map_err(|e| ValidatorError::PageExtraction {
            page: index + 1,
            detail: e.to_string(),
        })?;
        let page_blocks = blocks_from_spans(task_id, index as u32 + 1, &page.spans)?;
        debug!("page {}: {} blocks", index + 1, page_blocks.len());
        blocks.extend(page_blocks);
    }
    Ok(blocks)
}

/// Same as [`extract_blocks`] over pages that were already read.
pub fn blocks_from_pages(task_id: &str, pages: &PageCache) -> Result<Vec<Block>, ValidatorError> {
    let mut blocks = Vec::new();
    for index in 0..pages.len() {
        let page = match pages.get(index) {
            Some(Ok(page)) => page,
            Some(Err(e)) => {
                return Err(ValidatorError::PageExtraction {
                    page: index + 1,
                    detail: e.to_string(),
                })
            }
            None => break,
        };
        blocks.extend(blocks_from_spans(task_id, index as u32 + 1, &page.spans)?);
    }
    Ok(blocks)
}

/// Turn one page's spans into blocks. Blank spans are dropped and the
/// survivors are numbered from 0.
pub fn blocks_from_spans(
    task_id: &str,
    page_num: u32,
    spans: &[Span],
) -> Result<Vec<Block>, ValidatorError> {
    let mut blocks = Vec::with_capacity(spans.len());
    for span in spans {
        let text = span.text.trim();
        if text.is_empty() {
            continue;
        }
        let bbox = BBox::from_array(span.bbox).ok_or_else(|| ValidatorError::PageExtraction {
            page: page_num as usize,
            detail: format!("span '{}' has a non-finite bounding box", text),
        })?;
        blocks.push(Block::new(
            task_id,
            page_num,
            blocks.len() as u32,
            text,
            bbox,
            span.font.as_str(),
            span.size,
            span.flags,
        ));
    }
    Ok(blocks)
}
