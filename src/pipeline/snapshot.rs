//! Page snapshots: render, thumbnail, store, commit.
//!
//! Work is split in two halves:
//!
//! 1. [`render_pages`] blocks (pdfium rendering and PNG encoding) and runs
//!    inside `spawn_blocking` with the rest of the document pass.
//! 2. [`SnapshotPipeline::store`] uploads the encoded pages concurrently,
//!    buffers every record and commits them in one batch. If any page fails,
//!    nothing is committed and the objects already uploaded are removed.
//!
//! Keys are derived from task id and page number only, so a retried attempt
//! overwrites its own earlier objects instead of leaking new ones. For the
//! same reason a rollback never deletes a key that the task's committed set
//! still references.

use crate::error::{SectionError, ValidatorError};
use crate::model::PageSnapshot;
use crate::pipeline::encode;
use crate::pipeline::layout::{self, PageLayout};
use crate::pipeline::validate::PageCache;
use crate::repository::Repository;
use crate::source::DocumentHandle;
use crate::storage::{ObjectMetadata, ObjectStore};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SNAPSHOT_PREFIX: &str = "pdf-snapshots";
const PNG: &str = "image/png";

/// `pdf-snapshots/{task_id}/page_{NNNN}.png`
pub fn snapshot_key(task_id: &str, page_num: u32) -> String {
    format!("{SNAPSHOT_PREFIX}/{task_id}/page_{page_num:04}.png")
}

/// `pdf-snapshots/{task_id}/thumbnails/page_{NNNN}_thumb.png`
pub fn thumbnail_key(task_id: &str, page_num: u32) -> String {
    format!("{SNAPSHOT_PREFIX}/{task_id}/thumbnails/page_{page_num:04}_thumb.png")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotOptions {
    pub dpi: u32,
    pub generate_thumbnails: bool,
    pub thumbnail_size: (u32, u32),
    pub upload_concurrency: usize,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            dpi: 150,
            generate_thumbnails: true,
            thumbnail_size: (200, 280),
            upload_concurrency: 4,
        }
    }
}

/// One page, rendered and encoded, waiting for upload.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_num: u32,
    pub page_width: f64,
    pub page_height: f64,
    pub image_width: u32,
    pub image_height: u32,
    pub png: Vec<u8>,
    /// `None` when thumbnails are off or the thumbnail failed.
    pub thumbnail_png: Option<Vec<u8>>,
    pub layout: PageLayout,
}

/// Render and encode every page. Blocking.
pub fn render_pages(
    doc: &dyn DocumentHandle,
    pages: &PageCache,
    options: &SnapshotOptions,
) -> Result<Vec<RenderedPage>, ValidatorError> {
    let scale = options.dpi as f32 / 72.0;
    let mut rendered = Vec::with_capacity(pages.len());

    for (index, content) in pages.readable() {
        let page_num = index as u32 + 1;
        let image = doc
            .render_page(index, scale)
            .map_err(|e| ValidatorError::RasterisationFailed {
                page: page_num as usize,
                detail: e.to_string(),
            })?;
        let png = encode::encode_png(&image).map_err(|e| ValidatorError::RasterisationFailed {
            page: page_num as usize,
            detail: e.to_string(),
        })?;

        let thumbnail_png = if options.generate_thumbnails {
            let (max_w, max_h) = options.thumbnail_size;
            let thumb = encode::thumbnail(&image, max_w, max_h);
            match encode::encode_png(&thumb) {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    let e = SectionError::Encode {
                        page: page_num as usize,
                        detail: e.to_string(),
                    };
                    warn!("thumbnail skipped: {}", e);
                    None
                }
            }
        } else {
            None
        };

        debug!(
            "page {}: snapshot {}x{} px, {} bytes",
            page_num,
            image.width(),
            image.height(),
            png.len()
        );
        rendered.push(RenderedPage {
            page_num,
            page_width: content.width,
            page_height: content.height,
            image_width: image.width(),
            image_height: image.height(),
            png,
            thumbnail_png,
            layout: layout::analyze_page(content),
        });
    }
    Ok(rendered)
}

// ── Read-side aggregates ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageStats {
    pub total_size_bytes: u64,
    pub average_size_bytes: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentStats {
    pub total_text_blocks: usize,
    pub total_images: usize,
    pub total_tables: u32,
    pub avg_text_blocks_per_page: f64,
    pub avg_images_per_page: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayoutStats {
    pub pages_with_header: usize,
    pub pages_with_footer: usize,
    pub column_distribution: BTreeMap<u8, usize>,
}

/// Aggregate over a task's snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotStatistics {
    pub task_id: String,
    pub total_pages: usize,
    pub storage: StorageStats,
    pub content: ContentStats,
    /// Pages per primary font.
    pub font_usage: BTreeMap<String, usize>,
    pub layout: LayoutStats,
    pub dpi: Option<u32>,
    pub image_format: Option<String>,
}

impl SnapshotStatistics {
    pub fn from_snapshots(task_id: &str, snapshots: &[PageSnapshot]) -> Self {
        let n = snapshots.len();
        let avg = |total: f64| if n == 0 { 0.0 } else { total / n as f64 };

        let total_size: u64 = snapshots.iter().map(|s| s.image_size).sum();
        let total_text_blocks: usize = snapshots.iter().map(|s| s.text_blocks_count).sum();
        let total_images: usize = snapshots.iter().map(|s| s.images_count).sum();

        let mut font_usage = BTreeMap::new();
        let mut column_distribution = BTreeMap::new();
        for s in snapshots {
            if let Some(font) = &s.primary_font {
                *font_usage.entry(font.clone()).or_insert(0) += 1;
            }
            *column_distribution.entry(s.columns_count.max(1)).or_insert(0) += 1;
        }

        Self {
            task_id: task_id.to_string(),
            total_pages: n,
            storage: StorageStats {
                total_size_bytes: total_size,
                average_size_bytes: avg(total_size as f64),
            },
            content: ContentStats {
                total_text_blocks,
                total_images,
                total_tables: snapshots.iter().map(|s| s.tables_count).sum(),
                avg_text_blocks_per_page: avg(total_text_blocks as f64),
                avg_images_per_page: avg(total_images as f64),
            },
            font_usage,
            layout: LayoutStats {
                pages_with_header: snapshots.iter().filter(|s| s.has_header).count(),
                pages_with_footer: snapshots.iter().filter(|s| s.has_footer).count(),
                column_distribution,
            },
            dpi: snapshots.first().map(|s| s.dpi),
            image_format: snapshots.first().map(|s| s.image_format.clone()),
        }
    }
}

/// Outcome of deleting a task's snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDeletion {
    pub deleted_records: usize,
    pub deleted_objects: Vec<String>,
    pub failed_objects: Vec<String>,
}

// ── Pipeline ─────────────────────────────────────────────────────────────

/// Stores, reads and deletes snapshots through the injected collaborators.
#[derive(Clone)]
pub struct SnapshotPipeline {
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn Repository>,
}

impl SnapshotPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, repo: Arc<dyn Repository>) -> Self {
        Self { store, repo }
    }

    /// Upload every page and commit the records as one batch.
    pub async fn store(
        &self,
        task_id: &str,
        pages: Vec<RenderedPage>,
        options: &SnapshotOptions,
    ) -> Result<Vec<PageSnapshot>, ValidatorError> {
        let dpi = options.dpi;
        let results: Vec<Result<PageSnapshot, ValidatorError>> = stream::iter(
            pages
                .into_iter()
                .map(|page| self.upload_page(task_id, dpi, page)),
        )
        .buffer_unordered(options.upload_concurrency.max(1))
        .collect()
        .await;

        let mut snapshots = Vec::with_capacity(results.len());
        let mut first_error = None;
        for r in results {
            match r {
                Ok(s) => snapshots.push(s),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            warn!("task {}: snapshot upload failed, rolling back: {}", task_id, e);
            self.roll_back(task_id, &snapshots).await;
            return Err(e);
        }

        snapshots.sort_by_key(|s| s.page_num);
        if let Err(e) = self.repo.commit_snapshots(task_id, snapshots.clone()).await {
            warn!("task {}: snapshot commit failed, rolling back: {}", task_id, e);
            self.roll_back(task_id, &snapshots).await;
            return Err(e);
        }

        info!("task {}: {} snapshots committed", task_id, snapshots.len());
        Ok(snapshots)
    }

    async fn upload_page(
        &self,
        task_id: &str,
        dpi: u32,
        page: RenderedPage,
    ) -> Result<PageSnapshot, ValidatorError> {
        let key = snapshot_key(task_id, page.page_num);
        let image_size = page.png.len() as u64;

        let mut metadata = ObjectMetadata::new();
        metadata.insert("task_id".into(), task_id.to_string());
        metadata.insert("page_num".into(), page.page_num.to_string());
        metadata.insert("dpi".into(), dpi.to_string());
        self.store.put(&key, page.png, PNG, metadata.clone()).await?;

        let thumbnail_key = match page.thumbnail_png {
            Some(bytes) => {
                let thumb_key = thumbnail_key(task_id, page.page_num);
                metadata.insert("type".into(), "thumbnail".into());
                match self.store.put(&thumb_key, bytes, PNG, metadata).await {
                    Ok(()) => Some(thumb_key),
                    Err(e) => {
                        warn!("page {}: thumbnail not stored: {}", page.page_num, e);
                        None
                    }
                }
            }
            None => None,
        };

        let layout = page.layout;
        Ok(PageSnapshot {
            task_id: task_id.to_string(),
            page_num: page.page_num,
            object_key: key,
            thumbnail_key,
            page_width: page.page_width,
            page_height: page.page_height,
            dpi,
            image_width: page.image_width,
            image_height: page.image_height,
            image_format: "png".into(),
            image_size,
            text_blocks_count: layout.text_blocks_count,
            images_count: layout.images_count,
            tables_count: layout.tables_count,
            primary_font: layout.primary_font,
            font_sizes: layout.font_sizes,
            has_header: layout.has_header,
            has_footer: layout.has_footer,
            columns_count: layout.columns_count,
            created_at: Utc::now(),
        })
    }

    /// Best-effort removal of the objects behind `uploaded`, except keys the
    /// committed set of `task_id` points to.
    async fn roll_back(&self, task_id: &str, uploaded: &[PageSnapshot]) {
        let committed: HashSet<String> = match self.repo.list_snapshots(task_id).await {
            Ok(previous) => previous.iter().flat_map(object_keys).collect(),
            Err(e) => {
                warn!("rollback: committed set unknown, keeping objects: {}", e);
                return;
            }
        };
        for key in uploaded
            .iter()
            .flat_map(object_keys)
            .filter(|k| !committed.contains(k))
        {
            if let Err(e) = self.store.delete(&key).await {
                warn!("rollback: could not delete {}: {}", key, e);
            }
        }
    }

    /// Snapshots of a task, optionally only one page.
    pub async fn snapshots(
        &self,
        task_id: &str,
        page_num: Option<u32>,
    ) -> Result<Vec<PageSnapshot>, ValidatorError> {
        let mut all = self.repo.list_snapshots(task_id).await?;
        if let Some(p) = page_num {
            all.retain(|s| s.page_num == p);
        }
        Ok(all)
    }

    /// PNG bytes of a page snapshot or its thumbnail.
    pub async fn image(
        &self,
        task_id: &str,
        page_num: u32,
        thumbnail: bool,
    ) -> Result<Vec<u8>, ValidatorError> {
        let not_found = || ValidatorError::SnapshotNotFound {
            task_id: task_id.to_string(),
            page: page_num,
        };
        let snapshot = self
            .snapshots(task_id, Some(page_num))
            .await?
            .into_iter()
            .next()
            .ok_or_else(not_found)?;
        let key = if thumbnail {
            snapshot.thumbnail_key.ok_or_else(not_found)?
        } else {
            snapshot.object_key
        };
        self.store.get(&key).await
    }

    pub async fn statistics(&self, task_id: &str) -> Result<SnapshotStatistics, ValidatorError> {
        let snapshots = self.repo.list_snapshots(task_id).await?;
        Ok(SnapshotStatistics::from_snapshots(task_id, &snapshots))
    }

    /// Delete every object, collecting failures, then the records.
    pub async fn delete(&self, task_id: &str) -> Result<SnapshotDeletion, ValidatorError> {
        let snapshots = self.repo.list_snapshots(task_id).await?;
        let mut outcome = SnapshotDeletion::default();

        for key in snapshots.iter().flat_map(object_keys) {
            match self.store.delete(&key).await {
                Ok(()) => outcome.deleted_objects.push(key),
                Err(e) => {
                    warn!("snapshot delete: {}", e);
                    outcome.failed_objects.push(key);
                }
            }
        }

        outcome.deleted_records = self.repo.delete_snapshots(task_id).await?;
        info!(
            "task {}: {} snapshot records deleted, {} objects failed",
            task_id,
            outcome.deleted_records,
            outcome.failed_objects.len()
        );
        Ok(outcome)
    }
}

fn object_keys(s: &PageSnapshot) -> impl Iterator<Item = String> {
    std::iter::once(s.object_key.clone()).chain(s.thumbnail_key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use crate::source::memory::{span, MemoryDocument, MemoryReader};
    use crate::source::DocumentReader;
    use crate::storage::MemoryObjectStore;
    use std::path::Path;

    fn doc() -> MemoryDocument {
        let body = |t: &str| {
            vec![
                span("Header", [72.0, 20.0, 200.0, 32.0], "Helvetica-Bold", 14.0, 16),
                span(t, [72.0, 300.0, 300.0, 312.0], "Helvetica", 10.0, 0),
                span("7", [300.0, 770.0, 310.0, 780.0], "Helvetica", 8.0, 0),
            ]
        };
        MemoryDocument::new()
            .with_page(612.0, 792.0, body("one"))
            .with_page(612.0, 792.0, body("two"))
    }

    fn render(doc: MemoryDocument, options: &SnapshotOptions) -> Vec<RenderedPage> {
        let reader = MemoryReader::new(doc);
        let handle = reader.open(Path::new("/a.pdf"), None).unwrap();
        let pages = PageCache::load(handle.as_ref());
        render_pages(handle.as_ref(), &pages, options).unwrap()
    }

    fn pipeline() -> (SnapshotPipeline, Arc<MemoryObjectStore>, Arc<MemoryRepository>) {
        let store = Arc::new(MemoryObjectStore::new());
        let repo = Arc::new(MemoryRepository::new());
        (SnapshotPipeline::new(store.clone(), repo.clone()), store, repo)
    }

    #[test]
    fn keys_are_zero_padded_and_unique() {
        assert_eq!(snapshot_key("t1", 1), "pdf-snapshots/t1/page_0001.png");
        assert_eq!(
            thumbnail_key("t1", 12),
            "pdf-snapshots/t1/thumbnails/page_0012_thumb.png"
        );
        assert_eq!(snapshot_key("t1", 3), snapshot_key("t1", 3));
        assert_ne!(snapshot_key("t1", 3), snapshot_key("t2", 3));
        assert_ne!(snapshot_key("t1", 3), snapshot_key("t1", 4));
    }

    #[test]
    fn render_scales_by_dpi_and_packages_layout() {
        let rendered = render(doc(), &SnapshotOptions::default());
        assert_eq!(rendered.len(), 2);
        let p = &rendered[0];
        assert_eq!((p.image_width, p.image_height), (1275, 1650));
        assert!(p.layout.has_header && p.layout.has_footer);
        assert_eq!(p.layout.text_blocks_count, 3);
        let thumb = image::load_from_memory(p.thumbnail_png.as_ref().unwrap()).unwrap();
        assert!(thumb.width() <= 200 && thumb.height() <= 280);
    }

    #[test]
    fn render_failure_is_fatal() {
        let mut d = doc();
        d.unrenderable_pages.insert(1);
        let reader = MemoryReader::new(d);
        let handle = reader.open(Path::new("/a.pdf"), None).unwrap();
        let pages = PageCache::load(handle.as_ref());
        let err = render_pages(handle.as_ref(), &pages, &SnapshotOptions::default()).unwrap_err();
        assert!(matches!(err, ValidatorError::RasterisationFailed { page: 2, .. }));
    }

    #[tokio::test]
    async fn store_uploads_and_commits() {
        let (pipeline, store, repo) = pipeline();
        let options = SnapshotOptions::default();
        let snaps = pipeline.store("t1", render(doc(), &options), &options).await.unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(store.len(), 4);
        assert_eq!(repo.list_snapshots("t1").await.unwrap().len(), 2);

        let info = store.info(&snapshot_key("t1", 2)).await.unwrap();
        assert_eq!(info.metadata.get("dpi").map(String::as_str), Some("150"));
        let thumb_info = store.info(&thumbnail_key("t1", 2)).await.unwrap();
        assert_eq!(thumb_info.metadata.get("type").map(String::as_str), Some("thumbnail"));
    }

    #[tokio::test]
    async fn thumbnail_upload_failure_is_not_fatal() {
        let (pipeline, store, _repo) = pipeline();
        store.fail_puts_matching("thumbnails/");
        let options = SnapshotOptions::default();
        let snaps = pipeline.store("t1", render(doc(), &options), &options).await.unwrap();
        assert_eq!(snaps.len(), 2);
        assert!(snaps.iter().all(|s| s.thumbnail_key.is_none()));
        let err = pipeline.image("t1", 1, true).await.unwrap_err();
        assert!(matches!(err, ValidatorError::SnapshotNotFound { .. }));
        assert!(!pipeline.image("t1", 1, false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn page_upload_failure_rolls_back_everything() {
        let (pipeline, store, repo) = pipeline();
        store.fail_puts_matching("page_0002.png");
        let options = SnapshotOptions::default();
        let err = pipeline
            .store("t1", render(doc(), &options), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidatorError::StorageWrite { .. }));
        assert!(repo.list_snapshots("t1").await.unwrap().is_empty());
        assert!(store.is_empty(), "uploaded objects removed");
    }

    #[tokio::test]
    async fn commit_failure_rolls_back_objects() {
        let (pipeline, store, repo) = pipeline();
        repo.fail_snapshot_commits(true);
        let options = SnapshotOptions::default();
        assert!(pipeline
            .store("t1", render(doc(), &options), &options)
            .await
            .is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn failed_rerun_keeps_committed_objects() {
        let (pipeline, store, repo) = pipeline();
        let options = SnapshotOptions::default();
        pipeline.store("t1", render(doc(), &options), &options).await.unwrap();

        store.fail_puts_matching("page_0002.png");
        assert!(pipeline
            .store("t1", render(doc(), &options), &options)
            .await
            .is_err());

        assert_eq!(repo.list_snapshots("t1").await.unwrap().len(), 2);
        assert_eq!(store.len(), 4);
        for page in 1..=2 {
            assert!(!pipeline.image("t1", page, false).await.unwrap().is_empty());
            assert!(!pipeline.image("t1", page, true).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn failed_rerun_removes_only_keys_outside_committed_set() {
        let (pipeline, store, repo) = pipeline();
        let no_thumbs = SnapshotOptions {
            generate_thumbnails: false,
            ..SnapshotOptions::default()
        };
        pipeline.store("t1", render(doc(), &no_thumbs), &no_thumbs).await.unwrap();
        assert_eq!(store.len(), 2);

        repo.fail_snapshot_commits(true);
        let options = SnapshotOptions::default();
        assert!(pipeline
            .store("t1", render(doc(), &options), &options)
            .await
            .is_err());

        let committed = repo.list_snapshots("t1").await.unwrap();
        assert!(committed.iter().all(|s| s.thumbnail_key.is_none()));
        assert_eq!(store.len(), 2, "new thumbnails removed, committed pages kept");
        assert!(!store.exists(&thumbnail_key("t1", 1)).await.unwrap());
        assert!(store.exists(&snapshot_key("t1", 1)).await.unwrap());
    }

    #[tokio::test]
    async fn rerun_replaces_the_committed_set() {
        let (pipeline, store, repo) = pipeline();
        let options = SnapshotOptions::default();
        pipeline.store("t1", render(doc(), &options), &options).await.unwrap();
        let again = pipeline.store("t1", render(doc(), &options), &options).await.unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(repo.list_snapshots("t1").await.unwrap().len(), 2);
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn statistics_and_delete() {
        let (pipeline, store, _repo) = pipeline();
        let options = SnapshotOptions::default();
        pipeline.store("t1", render(doc(), &options), &options).await.unwrap();

        let stats = pipeline.statistics("t1").await.unwrap();
        assert_eq!(stats.total_pages, 2);
        assert_eq!(stats.content.total_text_blocks, 6);
        assert!((stats.content.avg_text_blocks_per_page - 3.0).abs() < 1e-9);
        assert_eq!(stats.layout.pages_with_header, 2);
        assert_eq!(stats.layout.column_distribution.get(&1), Some(&2));
        assert_eq!(stats.font_usage.get("Helvetica"), Some(&2));
        assert_eq!(stats.dpi, Some(150));

        store.fail_deletes_matching("page_0001_thumb");
        let outcome = pipeline.delete("t1").await.unwrap();
        assert_eq!(outcome.deleted_records, 2);
        assert_eq!(outcome.deleted_objects.len(), 3);
        assert_eq!(outcome.failed_objects, vec![thumbnail_key("t1", 1)]);
        assert!(pipeline.snapshots("t1", None).await.unwrap().is_empty());
    }
}
