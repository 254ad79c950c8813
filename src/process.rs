//! One validation attempt, end to end.
//!
//! [`DocumentProcessor`] is the production [`TaskExecutor`]: it resolves the
//! task source, runs the blocking document pass (open, read pages, extract,
//! classify, associate, validate, render) in `spawn_blocking`, then stores
//! snapshots, blocks and the result through the injected collaborators.
//!
//! Nothing is persisted until the blocking pass has succeeded, so an
//! unreadable or inaccessible document leaves no partial rows behind.

use crate::config::{ProcessorConfig, ValidationLevel};
use crate::error::ValidatorError;
use crate::model::{Block, BlockFilter, BlockSummary, PageSnapshot, ValidationTask};
use crate::output::{
    ResultSummary, SnapshotTotals, StructureSummary, ValidationReport, ValidationResult,
};
use crate::pipeline::snapshot::{self, RenderedPage, SnapshotOptions, SnapshotPipeline};
use crate::pipeline::validate::{self, PageCache, ValidationOptions};
use crate::pipeline::{codes, extract, hierarchy, input};
use crate::repository::Repository;
use crate::source::DocumentReader;
use crate::storage::ObjectStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Runs one attempt of a task.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &ValidationTask) -> Result<ResultSummary, ValidatorError>;
}

/// Output of the blocking half of an attempt.
#[derive(Debug)]
pub struct DocumentPass {
    pub blocks: Vec<Block>,
    pub report: ValidationReport,
    pub unique_codes: BTreeSet<String>,
    /// Empty when snapshots are disabled.
    pub rendered: Vec<RenderedPage>,
}

/// Open, extract, classify, validate and (optionally) render one document.
///
/// Blocking: call from `spawn_blocking` or a plain thread.
pub fn run_document_pass(
    reader: &dyn DocumentReader,
    path: &std::path::Path,
    task_id: &str,
    level: ValidationLevel,
    config: &ProcessorConfig,
) -> Result<DocumentPass, ValidatorError> {
    let doc = reader.open(path, config.password.as_deref())?;
    let pages = PageCache::load(doc.as_ref());
    debug!("task {}: {} pages read", task_id, pages.len());

    let mut blocks = extract::blocks_from_pages(task_id, &pages)?;
    hierarchy::classify(&mut blocks);
    codes::associate(&mut blocks);

    let report = validate::validate_with_pages(
        doc.as_ref(),
        &pages,
        level,
        ValidationOptions {
            extract_images: config.extract_images,
            extract_tables: config.extract_tables,
        },
    );
    let unique_codes = codes::find_all_codes(&report.extracted_text);

    let rendered = if config.extract_snapshots {
        snapshot::render_pages(doc.as_ref(), &pages, &snapshot_options(config))?
    } else {
        Vec::new()
    };

    Ok(DocumentPass {
        blocks,
        report,
        unique_codes,
        rendered,
    })
}

pub fn snapshot_options(config: &ProcessorConfig) -> SnapshotOptions {
    SnapshotOptions {
        dpi: config.snapshot_dpi,
        generate_thumbnails: config.generate_thumbnails,
        thumbnail_size: config.thumbnail_size,
        upload_concurrency: config.upload_concurrency,
    }
}

/// Production executor wired to explicit collaborators.
#[derive(Clone)]
pub struct DocumentProcessor {
    reader: Arc<dyn DocumentReader>,
    store: Arc<dyn ObjectStore>,
    repo: Arc<dyn Repository>,
    config: Arc<ProcessorConfig>,
    snapshots: SnapshotPipeline,
}

impl DocumentProcessor {
    pub fn new(
        reader: Arc<dyn DocumentReader>,
        store: Arc<dyn ObjectStore>,
        repo: Arc<dyn Repository>,
        config: Arc<ProcessorConfig>,
    ) -> Self {
        let snapshots = SnapshotPipeline::new(Arc::clone(&store), Arc::clone(&repo));
        Self {
            reader,
            store,
            repo,
            config,
            snapshots,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn snapshots(&self) -> &SnapshotPipeline {
        &self.snapshots
    }

    pub async fn blocks(
        &self,
        task_id: &str,
        filter: &BlockFilter,
    ) -> Result<Vec<Block>, ValidatorError> {
        self.repo.query_blocks(task_id, filter).await
    }

    pub async fn block_summary(&self, task_id: &str) -> Result<BlockSummary, ValidatorError> {
        let blocks = self.repo.query_blocks(task_id, &BlockFilter::default()).await?;
        Ok(BlockSummary::from_blocks(&blocks))
    }
}

#[async_trait]
impl TaskExecutor for DocumentProcessor {
    async fn execute(&self, task: &ValidationTask) -> Result<ResultSummary, ValidatorError> {
        let start = Instant::now();
        let task_id = task.task_id.clone();
        info!("task {}: validating '{}'", task_id, task.source);

        // ── Step 1: Resolve source ───────────────────────────────────────
        let resolved = input::resolve_source(
            &task.source,
            self.store.as_ref(),
            self.config.max_file_size,
            self.config.download_timeout_secs,
        )
        .await?;
        let file_size = resolved.file_size();

        // ── Step 2: Blocking document pass ───────────────────────────────
        let pass = {
            let reader = Arc::clone(&self.reader);
            let config = Arc::clone(&self.config);
            let path: PathBuf = resolved.path().to_path_buf();
            let id = task_id.clone();
            let level = task.validation_level;
            tokio::task::spawn_blocking(move || {
                run_document_pass(reader.as_ref(), &path, &id, level, &config)
            })
            .await
            .map_err(|e| ValidatorError::Internal(format!("Document task panicked: {}", e)))??
        };
        drop(resolved);
        info!(
            "task {}: {} pages, {} blocks, valid={}",
            task_id,
            pass.report.page_count,
            pass.blocks.len(),
            pass.report.is_valid
        );

        // ── Step 3: Store snapshots ──────────────────────────────────────
        let stored = if self.config.extract_snapshots {
            self.snapshots
                .store(&task_id, pass.rendered, &snapshot_options(&self.config))
                .await?
        } else {
            Vec::new()
        };

        // ── Step 4: Persist blocks ───────────────────────────────────────
        let summary = summarize(&pass.report, &pass.blocks, &pass.unique_codes, &stored);
        self.repo.replace_blocks(&task_id, pass.blocks).await?;

        // ── Step 5: Persist result ───────────────────────────────────────
        self.repo
            .insert_result(ValidationResult {
                task_id: task_id.clone(),
                source: task.source.clone(),
                file_size,
                processing_time: start.elapsed().as_secs_f64(),
                report: pass.report,
                created_at: Utc::now(),
            })
            .await?;

        Ok(summary)
    }
}

/// Compact summary stored on the task row.
pub fn summarize(
    report: &ValidationReport,
    blocks: &[Block],
    unique_codes: &BTreeSet<String>,
    snapshots: &[PageSnapshot],
) -> ResultSummary {
    let mut hierarchy_levels: BTreeMap<u8, usize> = (1..=4).map(|l| (l, 0)).collect();
    for b in blocks {
        *hierarchy_levels.entry(b.hierarchy_level).or_insert(0) += 1;
    }
    let fonts_used: BTreeSet<&str> = blocks
        .iter()
        .map(|b| b.font_name.as_str())
        .filter(|f| !f.is_empty())
        .collect();

    ResultSummary {
        is_valid: report.is_valid,
        page_count: report.page_count,
        text_length: report.extracted_text.chars().count(),
        has_errors: !report.errors.is_empty(),
        structure: StructureSummary {
            total_blocks: blocks.len(),
            with_occupation_code: blocks.iter().filter(|b| b.occupation_code.is_some()).count(),
            unique_occupation_codes: unique_codes.iter().cloned().collect(),
            hierarchy_levels,
            fonts_used: fonts_used.into_iter().map(String::from).collect(),
            page_snapshots: SnapshotTotals {
                extracted: snapshots.len(),
                total_size: snapshots.iter().map(|s| s.image_size).sum(),
                with_thumbnails: snapshots.iter().filter(|s| s.thumbnail_key.is_some()).count(),
            },
        },
    }
}
