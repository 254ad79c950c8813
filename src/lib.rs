//! # edgequake-pdfvalidate
//!
//! Validate PDF documents, reconstruct their outline from typography, link
//! occupation codes to their labels, and snapshot every page.
//!
//! ## Pipeline Overview
//!
//! ```text
//! task (path / URL / object key)
//!  │
//!  ├─ 1. Input      resolve to a local PDF, check size and magic bytes
//!  ├─ 2. Extract    spans → positioned blocks (all pages or nothing)
//!  ├─ 3. Hierarchy  levels 1–4 from font-size and indentation tiers
//!  ├─ 4. Codes      D-DD-DD-DD detection, forward label association
//!  ├─ 5. Validate   standard / enhanced / strict report
//!  ├─ 6. Snapshot   render, thumbnail, upload, one atomic commit
//!  └─ 7. Persist    blocks, result, task summary
//! ```
//!
//! Steps 2–6 (up to rendering) are blocking pdfium work and run in
//! `spawn_blocking`. [`TaskManager`] runs each attempt with a timeout and
//! retries failures with a fixed backoff up to `max_retries`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgequake_pdfvalidate::{
//!     DocumentProcessor, FsObjectStore, MemoryRepository, PdfiumReader, ProcessorConfig,
//!     TaskManager, ValidationLevel,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ProcessorConfig::default());
//!     let repo = Arc::new(MemoryRepository::new());
//!     let processor = DocumentProcessor::new(
//!         Arc::new(PdfiumReader::bind(None)?),
//!         Arc::new(FsObjectStore::new("store")),
//!         repo.clone(),
//!         config.clone(),
//!     );
//!     let manager = Arc::new(TaskManager::new(repo, Arc::new(processor), &config));
//!     let id = manager.submit("catalogue.pdf", Some(ValidationLevel::Strict)).await?;
//!     manager.run_until_idle().await?;
//!     println!("{:?}", manager.task(&id).await?.map(|t| t.status));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfvalidate` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdfvalidate = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod repository;
pub mod source;
pub mod storage;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ProcessorConfig, ProcessorConfigBuilder, ValidationLevel};
pub use error::{SectionError, ValidatorError};
pub use model::{
    BBox, Block, BlockFilter, BlockRef, BlockSummary, PageSnapshot, TaskStatus, ValidationTask,
};
pub use output::{ResultSummary, ValidationReport, ValidationResult};
pub use pipeline::snapshot::{SnapshotDeletion, SnapshotPipeline, SnapshotStatistics};
pub use process::{DocumentProcessor, TaskExecutor};
pub use progress::{NoopProgressCallback, ProgressCallback, TaskProgressCallback};
pub use repository::{MemoryRepository, Repository};
pub use source::memory::{MemoryDocument, MemoryReader};
pub use source::pdfium::PdfiumReader;
pub use source::{DocumentHandle, DocumentReader};
pub use storage::{FsObjectStore, MemoryObjectStore, ObjectStore};
pub use worker::{DeliveryOutcome, RetryDecision, RetryPolicy, TaskManager};
