//! Progress-callback trait for task lifecycle events.
//!
//! Inject an [`Arc<dyn TaskProgressCallback>`] via
//! [`crate::config::ProcessorConfigBuilder::progress_callback`] to receive
//! events as the worker pool dequeues, retries and finishes tasks.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdfvalidate::{ProcessorConfig, TaskProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     finished: AtomicUsize,
//! }
//!
//! impl TaskProgressCallback for CountingCallback {
//!     fn on_task_complete(&self, task_id: &str, page_count: usize) {
//!         self.finished.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{task_id}: {page_count} pages validated");
//!     }
//! }
//!
//! let config = ProcessorConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { finished: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the lifecycle manager as tasks move through their states.
///
/// Workers run concurrently, so every method may be called from several
/// threads at once. All methods have default no-op implementations.
pub trait TaskProgressCallback: Send + Sync {
    /// Called when a task has been marked `processing`.
    ///
    /// # Arguments
    /// * `task_id`: the task being attempted
    /// * `attempt`: 1-based attempt number
    fn on_task_start(&self, task_id: &str, attempt: u32) {
        let _ = (task_id, attempt);
    }

    /// Called when an attempt failed and the task was requeued.
    fn on_attempt_failed(&self, task_id: &str, attempt: u32, error: &str) {
        let _ = (task_id, attempt, error);
    }

    /// Called when a task reached `completed`.
    fn on_task_complete(&self, task_id: &str, page_count: usize) {
        let _ = (task_id, page_count);
    }

    /// Called when a task reached `failed`.
    fn on_task_failed(&self, task_id: &str, error: &str) {
        let _ = (task_id, error);
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl TaskProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ProcessorConfig`].
pub type ProgressCallback = Arc<dyn TaskProgressCallback>;
