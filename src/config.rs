//! Configuration types for PDF validation tasks.
//!
//! Every processing knob lives in [`ProcessorConfig`], built via its
//! [`ProcessorConfigBuilder`]. One config is shared (behind an `Arc`) by the
//! processor and the worker pool, so two runs with the same config behave
//! identically.

use crate::error::ValidatorError;
use crate::progress::TaskProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default upper bound on accepted source files (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Configuration for validation, extraction and snapshot work.
///
/// Built via [`ProcessorConfig::builder()`] or using
/// [`ProcessorConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdfvalidate::{ProcessorConfig, ValidationLevel};
///
/// let config = ProcessorConfig::builder()
///     .validation_level(ValidationLevel::Strict)
///     .snapshot_dpi(200)
///     .max_retries(5)
///     .build()
///     .unwrap();
/// assert_eq!(config.snapshot_dpi, 200);
/// ```
#[derive(Clone)]
pub struct ProcessorConfig {
    /// Default validation level for submitted tasks. Default: standard.
    pub validation_level: ValidationLevel,

    /// Sources larger than this are rejected before opening. Default: 50 MiB.
    pub max_file_size: u64,

    /// Collect per-image info during enhanced validation. Default: true.
    pub extract_images: bool,

    /// Run the table heuristic during enhanced validation. Default: true.
    pub extract_tables: bool,

    /// Render and store page snapshots. Default: true.
    pub extract_snapshots: bool,

    /// Rendering DPI for page snapshots. Range: 72–400. Default: 150.
    ///
    /// Pages are scaled by `dpi / 72` relative to their point size.
    pub snapshot_dpi: u32,

    /// Store a thumbnail next to each snapshot. Default: true.
    pub generate_thumbnails: bool,

    /// Bounding box for thumbnails in pixels. Default: 200 × 280.
    ///
    /// Aspect ratio is preserved and pages are never upscaled.
    pub thumbnail_size: (u32, u32),

    /// Concurrent object-store uploads per task. Default: 4.
    pub upload_concurrency: usize,

    /// Worker pool size. Default: 4.
    pub workers: usize,

    /// Retries after the first failed attempt. Default: 3.
    ///
    /// A task that fails `max_retries + 1` times ends `failed`.
    pub max_retries: u32,

    /// Fixed delay before a failed task is redelivered. Default: 60 000 ms.
    pub retry_backoff_ms: u64,

    /// Wall-clock limit for one attempt. Default: 600 s.
    pub attempt_timeout_secs: u64,

    /// Download timeout for URL sources in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Password tried before the empty password for encrypted sources.
    pub password: Option<String>,

    /// Optional lifecycle callbacks.
    pub progress_callback: Option<Arc<dyn TaskProgressCallback>>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            validation_level: ValidationLevel::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            extract_images: true,
            extract_tables: true,
            extract_snapshots: true,
            snapshot_dpi: 150,
            generate_thumbnails: true,
            thumbnail_size: (200, 280),
            upload_concurrency: 4,
            workers: 4,
            max_retries: 3,
            retry_backoff_ms: 60_000,
            attempt_timeout_secs: 600,
            download_timeout_secs: 120,
            password: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ProcessorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfig")
            .field("validation_level", &self.validation_level)
            .field("max_file_size", &self.max_file_size)
            .field("extract_images", &self.extract_images)
            .field("extract_tables", &self.extract_tables)
            .field("extract_snapshots", &self.extract_snapshots)
            .field("snapshot_dpi", &self.snapshot_dpi)
            .field("generate_thumbnails", &self.generate_thumbnails)
            .field("thumbnail_size", &self.thumbnail_size)
            .field("upload_concurrency", &self.upload_concurrency)
            .field("workers", &self.workers)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("attempt_timeout_secs", &self.attempt_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn TaskProgressCallback>"),
            )
            .finish()
    }
}

impl ProcessorConfig {
    /// Create a new builder for `ProcessorConfig`.
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder {
            config: Self::default(),
        }
    }

    /// Page scale factor for snapshot rendering.
    pub fn render_scale(&self) -> f32 {
        self.snapshot_dpi as f32 / 72.0
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

/// Builder for [`ProcessorConfig`].
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl fmt::Debug for ProcessorConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessorConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ProcessorConfigBuilder {
    pub fn validation_level(mut self, level: ValidationLevel) -> Self {
        self.config.validation_level = level;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn extract_tables(mut self, v: bool) -> Self {
        self.config.extract_tables = v;
        self
    }

    pub fn extract_snapshots(mut self, v: bool) -> Self {
        self.config.extract_snapshots = v;
        self
    }

    pub fn snapshot_dpi(mut self, dpi: u32) -> Self {
        self.config.snapshot_dpi = dpi.clamp(72, 400);
        self
    }

    pub fn generate_thumbnails(mut self, v: bool) -> Self {
        self.config.generate_thumbnails = v;
        self
    }

    pub fn thumbnail_size(mut self, width: u32, height: u32) -> Self {
        self.config.thumbnail_size = (width.max(1), height.max(1));
        self
    }

    pub fn upload_concurrency(mut self, n: usize) -> Self {
        self.config.upload_concurrency = n.max(1);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn attempt_timeout_secs(mut self, secs: u64) -> Self {
        self.config.attempt_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn TaskProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProcessorConfig, ValidatorError> {
        let c = &self.config;
        if c.snapshot_dpi < 72 || c.snapshot_dpi > 400 {
            return Err(ValidatorError::InvalidConfig(format!(
                "snapshot DPI must be 72–400, got {}",
                c.snapshot_dpi
            )));
        }
        if c.max_file_size == 0 {
            return Err(ValidatorError::InvalidConfig(
                "max file size must be > 0".into(),
            ));
        }
        if c.attempt_timeout_secs == 0 {
            return Err(ValidatorError::InvalidConfig(
                "attempt timeout must be ≥ 1 second".into(),
            ));
        }
        if c.workers == 0 || c.upload_concurrency == 0 {
            return Err(ValidatorError::InvalidConfig(
                "workers and upload concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How much checking a validation run performs. Each level includes the
/// checks of the levels before it.
///
/// | Level | Adds |
/// |-------|------|
/// | standard | metadata, joined text, empty-document warnings |
/// | enhanced | per-page info, images, outline, quality ratios |
/// | strict | PDF/A font scan, accessibility, integrity, hard failures |
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    #[default]
    Standard,
    Enhanced,
    Strict,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationLevel::Standard => "standard",
            ValidationLevel::Enhanced => "enhanced",
            ValidationLevel::Strict => "strict",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ValidationLevel {
    type Err = ValidatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "basic" => Ok(ValidationLevel::Standard),
            "enhanced" => Ok(ValidationLevel::Enhanced),
            "strict" => Ok(ValidationLevel::Strict),
            other => Err(ValidatorError::InvalidConfig(format!(
                "unknown validation level '{other}' (expected standard, enhanced or strict)"
            ))),
        }
    }
}
