//! Source resolution: turn a task's `source` string into a local PDF path.
//!
//! Three kinds of source are accepted, tried in this order:
//!
//! 1. `http://` / `https://` URLs, downloaded with reqwest;
//! 2. paths that exist on the local file system;
//! 3. keys in the configured [`ObjectStore`] (e.g. an upload area).
//!
//! Downloads land in a `TempDir` owned by [`ResolvedSource`], so the copy is
//! removed when the attempt drops it, even on error. Every kind is checked
//! against the size limit and the `%PDF` magic bytes before a reader sees it.

use crate::error::ValidatorError;
use crate::storage::ObjectStore;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A source ready for the document reader.
#[derive(Debug)]
pub enum ResolvedSource {
    /// Source was already a local file.
    Local { path: PathBuf, size: u64 },
    /// Source was fetched; the `TempDir` keeps the copy alive.
    Downloaded {
        path: PathBuf,
        size: u64,
        _temp_dir: TempDir,
    },
}

impl ResolvedSource {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedSource::Local { path, .. } => path,
            ResolvedSource::Downloaded { path, .. } => path,
        }
    }

    pub fn file_size(&self) -> u64 {
        match self {
            ResolvedSource::Local { size, .. } | ResolvedSource::Downloaded { size, .. } => *size,
        }
    }
}

/// Check if the source string looks like a URL.
pub fn is_url(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

/// Resolve `source` to a local PDF.
pub async fn resolve_source(
    source: &str,
    store: &dyn ObjectStore,
    max_file_size: u64,
    download_timeout_secs: u64,
) -> Result<ResolvedSource, ValidatorError> {
    if is_url(source) {
        return download_url(source, max_file_size, download_timeout_secs).await;
    }
    let path = PathBuf::from(source);
    if tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return resolve_local(path, max_file_size).await;
    }
    if !source.is_empty() && store.exists(source).await? {
        return fetch_object(source, store, max_file_size).await;
    }
    Err(ValidatorError::FileNotFound { path })
}

/// Validate a local file: regular, readable, non-empty, within the limit and
/// starting with `%PDF`.
async fn resolve_local(path: PathBuf, max_file_size: u64) -> Result<ResolvedSource, ValidatorError> {
    let meta = tokio::fs::metadata(&path)
        .await
        .map_err(|e| io_error(&path, e))?;
    if !meta.is_file() {
        return Err(ValidatorError::NotAFile { path });
    }
    let size = meta.len();
    check_size(&path, size, max_file_size)?;

    // Only the magic bytes are needed here.
    let mut file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| io_error(&path, e))?;
    let mut magic = [0u8; 4];
    {
        use tokio::io::AsyncReadExt;
        file.read_exact(&mut magic)
            .await
            .map_err(|_| ValidatorError::NotAPdf { path: path.clone(), magic })?;
    }
    if &magic != PDF_MAGIC {
        return Err(ValidatorError::NotAPdf { path, magic });
    }

    debug!("Resolved local PDF: {} ({} bytes)", path.display(), size);
    Ok(ResolvedSource::Local { path, size })
}

/// Download a URL into a temporary directory.
async fn download_url(
    url: &str,
    max_file_size: u64,
    timeout_secs: u64,
) -> Result<ResolvedSource, ValidatorError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| ValidatorError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            failed(format!("timed out after {}s", timeout_secs))
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }
    if let Some(len) = response.content_length() {
        if len > max_file_size {
            return Err(ValidatorError::FileTooLarge {
                size: len,
                limit: max_file_size,
            });
        }
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    let resolved = write_temp(&filename, &bytes, max_file_size).await?;
    info!("Downloaded to: {}", resolved.path().display());
    Ok(resolved)
}

/// Copy an object-store key into a temporary directory.
async fn fetch_object(
    key: &str,
    store: &dyn ObjectStore,
    max_file_size: u64,
) -> Result<ResolvedSource, ValidatorError> {
    let info = store.info(key).await?;
    check_size(Path::new(key), info.size, max_file_size)?;
    let bytes = store.get(key).await?;
    let filename = key
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("source.pdf");
    let resolved = write_temp(filename, &bytes, max_file_size).await?;
    debug!("Fetched object '{}' to {}", key, resolved.path().display());
    Ok(resolved)
}

async fn write_temp(
    filename: &str,
    bytes: &[u8],
    max_file_size: u64,
) -> Result<ResolvedSource, ValidatorError> {
    let temp_dir = TempDir::new().map_err(|e| ValidatorError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(filename);
    let size = bytes.len() as u64;
    check_size(&path, size, max_file_size)?;

    if bytes.len() < 4 || &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(ValidatorError::NotAPdf { path, magic });
    }

    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ValidatorError::Internal(format!("Failed to write temp file: {}", e)))?;

    Ok(ResolvedSource::Downloaded {
        path,
        size,
        _temp_dir: temp_dir,
    })
}

fn check_size(path: &Path, size: u64, limit: u64) -> Result<(), ValidatorError> {
    if size == 0 {
        return Err(ValidatorError::EmptyFile {
            path: path.to_path_buf(),
        });
    }
    if size > limit {
        return Err(ValidatorError::FileTooLarge { size, limit });
    }
    Ok(())
}

fn io_error(path: &Path, e: std::io::Error) -> ValidatorError {
    match e.kind() {
        std::io::ErrorKind::PermissionDenied => ValidatorError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => ValidatorError::FileNotFound {
            path: path.to_path_buf(),
        },
    }
}

/// Last URL path segment when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryObjectStore, ObjectMetadata};
    use std::io::Write;

    const LIMIT: u64 = 1024;

    fn pdf_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(bytes).unwrap();
        path
    }

    fn src(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("uploads/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn url_filename() {
        assert_eq!(filename_from_url("https://x.org/a/b/report.pdf"), "report.pdf");
        assert_eq!(filename_from_url("https://x.org/a/b/"), "downloaded.pdf");
        assert_eq!(filename_from_url("https://x.org/download"), "downloaded.pdf");
    }

    #[tokio::test]
    async fn local_pdf_resolves_with_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = pdf_file(dir.path(), "a.pdf", b"%PDF-1.7 rest");
        let store = MemoryObjectStore::new();
        let r = resolve_source(&src(&path), &store, LIMIT, 5).await.unwrap();
        assert_eq!(r.path(), path);
        assert_eq!(r.file_size(), 13);
    }

    #[tokio::test]
    async fn local_checks_reject_bad_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryObjectStore::new();

        let missing = dir.path().join("missing.pdf");
        let err = resolve_source(&src(&missing), &store, LIMIT, 5).await.unwrap_err();
        assert!(matches!(err, ValidatorError::FileNotFound { .. }));

        let err = resolve_source(&src(dir.path()), &store, LIMIT, 5).await.unwrap_err();
        assert!(matches!(err, ValidatorError::NotAFile { .. }));

        let empty = pdf_file(dir.path(), "empty.pdf", b"");
        let err = resolve_source(&src(&empty), &store, LIMIT, 5).await.unwrap_err();
        assert!(matches!(err, ValidatorError::EmptyFile { .. }));

        let png = pdf_file(dir.path(), "x.pdf", b"\x89PNG....");
        let err = resolve_source(&src(&png), &store, LIMIT, 5).await.unwrap_err();
        assert!(matches!(err, ValidatorError::NotAPdf { magic, .. } if &magic == b"\x89PNG"));

        let big = pdf_file(dir.path(), "big.pdf", &[b'%'; 2048]);
        let err = resolve_source(&src(&big), &store, LIMIT, 5).await.unwrap_err();
        assert!(matches!(err, ValidatorError::FileTooLarge { size: 2048, limit: LIMIT }));
    }

    #[tokio::test]
    async fn object_key_is_fetched_into_temp_dir() {
        let store = MemoryObjectStore::new();
        store
            .put("uploads/t1/doc.pdf", b"%PDF-1.4".to_vec(), "application/pdf", ObjectMetadata::new())
            .await
            .unwrap();
        let r = resolve_source("uploads/t1/doc.pdf", &store, LIMIT, 5).await.unwrap();
        assert!(matches!(r, ResolvedSource::Downloaded { .. }));
        assert!(r.path().ends_with("doc.pdf"));
        assert_eq!(std::fs::read(r.path()).unwrap(), b"%PDF-1.4");

        let temp_path = r.path().to_path_buf();
        drop(r);
        assert!(!temp_path.exists(), "temp copy removed on drop");
    }

    #[tokio::test]
    async fn store_outage_is_reported_not_hidden() {
        let store = MemoryObjectStore::new();
        store.fail_reads_matching("uploads/");
        let err = resolve_source("uploads/t1/doc.pdf", &store, LIMIT, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, ValidatorError::StorageRead { .. }), "got {err:?}");
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn object_that_is_not_a_pdf_is_rejected() {
        let store = MemoryObjectStore::new();
        store
            .put("uploads/notes.txt", b"hi".to_vec(), "text/plain", ObjectMetadata::new())
            .await
            .unwrap();
        let err = resolve_source("uploads/notes.txt", &store, LIMIT, 5).await.unwrap_err();
        assert!(matches!(err, ValidatorError::NotAPdf { magic, .. } if magic == [b'h', b'i', 0, 0]));
    }
}
