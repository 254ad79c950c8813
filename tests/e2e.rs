//! End-to-end integration tests for edgequake-pdfvalidate.
//!
//! The in-memory tests drive the full task lifecycle (queue, attempts,
//! retries, persistence) over fixture documents and always run.
//!
//! The pdfium tests open real PDF files in `./test_cases/` and are gated
//! behind the `E2E_ENABLED` environment variable.
//!
//! Run with:
//!   E2E_ENABLED=1 DYLD_LIBRARY_PATH=. cargo test --test e2e -- --nocapture

use edgequake_pdfvalidate::source::memory::span;
use edgequake_pdfvalidate::{
    BlockFilter, DocumentProcessor, MemoryDocument, MemoryObjectStore, MemoryReader,
    MemoryRepository, PdfiumReader, ProcessorConfig, Repository, TaskManager, TaskStatus,
    ValidationLevel,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

/// Skip this test if E2E_ENABLED is not set *or* no PDF file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP: test file not found: {}", p.display());
            return;
        }
        p
    }};
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A file that passes source checks; the in-memory reader ignores its body.
fn placeholder_pdf() -> tempfile::NamedTempFile {
    let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    f.write_all(b"%PDF-1.7\n%fixture\n").unwrap();
    f
}

/// Three pages; page 2 carries a code with its label on the same line.
fn catalogue() -> MemoryDocument {
    MemoryDocument::new()
        .with_metadata("title", "职业分类大典")
        .with_metadata("author", "Editorial board")
        .with_page(
            612.0,
            792.0,
            vec![
                span("职业分类大典", [72.0, 90.0, 400.0, 114.0], "SimHei-Bold", 24.0, 16),
                span("第一大类", [72.0, 140.0, 220.0, 158.0], "SimHei", 18.0, 0),
                span("说明文字", [90.0, 180.0, 300.0, 192.0], "SimSun", 10.0, 0),
            ],
        )
        .with_page(
            612.0,
            792.0,
            vec![
                span("第一中类", [72.0, 90.0, 220.0, 104.0], "SimHei", 14.0, 0),
                span("1-01-01-01", [90.0, 130.0, 160.0, 142.0], "SimSun", 10.0, 0),
                span("中国共产党机关负责人", [170.0, 130.0, 380.0, 142.0], "SimSun", 10.0, 0),
            ],
        )
        .with_page(
            612.0,
            792.0,
            vec![span("附录", [72.0, 90.0, 160.0, 104.0], "SimSun", 10.0, 0)],
        )
}

struct Harness {
    manager: Arc<TaskManager>,
    processor: Arc<DocumentProcessor>,
    repo: Arc<MemoryRepository>,
    store: Arc<MemoryObjectStore>,
    reader: Arc<MemoryReader>,
}

fn harness(reader: MemoryReader, config: ProcessorConfig) -> Harness {
    init_tracing();
    let reader = Arc::new(reader);
    let repo = Arc::new(MemoryRepository::new());
    let store = Arc::new(MemoryObjectStore::new());
    let config = Arc::new(config);
    let processor = Arc::new(DocumentProcessor::new(
        reader.clone(),
        store.clone(),
        repo.clone(),
        config.clone(),
    ));
    let manager = Arc::new(TaskManager::new(repo.clone(), processor.clone(), &config));
    Harness {
        manager,
        processor,
        repo,
        store,
        reader,
    }
}

fn fast_config(max_retries: u32) -> ProcessorConfig {
    ProcessorConfig::builder()
        .validation_level(ValidationLevel::Strict)
        .max_retries(max_retries)
        .retry_backoff_ms(5)
        .build()
        .unwrap()
}

// ── In-memory end-to-end ─────────────────────────────────────────────────────

#[tokio::test]
async fn code_on_page_two_gets_same_row_label() {
    let pdf = placeholder_pdf();
    let h = harness(MemoryReader::new(catalogue()), fast_config(0));
    let id = h
        .manager
        .submit(pdf.path().to_string_lossy(), None)
        .await
        .unwrap();
    h.manager.run_until_idle().await.unwrap();

    let task = h.manager.task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error_message);

    let coded = h
        .processor
        .blocks(
            &id,
            &BlockFilter {
                has_occupation_code: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(coded.len(), 1);
    let block = &coded[0];
    assert_eq!(block.page_num, 2);
    assert_eq!(block.occupation_code.as_deref(), Some("1-01-01-01"));
    assert_eq!(block.occupation_name.as_deref(), Some("中国共产党机关负责人"));
    assert_eq!(block.confidence_score, Some(0.9));

    let summary = task.result_summary.unwrap();
    assert_eq!(summary.page_count, 3);
    assert_eq!(summary.structure.unique_occupation_codes, vec!["1-01-01-01"]);
    assert_eq!(summary.structure.page_snapshots.extracted, 3);

    let result = h.repo.results(&id).await.unwrap().pop().unwrap();
    assert!(result.report.is_valid, "{:?}", result.report.errors);
    assert!(result.report.integrity.is_some());
    assert!(result
        .report
        .warnings
        .iter()
        .any(|w| w.contains("'creator'")));

    let stats = h.processor.snapshots().statistics(&id).await.unwrap();
    assert_eq!(stats.total_pages, 3);
    assert_eq!(stats.dpi, Some(150));
}

#[tokio::test]
async fn exhausted_retries_end_failed() {
    let pdf = placeholder_pdf();
    let reader = MemoryReader::new(catalogue()).fail_next_opens(100);
    let h = harness(reader, fast_config(2));
    let id = h
        .manager
        .submit(pdf.path().to_string_lossy(), None)
        .await
        .unwrap();
    h.manager.run_until_idle().await.unwrap();

    let task = h.manager.task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(h.reader.open_count(), 3, "max_retries + 1 attempts");
    let msg = task.error_message.unwrap();
    assert!(msg.contains("max retries"), "got: {msg}");
    assert!(msg.contains("injected open failure"), "cause kept: {msg}");
    assert!(h.repo.results(&id).await.unwrap().is_empty());
}

#[tokio::test]
async fn success_on_attempt_k_reflects_only_that_attempt() {
    let pdf = placeholder_pdf();
    let reader = MemoryReader::new(catalogue()).fail_next_opens(2);
    let h = harness(reader, fast_config(3));
    let id = h
        .manager
        .submit(pdf.path().to_string_lossy(), None)
        .await
        .unwrap();
    h.manager.run_until_idle().await.unwrap();

    let task = h.manager.task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.retry_count, 2);
    assert!(task.error_message.is_none());
    assert_eq!(h.reader.open_count(), 3);
    assert_eq!(h.repo.results(&id).await.unwrap().len(), 1);
    assert_eq!(h.repo.list_snapshots(&id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn failed_rerun_leaves_committed_snapshots_readable() {
    let pdf = placeholder_pdf();
    let h = harness(MemoryReader::new(catalogue()), fast_config(1));
    let id = h
        .manager
        .submit(pdf.path().to_string_lossy(), None)
        .await
        .unwrap();
    h.manager.run_until_idle().await.unwrap();
    assert_eq!(h.repo.list_snapshots(&id).await.unwrap().len(), 3);

    h.store.fail_puts_matching("page_0002.png");
    h.manager.enqueue(&id).unwrap();
    h.manager.run_until_idle().await.unwrap();

    let task = h.manager.task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("after 2 attempts"));

    let snapshots = h.processor.snapshots();
    assert_eq!(snapshots.snapshots(&id, None).await.unwrap().len(), 3);
    for page in 1..=3 {
        let png = snapshots.image(&id, page, false).await.unwrap();
        assert!(image::load_from_memory(&png).is_ok(), "page {page} still readable");
    }
}

#[tokio::test]
async fn hierarchy_is_deterministic_across_runs() {
    let pdf = placeholder_pdf();
    let h = harness(MemoryReader::new(catalogue()), fast_config(0));
    let source = pdf.path().to_string_lossy().into_owned();
    let ids = h
        .manager
        .submit_batch([source.clone(), source], None)
        .await
        .unwrap();
    h.manager.run_until_idle().await.unwrap();

    let mut sequences = Vec::new();
    for id in &ids {
        let blocks = h.processor.blocks(id, &BlockFilter::default()).await.unwrap();
        assert!(blocks.iter().all(|b| (1..=4).contains(&b.hierarchy_level)));
        sequences.push(
            blocks
                .iter()
                .map(|b| b.hierarchy_level)
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(sequences[0], sequences[1]);
    assert_eq!(sequences[0][0], 1, "largest font is level 1");
}

#[tokio::test]
async fn snapshot_delete_clears_records() {
    let pdf = placeholder_pdf();
    let h = harness(MemoryReader::new(catalogue()), fast_config(0));
    let id = h
        .manager
        .submit(pdf.path().to_string_lossy(), None)
        .await
        .unwrap();
    h.manager.run_until_idle().await.unwrap();

    let png = h.processor.snapshots().image(&id, 2, false).await.unwrap();
    assert_eq!(&png[1..4], b"PNG");
    let outcome = h.processor.snapshots().delete(&id).await.unwrap();
    assert_eq!(outcome.deleted_records, 3);
    assert_eq!(outcome.deleted_objects.len(), 6);
    assert!(outcome.failed_objects.is_empty());
    assert!(h.processor.snapshots().image(&id, 2, false).await.is_err());
}

// ── pdfium-backed (real files) ───────────────────────────────────────────────

fn pdfium_harness(config: ProcessorConfig) -> Option<(Arc<TaskManager>, Arc<MemoryRepository>)> {
    init_tracing();
    let lib = std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from);
    let reader = match PdfiumReader::bind(lib.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            println!("SKIP: {e}");
            return None;
        }
    };
    let repo = Arc::new(MemoryRepository::new());
    let config = Arc::new(config);
    let processor = DocumentProcessor::new(
        Arc::new(reader),
        Arc::new(MemoryObjectStore::new()),
        repo.clone(),
        config.clone(),
    );
    let manager = Arc::new(TaskManager::new(repo.clone(), Arc::new(processor), &config));
    Some((manager, repo))
}

#[tokio::test]
async fn test_pdfium_strict_validation() {
    let path = e2e_skip_unless_ready!(test_cases_dir().join("sample.pdf"));
    let Some((manager, repo)) = pdfium_harness(fast_config(0)) else {
        return;
    };

    let id = manager
        .submit(path.to_string_lossy(), None)
        .await
        .unwrap();
    manager.run_until_idle().await.unwrap();

    let task = manager.task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed, "{:?}", task.error_message);
    let result = repo.results(&id).await.unwrap().pop().unwrap();
    assert!(result.report.page_count > 0);
    assert_eq!(result.report.pages_info.len(), result.report.page_count);
    assert!(result.report.pdf_a_compliance.is_some());
    assert_eq!(
        repo.list_snapshots(&id).await.unwrap().len(),
        result.report.page_count
    );
    println!(
        "{} pages, {} chars, {} blocks",
        result.report.page_count,
        result.report.extracted_text.len(),
        task.result_summary.unwrap().structure.total_blocks
    );
}

#[tokio::test]
async fn test_pdfium_rejects_non_pdf() {
    if std::env::var("E2E_ENABLED").is_err() {
        println!("SKIP");
        return;
    }
    let Some((manager, _repo)) = pdfium_harness(fast_config(0)) else {
        return;
    };
    let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
    f.write_all(b"not a pdf at all").unwrap();

    let id = manager
        .submit(f.path().to_string_lossy(), None)
        .await
        .unwrap();
    manager.run_until_idle().await.unwrap();
    let task = manager.task(&id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message.unwrap().contains("not a valid PDF"));
}
