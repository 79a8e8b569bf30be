use codebase_processor::classifier::ClassificationReason;
use codebase_processor::watch::IgnoreFileWatcher;
use codebase_processor::{
    ConfigSource, JobEvent, JobOutcome, JobState, PolicyStore, ProcessorConfig, RootSession,
};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio::fs;
use tokio::sync::watch;
use tokio::time::timeout;

const POLICY: &str = r#"{
    "text_extensions": ["rs", "md", "toml"],
    "excluded_directories": ["target", ".git"],
    "max_file_size_mb": 1
}"#;

async fn project(root: &Path) {
    fs::create_dir_all(root.join("src/generated")).await.unwrap();
    fs::create_dir_all(root.join("target/debug")).await.unwrap();
    fs::write(root.join("Cargo.toml"), "[package]\nname = \"demo\"\n").await.unwrap();
    fs::write(root.join("src/main.rs"), "fn main() {}\n").await.unwrap();
    fs::write(root.join("src/generated/api.rs"), "// generated\n").await.unwrap();
    fs::write(root.join("target/debug/build.rs"), "// build output\n").await.unwrap();
    fs::write(root.join("logo.png"), [0x89u8, b'P', b'N', b'G']).await.unwrap();
}

async fn open_with(root: &Path, config: ProcessorConfig) -> RootSession {
    let store = PolicyStore::new(ConfigSource::Inline(POLICY.to_string()));
    RootSession::open(root, &store, config).await.unwrap()
}

async fn open(root: &Path) -> RootSession {
    open_with(root, ProcessorConfig::default()).await
}

/// Waits for the watcher to refresh until `done` holds, or fails after a few seconds.
async fn refresh_until(watcher: &mut IgnoreFileWatcher, done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        let left = deadline.saturating_duration_since(Instant::now());
        let changed = timeout(left, watcher.next_change())
            .await
            .expect("Timed out waiting for an ignore file change")
            .unwrap();
        assert!(changed, "Watcher event stream ended");
    }
}

#[tokio::test]
async fn test_collect_candidates_applies_policy() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    project(root).await;

    let session = open(root).await;
    assert_eq!(
        session.collect_candidates(),
        vec![
            root.join("Cargo.toml"),
            root.join("src/generated/api.rs"),
            root.join("src/main.rs"),
        ]
    );
}

#[tokio::test]
async fn test_ignore_file_is_loaded_and_refreshed() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    project(root).await;
    fs::write(root.join(".gitignore"), "# generated code\nsrc/generated/\n").await.unwrap();

    let session = open(root).await;
    let generated = root.join("src/generated/api.rs");
    assert_eq!(
        session.classifier().classify_path(&generated).reason,
        ClassificationReason::IgnoredByPattern
    );

    fs::write(root.join(".gitignore"), "*.toml\n").await.unwrap();
    session.refresh_ignore_patterns().await.unwrap();

    let classifier = session.classifier();
    assert!(classifier.classify_path(&generated).included);
    assert_eq!(
        classifier.classify_path(&root.join("Cargo.toml")).reason,
        ClassificationReason::IgnoredByPattern
    );
}

#[tokio::test]
async fn test_session_job_end_to_end() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    project(root).await;

    let session = open(root).await;
    let candidates = session.collect_candidates();
    let summary = session.preflight(&candidates).await;
    assert_eq!(summary.file_count(), 3);
    assert!(!summary.exceeds(session.config().large_selection_threshold_bytes));

    let handle = session.start_job(candidates).await;
    match handle.outcome().await.unwrap() {
        JobOutcome::Completed(artifact) => {
            assert_eq!(artifact.file_count, 3);
            assert!(artifact.text.starts_with("=== Cargo.toml ===\n[package]\n"));
            assert!(artifact.text.contains("=== src/main.rs ===\nfn main() {}\n\n\n"));
            assert!(!artifact.text.contains("build output"));
        }
        other => panic!("Expected completion, got {:?}", other),
    }
    assert_eq!(session.cancel_job().await, Some(JobState::Completed));
}

#[tokio::test]
async fn test_open_rejects_missing_root() {
    let dir = tempdir().unwrap();
    let store = PolicyStore::new(ConfigSource::Defaults);
    let result = RootSession::open(dir.path().join("missing"), &store, ProcessorConfig::default()).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_watcher_refreshes_on_change() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    project(root).await;

    let session = Arc::new(open(root).await);
    let mut watcher = IgnoreFileWatcher::new(session.clone()).unwrap();
    let main_rs = root.join("src/main.rs");

    fs::write(root.join(".gitignore"), "src/\n").await.unwrap();
    refresh_until(&mut watcher, || !session.classifier().classify_path(&main_rs).included).await;

    fs::remove_file(root.join(".gitignore")).await.unwrap();
    refresh_until(&mut watcher, || session.classifier().classify_path(&main_rs).included).await;
}

#[tokio::test]
async fn test_watcher_ignores_other_files() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    project(root).await;

    let session = Arc::new(open(root).await);
    let mut watcher = IgnoreFileWatcher::new(session.clone()).unwrap();
    fs::write(root.join("notes.md"), "src/\n").await.unwrap();

    assert!(timeout(Duration::from_millis(300), watcher.next_change()).await.is_err());
    assert!(session.classifier().classify_path(&root.join("src/main.rs")).included);
}

#[tokio::test]
async fn test_watcher_stops_on_shutdown() {
    let dir = tempdir().unwrap();
    let session = Arc::new(open(dir.path()).await);
    let mut watcher = IgnoreFileWatcher::new(session).unwrap();
    let (tx, rx) = watch::channel(false);

    let task = tokio::spawn(async move { watcher.run(rx).await });
    tx.send(true).unwrap();
    assert!(task.await.unwrap().is_ok());
}

#[cfg(unix)]
#[tokio::test]
async fn test_cancel_uses_configured_grace() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let fifo = root.join("stuck.md");
    let status = std::process::Command::new("mkfifo")
        .arg(&fifo)
        .status()
        .expect("Failed to run mkfifo");
    assert!(status.success());

    let config = ProcessorConfig {
        shutdown_grace: Duration::from_millis(50),
        ..ProcessorConfig::default()
    };
    let session = open_with(root, config).await;
    let mut handle = session.start_job(vec![fifo.clone()]).await;
    loop {
        match handle.next_event().await {
            Some(JobEvent::CurrentFile(path)) if path == fifo => break,
            Some(JobEvent::Finished(outcome)) => panic!("Job finished early: {:?}", outcome),
            Some(_) => {}
            None => panic!("Event stream closed before the stuck file"),
        }
    }

    let started = Instant::now();
    assert_eq!(session.cancel_job().await, Some(JobState::Cancelled));
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "Cancel took {:?}",
        started.elapsed()
    );
    assert!(matches!(handle.outcome().await, Some(JobOutcome::Cancelled { .. })));

    let _ = std::fs::OpenOptions::new().write(true).open(&fifo);
}
