// tests/command_bundler.rs
#![cfg(unix)]

mod common;
use crate::common::builders::SourceConfigBuilder;
use crate::common::{TestResult, init_tracing, with_timeout};

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use devrunner::bundler::{BuildEvent, BuildMode, BuildRequest, Bundler, CommandBundler};
use devrunner::config::SourceConfig;
use devrunner::fs::RealFileSystem;
use devrunner::watch::{HashStore, MemoryHashStore, WatchDefaults};

fn bundler() -> CommandBundler {
    let store: Box<dyn HashStore> = Box::new(MemoryHashStore::default());
    CommandBundler::new(
        Arc::new(RealFileSystem),
        WatchDefaults::default(),
        Arc::new(Mutex::new(store)),
        Duration::from_millis(50),
    )
}

fn project() -> std::io::Result<TempDir> {
    let dir = tempfile::tempdir()?;
    std::fs::create_dir_all(dir.path().join("src"))?;
    std::fs::write(dir.path().join("src/index.ts"), "export const v = 1;\n")?;
    Ok(dir)
}

fn request(source: SourceConfig, cwd: &Path, mode: BuildMode) -> BuildRequest {
    BuildRequest {
        entry: cwd.join(&source.entry),
        cwd: cwd.to_path_buf(),
        mode,
        source,
    }
}

fn build_count(dir: &Path) -> usize {
    std::fs::read_to_string(dir.join("builds.log"))
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn one_shot_build_reports_end_then_closes() -> TestResult {
    init_tracing();
    let dir = project()?;
    let source = SourceConfigBuilder::new("app", "src/index.ts")
        .build_cmd("echo built >> builds.log")
        .build();

    let mut handle = bundler()
        .compile(request(source, dir.path(), BuildMode::Once))
        .await?;

    assert_eq!(with_timeout(handle.events.recv()).await, Some(BuildEvent::BuildEnd));
    assert_eq!(with_timeout(handle.events.recv()).await, None);
    assert!(handle.watcher.is_none());
    assert_eq!(build_count(dir.path()), 1);
    Ok(())
}

#[tokio::test]
async fn failing_build_quotes_stderr() -> TestResult {
    init_tracing();
    let dir = project()?;
    let source = SourceConfigBuilder::new("app", "src/index.ts")
        .build_cmd("echo 'syntax error in index.ts' >&2; exit 3")
        .build();

    let mut handle = bundler()
        .compile(request(source, dir.path(), BuildMode::Once))
        .await?;

    match with_timeout(handle.events.recv()).await {
        Some(BuildEvent::BuildFailed { error }) => {
            assert!(error.contains("code 3"), "{error}");
            assert!(error.contains("syntax error in index.ts"), "{error}");
        }
        other => panic!("expected a failed build, got {other:?}"),
    }
    assert_eq!(with_timeout(handle.events.recv()).await, None);
    Ok(())
}

#[tokio::test]
async fn source_without_build_command_finishes_immediately() -> TestResult {
    init_tracing();
    let dir = project()?;
    let source = SourceConfigBuilder::new("static", "src/index.ts").build();

    let mut handle = bundler()
        .compile(request(source, dir.path(), BuildMode::Once))
        .await?;
    assert_eq!(with_timeout(handle.events.recv()).await, Some(BuildEvent::BuildEnd));
    Ok(())
}

#[tokio::test]
async fn rebuild_request_triggers_another_build() -> TestResult {
    init_tracing();
    let dir = project()?;
    let source = SourceConfigBuilder::new("app", "src/index.ts")
        .build_cmd("echo built >> builds.log")
        .watch("src/**/*")
        .build();

    let mut handle = bundler()
        .compile(request(source, dir.path(), BuildMode::Watch))
        .await?;
    assert!(handle.watcher.is_some());
    assert_eq!(with_timeout(handle.events.recv()).await, Some(BuildEvent::BuildEnd));

    handle.rebuild.send(()).await?;
    assert_eq!(with_timeout(handle.events.recv()).await, Some(BuildEvent::BuildEnd));
    assert_eq!(build_count(dir.path()), 2);
    Ok(())
}

#[tokio::test]
async fn watched_file_change_triggers_a_build() -> TestResult {
    init_tracing();
    let dir = project()?;
    let source = SourceConfigBuilder::new("app", "src/index.ts")
        .build_cmd("echo built >> builds.log")
        .watch("src/**/*")
        .build();

    let mut handle = bundler()
        .compile(request(source, dir.path(), BuildMode::Watch))
        .await?;
    assert_eq!(with_timeout(handle.events.recv()).await, Some(BuildEvent::BuildEnd));

    // builds.log is outside the watch set, so the first build caused no
    // rebuild by itself.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(build_count(dir.path()), 1);

    std::fs::write(dir.path().join("src/index.ts"), "export const v = 2;\n")?;
    assert_eq!(with_timeout(handle.events.recv()).await, Some(BuildEvent::BuildEnd));
    assert_eq!(build_count(dir.path()), 2);
    Ok(())
}
