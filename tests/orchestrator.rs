// tests/orchestrator.rs

mod common;
use crate::common::builders::{ConfigFileBuilder, SourceConfigBuilder};
use crate::common::fake_bundler::{BundlerCall, FakeBundler};
use crate::common::{TestResult, init_tracing, plain_registry, with_timeout};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use devrunner::bundler::{BuildEvent, BuildMode, Bundler};
use devrunner::config::ConfigFile;
use devrunner::dag::DagGraph;
use devrunner::engine::Orchestrator;
use devrunner::errors::RunnerError;
use devrunner::fs::{FileSystem, MockFileSystem};

/// server <- client
fn client_server_config() -> ConfigFile {
    ConfigFileBuilder::new()
        .with_source(SourceConfigBuilder::new("server", "src/server.ts").build())
        .with_source(
            SourceConfigBuilder::new("client", "src/client.ts")
                .after("server")
                .build(),
        )
        .build()
}

fn fs_with(entries: &[&str]) -> Arc<dyn FileSystem> {
    let fs = MockFileSystem::new();
    for entry in entries {
        fs.add_file(entry, "export {}");
    }
    Arc::new(fs)
}

fn orchestrator(
    cfg: ConfigFile,
    bundler: &FakeBundler,
    fs: Arc<dyn FileSystem>,
    mode: BuildMode,
) -> Orchestrator {
    let cfg = Arc::new(cfg);
    let graph = DagGraph::from_config(&cfg);
    orchestrator_for(cfg, graph, bundler, fs, mode)
}

fn orchestrator_for(
    cfg: Arc<ConfigFile>,
    graph: DagGraph,
    bundler: &FakeBundler,
    fs: Arc<dyn FileSystem>,
    mode: BuildMode,
) -> Orchestrator {
    let registry = plain_registry(Arc::clone(&cfg));
    let bundler: Arc<dyn Bundler> = Arc::new(bundler.clone());
    Orchestrator::new(cfg, graph, bundler, registry, fs, mode)
}

#[tokio::test]
async fn dependency_is_built_before_dependent() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new();
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Once);

    with_timeout(orch.run(std::future::pending())).await?;

    assert_eq!(bundler.compiled(), vec!["server", "client"]);
    Ok(())
}

#[tokio::test]
async fn dependent_waits_for_held_first_build() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new().hold_first_build("server");
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Once);
    let run = tokio::spawn(orch.run(std::future::pending()));

    with_timeout(bundler.wait_for(BundlerCall::Compile("server".into()))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bundler.compiled(), vec!["server"], "client must wait for server");

    assert!(bundler.emit("server", BuildEvent::BuildEnd).await);

    with_timeout(run).await??;
    assert_eq!(bundler.compiled(), vec!["server", "client"]);
    Ok(())
}

#[tokio::test]
async fn independent_sources_start_in_the_same_pass() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_source(SourceConfigBuilder::new("api", "api/main.ts").build())
        .with_source(SourceConfigBuilder::new("worker", "worker/main.ts").build())
        .build();

    // Neither first build settles, so both compiles must have been requested
    // by the first pass.
    let bundler = FakeBundler::new()
        .hold_first_build("api")
        .hold_first_build("worker");
    let fs = fs_with(&["api/main.ts", "worker/main.ts"]);
    let orch = orchestrator(cfg, &bundler, fs, BuildMode::Once);
    let run = tokio::spawn(orch.run(std::future::pending()));

    with_timeout(bundler.wait_for(BundlerCall::Compile("api".into()))).await;
    with_timeout(bundler.wait_for(BundlerCall::Compile("worker".into()))).await;

    assert!(bundler.emit("worker", BuildEvent::BuildEnd).await);
    assert!(bundler.emit("api", BuildEvent::BuildEnd).await);
    with_timeout(run).await??;
    Ok(())
}

#[tokio::test]
async fn cycle_is_reported_without_building() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_source(SourceConfigBuilder::new("a", "a.ts").after("b").build())
        .with_source(SourceConfigBuilder::new("b", "b.ts").after("a").build())
        .build();
    let bundler = FakeBundler::new();
    let orch = orchestrator(cfg, &bundler, fs_with(&["a.ts", "b.ts"]), BuildMode::Once);

    match with_timeout(orch.run(std::future::pending())).await {
        Err(RunnerError::UnsatisfiableDependencies { waiting }) => {
            assert_eq!(waiting, vec!["a".to_string(), "b".to_string()]);
        }
        other => panic!("expected unsatisfiable dependencies, got {other:?}"),
    }
    assert!(bundler.compiled().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_entry_fails_before_any_build() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new();
    let fs = fs_with(&["src/server.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Watch);

    match with_timeout(orch.run(std::future::pending())).await {
        Err(RunnerError::EntryMissing { source_name, path }) => {
            assert_eq!(source_name, "client");
            assert!(path.ends_with("src/client.ts"));
        }
        other => panic!("expected missing entry, got {other:?}"),
    }
    assert!(bundler.compiled().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_first_build_fails_a_one_shot_run() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new().fail_first_build("server");
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Once);

    match with_timeout(orch.run(std::future::pending())).await {
        Err(RunnerError::BuildFailed { sources }) => assert_eq!(sources, vec!["server"]),
        other => panic!("expected build failure, got {other:?}"),
    }
    assert_eq!(bundler.compiled(), vec!["server"]);
    Ok(())
}

#[tokio::test]
async fn crashed_worker_counts_as_abandoned() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new().panic_on_compile("server");
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Once);

    match with_timeout(orch.run(std::future::pending())).await {
        Err(RunnerError::BuildFailed { sources }) => assert_eq!(sources, vec!["server"]),
        other => panic!("expected build failure, got {other:?}"),
    }
    assert!(bundler.compiled().is_empty());
    Ok(())
}

#[tokio::test]
async fn failed_first_build_in_watch_mode_waits_for_a_fix() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new().fail_first_build("server");
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Watch);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orch.run(async move {
        let _ = stop_rx.await;
    }));

    with_timeout(bundler.wait_for(BundlerCall::Compile("server".into()))).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bundler.compiled(), vec!["server"]);

    // The watcher saw a fix.
    assert!(bundler.emit("server", BuildEvent::BuildEnd).await);
    with_timeout(bundler.wait_for(BundlerCall::Compile("client".into()))).await;

    let _ = stop_tx.send(());
    with_timeout(run).await??;
    Ok(())
}

#[tokio::test]
async fn rebuild_of_dependency_rebuilds_dependent() -> TestResult {
    init_tracing();

    let bundler = FakeBundler::new();
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator(client_server_config(), &bundler, fs, BuildMode::Watch);

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orch.run(async move {
        let _ = stop_rx.await;
    }));

    with_timeout(bundler.wait_for(BundlerCall::Compile("client".into()))).await;

    // A later build of server (e.g. a file change) must ripple to client.
    assert!(bundler.emit("server", BuildEvent::BuildEnd).await);
    with_timeout(bundler.wait_for(BundlerCall::Rebuild("client".into()))).await;
    assert!(!bundler.calls().contains(&BundlerCall::Rebuild("server".into())));

    let _ = stop_tx.send(());
    with_timeout(run).await??;
    Ok(())
}

#[tokio::test]
async fn subset_build_pulls_in_dependencies_only() -> TestResult {
    init_tracing();

    let cfg = ConfigFileBuilder::new()
        .with_source(SourceConfigBuilder::new("server", "src/server.ts").build())
        .with_source(
            SourceConfigBuilder::new("client", "src/client.ts")
                .after("server")
                .build(),
        )
        .with_source(SourceConfigBuilder::new("docs", "docs/index.ts").build())
        .build();
    let cfg = Arc::new(cfg);
    let graph = DagGraph::from_config(&cfg).with_dependencies(&["client".to_string()])?;

    let bundler = FakeBundler::new();
    let fs = fs_with(&["src/server.ts", "src/client.ts"]);
    let orch = orchestrator_for(cfg, graph, &bundler, fs, BuildMode::Once);

    with_timeout(orch.run(std::future::pending())).await?;
    assert_eq!(bundler.compiled(), vec!["server", "client"]);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn runnable_source_is_started_after_its_first_build() -> TestResult {
    use devrunner::process::ControlEvent;

    init_tracing();

    let cfg = Arc::new(
        ConfigFileBuilder::new()
            .stop_grace("1s")
            .with_source(
                SourceConfigBuilder::new("server", "src/server.ts")
                    .run_sh("echo listening; sleep 30")
                    .build(),
            )
            .build(),
    );
    let registry = plain_registry(Arc::clone(&cfg));
    let mut events = registry.subscribe();

    let bundler = FakeBundler::new();
    let orch = Orchestrator::new(
        Arc::clone(&cfg),
        DagGraph::from_config(&cfg),
        Arc::new(bundler.clone()),
        registry.clone(),
        fs_with(&["src/server.ts"]),
        BuildMode::Watch,
    );

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(orch.run(async move {
        let _ = stop_rx.await;
    }));

    with_timeout(async {
        loop {
            if let Ok(ControlEvent::Data { source, chunk, .. }) = events.recv().await {
                if source == "server" && chunk.contains("listening") {
                    break;
                }
            }
        }
    })
    .await;
    assert!(registry.is_running("server", "run").await?);

    let _ = stop_tx.send(());
    with_timeout(run).await??;
    assert!(!registry.is_running("server", "run").await?);
    Ok(())
}
