// tests/config_errors.rs

mod common;
use crate::common::TestResult;

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use devrunner::config::load_and_validate;
use devrunner::errors::RunnerError;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

fn config_error(contents: &str) -> String {
    let file = write_config(contents);
    match load_and_validate(file.path()) {
        Err(RunnerError::Config(msg)) => msg,
        other => panic!("expected a config error, got {other:?}"),
    }
}

#[test]
fn valid_config_loads_with_defaults() -> TestResult {
    let file = write_config(
        r#"
[config]
port = 9000

[[source]]
name = "server"
entry = "src/server.ts"
run = ["node", "dist/server.js"]

[[source]]
name = "client"
entry = "src/client.ts"
after = ["server"]
"#,
    );

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.settings().port, 9000);
    assert_eq!(cfg.settings().buffer_size, 20_000);
    assert_eq!(cfg.settings().app_port, 3000);
    assert_eq!(cfg.stop_grace(), std::time::Duration::from_secs(5));
    assert_eq!(cfg.sources().len(), 2);
    assert!(cfg.source("server").map(|s| s.is_runnable()).unwrap_or(false));
    assert_eq!(cfg.root(), file.path().parent().unwrap_or(Path::new(".")));
    Ok(())
}

#[test]
fn missing_sources_are_rejected() {
    let msg = config_error("[config]\nport = 8080\n");
    assert!(msg.contains("at least one [[source]]"), "{msg}");
}

#[test]
fn unknown_dependency_is_rejected() {
    let msg = config_error(
        r#"
[[source]]
name = "client"
entry = "src/client.ts"
after = ["server"]
"#,
    );
    assert!(msg.contains("unknown dependency 'server'"), "{msg}");
}

#[test]
fn self_dependency_is_rejected() {
    let msg = config_error(
        r#"
[[source]]
name = "loop"
entry = "loop.ts"
after = ["loop"]
"#,
    );
    assert!(msg.contains("cannot depend on itself"), "{msg}");
}

#[test]
fn duplicate_names_are_rejected() {
    let msg = config_error(
        r#"
[[source]]
name = "server"
entry = "a.ts"

[[source]]
name = "server"
entry = "b.ts"
"#,
    );
    assert!(msg.contains("declared more than once"), "{msg}");
}

#[test]
fn runnable_without_run_is_rejected() {
    let msg = config_error(
        r#"
[[source]]
name = "server"
entry = "a.ts"
runnable = true
"#,
    );
    assert!(msg.contains("no `run` command"), "{msg}");
}

#[test]
fn reserved_command_names_are_rejected() {
    let clear = config_error(
        r#"
[[source]]
name = "server"
entry = "a.ts"

[source.commands]
clear = ["rm", "-rf", "dist"]
"#,
    );
    assert!(clear.contains("'clear' is reserved"), "{clear}");

    let run = config_error(
        r#"
[[source]]
name = "server"
entry = "a.ts"
run = ["node", "a.js"]

[source.commands]
run = ["node", "b.js"]
"#,
    );
    assert!(run.contains("reserved for runnable sources"), "{run}");
}

#[test]
fn empty_command_argv_is_rejected() {
    let msg = config_error(
        r#"
[[source]]
name = "server"
entry = "a.ts"

[source.commands]
test = []
"#,
    );
    assert!(msg.contains("empty argv"), "{msg}");
}

#[test]
fn bad_durations_are_rejected() {
    let msg = config_error(
        r#"
[config]
stop_grace = "soon"

[[source]]
name = "server"
entry = "a.ts"
"#,
    );
    assert!(msg.contains("[config].stop_grace"), "{msg}");
}

#[test]
fn zero_buffer_is_rejected() {
    let msg = config_error(
        r#"
[config]
buffer_size = 0

[[source]]
name = "server"
entry = "a.ts"
"#,
    );
    assert!(msg.contains("buffer_size"), "{msg}");
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = write_config("[[source]\nname = ");
    assert!(matches!(load_and_validate(file.path()), Err(RunnerError::Toml(_))));
}

#[test]
fn cycles_are_left_to_the_scheduler() -> TestResult {
    let file = write_config(
        r#"
[[source]]
name = "a"
entry = "a.ts"
after = ["b"]

[[source]]
name = "b"
entry = "b.ts"
after = ["a"]
"#,
    );
    let cfg = load_and_validate(file.path())?;
    let cycle = devrunner::dag::DagGraph::from_config(&cfg).find_cycle();
    assert_eq!(cycle, Some(vec!["a".to_string(), "b".to_string()]));
    Ok(())
}
