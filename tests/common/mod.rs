#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use devrunner::config::ConfigFile;
use devrunner::env::EnvResolver;
use devrunner::process::{RegistryHandle, spawn_registry};

pub use devrunner_test_utils::{builders, fake_bundler, init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Registry without dotenv or docker discovery.
pub fn plain_registry(cfg: Arc<ConfigFile>) -> RegistryHandle {
    let env = EnvResolver::plain(cfg.settings().app_port);
    spawn_registry(cfg, Arc::new(env))
}
