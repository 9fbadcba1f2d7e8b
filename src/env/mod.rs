// src/env/mod.rs

//! Environment handed to spawned commands: `.env` files, docker-compose port
//! discovery and `PORT`.

pub mod docker;
pub mod dotenv;
pub mod resolver;

pub use docker::{ComposeCli, DockerService, PortDiscovery, PortMapping};
pub use dotenv::{load_dotenv, parse_dotenv};
pub use resolver::EnvResolver;
