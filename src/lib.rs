pub mod ai;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod hh;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
pub mod workers;

pub use gateway::{ApplyError, QueueGateway};
pub use workers::{SubmissionJob, SubmissionOrchestrator, Worker, WorkerPool};

use tracing_subscriber::EnvFilter;

/// Shared by both binaries. `RUST_LOG` overrides the default `info` level.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
