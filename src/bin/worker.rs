use std::sync::Arc;

use tokio::signal;

use jobjam::{
    ai::OpenAiGenerator,
    config::AppConfig,
    db,
    hh::HhClient,
    init_tracing,
    jobs::PgJobQueue,
    store::PgRecordStore,
    SubmissionJob, SubmissionOrchestrator, WorkerPool,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    // A running job can hold a connection for the pipeline while its
    // progress or heartbeat write takes a second one.
    let pool_size = u32::try_from(config.worker_concurrency.max(1).saturating_mul(2))
        .unwrap_or(u32::MAX);
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size,
        concurrency = config.worker_concurrency,
        max_attempts = config.job_max_attempts,
        lease_timeout_secs = config.job_lease_timeout().as_secs(),
        model = %config.openai_model,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, pool_size)?;

    let store = Arc::new(PgRecordStore::new(pool.clone()));
    let queue = Arc::new(PgJobQueue::new(pool).with_lease_timeout(config.job_lease_timeout()));
    let board = Arc::new(HhClient::new(&config)?);
    let generator = Arc::new(OpenAiGenerator::new(&config)?);

    let orchestrator = Arc::new(SubmissionOrchestrator::new(store, board, generator));
    let handler = Arc::new(SubmissionJob::new(orchestrator, config.retry_policy()));
    let pool = WorkerPool::new(
        queue,
        handler,
        config.worker_concurrency,
        config.worker_poll_interval(),
        config.worker_heartbeat_interval(),
    );
    tracing::info!(workers = pool.size(), "starting worker pool");

    tokio::select! {
        _ = pool.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}
