use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use tokio::{net::TcpListener, signal};

use jobjam::{
    auth::jwt::JwtService,
    config::AppConfig,
    db, init_tracing,
    jobs::PgJobQueue,
    routes,
    state::AppState,
    store::PgRecordStore,
    QueueGateway,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        hh_api = %config.hh_api_base_url,
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    db::run_migrations(&pool)?;

    let gateway = QueueGateway::new(
        Arc::new(PgJobQueue::new(pool.clone())),
        Arc::new(PgRecordStore::new(pool)),
        config.retry_policy(),
    );
    let jwt = JwtService::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port)
        .parse()
        .context("SERVER_HOST/SERVER_PORT do not form a socket address")?;
    let state = AppState::new(config, gateway, jwt);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("api received shutdown signal");
        })
        .await?;

    Ok(())
}
