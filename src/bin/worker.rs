use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use docvault::{config::AppConfig, default_handlers, state::AppState, Worker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    let concurrency = config.worker_concurrency;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        concurrency,
        s3_bucket = %config.s3_bucket,
        "loaded configuration"
    );

    // One pooled connection per worker loop plus one for the reclaim pass.
    let state = AppState::init(config, concurrency as u32 + 1).await?;
    let worker = Arc::new(Worker::new(
        Arc::new(state),
        default_handlers(),
        Duration::from_secs(2),
    ));
    let handles = worker.spawn_pool(concurrency);

    signal::ctrl_c().await?;
    tracing::info!("worker received shutdown signal");
    for handle in handles {
        handle.abort();
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
