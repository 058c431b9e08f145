use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinSet;

use tollgate_server::config::{Config, StoreBackend};
use tollgate_server::services::Services;
use tollgate_server::transport::{Transport, http::HttpTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse configuration from environment variables and CLI arguments
    let config = Config::from_env_and_args()?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tollgate={}", config.log_level).parse()?),
        )
        .init();

    let services = Arc::new(Services::connect(&config).await?);

    let mut transport_tasks = JoinSet::new();

    let http_addr = config.http.addr;
    let http_services = services.clone();
    transport_tasks.spawn(async move {
        tracing::info!("Starting HTTP transport on {}", http_addr);
        HttpTransport::new(http_addr).start(http_services).await
    });

    match config.store.backend {
        StoreBackend::Memory => tracing::info!(
            "Tollgate started with memory store (capacity {})",
            config.store.capacity
        ),
        StoreBackend::Redis => tracing::info!(
            "Tollgate started with shared store at {}",
            config.store.redis_addr
        ),
    }
    tracing::info!(
        "Window {:?} / {} requests, session quota {}, bucket {} @ {}/s, drain anchor {:?}",
        config.admission.window,
        config.admission.window_limit,
        config.admission.session_quota,
        config.admission.bucket_capacity,
        config.admission.drain_rate,
        config.admission.drain_anchor
    );

    // Wait for all transport tasks to complete (they run indefinitely)
    while let Some(result) = transport_tasks.join_next().await {
        match result {
            Ok(Ok(())) => {
                tracing::info!("Transport task completed successfully");
            }
            Ok(Err(e)) => {
                tracing::error!("Transport task failed: {}", e);
                return Err(e);
            }
            Err(e) => {
                tracing::error!("Transport task panicked: {}", e);
                return Err(anyhow::anyhow!("Transport task panicked"));
            }
        }
    }

    Ok(())
}
