mod cidr;
mod cloud;
mod config;
mod db;
mod handlers;
mod idempotency;
mod models;
mod router;

use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloud::{Ec2ApiClient, VpcSyncService};
use config::Config;
use db::Store;

/// Application state shared across handlers
pub struct AppState {
    pub store: Store,
    #[allow(dead_code)]
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cloud_ipam=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let cfg = Config::load();
    tracing::info!("Starting CloudIPAM Server");
    tracing::info!("Database: {}", cfg.db_path);
    tracing::info!("Listen: {}", cfg.listen_addr);
    tracing::info!("Default VRF: {}", cfg.default_vrf_id);

    // Initialize database
    let store = Store::with_pool_size(&cfg.db_path, cfg.db_max_connections).await?;
    tracing::info!("Database initialized (pool_size={})", cfg.db_max_connections);
    store.ensure_default_vrf(&cfg.default_vrf_id).await?;

    // Start the VPC subnet sync service. The handle must outlive the
    // server: dropping it stops the cycle timer.
    let mut _sync_service = None;
    if cfg.sync_enabled {
        let client = Arc::new(Ec2ApiClient::new(
            cfg.cloud_api_url.clone(),
            cfg.cloud_api_token.clone(),
            cfg.aws_region.clone(),
        )?);
        let mut service = VpcSyncService::new(store.clone(), client, cfg.clone());
        service.start();
        tracing::info!(
            "VPC sync service started (interval: {}s)",
            cfg.sync_interval_secs
        );
        _sync_service = Some(service);
    } else {
        tracing::info!("VPC sync service disabled");
    }

    // Create app state
    let state = Arc::new(AppState {
        store: store.clone(),
        config: cfg.clone(),
    });

    // Build router
    let app = router::build(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    tracing::info!("CloudIPAM listening on {}", cfg.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("CloudIPAM shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
