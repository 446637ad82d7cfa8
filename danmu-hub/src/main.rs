use anyhow::Context;
use clap::Parser;
use danmu_hub::api::{ApiServer, AppState};
use danmu_hub::config::Config;
use danmu_hub::listener::HubListener;
use danmu_hub::{BroadcastHub, ImageProxy, ListenerManager, logging};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::parse();

    let _log_guard = logging::init_logging(
        &config.log_filter,
        config.log_format,
        config.log_dir.as_deref(),
    )
    .context("failed to initialize logging")?;

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    let manager_config = config.listener_manager();
    if config.initial_retry_window() > manager_config.start_timeout {
        warn!(
            start_timeout = ?manager_config.start_timeout,
            retry_window = ?config.initial_retry_window(),
            "Start timeout is shorter than the connect retry schedule; late connects report as timeouts"
        );
    }

    let client = danmu_platforms::http::default_client().context("failed to build HTTP client")?;
    let hub = Arc::new(BroadcastHub::new());
    let proxy = Arc::new(ImageProxy::new(config.image_proxy(), client.clone()));
    let listener = HubListener::new(
        client,
        hub.clone(),
        proxy.clone(),
        config.websocket(),
        config.huya_helper.clone(),
    )
    .with_start_timeout(manager_config.start_timeout);
    let listeners = Arc::new(ListenerManager::new(manager_config, Arc::new(listener)));

    let state = AppState::new(listeners.clone(), hub, proxy)
        .with_auth_token(config.auth_token.clone())
        .with_allowed_origins(config.allowed_origins.clone());

    let cancel = CancellationToken::new();
    let mut servers = vec![
        ApiServer::control(config.api_server(), state.clone()),
        ApiServer::realtime(config.ws_server(), state.clone()),
    ];
    if config.use_proxy {
        servers.push(ApiServer::image_proxy(config.proxy_server(), state));
    }

    let mut tasks = JoinSet::new();
    for server in servers {
        tasks.spawn(server.with_cancel_token(cancel.clone()).run());
    }
    info!(version = env!("CARGO_PKG_VERSION"), "danmu-hub started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
        Some(result) = tasks.join_next() => {
            match result {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => error!(error = %e, "Server failed"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    cancel.cancel();
    listeners.shutdown().await;
    while let Some(result) = tasks.join_next().await {
        if let Ok(Err(e)) = result {
            error!(error = %e, "Server failed during shutdown");
        }
    }
    info!("danmu-hub stopped");
    Ok(())
}
