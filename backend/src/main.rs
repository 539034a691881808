//! Erasure engine entry point: loads settings, wires the services, serves
//! HTTP and drives the periodic scheduler until shutdown.

mod server;

use actix_web::web;
use mockable::DefaultEnv;
use ortho_config::OrthoConfig;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use erasure_engine::config::{AppSettings, BuildMode, token_secret_from_env};
use erasure_engine::inbound::http::health::HealthState;

use server::{ServerConfig, build_repositories, build_services, build_transport, create_server};

/// Application bootstrap.
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    if let Err(e) = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .try_init()
    {
        warn!(error = %e, "tracing init failed");
    }

    let settings = AppSettings::load_from_iter(std::env::args_os()).map_err(std::io::Error::other)?;
    let bind_addr = settings
        .bind_addr()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let token_secret = token_secret_from_env(&DefaultEnv::new(), BuildMode::from_debug_assertions())
        .map_err(std::io::Error::other)?;

    let repositories = build_repositories(&settings).await?;
    let transport = build_transport(&settings)?;
    let services = build_services(&settings, repositories, transport, &token_secret.secret)?;

    let health_state = web::Data::new(HealthState::new());
    let server = create_server(
        health_state.clone(),
        ServerConfig::new(bind_addr, services.http_state),
    )?;
    info!(%bind_addr, "erasure engine listening");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = tokio::spawn(
        services
            .scheduler
            .run_periodic(settings.scheduler_interval(), shutdown_rx),
    );

    // Actix stops the server on SIGINT and SIGTERM.
    let result = server.await;
    health_state.mark_unhealthy();
    if shutdown_tx.send(true).is_err() {
        warn!("scheduler already stopped");
    }
    if let Err(e) = scheduler.await {
        warn!(error = %e, "scheduler task ended abnormally");
    }
    result
}
