use anyhow::Result;
use naija_fuel_tracker::{api, config, controller, telemetry};
use config::{Config, StoreKind};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // a missing .env is fine; the environment may already be set
    let _ = dotenvy::dotenv();

    let cfg = Config::load()?;
    telemetry::init_tracing(cfg.server.log_json);
    cfg.validate()?;

    if cfg.store.kind == StoreKind::Memory {
        warn!("using the in-memory store - data is lost on restart");
    }
    if cfg.backend.url.is_empty() {
        warn!("backend.url not set - sign-up and login will fail");
    }
    if cfg.auth.admin_emails.is_empty() {
        info!("no auth.admin_emails configured; only profiles with role admin can moderate");
    }

    let app_state = controller::AppState::new(cfg.clone()).await?;
    let app = api::router(app_state.clone(), &cfg);

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("server binding to 0.0.0.0 - reachable from the network");
    }

    info!(%addr, store = ?cfg.store.kind, coverage = ?cfg.merge.coverage, "starting Naija Fuel Tracker");

    controller::spawn_background_tasks(app_state, cfg.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(telemetry::shutdown_signal())
        .await?;

    warn!("shutdown complete");
    Ok(())
}
