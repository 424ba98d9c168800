mod api;
mod config;
mod control;
mod lamp;
mod probe;
mod regulator;
mod sensor;
mod telemetry;
mod trace;
mod unit;

use std::env;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use api::ApiClient;
use regulator::Regulator;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("REGULATOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::load(&config_path)?;
    info!(path = %config_path, "configuration loaded");

    // ── Remote service client ───────────────────────────────────────
    let api = ApiClient::new(
        &config.api.base_url,
        Duration::from_secs(config.api.timeout_sec),
    )?;

    // ── Regulation loop ─────────────────────────────────────────────
    // Startup faults above are fatal; from here on every fault is recovered
    // inside the loop and only an interrupt reaches this point again.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for interrupt: {e}");
            std::future::pending::<()>().await
        }
    };

    let mut regulator = Regulator::new(api, config);
    regulator.run(shutdown).await;

    Ok(())
}
