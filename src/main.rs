use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use pulse_core::settings::load_settings;
use pulse_server::ServerConfig;
use pulse_store::Database;
use pulse_telemetry::{init_telemetry, TelemetryConfig};

/// RoomPulse: live room feedback server.
#[derive(Debug, Parser)]
#[command(name = "roompulse", version)]
struct Args {
    /// JSON settings file, merged over the built-in defaults.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen port (overrides settings and PORT).
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path (overrides settings and ROOMPULSE_DB).
    #[arg(long, value_name = "PATH")]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref()).context("failed to load settings")?;
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(db) = args.db {
        settings.server.db_path = db;
    }

    init_telemetry(&TelemetryConfig {
        json: settings.server.log_json,
        ..TelemetryConfig::default()
    })?;

    tracing::info!(
        cooldown_seconds = settings.feedback.cooldown_seconds,
        lock_min_minutes = settings.feedback.lock_min_minutes,
        lock_max_minutes = settings.feedback.lock_max_minutes,
        "starting RoomPulse"
    );

    let db = Database::open(&settings.server.db_path)
        .with_context(|| format!("failed to open database at {}", settings.server.db_path.display()))?;

    let handle = pulse_server::start(ServerConfig::from_settings(&settings), db)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "RoomPulse ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}
