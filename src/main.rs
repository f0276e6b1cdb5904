use clap::Parser;
use dotenv::dotenv;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use switchvault::config::ServerConfig;
use switchvault::db;
use switchvault::server::engine::Engine;
use switchvault::web;

#[derive(Parser, Debug)]
#[command(author, version, about = "Switch fleet backup and monitoring engine")]
struct Args {
    /// Directory for rotated JSON log files
    #[arg(long, default_value = "logs")]
    log_dir: String,
}

fn init_logging(log_dir: &str) {
    // File: JSON, daily rotation. Stdout: human-readable.
    let file_appender = rolling::daily(log_dir, "switchvault.log");
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false).json();
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    init_logging(&args.log_dir);
    dotenv().ok();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let db = db::connect(&config.database_url).await?;
    db::init_schema(&db).await?;
    info!(database = %config.database_url, "Connected to database.");

    let engine = Engine::new(db, config.clone()).map_err(|e| {
        error!("Failed to wire engine: {e}");
        e
    })?;
    let scheduler_handle = engine.start_scheduler();

    let http = tokio::spawn(web::run_http_server(Arc::clone(&engine), config.listen_addr));

    tokio::select! {
        result = http => {
            if let Ok(Err(e)) = result {
                error!("HTTP server exited with error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    scheduler_handle.abort();
    Ok(())
}
