//! socialpulse server
//!
//! Run with: cargo run
//!
//! Environment variables (a `.env` file is loaded first if present):
//! - SOCIALPULSE_HOST / SOCIALPULSE_PORT: Bind address (default: 0.0.0.0:8000)
//! - SOCIALPULSE_SEED_FILE: JSON file with users, profiles and alerts to load
//! - MONITORING_INTERVAL_MINUTES: Check interval per profile (default: 15)
//! - MONITORING_DELAY_MIN_SECS / MONITORING_DELAY_MAX_SECS: Pacing before each request
//! - MONITORING_WORKERS: Concurrent checks (default: CPU count)
//! - INSTAGRAM_USERNAME / INSTAGRAM_PASSWORD: Source account
//! - INSTAGRAM_SESSION_PATH: Session cache file
//! - TELEGRAM_BOT_TOKEN: Bot used for milestone notifications
//! - RUST_LOG: Log level (default: socialpulse=info,tower_http=info)

use std::sync::Arc;

use socialpulse::api::{run_server, ServerConfig};
use socialpulse::config::MonitorConfig;
use socialpulse::profiles::MemoryDirectory;
use socialpulse::seed::Seed;
use socialpulse::service::{Collaborators, MonitorService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "socialpulse=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env();
    config.validate()?;

    tracing::info!("socialpulse configuration:");
    tracing::info!("  Host: {}:{}", config.host, config.port);
    tracing::info!("  Check interval: {} minutes", config.interval.as_secs() / 60);
    tracing::info!(
        "  Request delay: {}-{} seconds",
        config.delay_min.as_secs(),
        config.delay_max.as_secs()
    );
    tracing::info!("  Workers: {}", config.workers);
    tracing::info!(
        "  Time limits: soft {}s, hard {}s",
        config.soft_time_limit.as_secs(),
        config.hard_time_limit.as_secs()
    );
    if config.credentials.is_none() {
        tracing::warn!("  No source credentials configured, relying on a cached session");
    }
    if config.telegram_bot_token.is_none() {
        tracing::warn!("  TELEGRAM_BOT_TOKEN not set, Telegram notifications disabled");
    }

    let seed = match &config.seed_file {
        Some(path) => {
            tracing::info!("  Seed file: {}", path.display());
            Seed::load(path)?
        }
        None => Seed::default(),
    };

    let directory = Arc::new(MemoryDirectory::new());
    seed.populate(&directory);

    let server_config = ServerConfig {
        host: config.host.clone(),
        port: config.port,
    };
    let collaborators = Collaborators::from_config(&config, directory)?;
    let service = Arc::new(MonitorService::new(config, collaborators)?);
    seed.apply(&service).await?;

    println!(
        r#"
  socialpulse
  Follower milestone monitoring
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );

    run_server(server_config, service).await
}
