//! Price Watch - alert server
//!
//! Polls exchange prices and sends Telegram alerts when a watched instrument
//! moves by more than its threshold.

mod config;

use clap::Parser;
use config::{AppConfig, StorageBackend, StorageSettings};
use pricewatch_alerts::{
    create_state, JsonFileStore, RegistryStore, SqliteStore, StoreError, TelegramBot,
    TelegramSink, WatchRegistry, Watcher, WatcherConfig,
};
use pricewatch_core::WatchLimits;
use pricewatch_engine::HistoryStore;
use pricewatch_feeds::{PriceSource, RestPriceSource};
use std::sync::Arc;
use std::time::Duration;
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Price Watch CLI
#[derive(Parser, Debug)]
#[command(name = "pricewatch")]
#[command(about = "Crypto price-movement alerts over Telegram", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long)]
    log_level: Option<String>,

    /// Poll interval in seconds
    #[arg(short, long)]
    poll_interval: Option<u64>,

    /// Registry file (JSON) or database (SQLite) path
    #[arg(short, long)]
    storage_path: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(secs) = self.poll_interval {
            config.watcher.poll_interval_secs = secs;
        }
        if let Some(path) = &self.storage_path {
            config.storage.path = path.clone();
        }
    }
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

async fn open_store(settings: &StorageSettings) -> Result<Arc<dyn RegistryStore>, StoreError> {
    let store: Arc<dyn RegistryStore> = match settings.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(&settings.path)),
        StorageBackend::Sqlite => Arc::new(SqliteStore::connect(&settings.sqlite_url()).await?),
    };
    Ok(store)
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let mut config = AppConfig::load(&args.config).expect("Failed to load config");
    args.apply(&mut config);

    init_logging(&config.log_level);

    info!("🚀 Price Watch starting...");
    info!("  Config: {}", args.config);
    info!("  Poll interval: {}s", config.watcher.poll_interval_secs);
    info!("  Storage: {:?} at {}", config.storage.backend, config.storage.path);
    info!(
        "  Exchanges: {}",
        config
            .exchanges
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    let token = std::env::var("TELEGRAM_BOT_TOKEN").expect("TELEGRAM_BOT_TOKEN must be set");

    let store = open_store(&config.storage)
        .await
        .expect("Failed to open registry store");
    let registry = WatchRegistry::load(store)
        .await
        .expect("Failed to load registry");

    let watcher_config = WatcherConfig::from(&config.watcher);
    let limits = WatchLimits::from(&config.limits);
    let state = create_state(registry, HistoryStore::new(watcher_config.retention_window));

    let source: Arc<dyn PriceSource> = Arc::new(
        RestPriceSource::new(config.exchanges.clone(), config.watcher.fetch_timeout())
            .expect("Failed to build HTTP client"),
    );

    let bot = Bot::new(token);
    let sink = Arc::new(TelegramSink::new(bot.clone()));

    // Start the polling loop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = Watcher::new(state.clone(), source.clone(), sink, watcher_config);
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx));

    // Start the command handler
    let telegram = Arc::new(TelegramBot::new(bot, state.clone(), source, limits));
    let bot_handle = tokio::spawn(async move {
        telegram.run().await;
    });

    // Handle shutdown
    info!("Press Ctrl+C to stop...");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for Ctrl+C");

    warn!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    // Let an in-flight tick finish, then stop polling Telegram
    if tokio::time::timeout(Duration::from_secs(10), watcher_handle)
        .await
        .is_err()
    {
        warn!("Watcher did not stop in time");
    }
    bot_handle.abort();

    let mut state = state.lock().await;
    if let Err(e) = state.registry.flush_if_dirty().await {
        error!(error = %e, "Registry changes lost on shutdown");
    }

    info!("👋 Goodbye!");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_defaults_keep_config() {
        let args = Args::try_parse_from(["pricewatch"]).unwrap();
        assert_eq!(args.config, "config.json");

        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::try_parse_from([
            "pricewatch",
            "--log-level",
            "debug",
            "--poll-interval",
            "5",
            "--storage-path",
            "/tmp/w.json",
        ])
        .unwrap();

        let mut config = AppConfig::default();
        args.apply(&mut config);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.watcher.poll_interval_secs, 5);
        assert_eq!(config.storage.path, "/tmp/w.json");
    }

    #[tokio::test]
    async fn test_open_json_store_on_missing_file() {
        let settings = StorageSettings {
            backend: StorageBackend::Json,
            path: "/nonexistent/pricewatch/watches.json".to_string(),
        };
        let store = open_store(&settings).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());
    }
}
