//! Durable storage for the subscriber registry.
//!
//! Stores always write the full registry; there is no incremental update.

use async_trait::async_trait;
use chrono::DateTime;
use pricewatch_core::{Exchange, InstrumentKey, Registry, Subscriber, WatchSpec};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Load the whole registry. A store that was never written yields an empty one.
    async fn load(&self) -> Result<Registry, StoreError>;

    /// Replace the stored registry with `registry`.
    async fn save(&self, registry: &Registry) -> Result<(), StoreError>;
}

/// Registry persisted as one pretty-printed JSON document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RegistryStore for JsonFileStore {
    async fn load(&self) -> Result<Registry, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Registry::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, registry: &Registry) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(registry)?;

        // The temp file is flushed to disk before it replaces the old one, so
        // the path always holds either the previous or the new registry.
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;
        sync_parent_dir(&self.path).await?;
        Ok(())
    }
}

/// Make a completed rename durable.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<(), StoreError> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => parent,
        None => Path::new("."),
    };
    tokio::fs::File::open(dir).await?.sync_all().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

/// Registry persisted in SQLite, rewritten inside one transaction per save.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

type WatchRow = (String, i64, String, f64, i64, i64, Option<i64>);

impl SqliteStore {
    /// Connect to SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        // Saves are already serialized by the registry lock; a single
        // connection also keeps `sqlite::memory:` databases coherent.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscribers (
                owner_id TEXT PRIMARY KEY
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id TEXT NOT NULL REFERENCES subscribers(owner_id),
                exchange INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                threshold_pct REAL NOT NULL,
                period_seconds INTEGER NOT NULL,
                cooldown_seconds INTEGER NOT NULL,
                last_alert_at INTEGER,
                UNIQUE(owner_id, exchange, symbol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn seconds(value: i64, field: &str) -> Result<Duration, StoreError> {
    u64::try_from(value)
        .map(Duration::from_secs)
        .map_err(|_| StoreError::Corrupt(format!("negative {}: {}", field, value)))
}

fn row_to_watch(row: WatchRow) -> Result<(String, WatchSpec), StoreError> {
    let (owner_id, exchange, symbol, threshold_pct, period, cooldown, last_alert_at) = row;
    let exchange = u16::try_from(exchange)
        .ok()
        .and_then(Exchange::from_id)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown exchange id {}", exchange)))?;
    let last_alert_at = match last_alert_at {
        Some(ts) => Some(
            DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", ts)))?,
        ),
        None => None,
    };

    let spec = WatchSpec {
        instrument: InstrumentKey::new(exchange, &symbol),
        threshold_pct,
        period: seconds(period, "period_seconds")?,
        cooldown: seconds(cooldown, "cooldown_seconds")?,
        last_alert_at,
    };
    Ok((owner_id, spec))
}

#[async_trait]
impl RegistryStore for SqliteStore {
    async fn load(&self) -> Result<Registry, StoreError> {
        let owners = sqlx::query_scalar::<_, String>("SELECT owner_id FROM subscribers")
            .fetch_all(&self.pool)
            .await?;

        let rows = sqlx::query_as::<_, WatchRow>(
            "SELECT owner_id, exchange, symbol, threshold_pct, period_seconds, cooldown_seconds, last_alert_at FROM watches ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut subscribers: std::collections::BTreeMap<String, Subscriber> = owners
            .into_iter()
            .map(|owner| (owner.clone(), Subscriber::new(owner)))
            .collect();

        for row in rows {
            let (owner_id, spec) = row_to_watch(row)?;
            subscribers
                .entry(owner_id.clone())
                .or_insert_with(|| Subscriber::new(owner_id))
                .watches
                .push(spec);
        }

        Ok(Registry::from_subscribers(subscribers.into_values()))
    }

    async fn save(&self, registry: &Registry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM watches").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM subscribers").execute(&mut *tx).await?;

        for subscriber in registry.subscribers() {
            sqlx::query("INSERT INTO subscribers (owner_id) VALUES (?)")
                .bind(&subscriber.owner_id)
                .execute(&mut *tx)
                .await?;

            for watch in &subscriber.watches {
                sqlx::query(
                    r#"
                    INSERT INTO watches (owner_id, exchange, symbol, threshold_pct, period_seconds, cooldown_seconds, last_alert_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&subscriber.owner_id)
                .bind(i64::from(watch.instrument.exchange.id()))
                .bind(watch.instrument.symbol())
                .bind(watch.threshold_pct)
                .bind(watch.period.as_secs() as i64)
                .bind(watch.cooldown.as_secs() as i64)
                .bind(watch.last_alert_at.map(|t| t.timestamp()))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
