//! Watch persistence, alert delivery and the polling loop.
//!
//! This crate provides:
//! - JSON file and SQLite registry stores
//! - Telegram delivery and command handling
//! - The watcher that polls prices and fires alerts

pub mod registry;
pub mod sink;
pub mod state;
pub mod store;
pub mod telegram;
pub mod watcher;

pub use registry::{RegistryError, WatchRegistry};
pub use sink::{DeliveryError, NotificationSink};
pub use state::{create_state, SharedState, WatchState};
pub use store::{JsonFileStore, RegistryStore, SqliteStore, StoreError};
pub use telegram::{format_alert_message, Command, TelegramBot, TelegramError, TelegramSink};
pub use watcher::{TickReport, Watcher, WatcherConfig};
