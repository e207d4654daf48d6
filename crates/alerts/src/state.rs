//! State shared by the watcher loop and the command handler.

use crate::registry::WatchRegistry;
use pricewatch_engine::HistoryStore;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry and price history behind one lock, so a tick and a command never
/// interleave their reads and writes.
pub struct WatchState {
    pub registry: WatchRegistry,
    pub history: HistoryStore,
}

pub type SharedState = Arc<Mutex<WatchState>>;

pub fn create_state(registry: WatchRegistry, history: HistoryStore) -> SharedState {
    Arc::new(Mutex::new(WatchState { registry, history }))
}
