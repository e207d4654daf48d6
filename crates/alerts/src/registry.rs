//! Durable watch registry.
//!
//! Every mutation updates memory first, then writes the whole registry to the
//! store before returning. A failed write leaves the registry dirty; the next
//! successful save (or `flush_if_dirty`) catches the store up.

use crate::store::{RegistryStore, StoreError};
use chrono::{DateTime, Utc};
use pricewatch_core::{InstrumentKey, Registry, Subscriber, UpsertOutcome, WatchSpec};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Failed to load registry: {0}")]
    Load(#[source] StoreError),
    #[error("Failed to persist registry: {0}")]
    Persist(#[source] StoreError),
}

pub struct WatchRegistry {
    registry: Registry,
    store: Arc<dyn RegistryStore>,
    dirty: bool,
}

impl WatchRegistry {
    /// Load the registry from `store`.
    pub async fn load(store: Arc<dyn RegistryStore>) -> Result<Self, RegistryError> {
        let registry = store.load().await.map_err(RegistryError::Load)?;
        info!(
            subscribers = registry.len(),
            watches = registry.watch_count(),
            "Registry loaded"
        );
        Ok(Self {
            registry,
            store,
            dirty: false,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Create the subscriber on first interaction. Returns true if created.
    pub async fn ensure_subscriber(&mut self, owner_id: &str) -> Result<bool, RegistryError> {
        if !self.registry.ensure_subscriber(owner_id) {
            return Ok(false);
        }
        info!(owner = owner_id, "Subscriber registered");
        self.persist().await?;
        Ok(true)
    }

    pub async fn upsert(
        &mut self,
        owner_id: &str,
        spec: WatchSpec,
    ) -> Result<UpsertOutcome, RegistryError> {
        let instrument = spec.instrument.clone();
        let outcome = self.registry.upsert(owner_id, spec);
        info!(owner = owner_id, instrument = %instrument, outcome = ?outcome, "Watch saved");
        self.persist().await?;
        Ok(outcome)
    }

    pub async fn remove(
        &mut self,
        owner_id: &str,
        instrument: &InstrumentKey,
    ) -> Result<Option<WatchSpec>, RegistryError> {
        let removed = self.registry.remove(owner_id, instrument);
        if removed.is_some() {
            info!(owner = owner_id, instrument = %instrument, "Watch removed");
            self.persist().await?;
        }
        Ok(removed)
    }

    pub fn list(&self, owner_id: &str) -> &[WatchSpec] {
        self.registry.list(owner_id)
    }

    pub fn all(&self) -> impl Iterator<Item = (&str, &WatchSpec)> {
        self.registry.all()
    }

    pub fn instruments(&self) -> BTreeSet<InstrumentKey> {
        self.registry.instruments()
    }

    /// Start the cooldown of a watch that just alerted.
    /// Returns false if the watch was removed or replaced in the meantime.
    pub async fn mark_alerted(
        &mut self,
        owner_id: &str,
        fired: &WatchSpec,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        if !self.registry.mark_alerted(owner_id, fired, at) {
            return Ok(false);
        }
        self.persist().await?;
        Ok(true)
    }

    /// Remove an unreachable subscriber with all its watches.
    pub async fn prune_subscriber(
        &mut self,
        owner_id: &str,
    ) -> Result<Option<Subscriber>, RegistryError> {
        let removed = self.registry.remove_subscriber(owner_id);
        if let Some(subscriber) = &removed {
            info!(
                owner = owner_id,
                watches = subscriber.watches.len(),
                "Subscriber pruned"
            );
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Retry a previously failed save. Returns true if a save happened.
    pub async fn flush_if_dirty(&mut self) -> Result<bool, RegistryError> {
        if !self.dirty {
            return Ok(false);
        }
        self.persist().await?;
        info!("Registry persisted after earlier failure");
        Ok(true)
    }

    async fn persist(&mut self) -> Result<(), RegistryError> {
        match self.store.save(&self.registry).await {
            Ok(()) => {
                self.dirty = false;
                Ok(())
            }
            Err(e) => {
                self.dirty = true;
                error!(error = %e, "Failed to persist registry; will retry");
                Err(RegistryError::Persist(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{Exchange, WatchLimits};
    use std::time::Duration;

    fn spec(symbol: &str) -> WatchSpec {
        WatchSpec::new(
            InstrumentKey::new(Exchange::Binance, symbol),
            2.0,
            Duration::from_secs(60),
            Duration::from_secs(60),
            &WatchLimits::default(),
        )
        .unwrap()
    }

    async fn registry_with(store: Arc<MemoryStore>) -> WatchRegistry {
        WatchRegistry::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn test_every_mutation_is_persisted() {
        let store = Arc::new(MemoryStore::default());
        let mut registry = registry_with(store.clone()).await;

        assert!(registry.ensure_subscriber("1").await.unwrap());
        assert_eq!(store.save_count(), 1);
        assert!(!registry.ensure_subscriber("1").await.unwrap());
        assert_eq!(store.save_count(), 1);

        registry.upsert("1", spec("BTCUSDT")).await.unwrap();
        assert_eq!(store.saved().unwrap().watch_count(), 1);

        let key = InstrumentKey::new(Exchange::Binance, "BTCUSDT");
        assert!(registry.mark_alerted("1", &spec("BTCUSDT"), Utc::now()).await.unwrap());
        assert!(store.saved().unwrap().list("1")[0].last_alert_at.is_some());

        registry.remove("1", &key).await.unwrap();
        assert_eq!(store.saved().unwrap().watch_count(), 0);
        assert_eq!(store.save_count(), 4);
    }

    #[tokio::test]
    async fn test_noop_mutations_do_not_save() {
        let store = Arc::new(MemoryStore::default());
        let mut registry = registry_with(store.clone()).await;
        let key = InstrumentKey::new(Exchange::Binance, "BTCUSDT");

        assert_eq!(registry.remove("1", &key).await.unwrap(), None);
        assert!(!registry.mark_alerted("1", &spec("BTCUSDT"), Utc::now()).await.unwrap());
        assert!(registry.prune_subscriber("1").await.unwrap().is_none());
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_save_keeps_memory_and_retries() {
        let store = Arc::new(MemoryStore::default());
        let mut registry = registry_with(store.clone()).await;

        store.set_failing(true);
        let err = registry.upsert("1", spec("BTCUSDT")).await.unwrap_err();
        assert!(matches!(err, RegistryError::Persist(_)));
        assert!(registry.is_dirty());
        assert_eq!(registry.list("1").len(), 1);
        assert!(store.saved().is_none());

        store.set_failing(false);
        assert!(registry.flush_if_dirty().await.unwrap());
        assert!(!registry.is_dirty());
        assert_eq!(store.saved().unwrap().watch_count(), 1);
        assert!(!registry.flush_if_dirty().await.unwrap());
    }

    #[tokio::test]
    async fn test_prune_removes_all_watches() {
        let store = Arc::new(MemoryStore::default());
        let mut registry = registry_with(store.clone()).await;
        registry.upsert("1", spec("BTCUSDT")).await.unwrap();
        registry.upsert("1", spec("ETHUSDT")).await.unwrap();
        registry.upsert("2", spec("ETHUSDT")).await.unwrap();

        let pruned = registry.prune_subscriber("1").await.unwrap().unwrap();
        assert_eq!(pruned.watches.len(), 2);
        assert_eq!(registry.all().count(), 1);
        assert!(store.saved().unwrap().subscriber("1").is_none());
    }

    #[tokio::test]
    async fn test_load_existing_state() {
        let mut initial = Registry::new();
        initial.upsert("9", spec("BTCUSDT"));
        let store = Arc::new(MemoryStore::with(initial.clone()));

        let registry = registry_with(store).await;
        assert_eq!(registry.registry(), &initial);
    }
}
