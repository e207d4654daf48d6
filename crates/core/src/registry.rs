//! In-memory subscriber registry and its persisted shape.
//!
//! Persisted as a mapping `owner_id -> {owner_id, watches: [...]}`. Durability
//! is layered on top by the alerts crate; this type only owns the data rules.

use crate::{InstrumentKey, WatchSpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A chat/user owning a set of watches, unique by instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscriber {
    pub owner_id: String,
    #[serde(default)]
    pub watches: Vec<WatchSpec>,
}

impl Subscriber {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            watches: Vec::new(),
        }
    }

    pub fn watch(&self, instrument: &InstrumentKey) -> Option<&WatchSpec> {
        self.watches.iter().find(|w| &w.instrument == instrument)
    }

    fn watch_mut(&mut self, instrument: &InstrumentKey) -> Option<&mut WatchSpec> {
        self.watches.iter_mut().find(|w| &w.instrument == instrument)
    }
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Registry {
    subscribers: BTreeMap<String, Subscriber>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create a subscriber. Returns true if it was created.
    pub fn ensure_subscriber(&mut self, owner_id: &str) -> bool {
        if self.subscribers.contains_key(owner_id) {
            return false;
        }
        self.subscribers
            .insert(owner_id.to_string(), Subscriber::new(owner_id));
        true
    }

    /// Insert a watch, replacing any existing watch on the same instrument.
    ///
    /// Replacement takes every field from `spec`, so the cooldown timer
    /// restarts unset.
    pub fn upsert(&mut self, owner_id: &str, mut spec: WatchSpec) -> UpsertOutcome {
        spec.last_alert_at = None;

        let subscriber = self
            .subscribers
            .entry(owner_id.to_string())
            .or_insert_with(|| Subscriber::new(owner_id));
        match subscriber.watch_mut(&spec.instrument) {
            Some(existing) => {
                *existing = spec;
                UpsertOutcome::Updated
            }
            None => {
                subscriber.watches.push(spec);
                UpsertOutcome::Created
            }
        }
    }

    /// Remove a watch. Returns the removed spec if one existed.
    pub fn remove(&mut self, owner_id: &str, instrument: &InstrumentKey) -> Option<WatchSpec> {
        let subscriber = self.subscribers.get_mut(owner_id)?;
        let idx = subscriber
            .watches
            .iter()
            .position(|w| &w.instrument == instrument)?;
        Some(subscriber.watches.remove(idx))
    }

    pub fn list(&self, owner_id: &str) -> &[WatchSpec] {
        self.subscribers
            .get(owner_id)
            .map(|s| s.watches.as_slice())
            .unwrap_or(&[])
    }

    /// Iterate every (owner, watch) pair.
    pub fn all(&self) -> impl Iterator<Item = (&str, &WatchSpec)> {
        self.subscribers.values().flat_map(|s| {
            s.watches
                .iter()
                .map(move |w| (s.owner_id.as_str(), w))
        })
    }

    /// Distinct instruments referenced by any watch.
    pub fn instruments(&self) -> BTreeSet<InstrumentKey> {
        self.all().map(|(_, w)| w.instrument.clone()).collect()
    }

    /// Start the cooldown of the watch that fired.
    ///
    /// `fired` is the watch as it was evaluated. Returns false if that watch
    /// has since been removed or replaced, so a replacement never inherits
    /// a cooldown it did not trigger.
    pub fn mark_alerted(&mut self, owner_id: &str, fired: &WatchSpec, at: DateTime<Utc>) -> bool {
        match self
            .subscribers
            .get_mut(owner_id)
            .and_then(|s| s.watch_mut(&fired.instrument))
        {
            Some(watch) if *watch == *fired => {
                watch.last_alert_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Drop a subscriber and all its watches.
    pub fn remove_subscriber(&mut self, owner_id: &str) -> Option<Subscriber> {
        self.subscribers.remove(owner_id)
    }

    pub fn subscriber(&self, owner_id: &str) -> Option<&Subscriber> {
        self.subscribers.get(owner_id)
    }

    pub fn subscribers(&self) -> impl Iterator<Item = &Subscriber> {
        self.subscribers.values()
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    pub fn watch_count(&self) -> usize {
        self.subscribers.values().map(|s| s.watches.len()).sum()
    }

    /// Rebuild from loaded subscribers, keyed by their owner id.
    pub fn from_subscribers(subscribers: impl IntoIterator<Item = Subscriber>) -> Self {
        Self {
            subscribers: subscribers
                .into_iter()
                .map(|s| (s.owner_id.clone(), s))
                .collect(),
        }
    }
}
