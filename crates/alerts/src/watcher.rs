//! Periodic poll-evaluate-deliver loop.
//!
//! One tick:
//! 1. snapshot the watched instruments (under the lock)
//! 2. fetch each instrument once, concurrently (lock released)
//! 3. record prices and evaluate every watch (under the lock)
//! 4. deliver fired alerts (lock released)
//! 5. apply delivery outcomes to the registry (under the lock)

use crate::sink::{DeliveryError, NotificationSink};
use crate::state::{SharedState, WatchState};
use crate::telegram::format_alert_message;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use pricewatch_core::{InstrumentKey, PriceSample, WatchSpec};
use pricewatch_engine::{evaluate, Verdict, DEFAULT_RETENTION};
use pricewatch_feeds::{FetchError, PriceSource};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    /// Minimum history kept per instrument.
    pub retention_window: Duration,
    pub max_concurrent_fetches: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            retention_window: DEFAULT_RETENTION,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

/// Counters for one tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub instruments: usize,
    pub fetched: usize,
    pub failed: usize,
    pub fired: usize,
    pub suppressed: usize,
    pub delivered: usize,
    /// Alerts lost to a transient delivery error.
    pub dropped: usize,
    pub pruned: usize,
}

struct PendingAlert {
    owner_id: String,
    /// The watch as evaluated; only this exact watch gets its cooldown started.
    spec: WatchSpec,
    message: String,
}

pub struct Watcher {
    state: SharedState,
    source: Arc<dyn PriceSource>,
    sink: Arc<dyn NotificationSink>,
    config: WatcherConfig,
}

impl Watcher {
    pub fn new(
        state: SharedState,
        source: Arc<dyn PriceSource>,
        sink: Arc<dyn NotificationSink>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            state,
            source,
            sink,
            config,
        }
    }

    /// Run ticks every `poll_interval` until `shutdown` flips to true or its
    /// sender is dropped. A tick in progress is allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent_fetches = self.config.max_concurrent_fetches,
            "Watcher started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Watcher stopped");
    }

    /// Execute one poll cycle as of `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let (instruments, horizons) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let instruments = state.registry.instruments();
            state.history.retain_instruments(&instruments);

            // Longest period watched per instrument. History keeps the
            // newest sample at or before that horizon, so retention never
            // starves a long-period watch even after a slow tick.
            let mut horizons: HashMap<InstrumentKey, Duration> = HashMap::new();
            for (_, spec) in state.registry.all() {
                let horizon = horizons.entry(spec.instrument.clone()).or_default();
                *horizon = (*horizon).max(spec.period);
            }

            if instruments.is_empty() {
                flush(state).await;
                debug!("No watches, nothing to poll");
                return report;
            }
            (instruments, horizons)
        };
        report.instruments = instruments.len();

        let results = self.fetch_all(instruments).await;

        let pending = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let mut priced = BTreeSet::new();
            for (instrument, result) in results {
                match result {
                    Ok(price) => {
                        let min_horizon = horizons.get(&instrument).copied().unwrap_or_default();
                        state.history.record_retaining(
                            &instrument,
                            PriceSample::new(now, price),
                            min_horizon,
                        );
                        priced.insert(instrument);
                        report.fetched += 1;
                    }
                    Err(e) => {
                        warn!(
                            exchange = %instrument.exchange,
                            symbol = instrument.symbol(),
                            error = %e,
                            "Price fetch failed"
                        );
                        report.failed += 1;
                    }
                }
            }

            let mut pending = Vec::new();
            for (owner_id, spec) in state.registry.all() {
                if !priced.contains(&spec.instrument) {
                    continue;
                }
                match evaluate(spec, &state.history, now) {
                    Verdict::Fire(change) => pending.push(PendingAlert {
                        owner_id: owner_id.to_string(),
                        spec: spec.clone(),
                        message: format_alert_message(&spec.instrument, &change, spec.period, now),
                    }),
                    Verdict::Suppressed(reason) => {
                        debug!(
                            owner = owner_id,
                            instrument = %spec.instrument,
                            reason = ?reason,
                            "Alert suppressed"
                        );
                        report.suppressed += 1;
                    }
                    Verdict::NoSignal => {}
                }
            }
            pending
        };
        report.fired = pending.len();

        let mut delivered = Vec::new();
        let mut gone = BTreeSet::new();
        for alert in pending {
            if gone.contains(&alert.owner_id) {
                continue;
            }
            match self.sink.send(&alert.owner_id, &alert.message).await {
                Ok(()) => {
                    info!(
                        owner = alert.owner_id.as_str(),
                        instrument = %alert.spec.instrument,
                        "Alert delivered"
                    );
                    delivered.push(alert);
                }
                Err(DeliveryError::RecipientGone(reason)) => {
                    warn!(
                        owner = alert.owner_id.as_str(),
                        reason = reason.as_str(),
                        "Recipient unreachable, pruning subscriber"
                    );
                    gone.insert(alert.owner_id);
                }
                Err(e) => {
                    warn!(
                        owner = alert.owner_id.as_str(),
                        instrument = %alert.spec.instrument,
                        error = %e,
                        "Alert dropped"
                    );
                    report.dropped += 1;
                }
            }
        }
        report.delivered = delivered.len();

        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            for alert in &delivered {
                match state
                    .registry
                    .mark_alerted(&alert.owner_id, &alert.spec, now)
                    .await
                {
                    Ok(true) => {}
                    Ok(false) => debug!(
                        owner = alert.owner_id.as_str(),
                        instrument = %alert.spec.instrument,
                        "Watch removed or replaced before cooldown could start"
                    ),
                    // Memory is already updated; flush below retries the write.
                    Err(_) => {}
                }
            }

            for owner_id in &gone {
                match state.registry.prune_subscriber(owner_id).await {
                    Ok(Some(_)) | Err(_) => report.pruned += 1,
                    Ok(None) => {}
                }
            }

            flush(state).await;
        }

        if report.fired > 0 || report.failed > 0 {
            info!(?report, "Tick complete");
        } else {
            debug!(?report, "Tick complete");
        }
        report
    }

    async fn fetch_all(
        &self,
        instruments: BTreeSet<InstrumentKey>,
    ) -> Vec<(InstrumentKey, Result<f64, FetchError>)> {
        stream::iter(instruments)
            .map(|instrument| {
                let source = Arc::clone(&self.source);
                async move {
                    let result = source.fetch(&instrument).await;
                    (instrument, result)
                }
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await
    }
}

async fn flush(state: &mut WatchState) {
    if let Err(e) = state.registry.flush_if_dirty().await {
        error!(error = %e, "Registry still not persisted");
    }
}
