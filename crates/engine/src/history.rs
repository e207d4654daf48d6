//! Bounded per-instrument price history.
//!
//! Each instrument keeps a time-ordered series of samples. Appending evicts
//! everything older than the retention horizon measured from the new sample.

use chrono::{DateTime, Utc};
use pricewatch_core::{InstrumentKey, PriceSample};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Percentage move between a past sample and the latest one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceChange {
    pub past_price: f64,
    pub latest_price: f64,
    pub percent: f64,
}

#[derive(Debug, Default)]
struct PriceSeries {
    samples: VecDeque<PriceSample>,
}

impl PriceSeries {
    fn push(&mut self, sample: PriceSample) -> bool {
        match self.samples.back_mut() {
            Some(last) if sample.timestamp < last.timestamp => return false,
            Some(last) if sample.timestamp == last.timestamp => {
                last.price = sample.price;
                return true;
            }
            _ => {}
        }
        self.samples.push_back(sample);
        true
    }

    /// Drop samples older than `cutoff`. With `keep_anchor`, the newest
    /// sample at or before `cutoff` survives, however old it is.
    fn evict_before(&mut self, cutoff: DateTime<Utc>, keep_anchor: bool) {
        while self.samples.front().is_some_and(|s| s.timestamp < cutoff) {
            let next_is_newer = self.samples.get(1).map_or(true, |s| s.timestamp > cutoff);
            if keep_anchor && next_is_newer {
                break;
            }
            self.samples.pop_front();
        }
    }
}

/// Price history for every watched instrument.
#[derive(Debug)]
pub struct HistoryStore {
    retention: Duration,
    series: HashMap<InstrumentKey, PriceSeries>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl HistoryStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            series: HashMap::new(),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append a sample and evict samples older than the retention window.
    ///
    /// Returns false if the sample is older than the newest one already
    /// recorded (the series is left untouched).
    pub fn record(&mut self, instrument: &InstrumentKey, sample: PriceSample) -> bool {
        self.record_retaining(instrument, sample, Duration::ZERO)
    }

    /// Like [`record`](Self::record), but keeps at least `min_horizon` of
    /// history even when it exceeds the retention window.
    ///
    /// A non-zero `min_horizon` also keeps the newest sample at or before
    /// `sample.timestamp - horizon`, so `change_over` for a period up to the
    /// horizon still finds its past price after an irregular gap.
    pub fn record_retaining(
        &mut self,
        instrument: &InstrumentKey,
        sample: PriceSample,
        min_horizon: Duration,
    ) -> bool {
        let series = self.series.entry(instrument.clone()).or_default();
        if !series.push(sample) {
            debug!(
                instrument = %instrument,
                timestamp = %sample.timestamp,
                "Dropping out-of-order sample"
            );
            return false;
        }

        let horizon = self.retention.max(min_horizon);
        if let Some(cutoff) = chrono::Duration::from_std(horizon)
            .ok()
            .and_then(|h| sample.timestamp.checked_sub_signed(h))
        {
            series.evict_before(cutoff, !min_horizon.is_zero());
        }
        true
    }

    /// Percentage change between the latest sample and the newest sample at
    /// or before `now - period`.
    ///
    /// `None` means insufficient data: fewer than two samples, no sample old
    /// enough, or a zero past price.
    pub fn change_over(
        &self,
        instrument: &InstrumentKey,
        period: Duration,
        now: DateTime<Utc>,
    ) -> Option<PriceChange> {
        let samples = &self.series.get(instrument)?.samples;
        if samples.len() < 2 {
            return None;
        }

        let target = now.checked_sub_signed(chrono::Duration::from_std(period).ok()?)?;
        let idx = samples.partition_point(|s| s.timestamp <= target);
        if idx == 0 {
            return None;
        }

        let past = samples[idx - 1].price;
        let latest = samples.back()?.price;
        if past == 0.0 {
            return None;
        }

        Some(PriceChange {
            past_price: past,
            latest_price: latest,
            percent: (latest - past) / past * 100.0,
        })
    }

    pub fn latest(&self, instrument: &InstrumentKey) -> Option<PriceSample> {
        self.series.get(instrument)?.samples.back().copied()
    }

    pub fn samples(&self, instrument: &InstrumentKey) -> Vec<PriceSample> {
        self.series
            .get(instrument)
            .map(|s| s.samples.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop series for instruments no longer referenced by any watch.
    pub fn retain_instruments(&mut self, keep: &BTreeSet<InstrumentKey>) {
        self.series.retain(|key, _| keep.contains(key));
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricewatch_core::Exchange;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn key() -> InstrumentKey {
        InstrumentKey::new(Exchange::Bybit, "SOLUSDT")
    }

    fn store_with(points: &[(i64, f64)]) -> HistoryStore {
        let mut store = HistoryStore::default();
        for &(t, p) in points {
            assert!(store.record(&key(), PriceSample::new(at(t), p)));
        }
        store
    }

    #[test]
    fn test_change_over_scenario() {
        let store = store_with(&[(0, 100.0), (100, 100.0), (200, 103.0)]);
        let change = store
            .change_over(&key(), Duration::from_secs(200), at(200))
            .unwrap();
        assert_eq!(change.past_price, 100.0);
        assert_eq!(change.latest_price, 103.0);
        assert!((change.percent - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_change_over_picks_latest_eligible_sample() {
        let store = store_with(&[(0, 100.0), (50, 110.0), (60, 120.0), (100, 132.0)]);
        // target = 55: sample at 50 is the newest at or before it, even
        // though 60 is closer in absolute distance.
        let change = store
            .change_over(&key(), Duration::from_secs(45), at(100))
            .unwrap();
        assert_eq!(change.past_price, 110.0);
    }

    #[test]
    fn test_change_over_tie_is_inclusive() {
        let store = store_with(&[(0, 50.0), (100, 100.0), (200, 90.0)]);
        let change = store
            .change_over(&key(), Duration::from_secs(100), at(200))
            .unwrap();
        assert_eq!(change.past_price, 100.0);
        assert!((change.percent + 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_data() {
        let empty = HistoryStore::default();
        assert_eq!(empty.change_over(&key(), Duration::from_secs(10), at(0)), None);

        let single = store_with(&[(100, 1.0)]);
        assert_eq!(single.change_over(&key(), Duration::from_secs(10), at(200)), None);

        let too_recent = store_with(&[(100, 1.0), (110, 2.0)]);
        assert_eq!(
            too_recent.change_over(&key(), Duration::from_secs(60), at(110)),
            None
        );
    }

    #[test]
    fn test_zero_past_price_is_insufficient() {
        let store = store_with(&[(0, 0.0), (100, 5.0)]);
        assert_eq!(store.change_over(&key(), Duration::from_secs(100), at(100)), None);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let mut store = store_with(&[(100, 1.0)]);
        assert!(!store.record(&key(), PriceSample::new(at(50), 2.0)));
        assert_eq!(store.samples(&key()).len(), 1);
    }

    #[test]
    fn test_same_timestamp_replaces_price() {
        let mut store = store_with(&[(100, 1.0)]);
        assert!(store.record(&key(), PriceSample::new(at(100), 2.0)));
        assert_eq!(store.samples(&key()), vec![PriceSample::new(at(100), 2.0)]);
    }

    #[test]
    fn test_eviction_by_retention() {
        let mut store = HistoryStore::new(Duration::from_secs(60));
        for t in [0, 30, 60, 90, 120] {
            store.record(&key(), PriceSample::new(at(t), 1.0));
        }
        let kept: Vec<i64> = store
            .samples(&key())
            .iter()
            .map(|s| s.timestamp.timestamp())
            .collect();
        assert_eq!(kept, vec![60, 90, 120]);
    }

    #[test]
    fn test_record_retaining_keeps_longer_horizon() {
        let mut store = HistoryStore::new(Duration::from_secs(60));
        for t in [0, 60, 120, 180] {
            store.record_retaining(
                &key(),
                PriceSample::new(at(t), 100.0 + t as f64),
                Duration::from_secs(180),
            );
        }
        assert_eq!(store.samples(&key()).len(), 4);
        let change = store
            .change_over(&key(), Duration::from_secs(180), at(180))
            .unwrap();
        assert_eq!(change.past_price, 100.0);
    }

    #[test]
    fn test_record_retaining_keeps_anchor_across_slow_gap() {
        let mut store = HistoryStore::new(Duration::from_secs(60));
        let horizon = Duration::from_secs(120);
        // Expected every 60s, but the sample after t=0 arrived at t=150.
        for (t, price) in [(0, 100.0), (150, 110.0), (300, 121.0)] {
            store.record_retaining(&key(), PriceSample::new(at(t), price), horizon);
        }

        let change = store.change_over(&key(), horizon, at(300)).unwrap();
        assert_eq!(change.past_price, 110.0);
        let kept: Vec<i64> = store
            .samples(&key())
            .iter()
            .map(|s| s.timestamp.timestamp())
            .collect();
        assert_eq!(kept, vec![150, 300]);
    }

    #[test]
    fn test_retain_instruments() {
        let mut store = store_with(&[(0, 1.0)]);
        let other = InstrumentKey::new(Exchange::Binance, "BTCUSDT");
        store.record(&other, PriceSample::new(at(0), 1.0));
        assert_eq!(store.len(), 2);

        let keep: BTreeSet<_> = [other.clone()].into_iter().collect();
        store.retain_instruments(&keep);
        assert_eq!(store.len(), 1);
        assert!(store.latest(&other).is_some());
        assert!(store.latest(&key()).is_none());
    }

    proptest! {
        #[test]
        fn prop_no_sample_older_than_retention(
            gaps in prop::collection::vec(1i64..120, 1..60),
            retention_secs in 10u64..600,
        ) {
            let mut store = HistoryStore::new(Duration::from_secs(retention_secs));
            let mut t = 0i64;
            for gap in gaps {
                t += gap;
                store.record(&key(), PriceSample::new(at(t), 1.0));
                let cutoff = t - retention_secs as i64;
                for sample in store.samples(&key()) {
                    prop_assert!(sample.timestamp.timestamp() >= cutoff);
                }
            }
        }

        #[test]
        fn prop_retained_horizon_always_has_past_price(
            gaps in prop::collection::vec(1i64..400, 2..60),
            period_secs in 10u64..600,
        ) {
            let mut store = HistoryStore::new(Duration::from_secs(30));
            let period = Duration::from_secs(period_secs);
            let first = 1_000i64;
            let mut t = first;
            store.record_retaining(&key(), PriceSample::new(at(t), 1.0), period);
            for gap in gaps {
                t += gap;
                store.record_retaining(&key(), PriceSample::new(at(t), 2.0), period);
                if t - period_secs as i64 >= first {
                    prop_assert!(store.change_over(&key(), period, at(t)).is_some());
                }
            }
        }

        #[test]
        fn prop_change_over_exact_gap(
            past in 0.01f64..1_000_000.0,
            latest in 0.01f64..1_000_000.0,
            gap in 10i64..3000,
        ) {
            let mut store = HistoryStore::default();
            store.record(&key(), PriceSample::new(at(0), past));
            store.record(&key(), PriceSample::new(at(gap), latest));
            let change = store
                .change_over(&key(), Duration::from_secs(gap as u64), at(gap))
                .unwrap();
            prop_assert_eq!(change.percent, (latest - past) / past * 100.0);
        }

        #[test]
        fn prop_insufficient_when_nothing_precedes_target(
            first in 0i64..1000,
            period in 1u64..1000,
        ) {
            let mut store = HistoryStore::default();
            store.record(&key(), PriceSample::new(at(first), 1.0));
            store.record(&key(), PriceSample::new(at(first + 1), 2.0));
            // now - period lands one second before the oldest sample
            let now = at(first - 1 + period as i64);
            prop_assert_eq!(store.change_over(&key(), Duration::from_secs(period), now), None);
        }
    }
}
