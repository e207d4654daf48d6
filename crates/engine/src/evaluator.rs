//! Alert decision for a single watch.

use crate::history::{HistoryStore, PriceChange};
use chrono::{DateTime, Utc};
use pricewatch_core::WatchSpec;
use std::time::Duration;

/// Why a qualifying move did not fire.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SuppressReason {
    CooldownActive { remaining: Duration },
}

/// Outcome of evaluating one watch at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Fire(PriceChange),
    Suppressed(SuppressReason),
    NoSignal,
}

impl Verdict {
    pub fn is_fire(&self) -> bool {
        matches!(self, Verdict::Fire(_))
    }
}

/// Decide whether `spec` fires at `now`. Pure: nothing is mutated.
///
/// The threshold bound is inclusive. A cooldown timer set in the future
/// counts as still active.
pub fn evaluate(spec: &WatchSpec, history: &HistoryStore, now: DateTime<Utc>) -> Verdict {
    let Some(change) = history.change_over(&spec.instrument, spec.period, now) else {
        return Verdict::NoSignal;
    };

    if change.percent.abs() < spec.threshold_pct {
        return Verdict::NoSignal;
    }

    if let Some(remaining) = cooldown_remaining(spec, now) {
        return Verdict::Suppressed(SuppressReason::CooldownActive { remaining });
    }

    Verdict::Fire(change)
}

fn cooldown_remaining(spec: &WatchSpec, now: DateTime<Utc>) -> Option<Duration> {
    let last = spec.last_alert_at?;
    let elapsed = now.signed_duration_since(last);
    let elapsed = elapsed.to_std().unwrap_or(Duration::ZERO);
    if elapsed < spec.cooldown {
        Some(spec.cooldown - elapsed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use pricewatch_core::{Exchange, InstrumentKey, PriceSample, WatchLimits};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn key() -> InstrumentKey {
        InstrumentKey::new(Exchange::Bybit, "SOLUSDT")
    }

    fn watch(threshold: f64, period: u64, cooldown: u64) -> WatchSpec {
        WatchSpec::new(
            key(),
            threshold,
            Duration::from_secs(period),
            Duration::from_secs(cooldown),
            &WatchLimits::default(),
        )
        .unwrap()
    }

    fn history(points: &[(i64, f64)]) -> HistoryStore {
        let mut store = HistoryStore::default();
        for &(t, p) in points {
            store.record(&key(), PriceSample::new(at(t), p));
        }
        store
    }

    #[test]
    fn test_fires_on_threshold_breach() {
        let history = history(&[(0, 100.0), (100, 100.0), (200, 103.0)]);
        let spec = watch(2.0, 200, 60);

        match evaluate(&spec, &history, at(200)) {
            Verdict::Fire(change) => assert!((change.percent - 3.0).abs() < 1e-9),
            other => panic!("expected Fire, got {:?}", other),
        }
    }

    #[test]
    fn test_suppressed_directly_after_firing() {
        let history = history(&[(0, 100.0), (100, 100.0), (200, 103.0), (230, 103.0)]);
        let mut spec = watch(2.0, 200, 60);
        assert!(evaluate(&spec, &history, at(200)).is_fire());
        spec.last_alert_at = Some(at(200));

        assert_eq!(
            evaluate(&spec, &history, at(230)),
            Verdict::Suppressed(SuppressReason::CooldownActive {
                remaining: Duration::from_secs(30)
            })
        );
    }

    #[test]
    fn test_cooldown_monotonic_until_expiry() {
        let history = history(&[(0, 100.0), (300, 110.0)]);
        let mut spec = watch(5.0, 100, 60);
        spec.last_alert_at = Some(at(240));

        for t in 241..300 {
            assert!(matches!(
                evaluate(&spec, &history, at(t)),
                Verdict::Suppressed(_)
            ));
        }
        assert!(evaluate(&spec, &history, at(300)).is_fire());
    }

    #[test]
    fn test_threshold_is_inclusive_and_symmetric() {
        let up = history(&[(0, 100.0), (60, 102.0)]);
        assert!(evaluate(&watch(2.0, 60, 0), &up, at(60)).is_fire());

        let down = history(&[(0, 100.0), (60, 98.0)]);
        assert!(evaluate(&watch(2.0, 60, 0), &down, at(60)).is_fire());
        assert_eq!(evaluate(&watch(2.5, 60, 0), &down, at(60)), Verdict::NoSignal);
    }

    #[test]
    fn test_no_signal_without_history() {
        let history = history(&[(0, 100.0)]);
        assert_eq!(evaluate(&watch(1.0, 60, 0), &history, at(60)), Verdict::NoSignal);
    }

    #[test]
    fn test_zero_cooldown_never_suppresses() {
        let history = history(&[(0, 100.0), (60, 150.0)]);
        let mut spec = watch(1.0, 60, 0);
        spec.last_alert_at = Some(at(60));
        assert!(evaluate(&spec, &history, at(60)).is_fire());
    }

    #[test]
    fn test_future_last_alert_counts_as_active() {
        let history = history(&[(0, 100.0), (60, 150.0)]);
        let mut spec = watch(1.0, 60, 30);
        spec.last_alert_at = Some(at(1000));
        assert_eq!(
            evaluate(&spec, &history, at(60)),
            Verdict::Suppressed(SuppressReason::CooldownActive {
                remaining: Duration::from_secs(30)
            })
        );
    }
}
