//! Uniform price-fetch capability.

use crate::FetchError;
use async_trait::async_trait;
use pricewatch_core::InstrumentKey;

/// Last traded price for an instrument, whatever the backend.
///
/// Implementations apply their own per-call timeout and never retry;
/// the caller simply asks again on its next tick.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch(&self, instrument: &InstrumentKey) -> Result<f64, FetchError>;
}
