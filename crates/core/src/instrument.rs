//! Instrument identity and price samples.

use crate::Exchange;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// An (exchange, symbol) pair identifying one price feed.
///
/// The symbol is the exchange-native ticker (`BTCUSDT`, `BTC-USD`, `KRW-BTC`, ...),
/// trimmed and uppercased so lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrumentKey {
    pub exchange: Exchange,
    #[serde(deserialize_with = "deserialize_symbol")]
    pub symbol: CompactString,
}

impl InstrumentKey {
    pub fn new(exchange: Exchange, symbol: &str) -> Self {
        Self {
            exchange,
            symbol: normalize_symbol(symbol),
        }
    }

    #[inline]
    pub fn symbol(&self) -> &str {
        self.symbol.as_str()
    }
}

impl fmt::Display for InstrumentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.symbol)
    }
}

fn normalize_symbol(symbol: &str) -> CompactString {
    CompactString::new(symbol.trim().to_uppercase())
}

fn deserialize_symbol<'de, D>(deserializer: D) -> Result<CompactString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = CompactString::deserialize(deserializer)?;
    Ok(normalize_symbol(&raw))
}

/// One observed price. Immutable once recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

impl PriceSample {
    pub fn new(timestamp: DateTime<Utc>, price: f64) -> Self {
        Self { timestamp, price }
    }
}
