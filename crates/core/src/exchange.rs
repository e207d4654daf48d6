//! Exchange identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange a price feed is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Exchange {
    Binance = 100,
    Coinbase = 101,
    Bybit = 104,
    Upbit = 105,
    GateIO = 107,
}

impl Exchange {
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            100 => Some(Exchange::Binance),
            101 => Some(Exchange::Coinbase),
            104 => Some(Exchange::Bybit),
            105 => Some(Exchange::Upbit),
            107 => Some(Exchange::GateIO),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u16 {
        self as u16
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Exchange::Binance => "Binance",
            Exchange::Coinbase => "Coinbase",
            Exchange::Bybit => "Bybit",
            Exchange::Upbit => "Upbit",
            Exchange::GateIO => "Gate.io",
        }
    }

    /// Parse a user-supplied exchange name (case-insensitive, common aliases).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "binance" => Some(Exchange::Binance),
            "coinbase" => Some(Exchange::Coinbase),
            "bybit" => Some(Exchange::Bybit),
            "upbit" => Some(Exchange::Upbit),
            "gateio" | "gate.io" | "gate" => Some(Exchange::GateIO),
            _ => None,
        }
    }

    pub fn all() -> &'static [Exchange] {
        &[
            Exchange::Binance,
            Exchange::Coinbase,
            Exchange::Bybit,
            Exchange::Upbit,
            Exchange::GateIO,
        ]
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an exchange name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| UnknownExchange(s.to_string()))
    }
}
