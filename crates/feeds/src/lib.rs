//! Price sources for the watcher.
//!
//! - `source` - the `PriceSource` capability shared by all backends
//! - `rest` - per-exchange REST last-price fetchers

pub mod error;
pub mod rest;
pub mod source;

pub use error::*;
pub use rest::{RestPriceSource, DEFAULT_FETCH_TIMEOUT};
pub use source::PriceSource;
