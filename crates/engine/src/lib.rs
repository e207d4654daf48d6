//! Price history and alert evaluation.
//!
//! Pure in-memory logic; the watcher loop in the alerts crate drives it.

pub mod evaluator;
pub mod history;

pub use evaluator::{evaluate, SuppressReason, Verdict};
pub use history::{HistoryStore, PriceChange, DEFAULT_RETENTION};
