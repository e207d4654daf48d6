//! Core data types for the price watcher.

pub mod duration;
pub mod exchange;
pub mod instrument;
pub mod registry;
pub mod watch;

pub use duration::{format_duration, parse_duration};
pub use exchange::*;
pub use instrument::*;
pub use registry::*;
pub use watch::*;
