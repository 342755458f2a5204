/// Shared utilities and types used across all layers
///
/// This module contains:
/// - Error types
/// - Time sources (wall clock and a manual clock for tests)
/// - Prometheus metrics

pub mod clock;
pub mod error;
pub mod metrics;

pub use clock::{ManualClock, SystemClock, TimeSource};
pub use error::{PowerMatcherError, Result};
