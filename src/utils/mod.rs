//! Utility module: errors, logging, metrics, retry and serde helpers.

pub mod errors;
pub mod metrics;
pub mod logging;
pub mod retry;
pub mod serde_helpers;

pub use errors::{FetchError, ValidationError, StoreError, SyncError, Result};
pub use metrics::{MetricsRegistry, METRICS};
pub use logging::init_logging;
pub use retry::{retry, Backoff, RetryPolicy};
