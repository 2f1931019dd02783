use std::time::Duration;

pub(crate) mod colors;
mod error;
pub mod metrics;
pub mod patch;

pub use error::{Error, Result};

/// Default interval for requeuing a managed resource that isn't otherwise
/// waiting on a specific event or timer.
pub(crate) const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// How long a reconciler waits before re-observing a CAS conflict
/// (spec.md §4.3 "Conflict handling").
pub(crate) const CONFLICT_REQUEUE: Duration = Duration::from_millis(100);

/// Name of the field manager used for server-side apply / status patches.
pub(crate) const MANAGER_NAME: &str = krkn_common::MANAGER_NAME;

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    krkn_common::hash_spec(spec)
}
