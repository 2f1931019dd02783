//! ScenarioRun reconciler (C7): fans a run out into one pod per
//! `(provider, cluster)` pair, projects pod status onto `ClusterJob`s,
//! aggregates run-level phase and counters, and drives bounded retry
//! with backoff.

pub mod actions;
pub mod aggregate;
mod reconcile;
pub mod retry;

pub use reconcile::run;
