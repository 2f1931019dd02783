#![cfg(feature = "metrics")]

use prometheus::{HistogramVec, IntCounterVec, Opts};

/// Per-controller reconcile/action counters and phase-timing histograms.
/// One instance is created per reconciler (target_request, config_request,
/// scenario_run, target_credential) and lives in that reconciler's context.
pub struct ControllerMetrics {
    pub reconcile_counter: IntCounterVec,
    pub action_counter: IntCounterVec,
    pub read_histogram: HistogramVec,
    pub write_histogram: HistogramVec,
}

impl ControllerMetrics {
    pub fn new(controller: &str) -> Self {
        let reconcile_counter = IntCounterVec::new(
            Opts::new(
                "krkn_reconcile_total",
                "Number of reconciliations observed by this controller",
            )
            .const_label("controller", controller),
            &["name", "namespace"],
        )
        .expect("metric registration");
        let action_counter = IntCounterVec::new(
            Opts::new(
                "krkn_reconcile_action_total",
                "Number of times each action was taken",
            )
            .const_label("controller", controller),
            &["name", "namespace", "action"],
        )
        .expect("metric registration");
        let read_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "krkn_reconcile_read_seconds",
                "Time spent determining the next action",
            )
            .const_label("controller", controller),
            &["name", "namespace", "action"],
        )
        .expect("metric registration");
        let write_histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "krkn_reconcile_write_seconds",
                "Time spent applying the determined action",
            )
            .const_label("controller", controller),
            &["name", "namespace", "action"],
        )
        .expect("metric registration");
        Self {
            reconcile_counter,
            action_counter,
            read_histogram,
            write_histogram,
        }
    }
}
