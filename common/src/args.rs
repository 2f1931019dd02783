use clap::Parser;

/// Process-level configuration consumed at startup by the embedding host
/// (spec.md §6). Not authoritative over reconciler behavior — every field
/// here only tunes timing or addressing, never protocol semantics.
#[derive(Parser, Debug, Clone)]
pub struct OperatorArgs {
    /// Unique operator identity; doubles as the `Provider.spec.operatorName`
    /// and the key under which this instance contributes to shared requests.
    #[arg(long, env = "OPERATOR_NAME", required = true)]
    pub operator_name: String,

    /// Namespace the operator runs in and reconciles objects within.
    #[arg(long, env = "NAMESPACE", default_value = "default")]
    pub namespace: String,

    /// Provider heartbeat interval in seconds (`H` in spec.md §4.1).
    #[arg(long, env = "HEARTBEAT_INTERVAL_SECS", default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Age, in seconds, past which a completed TargetRequest/ConfigRequest
    /// is garbage-collected (`T_cleanup` in spec.md §3).
    #[arg(long, env = "CLEANUP_THRESHOLD_SECS", default_value_t = 3600)]
    pub cleanup_threshold_secs: u64,

    /// Port to expose `/healthz`, `/readyz`, and `/metrics` on. Unset disables
    /// the metrics server entirely.
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Leader-election lease name, scoped to this operator deployment.
    #[arg(long, env = "LEASE_NAME", default_value = "krkn-operator-lock")]
    pub lease_name: String,
}
