pub mod args;
pub mod metrics;
pub mod shutdown;

pub fn signal_ready() {
    let _ = std::fs::write("/etc/ready", "ready");
}

/// Labels written by the core onto shared request objects and execution
/// artifacts (spec.md §6).
pub mod labels {
    pub const UUID: &str = "krkn.krkn-chaos.dev/uuid";
    pub const TARGET_REQUEST: &str = "krkn.krkn-chaos.dev/target-request";
    pub const JOB_ID: &str = "krkn-job-id";
    pub const SCENARIO_RUN: &str = "krkn-scenario-run";
    pub const SCENARIO_NAME: &str = "krkn-scenario-name";
    pub const CLUSTER_NAME: &str = "krkn-cluster-name";
    /// Distinct from `annotations::SPEC_HASH`'s domain-prefixed neighbors:
    /// this is the short, unprefixed label spec.md requires on every
    /// execution artifact (config maps, secrets, pods). Not to be confused
    /// with `labels::TARGET_REQUEST`, the domain-prefixed label carried
    /// only by the kubeconfig-bundle object.
    pub const TARGET_REQUEST_SHORT: &str = "krkn-target-request";
}

pub mod annotations {
    pub const SPEC_HASH: &str = "krkn.krkn-chaos.dev/spec-hash";
    pub const CREATED_BY: &str = "krkn.krkn-chaos.dev/created-by";
}

/// Name of the field manager used for server-side apply / status patches.
pub const MANAGER_NAME: &str = "krkn-operator";

pub fn hash_spec<T: serde::Serialize>(spec: &T) -> String {
    use sha2::{Digest, Sha256};
    let spec_bytes = serde_json::to_vec(spec).expect("spec must serialize to JSON");
    let mut hasher = Sha256::new();
    hasher.update(&spec_bytes);
    hex::encode(hasher.finalize())
}
