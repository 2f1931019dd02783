use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const GROUP: &str = "krkn.krkn-chaos.dev";
pub const VERSION: &str = "v1alpha1";

fn default_kubeconfig_path() -> String {
    "/home/krkn/.kube/config".to_string()
}

fn default_max_retries() -> u32 {
    3
}

// ---------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "krkn.krkn-chaos.dev",
    version = "v1alpha1",
    kind = "Provider",
    plural = "providers",
    derive = "PartialEq",
    status = "ProviderStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".spec.active", "name": "ACTIVE", "type": "boolean"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.timestamp", "name": "LAST-SEEN", "type": "date"}"#)]
pub struct ProviderSpec {
    pub operator_name: String,
    pub active: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ProviderStatus {
    pub timestamp: Option<Time>,
}

// ---------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum SecretType {
    #[serde(rename = "kubeconfig")]
    Kubeconfig,
    #[serde(rename = "token")]
    Token,
    #[serde(rename = "credentials")]
    Credentials,
}

impl Default for SecretType {
    fn default() -> Self {
        Self::Kubeconfig
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum TargetAction {
    #[serde(rename = "create")]
    Create,
    #[serde(rename = "update")]
    Update,
    #[serde(rename = "delete")]
    Delete,
}

impl TargetAction {
    pub fn to_str(&self) -> &'static str {
        match self {
            TargetAction::Create => "Create",
            TargetAction::Update => "Update",
            TargetAction::Delete => "Delete",
        }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "krkn.krkn-chaos.dev",
    version = "v1alpha1",
    kind = "Target",
    plural = "targets",
    derive = "PartialEq",
    status = "TargetStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".spec.clusterName", "name": "CLUSTER", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.ready", "name": "READY", "type": "boolean"}"#)]
pub struct TargetSpec {
    pub cluster_name: String,
    pub cluster_api_url: String,
    #[serde(default)]
    pub secret_type: SecretType,
    pub secret_uuid: String,
    pub ca_bundle: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Action applied by the target-credential reconciler (C8). Optional:
    /// targets that merely describe a fleet member for C4 carry no action.
    pub action: Option<TargetAction>,
    pub name: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct TargetStatus {
    #[serde(default)]
    pub ready: bool,
    pub created: Option<Time>,
}

// ---------------------------------------------------------------------
// TargetRequest
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum RequestPhase {
    #[default]
    #[serde(rename = "")]
    Empty,
    #[serde(rename = "pending")]
    Pending,
    #[serde(rename = "Completed")]
    Completed,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ClusterEndpoint {
    pub cluster_name: String,
    pub cluster_api_url: String,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "krkn.krkn-chaos.dev",
    version = "v1alpha1",
    kind = "TargetRequest",
    plural = "targetrequests",
    derive = "PartialEq",
    status = "TargetRequestStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.status", "name": "STATUS", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.created", "name": "CREATED", "type": "date"}"#)]
pub struct TargetRequestSpec {
    pub uuid: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct TargetRequestStatus {
    #[serde(default)]
    pub status: RequestPhase,
    #[serde(default)]
    pub target_data: BTreeMap<String, Vec<ClusterEndpoint>>,
    pub created: Option<Time>,
    pub completed: Option<Time>,
}

// ---------------------------------------------------------------------
// ConfigRequest
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ConfigDescriptor {
    pub config_map_name: String,
    pub config_schema: String,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "krkn.krkn-chaos.dev",
    version = "v1alpha1",
    kind = "ConfigRequest",
    plural = "configrequests",
    derive = "PartialEq",
    status = "ConfigRequestStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.status", "name": "STATUS", "type": "string"}"#)]
#[kube(printcolumn = r#"{"jsonPath": ".status.created", "name": "CREATED", "type": "date"}"#)]
pub struct ConfigRequestSpec {
    pub uuid: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ConfigRequestStatus {
    #[serde(default)]
    pub status: RequestPhase,
    #[serde(default)]
    pub config_data: BTreeMap<String, ConfigDescriptor>,
    pub created: Option<Time>,
    pub completed: Option<Time>,
}

// ---------------------------------------------------------------------
// ScenarioRun
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ScenarioFile {
    pub name: String,
    pub base64_content: String,
    pub mount_path: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum RetryBackoff {
    #[serde(rename = "fixed")]
    Fixed,
    #[serde(rename = "exponential")]
    Exponential,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::Fixed
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RegistryCredentials {
    pub registry_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "krkn.krkn-chaos.dev",
    version = "v1alpha1",
    kind = "ScenarioRun",
    plural = "scenarioruns",
    derive = "PartialEq",
    status = "ScenarioRunStatus",
    namespaced
)]
#[kube(printcolumn = r#"{"jsonPath": ".status.phase", "name": "PHASE", "type": "string"}"#)]
#[kube(
    printcolumn = r#"{"jsonPath": ".status.successfulJobs", "name": "SUCCEEDED", "type": "integer"}"#
)]
#[kube(
    printcolumn = r#"{"jsonPath": ".status.failedJobs", "name": "FAILED", "type": "integer"}"#
)]
pub struct ScenarioRunSpec {
    pub target_request_id: String,
    #[serde(default)]
    pub target_clusters: BTreeMap<String, Vec<String>>,
    pub scenario_name: String,
    pub scenario_image: String,
    #[serde(default = "default_kubeconfig_path")]
    pub kubeconfig_path: String,
    #[serde(default)]
    pub files: Vec<ScenarioFile>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    pub registry_credentials: Option<RegistryCredentials>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub retry_backoff: RetryBackoff,
    pub retry_delay: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum RunPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ClusterJobPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Cancelled,
    MaxRetriesExceeded,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum FailureReason {
    OOMKilled,
    SIGTERM,
    ContainerError,
    PodNotFound,
    PodUnknown,
    Other,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ClusterJob {
    pub provider_name: String,
    pub cluster_name: String,
    pub job_id: String,
    pub pod_name: String,
    #[serde(default)]
    pub phase: ClusterJobPhase,
    pub start_time: Option<Time>,
    pub completion_time: Option<Time>,
    pub last_retry_time: Option<Time>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub cancel_requested: bool,
    pub failure_reason: Option<FailureReason>,
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ScenarioRunStatus {
    #[serde(default)]
    pub phase: RunPhase,
    #[serde(default)]
    pub total_targets: u32,
    #[serde(default)]
    pub successful_jobs: u32,
    #[serde(default)]
    pub failed_jobs: u32,
    #[serde(default)]
    pub running_jobs: u32,
    #[serde(default)]
    pub cluster_jobs: Vec<ClusterJob>,
}

// ---------------------------------------------------------------------
// Kubeconfig bundle + registry credential wire formats (§6)
// ---------------------------------------------------------------------

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct ManagedCluster {
    #[serde(rename = "cluster-name")]
    pub cluster_name: String,
    #[serde(rename = "cluster-api")]
    pub cluster_api: String,
    pub kubeconfig: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct KubeconfigBundleData {
    #[serde(rename = "managed-clusters")]
    pub managed_clusters: BTreeMap<String, BTreeMap<String, ManagedCluster>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
pub struct TargetCredential {
    pub token: String,
    pub api_endpoint: String,
    pub name: String,
}
