//! CreatePodForCluster (spec.md §4.6.1): materializes the execution
//! artifacts for one `(provider, cluster)` pair and the pod that consumes
//! them.

use base64::{Engine as _, engine::general_purpose::STANDARD as base64_standard};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EmptyDirVolumeSource, EnvVar, Pod, PodSecurityContext, PodSpec, Secret,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::jiff::Timestamp;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use krkn_common::annotations;
use krkn_types::{ClusterJob, ClusterJobPhase, RegistryCredentials, ScenarioRunSpec};
use std::collections::BTreeMap;

use crate::bundle;
use crate::util::Error;

const SECURITY_UID: i64 = 1001;

/// Names and, on success, owner-references every child object created for
/// one `(provider, cluster)` execution so a failure partway through can
/// delete what was already created.
struct Children {
    config_maps: Vec<String>,
    secrets: Vec<String>,
}

/// The label set spec.md requires on every execution artifact (config
/// maps, secrets, the pod itself) for one `(provider, cluster)` job.
fn execution_labels(
    spec: &ScenarioRunSpec,
    job_id: &str,
    scenario_run_name: &str,
    cluster_name: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (krkn_common::labels::JOB_ID.to_string(), job_id.to_string()),
        (
            krkn_common::labels::SCENARIO_RUN.to_string(),
            scenario_run_name.to_string(),
        ),
        (
            krkn_common::labels::SCENARIO_NAME.to_string(),
            spec.scenario_name.clone(),
        ),
        (
            krkn_common::labels::CLUSTER_NAME.to_string(),
            cluster_name.to_string(),
        ),
        (
            krkn_common::labels::TARGET_REQUEST_SHORT.to_string(),
            spec.target_request_id.clone(),
        ),
    ])
}

pub async fn create_pod_for_cluster(
    client: Client,
    namespace: &str,
    scenario_run_name: &str,
    owner: &OwnerReference,
    spec: &ScenarioRunSpec,
    provider_name: &str,
    cluster_name: &str,
    retry_of: Option<&ClusterJob>,
) -> Result<ClusterJob, Error> {
    let job_id = uuid::Uuid::new_v4().to_string();
    let base_name = format!("{scenario_run_name}-{cluster_name}-{}", &job_id[..8]);
    let labels = execution_labels(spec, &job_id, scenario_run_name, cluster_name);

    let mut children = Children {
        config_maps: Vec::new(),
        secrets: Vec::new(),
    };
    match materialize_children(client.clone(), namespace, owner, spec, &base_name, provider_name, cluster_name, &labels, &mut children).await {
        Ok(volumes_and_mounts) => {
            let (volumes, mounts) = volumes_and_mounts;
            match create_pod(client.clone(), namespace, owner, spec, &base_name, &labels, volumes, mounts).await {
                Ok(pod_name) => {
                    let mut job = match retry_of {
                        Some(existing) => existing.clone(),
                        None => ClusterJob::default(),
                    };
                    job.provider_name = provider_name.to_string();
                    job.cluster_name = cluster_name.to_string();
                    job.job_id = job_id;
                    job.pod_name = pod_name;
                    job.phase = ClusterJobPhase::Pending;
                    job.start_time = Some(Time::from(Timestamp::now()));
                    job.completion_time = None;
                    job.message = None;
                    Ok(job)
                }
                Err(e) => {
                    cleanup_children(client, namespace, &children).await;
                    Err(e)
                }
            }
        }
        Err(e) => {
            cleanup_children(client, namespace, &children).await;
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn materialize_children(
    client: Client,
    namespace: &str,
    owner: &OwnerReference,
    spec: &ScenarioRunSpec,
    base_name: &str,
    provider_name: &str,
    cluster_name: &str,
    labels: &BTreeMap<String, String>,
    children: &mut Children,
) -> Result<(Vec<Volume>, Vec<VolumeMount>), Error> {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let mut volumes = vec![Volume {
        name: "scratch".to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }];
    let mut mounts = vec![VolumeMount {
        name: "scratch".to_string(),
        mount_path: "/tmp".to_string(),
        ..Default::default()
    }];

    // Kubeconfig, decoded from the bundle.
    let kubeconfig_base64 = bundle::resolve_kubeconfig(client.clone(), namespace, &spec.target_request_id, provider_name, cluster_name).await?;
    let kubeconfig = String::from_utf8(
        base64_standard
            .decode(kubeconfig_base64)
            .map_err(Error::from)?,
    )
    .map_err(|_| Error::UserInput("kubeconfig payload is not valid UTF-8".to_string()))?;
    let kubeconfig_name = format!("{base_name}-kubeconfig");
    create_config_map(
        &config_maps,
        namespace,
        owner,
        spec,
        &kubeconfig_name,
        labels,
        BTreeMap::from([("config".to_string(), kubeconfig)]),
    )
    .await?;
    children.config_maps.push(kubeconfig_name.clone());
    volumes.push(Volume {
        name: "kubeconfig".to_string(),
        config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
            name: kubeconfig_name,
            ..Default::default()
        }),
        ..Default::default()
    });
    mounts.push(VolumeMount {
        name: "kubeconfig".to_string(),
        mount_path: spec.kubeconfig_path.clone(),
        sub_path: Some("config".to_string()),
        ..Default::default()
    });

    // One configuration object per scenario file.
    for (index, file) in spec.files.iter().enumerate() {
        let decoded = String::from_utf8(
            base64_standard
                .decode(&file.base64_content)
                .map_err(Error::from)?,
        )
        .map_err(|_| Error::UserInput(format!("file '{}' is not valid UTF-8", file.name)))?;
        let cm_name = format!("{base_name}-file-{index}");
        create_config_map(
            &config_maps,
            namespace,
            owner,
            spec,
            &cm_name,
            labels,
            BTreeMap::from([(file.name.clone(), decoded)]),
        )
        .await?;
        children.config_maps.push(cm_name.clone());
        let volume_name = format!("file-{index}");
        volumes.push(Volume {
            name: volume_name.clone(),
            config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                name: cm_name,
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: volume_name,
            mount_path: file.mount_path.clone(),
            sub_path: Some(file.name.clone()),
            ..Default::default()
        });
    }

    // Optional private-registry credentials.
    if let Some(registry) = spec.registry_credentials.as_ref() {
        let secret_name = format!("{base_name}-registry");
        create_registry_secret(&secrets, namespace, owner, spec, &secret_name, labels, registry).await?;
        children.secrets.push(secret_name);
    }

    Ok((volumes, mounts))
}

async fn create_config_map(
    api: &Api<ConfigMap>,
    namespace: &str,
    owner: &OwnerReference,
    spec: &ScenarioRunSpec,
    name: &str,
    labels: &BTreeMap<String, String>,
    data: BTreeMap<String, String>,
) -> Result<(), Error> {
    let config_map = ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                annotations::SPEC_HASH.to_string(),
                crate::util::hash_spec(spec),
            )])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    api.create(&PostParams::default(), &config_map).await?;
    Ok(())
}

fn docker_config_json(registry: &RegistryCredentials) -> String {
    let auth = match registry.token.as_deref() {
        Some(token) => base64_standard.encode(token),
        None => base64_standard.encode(format!(
            "{}:{}",
            registry.username.as_deref().unwrap_or_default(),
            registry.password.as_deref().unwrap_or_default()
        )),
    };
    serde_json::json!({
        "auths": {
            registry.registry_url.clone(): { "auth": auth }
        }
    })
    .to_string()
}

async fn create_registry_secret(
    api: &Api<Secret>,
    namespace: &str,
    owner: &OwnerReference,
    spec: &ScenarioRunSpec,
    name: &str,
    labels: &BTreeMap<String, String>,
    registry: &RegistryCredentials,
) -> Result<(), Error> {
    let payload = docker_config_json(registry);
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([(
                annotations::SPEC_HASH.to_string(),
                crate::util::hash_spec(spec),
            )])),
            ..Default::default()
        },
        type_: Some("kubernetes.io/dockerconfigjson".to_string()),
        data: Some(BTreeMap::from([(
            ".dockerconfigjson".to_string(),
            ByteString(payload.into_bytes()),
        )])),
        ..Default::default()
    };
    api.create(&PostParams::default(), &secret).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_pod(
    client: Client,
    namespace: &str,
    owner: &OwnerReference,
    spec: &ScenarioRunSpec,
    base_name: &str,
    labels: &BTreeMap<String, String>,
    volumes: Vec<Volume>,
    mounts: Vec<VolumeMount>,
) -> Result<String, Error> {
    let pod_name = format!("{base_name}-pod");
    let env: Vec<EnvVar> = spec
        .environment
        .iter()
        .map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..Default::default()
        })
        .collect();

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(pod_name.clone()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner.clone()]),
            labels: Some(labels.clone()),
            annotations: Some(BTreeMap::from([
                (annotations::SPEC_HASH.to_string(), crate::util::hash_spec(spec)),
                (annotations::CREATED_BY.to_string(), "krkn-operator".to_string()),
            ])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "scenario".to_string(),
                image: Some(spec.scenario_image.clone()),
                env: Some(env),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            restart_policy: Some("Never".to_string()),
            security_context: Some(PodSecurityContext {
                run_as_user: Some(SECURITY_UID),
                run_as_group: Some(SECURITY_UID),
                fs_group: Some(SECURITY_UID),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    };

    let pods: Api<Pod> = Api::namespaced(client, namespace);
    pods.create(&PostParams::default(), &pod).await?;
    Ok(pod_name)
}

async fn cleanup_children(client: Client, namespace: &str, children: &Children) {
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    for name in &children.config_maps {
        if let Err(e) = config_maps.delete(name, &Default::default()).await {
            eprintln!("cleanup: failed to delete config map '{name}' after partial pod creation failure: {e}");
        }
    }
    let secrets: Api<Secret> = Api::namespaced(client, namespace);
    for name in &children.secrets {
        if let Err(e) = secrets.delete(name, &Default::default()).await {
            eprintln!("cleanup: failed to delete secret '{name}' after partial pod creation failure: {e}");
        }
    }
}
