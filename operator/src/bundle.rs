//! Kubeconfig-bundle merge (spec.md §4.3.1) and secret decoding shared by
//! the TargetRequest reconciler (C4, the writer) and the ScenarioRun
//! reconciler (C7, the reader).
//!
//! The bundle is stored as an opaque `Secret` named after the
//! `TargetRequest`'s UUID, with a single `data` key `managed-clusters`
//! holding the UTF-8 JSON encoding of [`KubeconfigBundleData`].

use base64::{Engine as _, engine::general_purpose::STANDARD as base64_standard};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, api::ObjectMeta, api::PostParams};
use krkn_common::labels;
use krkn_types::{KubeconfigBundleData, ManagedCluster, Target};
use std::collections::BTreeMap;

use crate::util::Error;

const BUNDLE_KEY: &str = "managed-clusters";

pub async fn load_bundle(
    client: Client,
    namespace: &str,
    uuid: &str,
) -> Result<KubeconfigBundleData, Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);
    match api.get(uuid).await {
        Ok(secret) => decode_bundle(&secret),
        Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 404) => {
            Ok(KubeconfigBundleData::default())
        }
        Err(e) => Err(e.into()),
    }
}

/// Resolves the base64 kubeconfig for `(provider, cluster)` out of the
/// bundle named `target_request_id`, for consumption by the ScenarioRun
/// reconciler's pod fan-out (§4.6.1).
pub async fn resolve_kubeconfig(
    client: Client,
    namespace: &str,
    target_request_id: &str,
    provider_name: &str,
    cluster_name: &str,
) -> Result<String, Error> {
    let bundle = load_bundle(client, namespace, target_request_id).await?;
    bundle
        .managed_clusters
        .get(provider_name)
        .and_then(|clusters| clusters.get(cluster_name))
        .map(|managed| managed.kubeconfig.clone())
        .ok_or_else(|| {
            Error::MissingField(format!(
                "no kubeconfig bundled for provider '{provider_name}' cluster '{cluster_name}'"
            ))
        })
}

fn decode_bundle(secret: &Secret) -> Result<KubeconfigBundleData, Error> {
    let Some(data) = secret.data.as_ref().and_then(|d| d.get(BUNDLE_KEY)) else {
        return Ok(KubeconfigBundleData::default());
    };
    serde_json::from_slice(&data.0).map_err(Error::from)
}

/// Persists `bundle` as the `Secret` named `uuid`, creating it if absent.
async fn save_bundle(
    client: Client,
    namespace: &str,
    uuid: &str,
    bundle: &KubeconfigBundleData,
) -> Result<(), Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);
    let payload = serde_json::to_vec(bundle)?;
    let mut data = BTreeMap::new();
    data.insert(BUNDLE_KEY.to_string(), ByteString(payload));
    match api.get(uuid).await {
        Ok(existing) => {
            let mut updated = existing.clone();
            updated.data = Some(data);
            api.replace(uuid, &PostParams::default(), &updated).await?;
        }
        Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 404) => {
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(uuid.to_string()),
                    namespace: Some(namespace.to_string()),
                    labels: Some(BTreeMap::from([(
                        labels::TARGET_REQUEST.to_string(),
                        uuid.to_string(),
                    )])),
                    ..Default::default()
                },
                data: Some(data),
                ..Default::default()
            };
            api.create(&PostParams::default(), &secret).await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Number of times `merge_targets` will reload the bundle and reapply the
/// merge after a CAS conflict before giving up (spec.md §5: "CAS failure
/// from a parallel provider's bundle mutation via simple retry").
const MAX_MERGE_ATTEMPTS: u32 = 5;

/// Folds `ready_targets`' credentials into `bundle` under `operator_name`.
/// A single target's credential failure is logged and skipped per spec.md
/// §4.3.1 and §7; the others still merge.
async fn apply_merge(
    client: Client,
    namespace: &str,
    bundle: &mut KubeconfigBundleData,
    operator_name: &str,
    ready_targets: &[Target],
) {
    let operator_clusters = bundle.managed_clusters.entry(operator_name.to_string()).or_default();
    for target in ready_targets {
        let kubeconfig_base64 =
            match load_kubeconfig_base64(client.clone(), namespace, &target.spec.secret_uuid).await
            {
                Ok(v) => v,
                Err(e) => {
                    eprintln!(
                        "kubeconfig bundle merge: skipping target '{}': {e}",
                        target.spec.cluster_name
                    );
                    continue;
                }
            };
        operator_clusters.insert(
            target.spec.cluster_name.clone(),
            ManagedCluster {
                cluster_name: target.spec.cluster_name.clone(),
                cluster_api: target.spec.cluster_api_url.clone(),
                kubeconfig: kubeconfig_base64,
            },
        );
    }
}

/// Merges `operator_name`'s ready targets into the bundle named `uuid`.
/// A parallel provider's reconcile can mutate the same bundle between our
/// load and save, so a CAS conflict on the save reloads the bundle and
/// reapplies the merge in place, up to `MAX_MERGE_ATTEMPTS` times, rather
/// than surfacing the conflict to the caller.
pub async fn merge_targets(
    client: Client,
    namespace: &str,
    uuid: &str,
    operator_name: &str,
    ready_targets: &[Target],
) -> Result<(), Error> {
    for attempt in 1..=MAX_MERGE_ATTEMPTS {
        let mut bundle = load_bundle(client.clone(), namespace, uuid).await?;
        apply_merge(client.clone(), namespace, &mut bundle, operator_name, ready_targets).await;
        match save_bundle(client.clone(), namespace, uuid, &bundle).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_conflict() && attempt < MAX_MERGE_ATTEMPTS => {
                eprintln!(
                    "kubeconfig bundle merge: CAS conflict saving bundle '{uuid}' (attempt {attempt}/{MAX_MERGE_ATTEMPTS}), reloading and retrying"
                );
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("loop always returns on its final attempt")
}

/// Reads the base64-encoded kubeconfig payload (key `kubeconfig`) from the
/// named credential secret.
async fn load_kubeconfig_base64(
    client: Client,
    namespace: &str,
    secret_name: &str,
) -> Result<String, Error> {
    let api: Api<Secret> = Api::namespaced(client, namespace);
    let secret = api.get(secret_name).await?;
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get("kubeconfig"))
        .ok_or_else(|| Error::MissingField(format!("secret '{secret_name}' has no kubeconfig key")))?;
    Ok(base64_standard.encode(&data.0))
}
