//! Target credential reconciler (C8): synchronizes a companion credential
//! object for `Target`s that carry an explicit `spec.action` (the legacy
//! variant described in spec.md §6). `TargetAction` is a closed enum, so
//! the "unknown action fails reconciliation" requirement is enforced by
//! the compiler rather than a runtime match-fallthrough.

use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::{
    Api, Client, ResourceExt,
    api::{DeleteParams, ObjectMeta, PostParams},
    runtime::{Controller, controller::Action},
};
use krkn_types::{Target, TargetAction, TargetCredential};
use owo_colors::OwoColorize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;
use crate::util::{Error, PROBE_INTERVAL};

struct Context {
    client: Client,
    namespace: String,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

pub async fn run(client: Client, namespace: String) {
    println!("{}", "starting target credential controller".green());
    let api: Api<Target> = Api::namespaced(client.clone(), &namespace);
    let context = Arc::new(Context {
        client,
        namespace,
        #[cfg(feature = "metrics")]
        metrics: ControllerMetrics::new("target_credential"),
    });
    Controller::new(api, Default::default())
        .run(reconcile, on_error, context)
        .for_each(|_res| async move {})
        .await;
}

fn credential_name(target: &Target) -> String {
    let name = target
        .spec
        .name
        .clone()
        .unwrap_or_else(|| target.spec.cluster_name.clone());
    format!("krkn-target-{name}")
}

fn desired_credential(target: &Target) -> TargetCredential {
    TargetCredential {
        token: target.spec.secret_uuid.clone(),
        api_endpoint: target.spec.cluster_api_url.clone(),
        name: target
            .spec
            .name
            .clone()
            .unwrap_or_else(|| target.spec.cluster_name.clone()),
    }
}

async fn reconcile(instance: Arc<Target>, ctx: Arc<Context>) -> Result<Action, Error> {
    let Some(action) = instance.spec.action else {
        return Ok(Action::await_change());
    };
    let client = ctx.client.clone();
    let namespace = ctx.namespace.as_str();
    let name = instance.name_any();
    let secret_name = credential_name(&instance);
    let api: Api<Secret> = Api::namespaced(client, namespace);

    #[cfg(feature = "metrics")]
    ctx.metrics
        .reconcile_counter
        .with_label_values(&[&name, namespace])
        .inc();
    #[cfg(feature = "metrics")]
    ctx.metrics
        .action_counter
        .with_label_values(&[&name, namespace, action.to_str()])
        .inc();

    match action {
        TargetAction::Create => {
            if api.get(&secret_name).await.is_err() {
                create(&api, &secret_name, namespace, &desired_credential(&instance)).await?;
            }
        }
        TargetAction::Update => match api.get(&secret_name).await {
            Ok(existing) => {
                let desired = desired_credential(&instance);
                if decode(&existing)? != desired {
                    let mut updated = existing.clone();
                    updated.data = Some(encode(&desired)?);
                    api.replace(&secret_name, &PostParams::default(), &updated)
                        .await?;
                }
            }
            Err(e) if e_is_not_found(&e) => {
                create(&api, &secret_name, namespace, &desired_credential(&instance)).await?;
            }
            Err(e) => return Err(e.into()),
        },
        TargetAction::Delete => match api.delete(&secret_name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) if e_is_not_found(&e) => {}
            Err(e) => return Err(e.into()),
        },
    }

    Ok(Action::requeue(PROBE_INTERVAL))
}

fn e_is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

async fn create(
    api: &Api<Secret>,
    name: &str,
    namespace: &str,
    credential: &TargetCredential,
) -> Result<(), Error> {
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(encode(credential)?),
        ..Default::default()
    };
    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 409) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn encode(credential: &TargetCredential) -> Result<BTreeMap<String, ByteString>, Error> {
    Ok(BTreeMap::from([(
        "credential".to_string(),
        ByteString(serde_json::to_vec(credential)?),
    )]))
}

fn decode(secret: &Secret) -> Result<TargetCredential, Error> {
    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get("credential"))
        .ok_or_else(|| Error::MissingField("secret has no credential key".to_string()))?;
    Ok(serde_json::from_slice(&data.0)?)
}

fn on_error(_instance: Arc<Target>, error: &Error, _ctx: Arc<Context>) -> Action {
    eprintln!("{}", format!("target credential reconciliation error: {error}").red());
    Action::requeue(Duration::from_secs(5))
}
