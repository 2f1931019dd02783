//! ConfigRequest reconciler (C5) and config contributor (C6). The
//! aggregation/completion structure mirrors the TargetRequest reconciler;
//! the payload contributed by this operator is its own configuration
//! descriptor rather than a target list, ensured to exist before it is
//! recorded.

use futures::stream::StreamExt;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{
    Api, Client, ResourceExt,
    api::{ObjectMeta, PostParams},
    runtime::{Controller, controller::Action},
};
use krkn_common::labels;
use krkn_types::{ConfigDescriptor, ConfigRequest, RequestPhase};
use owo_colors::OwoColorize;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;
use crate::liveness;
use crate::util::{
    CONFLICT_REQUEUE, Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
    patch,
};

const CONFIG_SCHEMA: &str = r#"{"type":"object"}"#;

struct Context {
    client: Client,
    namespace: String,
    operator_name: String,
    cleanup_threshold: Duration,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

pub async fn run(
    client: Client,
    namespace: String,
    operator_name: String,
    cleanup_threshold: Duration,
) {
    println!("{}", "starting ConfigRequest controller".green());
    let api: Api<ConfigRequest> = Api::namespaced(client.clone(), &namespace);
    let context = Arc::new(Context {
        client,
        namespace,
        operator_name,
        cleanup_threshold,
        #[cfg(feature = "metrics")]
        metrics: ControllerMetrics::new("config_request"),
    });
    Controller::new(api, Default::default())
        .run(reconcile, on_error, context)
        .for_each(|_res| async move {})
        .await;
}

fn config_map_name(operator_name: &str) -> String {
    format!("krkn-config-{operator_name}")
}

/// Config contributor (C6): ensures this operator's configuration object
/// exists, then returns the descriptor to record in `status.configData`.
async fn ensure_contributed(client: Client, namespace: &str, operator_name: &str) -> Result<ConfigDescriptor, Error> {
    let name = config_map_name(operator_name);
    let api: Api<ConfigMap> = Api::namespaced(client, namespace);
    if api.get(&name).await.is_err() {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "schema".to_string(),
                CONFIG_SCHEMA.to_string(),
            )])),
            ..Default::default()
        };
        match api.create(&PostParams::default(), &config_map).await {
            Ok(_) => {}
            Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 409) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(ConfigDescriptor {
        config_map_name: name,
        config_schema: CONFIG_SCHEMA.to_string(),
    })
}

async fn reconcile(instance: Arc<ConfigRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
    let client = ctx.client.clone();
    let namespace = ctx.namespace.as_str();
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    ctx.metrics
        .reconcile_counter
        .with_label_values(&[&name, namespace])
        .inc();
    #[cfg(feature = "metrics")]
    let start = std::time::Instant::now();

    let api: Api<ConfigRequest> = Api::namespaced(client.clone(), namespace);
    let Ok(current) = api.get(&name).await else {
        return Ok(Action::await_change());
    };
    if current.status.as_ref().map(|s| s.status) == Some(RequestPhase::Completed) {
        return Ok(Action::await_change());
    }

    let current = match patch::ensure_label(client.clone(), namespace, &current, labels::UUID, &current.spec.uuid).await {
        Ok(c) => c,
        Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
        Err(e) => return Err(e),
    };

    let current = if current.status.as_ref().map(|s| s.status).unwrap_or_default() == RequestPhase::Empty {
        match patch::update_status(client.clone(), namespace, &current, |obj| {
            let status = obj.status.get_or_insert_with(Default::default);
            status.status = RequestPhase::Pending;
            status.created = Some(Time::from(Timestamp::now()));
        })
        .await
        {
            Ok(c) => c,
            Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
            Err(e) => return Err(e),
        }
    } else {
        current
    };

    // C6: contribute this operator's descriptor exactly once.
    let already_contributed = current
        .status
        .as_ref()
        .map(|s| s.config_data.contains_key(&ctx.operator_name))
        .unwrap_or(false);
    // Benchmark the read phase now that the contribution state is known.
    #[cfg(feature = "metrics")]
    ctx.metrics
        .read_histogram
        .with_label_values(&[&name, namespace, "contribute"])
        .observe(start.elapsed().as_secs_f64());
    #[cfg(feature = "metrics")]
    let write_timer = ctx
        .metrics
        .write_histogram
        .with_label_values(&[&name, namespace, "contribute"])
        .start_timer();

    let current = if already_contributed {
        current
    } else {
        let descriptor = ensure_contributed(client.clone(), namespace, &ctx.operator_name).await?;
        let operator_name = ctx.operator_name.clone();
        match patch::update_status(client.clone(), namespace, &current, |obj| {
            let status = obj.status.get_or_insert_with(Default::default);
            status.config_data.insert(operator_name, descriptor);
        })
        .await
        {
            Ok(c) => c,
            Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
            Err(e) => return Err(e),
        }
    };

    let active = liveness::active_provider_names(client.clone(), namespace).await?;
    let contributors = current
        .status
        .as_ref()
        .map(|s| s.config_data.len())
        .unwrap_or(0);
    if liveness::gate_satisfied(&active, contributors) {
        match patch::update_status(client.clone(), namespace, &current, |obj| {
            let status = obj.status.get_or_insert_with(Default::default);
            status.status = RequestPhase::Completed;
            status.completed = Some(Time::from(Timestamp::now()));
        })
        .await
        {
            Ok(_) => {
                #[cfg(feature = "metrics")]
                ctx.metrics
                    .action_counter
                    .with_label_values(&[&name, namespace, "completed"])
                    .inc();
                println!(
                    "{}{}{}",
                    namespace.color(FG2),
                    "/".color(FG1),
                    name.color(FG2),
                )
            }
            Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
            Err(e) => return Err(e),
        }
    }

    let deleted = crate::cleanup::sweep::<ConfigRequest>(client, namespace, ctx.cleanup_threshold, |r| {
        match r.status.as_ref() {
            Some(s) if s.status == RequestPhase::Completed => s.created.as_ref().map(|t| t.0),
            _ => None,
        }
    })
    .await?;
    if deleted > 0 {
        println!("cleaned up {deleted} completed ConfigRequest object(s)");
    }

    #[cfg(feature = "metrics")]
    write_timer.observe_duration();

    Ok(Action::requeue(PROBE_INTERVAL))
}

fn on_error(_instance: Arc<ConfigRequest>, error: &Error, _ctx: Arc<Context>) -> Action {
    eprintln!("{}", format!("ConfigRequest reconciliation error: {error}").red());
    Action::requeue(Duration::from_secs(5))
}
