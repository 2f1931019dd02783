//! TargetRequest reconciler (C4): aggregates each active provider's ready
//! `Target` inventory into a shared `TargetRequest`, merges credentials
//! into the kubeconfig bundle, and declares completion once every active
//! provider has contributed.

use futures::stream::StreamExt;
use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use kube::{
    Api, Client, ResourceExt,
    api::ListParams,
    runtime::{Controller, controller::Action},
};
use krkn_common::labels;
use krkn_types::{ClusterEndpoint, RequestPhase, Target, TargetRequest};
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;
use crate::bundle;
use crate::liveness;
use crate::util::{
    CONFLICT_REQUEUE, Error, PROBE_INTERVAL,
    colors::{FG1, FG2},
    patch,
};

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
    println!("{}", "starting TargetRequest controller".green());
    let api: Api<TargetRequest> = Api::namespaced(client.clone(), &namespace);
    let context = Arc::new(Context {
        client,
        namespace,
        operator_name,
        cleanup_threshold,
        #[cfg(feature = "metrics")]
        metrics: ControllerMetrics::new("target_request"),
    });
    Controller::new(api, Default::default())
        .run(reconcile, on_error, context)
        .for_each(|_res| async move {})
        .await;
}

async fn reconcile(instance: Arc<TargetRequest>, ctx: Arc<Context>) -> Result<Action, Error> {
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

    // Step 1.
    let api: Api<TargetRequest> = Api::namespaced(client.clone(), namespace);
    let Ok(current) = api.get(&name).await else {
        return Ok(Action::await_change());
    };
    if current.status.as_ref().map(|s| s.status) == Some(RequestPhase::Completed) {
        return Ok(Action::await_change());
    }

    // Step 2: ensure the uuid label.
    let current = match patch::ensure_label(client.clone(), namespace, &current, labels::UUID, &current.spec.uuid).await {
        Ok(c) => c,
        Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
        Err(e) => return Err(e),
    };

    // Step 4: initialize pending state on first observation.
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

    // Steps 6-7: republish this operator's ready targets.
    let targets_api: Api<Target> = Api::namespaced(client.clone(), namespace);
    let targets = targets_api.list(&ListParams::default()).await?;
    let ready: Vec<&Target> = targets
        .iter()
        .filter(|t| t.status.as_ref().map(|s| s.ready).unwrap_or(false))
        .collect();
    let endpoints: Vec<ClusterEndpoint> = ready
        .iter()
        .map(|t| ClusterEndpoint {
            cluster_name: t.spec.cluster_name.clone(),
            cluster_api_url: t.spec.cluster_api_url.clone(),
        })
        .collect();

    // Benchmark the read phase now that the ready-target slice is known.
    #[cfg(feature = "metrics")]
    ctx.metrics
        .read_histogram
        .with_label_values(&[&name, namespace, "republish"])
        .observe(start.elapsed().as_secs_f64());
    #[cfg(feature = "metrics")]
    let write_timer = ctx
        .metrics
        .write_histogram
        .with_label_values(&[&name, namespace, "republish"])
        .start_timer();

    let operator_name = ctx.operator_name.clone();
    let current = match patch::update_status(client.clone(), namespace, &current, |obj| {
        let status = obj.status.get_or_insert_with(Default::default);
        status.target_data.insert(operator_name.clone(), endpoints);
    })
    .await
    {
        Ok(c) => c,
        Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
        Err(e) => return Err(e),
    };

    // Step 8: merge ready targets' credentials into the kubeconfig bundle.
    let owned_ready: Vec<Target> = ready.into_iter().cloned().collect();
    if let Err(e) = bundle::merge_targets(
        client.clone(),
        namespace,
        &current.spec.uuid,
        &ctx.operator_name,
        &owned_ready,
    )
    .await
    {
        eprintln!("{}", format!("bundle merge for '{name}' failed: {e}").red());
    }

    // Step 9: liveness-gated completion.
    let active = liveness::active_provider_names(client.clone(), namespace).await?;
    let contributors = current
        .status
        .as_ref()
        .map(|s| s.target_data.len())
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

    // Step 10: sweep old completed requests.
    let deleted = crate::cleanup::sweep::<TargetRequest>(client, namespace, ctx.cleanup_threshold, |r| {
        match r.status.as_ref() {
            Some(s) if s.status == RequestPhase::Completed => s.created.as_ref().map(|t| t.0),
            _ => None,
        }
    })
    .await?;
    if deleted > 0 {
        println!("cleaned up {deleted} completed TargetRequest object(s)");
    }

    #[cfg(feature = "metrics")]
    write_timer.observe_duration();

    Ok(Action::requeue(PROBE_INTERVAL))
}

fn on_error(_instance: Arc<TargetRequest>, error: &Error, _ctx: Arc<Context>) -> Action {
    eprintln!("{}", format!("TargetRequest reconciliation error: {error}").red());
    Action::requeue(Duration::from_secs(5))
}
