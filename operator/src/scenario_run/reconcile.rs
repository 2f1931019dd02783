use futures::stream::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    Api, Client, ResourceExt,
    api::Resource,
    runtime::{Controller, controller::Action},
};
use krkn_types::{ClusterJobPhase, RunPhase, ScenarioRun};
use owo_colors::OwoColorize;
use std::{sync::Arc, time::Duration};

use super::{actions, aggregate};
#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;
use crate::util::{CONFLICT_REQUEUE, Error, colors::FG2, patch};

const RUNNING_REQUEUE: Duration = Duration::from_secs(10);

struct Context {
    client: Client,
    namespace: String,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

pub async fn run(client: Client, namespace: String) {
    println!("{}", "starting ScenarioRun controller".green());
    let api: Api<ScenarioRun> = Api::namespaced(client.clone(), &namespace);
    let context = Arc::new(Context {
        client,
        namespace,
        #[cfg(feature = "metrics")]
        metrics: ControllerMetrics::new("scenario_run"),
    });
    Controller::new(api, Default::default())
        .owns(
            Api::<Pod>::namespaced(context.client.clone(), &context.namespace),
            Default::default(),
        )
        .run(reconcile, on_error, context)
        .for_each(|_res| async move {})
        .await;
}

async fn reconcile(instance: Arc<ScenarioRun>, ctx: Arc<Context>) -> Result<Action, Error> {
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

    let api: Api<ScenarioRun> = Api::namespaced(client.clone(), namespace);
    let Ok(mut current) = api.get(&name).await else {
        return Ok(Action::await_change());
    };

    // Step 2: initialize on first observation.
    if current.status.is_none() {
        let total_targets: u32 = current
            .spec
            .target_clusters
            .values()
            .map(|clusters| clusters.len() as u32)
            .sum();
        current = patch::update_status(client.clone(), namespace, &current, |obj| {
            let status = obj.status.get_or_insert_with(Default::default);
            status.phase = RunPhase::Pending;
            status.total_targets = total_targets;
            status.cluster_jobs = Vec::new();
        })
        .await?;
    }

    let owner = current
        .controller_owner_ref(&())
        .ok_or_else(|| Error::UserInput("ScenarioRun is missing required metadata".to_string()))?;
    let snapshot = current.status.clone().unwrap_or_default();
    let mut jobs = snapshot.cluster_jobs.clone();

    // Step 3: fan out one pod per (provider, cluster) not already tracked.
    for (provider_name, clusters) in &current.spec.target_clusters {
        for cluster_name in clusters {
            let existing = jobs
                .iter()
                .position(|j| &j.cluster_name == cluster_name && &j.provider_name == provider_name);
            let needs_create = match existing {
                Some(i) => jobs[i].phase == ClusterJobPhase::Retrying,
                None => true,
            };
            if !needs_create {
                continue;
            }
            let retry_of = existing.map(|i| jobs[i].clone());
            match actions::create_pod_for_cluster(
                client.clone(),
                namespace,
                &name,
                &owner,
                &current.spec,
                provider_name,
                cluster_name,
                retry_of.as_ref(),
            )
            .await
            {
                Ok(job) => match existing {
                    Some(i) => jobs[i] = job,
                    None => jobs.push(job),
                },
                Err(e) => eprintln!(
                    "{}",
                    format!("CreatePodForCluster failed for '{provider_name}/{cluster_name}': {e}").red()
                ),
            }
        }
    }

    // Step 4: refresh every non-terminal job against its pod.
    for job in jobs.iter_mut() {
        if let Err(e) = aggregate::project_job(client.clone(), namespace, &name, &owner, &current.spec, job).await {
            eprintln!("{}", format!("pod-status projection failed for '{}': {e}", job.cluster_name).red());
        }
    }

    // Step 5: recompute run-level phase and counters.
    let (phase, counters) = aggregate::aggregate(&jobs);

    // Benchmark the read phase now that run-level state is known.
    #[cfg(feature = "metrics")]
    ctx.metrics
        .read_histogram
        .with_label_values(&[&name, namespace, &format!("{phase:?}")])
        .observe(start.elapsed().as_secs_f64());
    #[cfg(feature = "metrics")]
    let write_timer = ctx
        .metrics
        .write_histogram
        .with_label_values(&[&name, namespace, &format!("{phase:?}")])
        .start_timer();

    // Step 6: persist only if semantically different.
    let changed = snapshot.phase != phase
        || snapshot.successful_jobs != counters.successful_jobs
        || snapshot.failed_jobs != counters.failed_jobs
        || snapshot.running_jobs != counters.running_jobs
        || snapshot.cluster_jobs != jobs;
    if changed {
        match patch::update_status(client, namespace, &current, |obj| {
            let status = obj.status.get_or_insert_with(Default::default);
            status.phase = phase;
            status.successful_jobs = counters.successful_jobs;
            status.failed_jobs = counters.failed_jobs;
            status.running_jobs = counters.running_jobs;
            status.cluster_jobs = jobs;
        })
        .await
        {
            Ok(_) => {
                #[cfg(feature = "metrics")]
                ctx.metrics
                    .action_counter
                    .with_label_values(&[&name, namespace, &format!("{phase:?}")])
                    .inc();
                println!("{} {}", name.color(FG2), format!("{phase:?}").color(FG2))
            }
            Err(e) if e.is_conflict() => return Ok(Action::requeue(CONFLICT_REQUEUE)),
            Err(e) => return Err(e),
        }
    }

    #[cfg(feature = "metrics")]
    write_timer.observe_duration();

    // Step 7.
    if counters.running_jobs > 0 {
        Ok(Action::requeue(RUNNING_REQUEUE))
    } else {
        Ok(Action::await_change())
    }
}

fn on_error(_instance: Arc<ScenarioRun>, error: &Error, _ctx: Arc<Context>) -> Action {
    eprintln!("{}", format!("ScenarioRun reconciliation error: {error}").red());
    Action::requeue(Duration::from_secs(5))
}
