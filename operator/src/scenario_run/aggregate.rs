//! Pod-status projection (spec.md §4.6.2) and run-level aggregation
//! (§4.6.3).

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{OwnerReference, Time};
use k8s_openapi::jiff::Timestamp;
use kube::{Api, Client};
use krkn_types::{ClusterJob, ClusterJobPhase, FailureReason, RunPhase, ScenarioRunSpec};
use std::time::Duration;

use super::{actions, retry};
use crate::util::Error;

const POD_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Refreshes one non-terminal `ClusterJob` against its pod, then applies
/// the retry state machine if it just transitioned into `Failed`.
pub async fn project_job(
    client: Client,
    namespace: &str,
    scenario_run_name: &str,
    owner: &OwnerReference,
    spec: &ScenarioRunSpec,
    job: &mut ClusterJob,
) -> Result<(), Error> {
    if matches!(
        job.phase,
        ClusterJobPhase::Succeeded | ClusterJobPhase::Cancelled | ClusterJobPhase::MaxRetriesExceeded
    ) {
        return Ok(());
    }
    if job.phase == ClusterJobPhase::Failed
        && job.max_retries != 0
        && job.retry_count >= job.max_retries
        && !job.cancel_requested
    {
        return Ok(());
    }

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let pod = match pods.get(&job.pod_name).await {
        Ok(pod) => Some(pod),
        Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 404) => None,
        Err(e) => return Err(e.into()),
    };

    match pod {
        None if job.phase == ClusterJobPhase::Pending && within_grace_period(job)? => {
            // Pod may not have materialized in the store yet.
        }
        None => {
            job.phase = ClusterJobPhase::Failed;
            job.message = Some("Pod not found".to_string());
            job.failure_reason = Some(FailureReason::PodNotFound);
            job.completion_time.get_or_insert(Time::from(Timestamp::now()));
        }
        Some(pod) => project_from_pod(job, &pod),
    }

    if job.phase == ClusterJobPhase::Failed {
        let should_retry = retry::apply(job, spec)?;
        if should_retry {
            let previous = job.clone();
            *job = actions::create_pod_for_cluster(
                client,
                namespace,
                scenario_run_name,
                owner,
                spec,
                &previous.provider_name,
                &previous.cluster_name,
                Some(&previous),
            )
            .await?;
        }
    }

    Ok(())
}

fn within_grace_period(job: &ClusterJob) -> Result<bool, Error> {
    let Some(start) = job.start_time.as_ref() else {
        return Ok(false);
    };
    let elapsed: Result<Duration, _> = Timestamp::now().duration_since(start.0).try_into();
    Ok(matches!(elapsed, Ok(elapsed) if elapsed < POD_GRACE_PERIOD))
}

fn project_from_pod(job: &mut ClusterJob, pod: &Pod) {
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Pending");

    match phase {
        "Pending" => job.phase = ClusterJobPhase::Pending,
        "Running" => job.phase = ClusterJobPhase::Running,
        "Succeeded" => {
            job.phase = ClusterJobPhase::Succeeded;
            job.completion_time.get_or_insert(Time::from(Timestamp::now()));
        }
        _ => {
            // "Unknown", or any phase not covered above, maps to Failed(PodUnknown)
            // unless a more specific container-level reason is found below.
            job.phase = ClusterJobPhase::Failed;
            job.failure_reason = Some(FailureReason::PodUnknown);
            job.completion_time.get_or_insert(Time::from(Timestamp::now()));
        }
    }

    if job.phase == ClusterJobPhase::Failed {
        apply_container_reason(job, pod);
    }
}

fn apply_container_reason(job: &mut ClusterJob, pod: &Pod) {
    let Some(container) = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|statuses| statuses.first())
    else {
        return;
    };
    let Some(state) = container.state.as_ref() else {
        return;
    };
    if let Some(terminated) = state.terminated.as_ref() {
        job.message = terminated.message.clone();
        job.failure_reason = Some(match (terminated.exit_code, terminated.reason.as_deref()) {
            (137, _) => FailureReason::OOMKilled,
            (143, _) => FailureReason::SIGTERM,
            (_, Some("Error")) => FailureReason::ContainerError,
            (_, Some(reason)) => {
                job.message = Some(reason.to_string());
                FailureReason::Other
            }
            _ => FailureReason::Other,
        });
    } else if let Some(waiting) = state.waiting.as_ref() {
        job.message = waiting.reason.clone();
        job.failure_reason = Some(FailureReason::Other);
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunCounters {
    pub total_jobs: u32,
    pub running_jobs: u32,
    pub successful_jobs: u32,
    pub failed_jobs: u32,
}

/// Run-level aggregation (spec.md §4.6.3): counts `clusterJobs` by phase
/// and derives the run's overall phase.
pub fn aggregate(jobs: &[ClusterJob]) -> (RunPhase, RunCounters) {
    let total_jobs = jobs.len() as u32;
    let mut counters = RunCounters {
        total_jobs,
        ..Default::default()
    };
    let mut pending = 0u32;
    for job in jobs {
        match job.phase {
            ClusterJobPhase::Pending => pending += 1,
            ClusterJobPhase::Running | ClusterJobPhase::Retrying => counters.running_jobs += 1,
            ClusterJobPhase::Succeeded => counters.successful_jobs += 1,
            ClusterJobPhase::Failed | ClusterJobPhase::Cancelled | ClusterJobPhase::MaxRetriesExceeded => {
                counters.failed_jobs += 1
            }
        }
    }

    let phase = if total_jobs == 0 {
        RunPhase::Pending
    } else if counters.running_jobs + pending > 0 {
        RunPhase::Running
    } else if counters.failed_jobs == total_jobs {
        RunPhase::Failed
    } else if counters.successful_jobs == total_jobs {
        RunPhase::Succeeded
    } else {
        RunPhase::PartiallyFailed
    };

    (phase, counters)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(phase: ClusterJobPhase) -> ClusterJob {
        ClusterJob {
            phase,
            ..Default::default()
        }
    }

    #[test]
    fn empty_run_is_pending() {
        let (phase, counters) = aggregate(&[]);
        assert_eq!(phase, RunPhase::Pending);
        assert_eq!(counters.total_jobs, 0);
    }

    #[test]
    fn any_pending_or_running_job_keeps_the_run_running() {
        let jobs = vec![
            job(ClusterJobPhase::Succeeded),
            job(ClusterJobPhase::Pending),
        ];
        let (phase, _) = aggregate(&jobs);
        assert_eq!(phase, RunPhase::Running);
    }

    #[test]
    fn retrying_counts_as_running() {
        let jobs = vec![job(ClusterJobPhase::Retrying)];
        let (phase, counters) = aggregate(&jobs);
        assert_eq!(phase, RunPhase::Running);
        assert_eq!(counters.running_jobs, 1);
    }

    #[test]
    fn all_succeeded_is_succeeded() {
        let jobs = vec![job(ClusterJobPhase::Succeeded), job(ClusterJobPhase::Succeeded)];
        let (phase, counters) = aggregate(&jobs);
        assert_eq!(phase, RunPhase::Succeeded);
        assert_eq!(counters.successful_jobs, 2);
    }

    #[test]
    fn all_failed_is_failed() {
        let jobs = vec![
            job(ClusterJobPhase::Failed),
            job(ClusterJobPhase::MaxRetriesExceeded),
        ];
        let (phase, counters) = aggregate(&jobs);
        assert_eq!(phase, RunPhase::Failed);
        assert_eq!(counters.failed_jobs, 2);
    }

    #[test]
    fn mixed_terminal_outcomes_are_partially_failed() {
        let jobs = vec![job(ClusterJobPhase::Succeeded), job(ClusterJobPhase::Failed)];
        let (phase, counters) = aggregate(&jobs);
        assert_eq!(phase, RunPhase::PartiallyFailed);
        assert_eq!(counters.successful_jobs, 1);
        assert_eq!(counters.failed_jobs, 1);
    }
}
