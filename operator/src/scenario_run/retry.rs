//! Retry/backoff state machine (spec.md §4.6.4), kept as pure functions
//! over `ClusterJob` so the transition logic can be exercised without a
//! store.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::jiff::Timestamp;
use krkn_types::{ClusterJob, ClusterJobPhase, RetryBackoff, ScenarioRunSpec};
use std::time::Duration;

use crate::util::Error;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(10);

pub fn base_delay(spec: &ScenarioRunSpec) -> Result<Duration, Error> {
    match spec.retry_delay.as_deref() {
        Some(raw) => Ok(parse_duration::parse(raw)?),
        None => Ok(DEFAULT_BASE_DELAY),
    }
}

pub fn backoff_delay(base: Duration, backoff: RetryBackoff, retry_count: u32) -> Duration {
    match backoff {
        RetryBackoff::Fixed => base,
        RetryBackoff::Exponential => base.saturating_mul(1u32.checked_shl(retry_count).unwrap_or(u32::MAX)),
    }
}

/// Applies the retry decision to a job that has just transitioned into
/// `Failed`, per spec.md §4.6.4. Mutates `job.phase` (and, on retry,
/// `retry_count`/`last_retry_time`) in place. Returns `true` when the
/// caller should immediately invoke `CreatePodForCluster` to materialize
/// a replacement pod.
pub fn apply(job: &mut ClusterJob, spec: &ScenarioRunSpec) -> Result<bool, Error> {
    if job.max_retries == 0 {
        job.max_retries = spec.max_retries;
    }
    if job.cancel_requested {
        job.phase = ClusterJobPhase::Cancelled;
        return Ok(false);
    }
    if job.retry_count >= job.max_retries {
        job.phase = ClusterJobPhase::MaxRetriesExceeded;
        return Ok(false);
    }

    let base = base_delay(spec)?;
    let delay = backoff_delay(base, spec.retry_backoff, job.retry_count);
    if let Some(last_retry) = job.last_retry_time.as_ref() {
        let elapsed: Result<Duration, _> = Timestamp::now().duration_since(last_retry.0).try_into();
        if matches!(elapsed, Ok(elapsed) if elapsed < delay) {
            // Stay Failed; wait for a later reconciliation tick.
            return Ok(false);
        }
    }

    job.phase = ClusterJobPhase::Retrying;
    job.retry_count += 1;
    job.last_retry_time = Some(Time::from(Timestamp::now()));
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_job(retry_count: u32, max_retries: u32) -> ClusterJob {
        ClusterJob {
            phase: ClusterJobPhase::Failed,
            retry_count,
            max_retries,
            ..Default::default()
        }
    }

    fn spec(max_retries: u32, backoff: RetryBackoff) -> ScenarioRunSpec {
        ScenarioRunSpec {
            max_retries,
            retry_backoff: backoff,
            retry_delay: Some("0s".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn fixed_backoff_is_constant() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, RetryBackoff::Fixed, 0), base);
        assert_eq!(backoff_delay(base, RetryBackoff::Fixed, 5), base);
    }

    #[test]
    fn exponential_backoff_doubles_per_attempt() {
        let base = Duration::from_secs(10);
        assert_eq!(backoff_delay(base, RetryBackoff::Exponential, 0), base);
        assert_eq!(
            backoff_delay(base, RetryBackoff::Exponential, 1),
            Duration::from_secs(20)
        );
        assert_eq!(
            backoff_delay(base, RetryBackoff::Exponential, 3),
            Duration::from_secs(80)
        );
    }

    #[test]
    fn exponential_backoff_saturates_instead_of_overflowing() {
        let base = Duration::from_secs(10);
        // A retry count this large would overflow `1u32 << n`; the shift
        // must saturate rather than panic.
        let delay = backoff_delay(base, RetryBackoff::Exponential, 64);
        assert_eq!(delay, base.saturating_mul(u32::MAX));
    }

    #[test]
    fn apply_retries_when_under_the_limit() {
        let mut job = failed_job(0, 0);
        let spec = spec(3, RetryBackoff::Fixed);
        let should_retry = apply(&mut job, &spec).unwrap();
        assert!(should_retry);
        assert_eq!(job.phase, ClusterJobPhase::Retrying);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.max_retries, 3);
    }

    #[test]
    fn apply_exhausts_once_retry_count_reaches_max() {
        let mut job = failed_job(3, 3);
        let spec = spec(3, RetryBackoff::Fixed);
        let should_retry = apply(&mut job, &spec).unwrap();
        assert!(!should_retry);
        assert_eq!(job.phase, ClusterJobPhase::MaxRetriesExceeded);
    }

    #[test]
    fn apply_respects_cancel_request_over_retry() {
        let mut job = failed_job(0, 3);
        job.cancel_requested = true;
        let spec = spec(3, RetryBackoff::Fixed);
        let should_retry = apply(&mut job, &spec).unwrap();
        assert!(!should_retry);
        assert_eq!(job.phase, ClusterJobPhase::Cancelled);
    }

    #[test]
    fn zero_max_retries_means_no_retries_allowed() {
        let mut job = failed_job(0, 0);
        let spec = spec(0, RetryBackoff::Fixed);
        let should_retry = apply(&mut job, &spec).unwrap();
        assert!(!should_retry);
        assert_eq!(job.phase, ClusterJobPhase::MaxRetriesExceeded);
    }
}
