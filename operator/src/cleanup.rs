//! Cleanup utility (C3): deletes objects of a given kind whose
//! caller-supplied "created" timestamp is older than a threshold.

use k8s_openapi::jiff::{Span, Timestamp};
use kube::{Api, Client, Resource, api::DeleteParams, api::ListParams, core::NamespaceResourceScope};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::time::Duration;

use crate::util::Error;

/// Lists every object of kind `T` in `namespace` and deletes those for
/// which `extract_created` returns a timestamp older than `threshold`.
/// Not-found and conflict errors on an individual delete are swallowed;
/// any other per-item error is logged but does not abort the sweep.
/// Returns the number of successful deletes.
pub async fn sweep<T>(
    client: Client,
    namespace: &str,
    threshold: Duration,
    extract_created: impl Fn(&T) -> Option<Timestamp>,
) -> Result<usize, Error>
where
    T: Clone + Resource<Scope = NamespaceResourceScope> + DeserializeOwned + Debug,
    <T as Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client, namespace);
    let objects = api.list(&ListParams::default()).await?;
    let cutoff = cutoff_before(Timestamp::now(), threshold);

    let mut deleted = 0;
    for object in &objects {
        let Some(created) = extract_created(object) else {
            continue;
        };
        if !is_stale(created, cutoff) {
            continue;
        }
        let Some(name) = object.meta().name.clone() else {
            continue;
        };
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => deleted += 1,
            Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 404 || ae.code == 409) => {}
            Err(e) => eprintln!("cleanup: failed to delete '{name}': {e}"),
        }
    }
    Ok(deleted)
}

fn cutoff_before(now: Timestamp, threshold: Duration) -> Timestamp {
    now.checked_sub(Span::new().seconds(threshold.as_secs() as i64))
        .unwrap_or(Timestamp::MIN)
}

fn is_stale(created: Timestamp, cutoff: Timestamp) -> bool {
    created < cutoff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_older_than_cutoff_is_stale() {
        let now = Timestamp::now();
        let cutoff = cutoff_before(now, Duration::from_secs(60));
        let older = now.checked_sub(Span::new().seconds(120)).unwrap();
        assert!(is_stale(older, cutoff));
    }

    #[test]
    fn object_newer_than_cutoff_is_kept() {
        let now = Timestamp::now();
        let cutoff = cutoff_before(now, Duration::from_secs(60));
        let newer = now.checked_sub(Span::new().seconds(5)).unwrap();
        assert!(!is_stale(newer, cutoff));
    }

    #[test]
    fn object_exactly_at_cutoff_is_kept() {
        let now = Timestamp::now();
        let cutoff = cutoff_before(now, Duration::from_secs(60));
        assert!(!is_stale(cutoff, cutoff));
    }
}
