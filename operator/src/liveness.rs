//! Shared helpers consulted by the TargetRequest (C4) and ConfigRequest
//! (C5) reconcilers: which providers currently count as active, and
//! whether a request's set of contributors satisfies the completion gate.

use kube::{Api, Client, api::ListParams};
use krkn_types::Provider;
use std::collections::BTreeSet;

use crate::util::Error;

pub async fn active_provider_names(
    client: Client,
    namespace: &str,
) -> Result<BTreeSet<String>, Error> {
    let api: Api<Provider> = Api::namespaced(client, namespace);
    let providers = api.list(&ListParams::default()).await?;
    Ok(providers
        .into_iter()
        .filter(|p| p.spec.active)
        .map(|p| p.spec.operator_name)
        .collect())
}

/// Liveness-gated closure (spec.md §4.3): completion requires at least as
/// many contributors as there are currently-active providers, and at least
/// one active provider must exist.
pub fn gate_satisfied(active: &BTreeSet<String>, contributors: usize) -> bool {
    !active.is_empty() && contributors >= active.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn providers(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_active_providers_never_satisfies_the_gate() {
        assert!(!gate_satisfied(&BTreeSet::new(), 0));
        assert!(!gate_satisfied(&BTreeSet::new(), 5));
    }

    #[test]
    fn fewer_contributors_than_active_providers_is_unsatisfied() {
        let active = providers(&["a", "b", "c"]);
        assert!(!gate_satisfied(&active, 2));
    }

    #[test]
    fn contributors_matching_or_exceeding_active_providers_satisfies() {
        let active = providers(&["a", "b"]);
        assert!(gate_satisfied(&active, 2));
        assert!(gate_satisfied(&active, 3));
    }
}
