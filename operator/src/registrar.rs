//! Provider registrar (C2): registers this operator instance as a
//! `Provider` at startup, refreshes its heartbeat timestamp on an
//! interval, and deactivates it on graceful shutdown.

use k8s_openapi::{apimachinery::pkg::apis::meta::v1::Time, jiff::Timestamp};
use kube::{Api, Client, api::PostParams};
use krkn_types::{Provider, ProviderSpec, ProviderStatus};
use owo_colors::OwoColorize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::util::{Error, colors::FG2};

const SHUTDOWN_BUDGET: Duration = Duration::from_secs(5);

/// Runs until `shutdown` is cancelled. Only the leader should call this
/// (spec.md §5 "provider registrar C2" is a singleton subsystem).
pub async fn run(
    client: Client,
    namespace: String,
    operator_name: String,
    heartbeat_interval: Duration,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    ensure_registered(client.clone(), &namespace, &operator_name).await?;
    println!(
        "{} {}",
        "registered provider".green(),
        operator_name.color(FG2)
    );

    let mut tick = tokio::time::interval(heartbeat_interval);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                deactivate(client, &namespace, &operator_name).await;
                return Ok(());
            }
            _ = tick.tick() => {
                if let Err(e) = heartbeat(client.clone(), &namespace, &operator_name).await {
                    eprintln!("provider heartbeat for '{operator_name}' failed: {e}");
                }
            }
        }
    }
}

/// Creates the `Provider` if absent; re-activates it if this instance
/// previously shut down and is now restarting. Creation failure is fatal
/// to registrar start-up, per contract.
async fn ensure_registered(client: Client, namespace: &str, operator_name: &str) -> Result<(), Error> {
    let api: Api<Provider> = Api::namespaced(client, namespace);
    match api.get(operator_name).await {
        Ok(existing) if existing.spec.active => Ok(()),
        Ok(existing) => {
            let mut updated = existing.clone();
            updated.spec.active = true;
            api.replace(operator_name, &PostParams::default(), &updated)
                .await?;
            Ok(())
        }
        Err(e) if matches!(&e, kube::Error::Api(ae) if ae.code == 404) => {
            let provider = Provider {
                metadata: kube::api::ObjectMeta {
                    name: Some(operator_name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..Default::default()
                },
                spec: ProviderSpec {
                    operator_name: operator_name.to_string(),
                    active: true,
                },
                status: Some(ProviderStatus {
                    timestamp: Some(Time::from(Timestamp::now())),
                }),
            };
            api.create(&PostParams::default(), &provider).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn heartbeat(client: Client, namespace: &str, operator_name: &str) -> Result<(), Error> {
    let api: Api<Provider> = Api::namespaced(client, namespace);
    let instance = api.get(operator_name).await?;
    let mut updated = instance.clone();
    updated.status = Some(ProviderStatus {
        timestamp: Some(Time::from(Timestamp::now())),
    });
    api.replace_status(
        operator_name,
        &PostParams::default(),
        serde_json::to_vec(&updated)?,
    )
    .await?;
    Ok(())
}

/// Best-effort: flips `spec.active = false` within a fixed budget.
/// Tolerates the `Provider` having already been deleted.
async fn deactivate(client: Client, namespace: &str, operator_name: &str) {
    let outcome = tokio::time::timeout(SHUTDOWN_BUDGET, deactivate_inner(client, namespace, operator_name)).await;
    match outcome {
        Ok(Ok(())) => println!("{}", format!("deactivated provider '{operator_name}'").red()),
        Ok(Err(e)) if e.is_not_found() => {}
        Ok(Err(e)) => eprintln!("failed to deactivate provider '{operator_name}': {e}"),
        Err(_) => eprintln!("deactivating provider '{operator_name}' exceeded shutdown budget"),
    }
}

async fn deactivate_inner(client: Client, namespace: &str, operator_name: &str) -> Result<(), Error> {
    let api: Api<Provider> = Api::namespaced(client, namespace);
    let instance = api.get(operator_name).await?;
    let mut updated = instance.clone();
    updated.spec.active = false;
    api.replace(operator_name, &PostParams::default(), &updated)
        .await?;
    Ok(())
}
