mod bundle;
mod cleanup;
mod config_request;
mod liveness;
mod registrar;
mod scenario_run;
mod target_credential;
mod target_request;
mod util;

use clap::Parser;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use krkn_common::args::OperatorArgs;
use owo_colors::OwoColorize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LEASE_TTL: Duration = Duration::from_secs(15);
const LEASE_RENEW_EVERY: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = OperatorArgs::parse();
    println!(
        "{} {}",
        "starting krkn-operator •".green(),
        args.operator_name.clone().green()
    );

    let client = Client::try_default().await?;
    krkn_common::metrics::maybe_spawn_metrics_server(args.metrics_port);

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        krkn_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });
    krkn_common::signal_ready();

    let holder_id = std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("{}-{}", args.operator_name, uuid::Uuid::new_v4()));
    let leadership = LeaseLock::new(
        client.clone(),
        &args.namespace,
        LeaseLockParams {
            holder_id,
            lease_name: args.lease_name.clone(),
            lease_ttl: LEASE_TTL,
        },
    );

    let heartbeat_interval = Duration::from_secs(args.heartbeat_interval_secs);
    let cleanup_threshold = Duration::from_secs(args.cleanup_threshold_secs);

    let mut leader_tasks: Option<LeaderSubsystems> = None;
    let mut tick = tokio::time::interval(LEASE_RENEW_EVERY);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                // If we hold leadership, let the registrar's own
                // shutdown-triggered deactivation run to completion
                // (bounded by its own timeout budget) before the rest of
                // the subsystems are torn down.
                if let Some(tasks) = leader_tasks.take() {
                    tasks.shut_down().await;
                }
                break;
            }
            _ = tick.tick() => {}
        }

        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("{}", format!("leader election renew/acquire failed: {e}").red());
                if let Some(tasks) = leader_tasks.take() {
                    tasks.abort_all();
                }
                continue;
            }
        };

        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if leader_tasks.is_none() {
                println!("{}", "acquired leadership; starting controllers".green());
                leader_tasks = Some(spawn_leader_subsystems(
                    client.clone(),
                    args.clone(),
                    heartbeat_interval,
                    cleanup_threshold,
                    shutdown.clone(),
                ));
            }
        } else if let Some(tasks) = leader_tasks.take() {
            eprintln!("{}", "lost leadership; stopping controllers".red());
            tasks.abort_all();
        }
    }

    Ok(())
}

/// Handles for the bundle of controllers that only the lease holder runs.
/// Tracked individually (rather than behind one wrapper task) so losing
/// leadership aborts every one of them instead of merely detaching them.
struct LeaderSubsystems {
    registrar: tokio::task::JoinHandle<Result<(), util::Error>>,
    others: Vec<tokio::task::JoinHandle<()>>,
}

impl LeaderSubsystems {
    /// Leadership lost or lease renewal failed: nothing to wait for, just
    /// stop everything immediately.
    fn abort_all(self) {
        self.registrar.abort();
        for handle in self.others {
            handle.abort();
        }
    }

    /// Graceful shutdown: the registrar reacts to the same `shutdown`
    /// token and deactivates itself within its own budget before
    /// returning, so wait for it rather than aborting it.
    async fn shut_down(self) {
        if let Err(e) = self.registrar.await {
            eprintln!("registrar task panicked: {e}");
        }
        for handle in self.others {
            handle.abort();
        }
    }
}

fn spawn_leader_subsystems(
    client: Client,
    args: OperatorArgs,
    heartbeat_interval: Duration,
    cleanup_threshold: Duration,
    shutdown: CancellationToken,
) -> LeaderSubsystems {
    let registrar = tokio::spawn(registrar::run(
        client.clone(),
        args.namespace.clone(),
        args.operator_name.clone(),
        heartbeat_interval,
        shutdown,
    ));
    let others = vec![
        tokio::spawn(target_request::run(
            client.clone(),
            args.namespace.clone(),
            args.operator_name.clone(),
            cleanup_threshold,
        )),
        tokio::spawn(config_request::run(
            client.clone(),
            args.namespace.clone(),
            args.operator_name.clone(),
            cleanup_threshold,
        )),
        tokio::spawn(scenario_run::run(client.clone(), args.namespace.clone())),
        tokio::spawn(target_credential::run(client, args.namespace.clone())),
    ];
    LeaderSubsystems { registrar, others }
}
