use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use owo_colors::OwoColorize;
use std::sync::OnceLock;
use std::time::Instant;
use tokio::net::TcpListener;

use crate::shutdown::shutdown_signal;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn install_recorder_once() -> &'static PrometheusHandle {
    PROM_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("install global metrics recorder")
    })
}

/// Spawns the `/healthz`, `/readyz`, `/metrics` server if a port was
/// configured. A no-op otherwise — the controllers run regardless of
/// whether anything scrapes them.
pub fn maybe_spawn_metrics_server(port: Option<u16>) {
    let Some(port) = port else {
        return;
    };
    let _ = install_recorder_once();
    tokio::spawn(run_metrics_server(port));
}

pub async fn run_metrics_server(port: u16) {
    let handle = install_recorder_once().clone();
    let metrics_route = {
        let handle = handle.clone();
        get(move || async move { handle.render() })
    };
    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .route("/metrics", metrics_route);
    let addr = format!("0.0.0.0:{}", port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("🛑 Failed to bind metrics server to {}: {}", addr, e);
            return;
        }
    };
    println!(
        "{}{}",
        "📈 Starting metrics server • port=".green(),
        port.to_string().green().dimmed(),
    );
    let started = Instant::now();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        eprintln!("🛑 Metrics server error: {}", e);
    }
    println!(
        "{} {}",
        "🛑 Metrics server stopped gracefully • uptime was".red(),
        format!("{:.2?}", started.elapsed()).red().dimmed()
    );
}
