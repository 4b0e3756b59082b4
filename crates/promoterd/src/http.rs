//! Health probe and metrics endpoints.

use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use promoter_controller::ControllerMetrics;

type MetricsSet = Arc<Vec<(&'static str, Arc<ControllerMetrics>)>>;

/// Serve `/healthz` and `/readyz` on `addr`.
pub async fn serve_health(addr: &str, cancel: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/healthz", get(ok_handler))
        .route("/readyz", get(ok_handler));
    serve(addr, app, cancel).await
}

/// Serve `/metrics` with per-kind reconcile counters on `addr`.
pub async fn serve_metrics(
    addr: &str,
    metrics: Vec<(&'static str, Arc<ControllerMetrics>)>,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(Arc::new(metrics));
    serve(addr, app, cancel).await
}

async fn ok_handler() -> &'static str {
    "ok"
}

async fn metrics_handler(State(metrics): State<MetricsSet>) -> String {
    let mut out = String::new();
    for (kind, counters) in metrics.iter() {
        let _ = writeln!(
            out,
            "promoter_reconcile_total{{kind=\"{kind}\"}} {}",
            counters.reconciles.load(Ordering::Relaxed)
        );
        let _ = writeln!(
            out,
            "promoter_reconcile_errors_total{{kind=\"{kind}\"}} {}",
            counters.errors.load(Ordering::Relaxed)
        );
    }
    out
}

async fn serve(addr: &str, app: Router, cancel: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    Ok(tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            warn!(error = %err, "http server error");
        }
    }))
}
