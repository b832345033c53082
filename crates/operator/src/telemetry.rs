use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use once_cell::sync::Lazy;
use prometheus::{opts, Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::{info, warn};

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RECONCILE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("nginx_operator_reconcile_total", "Reconcile runs by phase and outcome"), &["phase", "outcome"])
        .expect("valid reconcile_total metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static DEPENDENT_WRITES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("nginx_operator_dependent_writes_total", "Create-or-replace writes of dependent objects"), &["kind"])
        .expect("valid dependent_writes metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static DEPENDENT_DELETES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("nginx_operator_dependent_deletes_total", "Cleanup deletes of dependent objects"), &["kind", "outcome"])
        .expect("valid dependent_deletes metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static WATCH_EVENTS: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(opts!("nginx_operator_watch_events_total", "Watch events seen by the routers"), &["source", "result"])
        .expect("valid watch_events metric");
    REGISTRY.register(Box::new(c.clone())).ok();
    c
});
pub static QUEUE_DEPTH: Lazy<IntGauge> = Lazy::new(|| {
    let g = IntGauge::new("nginx_operator_queue_depth", "Keys waiting in the work queue").expect("valid queue_depth metric");
    REGISTRY.register(Box::new(g.clone())).ok();
    g
});
pub static RECONCILE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    let h = Histogram::with_opts(HistogramOpts::new("nginx_operator_reconcile_duration_seconds", "Time spent handling one key"))
        .expect("valid reconcile_duration metric");
    REGISTRY.register(Box::new(h.clone())).ok();
    h
});

/// Renders every registered family in the text exposition format.
pub async fn metrics_handler() -> Response {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    match encoder.encode(&REGISTRY.gather(), &mut body) {
        Ok(()) => ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body).into_response(),
        Err(e) => {
            warn!(error = %e, "metrics.encode_failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn health() -> &'static str { "ok" }

pub fn router() -> Router { Router::new().route("/metrics", get(metrics_handler)).route("/health", get(health)) }

/// Serves `/metrics` and `/health` until the task is dropped.
pub async fn serve(addr: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "metrics listening");
    axum::serve(listener, router()).await?;
    Ok(())
}
