//! Prometheus metrics and the health endpoint

use axum::{
    http::{header, HeaderValue},
    routing::get,
    Json, Router,
};
use once_cell::sync::Lazy;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::{info, warn};

pub static PROM_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::new(name, help).expect("create counter");
    // ignore error if already registered
    let _ = PROM_REGISTRY.register(Box::new(c.clone()));
    c
}

fn gauge(name: &str, help: &str) -> IntGauge {
    let g = IntGauge::new(name, help).expect("create gauge");
    let _ = PROM_REGISTRY.register(Box::new(g.clone()));
    g
}

pub static PEERS_KNOWN: Lazy<IntGauge> =
    Lazy::new(|| gauge("mochimap_peers_known", "Peers in the directory"));
pub static PEERS_OK: Lazy<IntGauge> =
    Lazy::new(|| gauge("mochimap_peers_ok", "Peers whose latest probe was OK"));
pub static CONSENSUS_HEIGHT: Lazy<IntGauge> =
    Lazy::new(|| gauge("mochimap_consensus_height", "Height of the consensus tip"));
pub static PENDING_CURSOR: Lazy<IntGauge> =
    Lazy::new(|| gauge("mochimap_mempool_cursor_bytes", "Mempool feed read position"));

pub static PROBES: Lazy<IntCounterVec> = Lazy::new(|| {
    let c = IntCounterVec::new(
        Opts::new("mochimap_probes_total", "Completed peer probes by status"),
        &["status"],
    )
    .expect("create counter vec");
    let _ = PROM_REGISTRY.register(Box::new(c.clone()));
    c
});
pub static PEERS_EVICTED: Lazy<IntCounter> =
    Lazy::new(|| counter("mochimap_peers_evicted_total", "Stale peers removed"));
pub static BOOTSTRAP_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    counter("mochimap_bootstrap_failures_total", "Seeding rounds where no source worked")
});
pub static BLOCKS_STORED: Lazy<IntCounter> =
    Lazy::new(|| counter("mochimap_blocks_stored_total", "Block documents written"));
pub static BLOCKS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    counter("mochimap_blocks_rejected_total", "Downloaded blocks failing verification")
});
pub static LEDGER_DELTAS: Lazy<IntCounter> =
    Lazy::new(|| counter("mochimap_ledger_deltas_total", "Ledger delta documents written"));
pub static TRANSACTIONS_CONFIRMED: Lazy<IntCounter> = Lazy::new(|| {
    counter("mochimap_transactions_confirmed_total", "Confirmed transaction records written")
});
pub static TRANSACTIONS_PENDING: Lazy<IntCounter> = Lazy::new(|| {
    counter("mochimap_transactions_pending_total", "Pending transaction records inserted")
});

/// Registry contents in text exposition format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = PROM_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).ok();
    String::from_utf8_lossy(&buffer).into_owned()
}

async fn metrics_handler() -> ([(header::HeaderName, HeaderValue); 1], String) {
    let headers = [(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; version=0.0.4"),
    )];
    (headers, render())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "peers_known": PEERS_KNOWN.get(),
        "peers_ok": PEERS_OK.get(),
        "consensus_height": CONSENSUS_HEIGHT.get(),
    }))
}

pub fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
}

/// Serve `/health` and `/metrics` until the process exits
pub async fn serve(addr: SocketAddr) {
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("[METRICS] Failed to bind {}: {}", addr, e);
            return;
        }
    };
    info!("[METRICS] Listening on http://{}", addr);
    if let Err(e) = axum::serve(listener, router()).await {
        warn!("[METRICS] Server stopped: {}", e);
    }
}
