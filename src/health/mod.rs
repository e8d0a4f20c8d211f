//! Health, readiness, and metrics surface.
//!
//! - `GET /healthz` - 200 for as long as the process lives.
//! - `GET /readyz` - 200 iff every named check is ok *and* shutdown has not
//!   begun; otherwise 503 with a `{status, message, checks}` body. The
//!   shutdown flag wins regardless of check state, so load balancers stop
//!   routing the moment draining starts.
//! - `GET /metrics` - Prometheus exposition (process-up and build-info
//!   gauges plus the per-component counters recorded through the `metrics`
//!   facade).

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// One named readiness check.
#[derive(Clone, Debug, Serialize)]
pub struct Check {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Shared readiness state: named checks plus the shutdown flag.
#[derive(Debug, Default)]
pub struct HealthState {
    checks: RwLock<FxHashMap<String, Check>>,
    shutting_down: AtomicBool,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or updates a named check.
    pub fn set_check(&self, name: impl Into<String>, ok: bool, message: Option<String>) {
        self.checks
            .write()
            .insert(name.into(), Check { ok, message });
    }

    /// Flips readiness off permanently; called when shutdown starts.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Overall readiness and the per-check detail.
    #[must_use]
    pub fn readiness(&self) -> (bool, FxHashMap<String, Check>) {
        let checks = self.checks.read().clone();
        let ready = !self.is_shutting_down() && checks.values().all(|c| c.ok);
        (ready, checks)
    }
}

/// Installs the Prometheus recorder and seeds the process-level gauges.
/// Call once at bootstrap; subsequent calls return the install error.
pub fn install_metrics() -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    metrics::gauge!("hyperfleet_up").set(1.0);
    metrics::gauge!(
        "hyperfleet_build_info",
        "version" => env!("CARGO_PKG_VERSION")
    )
    .set(1.0);
    Ok(handle)
}

#[derive(Clone)]
struct SurfaceState {
    health: Arc<HealthState>,
    prometheus: Option<PrometheusHandle>,
}

/// Builds the health/metrics router.
#[must_use]
pub fn router(health: Arc<HealthState>, prometheus: Option<PrometheusHandle>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_text))
        .with_state(SurfaceState { health, prometheus })
}

/// Serves the router until `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "health surface listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn readyz(State(state): State<SurfaceState>) -> impl IntoResponse {
    let (ready, checks) = state.health.readiness();
    let status = if ready { "ready" } else { "unready" };
    let message = if state.health.is_shutting_down() {
        "shutting down"
    } else if ready {
        "all checks passing"
    } else {
        "one or more checks failing"
    };
    let body = json!({
        "status": status,
        "message": message,
        "checks": checks,
    });
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

async fn metrics_text(State(state): State<SurfaceState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_IMPLEMENTED,
            "metrics recorder not installed".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_requires_all_checks_and_no_shutdown() {
        let state = HealthState::new();
        state.set_check("config", true, None);
        state.set_check("broker", true, None);
        assert!(state.readiness().0);

        state.set_check("broker", false, Some("disconnected".to_string()));
        assert!(!state.readiness().0);

        state.set_check("broker", true, None);
        state.begin_shutdown();
        // Shutdown wins regardless of check state.
        assert!(!state.readiness().0);
    }
}
