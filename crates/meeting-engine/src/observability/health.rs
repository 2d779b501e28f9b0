//! Probe and scrape endpoints.
//!
//! - `GET /health`: 200 while the process serves HTTP at all
//! - `GET /ready`: 200 only in the `ready` phase, with `{"phase": ...}`
//! - `GET /metrics`: Prometheus text from the installed recorder
//!
//! The engine moves through three phases: `starting` until the actors can
//! take work, `ready`, then `draining` once shutdown begins. Phases only
//! move forward.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Starting,
    Ready,
    Draining,
}

impl Phase {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Phase::Starting,
            1 => Phase::Ready,
            _ => Phase::Draining,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Phase::Starting => 0,
            Phase::Ready => 1,
            Phase::Draining => 2,
        }
    }
}

/// Lifecycle phase shared between `main` and the probe handlers.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Enter `ready`. Ignored once draining.
    pub fn set_ready(&self) {
        let _ = self.phase.compare_exchange(
            Phase::Starting.as_u8(),
            Phase::Ready.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Enter `draining`; readiness fails from here on.
    pub fn begin_draining(&self) {
        self.phase.store(Phase::Draining.as_u8(), Ordering::SeqCst);
    }
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    phase: Phase,
}

pub fn health_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .with_state(state)
}

pub fn metrics_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(handle)
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, Json<ReadinessBody>) {
    let phase = state.phase();
    let status = if phase == Phase::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadinessBody { phase }))
}

#[tracing::instrument(skip_all, name = "engine.metrics.scrape")]
async fn scrape(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    async fn get_path(app: Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let state = HealthState::new();
        assert_eq!(state.phase(), Phase::Starting);

        state.set_ready();
        assert_eq!(state.phase(), Phase::Ready);

        state.begin_draining();
        state.set_ready();
        assert_eq!(state.phase(), Phase::Draining);
    }

    #[tokio::test]
    async fn test_liveness_ignores_phase() {
        let state = Arc::new(HealthState::new());
        state.begin_draining();

        let (status, body) = get_path(health_router(state), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn test_readiness_reports_phase() {
        let state = Arc::new(HealthState::new());

        let (status, body) = get_path(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, r#"{"phase":"starting"}"#);

        state.set_ready();
        let (status, body) = get_path(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"phase":"ready"}"#);

        state.begin_draining();
        let (status, body) = get_path(health_router(state), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, r#"{"phase":"draining"}"#);
    }

    #[tokio::test]
    async fn test_unknown_path_is_404() {
        let (status, _) = get_path(health_router(Arc::new(HealthState::new())), "/live").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_metrics_router_renders_recorder_output() {
        use metrics_exporter_prometheus::PrometheusBuilder;

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("engine_participants_joined_total").increment(2);
        });

        let (status, text) = get_path(metrics_router(handle), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("engine_participants_joined_total 2"));
    }
}
