//! HTTP handlers for the metrics and probe endpoint

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use prometheus_client::encoding::text::encode;
use tracing::{error, instrument};

use super::dto::{HealthResponse, ReadyResponse};
use super::server::ServerState;
use crate::controller::metrics::REGISTRY;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

/// Liveness probe
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe: ready once the scheduler has completed a cycle
pub async fn ready(State(state): State<ServerState>) -> Response {
    let scheduler = state.scheduler.borrow().clone();
    let completed_cycles = scheduler.completed_cycles();
    let ready = completed_cycles > 0;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            ready,
            completed_cycles,
            scheduler,
        }),
    )
        .into_response()
}

/// Text exposition of the global registry
pub async fn metrics() -> Response {
    let mut buffer = String::new();
    match encode(&mut buffer, &REGISTRY) {
        Ok(()) => ([(header::CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], buffer).into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SchedulerState;
    use chrono::Utc;
    use tokio::sync::watch;

    fn state(initial: SchedulerState) -> (watch::Sender<SchedulerState>, ServerState) {
        let (tx, rx) = watch::channel(initial);
        (tx, ServerState::new(rx))
    }

    #[tokio::test]
    async fn test_health() {
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn test_not_ready_before_first_cycle() {
        let (tx, server_state) = state(SchedulerState::Idle);
        let response = ready(State(server_state.clone())).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        tx.send_replace(SchedulerState::Running {
            cycle: 1,
            attempt: 2,
        });
        let response = ready(State(server_state)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_after_first_cycle() {
        let (tx, server_state) = state(SchedulerState::Idle);
        tx.send_replace(SchedulerState::WaitingForTick {
            completed_cycles: 1,
            last_completed: Utc::now(),
        });
        let response = ready(State(server_state.clone())).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Stays ready while later cycles run
        tx.send_replace(SchedulerState::Running {
            cycle: 2,
            attempt: 1,
        });
        let response = ready(State(server_state)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        crate::controller::metrics::inc_cycle_error("list");
        let response = metrics().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            OPENMETRICS_CONTENT_TYPE
        );
    }
}
