//! HTTP router for agentflow

use agentflow_sqs::{handle_request, rest, SqsState};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the main application router
pub fn create_router(state: Arc<SqsState>) -> Router {
    Router::new()
        // Health check endpoint
        .route("/health", get(health_check))
        // AWS JSON protocol, dispatched on X-Amz-Target
        .route("/", post(handle_request))
        .nest("/sqs", rest::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_check(State(state): State<Arc<SqsState>>) -> impl IntoResponse {
    let job_queue = state.job_queue.url().is_ok();
    let status = if job_queue {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if job_queue { "running" } else { "degraded" },
            "queues": state.registry.list_queues(None).len(),
            "jobQueue": job_queue,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_sqs::{JobQueueManager, QueueRegistry};
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn state(initialize: bool) -> Arc<SqsState> {
        let registry = Arc::new(QueueRegistry::default());
        let job_queue = Arc::new(JobQueueManager::with_receive_wait(registry.clone(), 0));
        if initialize {
            job_queue.initialize().unwrap();
        }
        Arc::new(SqsState::new(registry, job_queue))
    }

    async fn health(state: Arc<SqsState>) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_running() {
        let (status, body) = health(state(true)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "running");
        assert_eq!(body["queues"], 1);
    }

    #[tokio::test]
    async fn test_health_without_job_queue() {
        let (status, body) = health(state(false)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["jobQueue"], false);
    }

    #[tokio::test]
    async fn test_rest_routes_mounted() {
        let response = create_router(state(true))
            .oneshot(
                Request::get("/sqs/job-queue/url")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
