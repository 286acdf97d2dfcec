use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    pub gemini_configured: bool,
    pub model: String,
    pub slide_prompts_cached: usize,
    pub slide_prompts_loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_prompts_error: Option<String>,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, database) = match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            warn!("Health check failed: {err}");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    };
    (
        status,
        Json(HealthResponse {
            status: if status.is_success() { "ok" } else { "degraded" },
            database,
            gemini_configured: state.gemini.is_configured(),
            model: state.gemini.model().to_string(),
            slide_prompts_cached: state.slide_prompts.snapshot().len(),
            slide_prompts_loading: state.slide_prompts.is_loading(),
            slide_prompts_error: state.slide_prompts.last_error(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use crate::handlers::router;
    use crate::test_support::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn reports_database_and_gemini_state() {
        let state = test_state("http://127.0.0.1:9", "").await;
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["database"], "ok");
        assert_eq!(body["gemini_configured"], false);
        assert_eq!(body["model"], "gemini-test");
        assert_eq!(body["slide_prompts_cached"], 0);
        assert!(body.get("slide_prompts_error").is_none());
    }

    #[tokio::test]
    async fn closed_pool_is_unavailable() {
        let state = test_state("http://127.0.0.1:9", "").await;
        state.db.close().await;
        let response = router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
