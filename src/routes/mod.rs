mod chatbot;
mod health;
mod metrics;
mod predict;

use crate::{config::UploadConfig, server::SharedState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use serde::Serialize;

pub use chatbot::chatbot;
pub use health::healthcheck;
pub use metrics::metrics_handler;
pub use predict::predict;

/// JSON body of every 4xx/5xx response from the API routes.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn api_routes(upload: &UploadConfig) -> Router<SharedState> {
    Router::new()
        .route("/health", get(healthcheck))
        .route("/metrics", get(metrics_handler))
        .route("/predict/", post(predict))
        .route("/predict", post(predict))
        .route("/chatbot/", post(chatbot))
        .route("/chatbot", post(chatbot))
        .layer(DefaultBodyLimit::max(upload.request_body_limit_bytes))
}


#[cfg(test)]
mod tests {
    use super::test_support::{default_router, json_body};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_healthcheck() {
        let response = default_router()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "Available");
        assert_eq!(body["service"], "brain_tumor_api");
    }

    #[tokio::test]
    async fn test_metrics_endpoint_serves_text() {
        let response = default_router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
