use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;

use concierge_agent::{ResponseOrchestrator, StatsSnapshot};
use concierge_core::domain::request::ResponseRequest;
use concierge_core::domain::response::ResponseResult;
use concierge_core::errors::ResponseError;

#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<ResponseOrchestrator>,
}

pub fn router(orchestrator: Arc<ResponseOrchestrator>) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response))
        .route("/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(ApiState { orchestrator })
}

/// Runs one message through the pipeline. The body is always a `ResponseResult`,
/// including for bodies that do not decode into a request.
pub async fn create_response(
    State(state): State<ApiState>,
    payload: Result<Json<ResponseRequest>, JsonRejection>,
) -> (StatusCode, Json<ResponseResult>) {
    let result = match payload {
        Ok(Json(request)) => state.orchestrator.generate_response(request).await,
        Err(rejection) => state
            .orchestrator
            .reject(ResponseError::Validation { message: rejection.body_text() }),
    };
    let status = match result.error() {
        None => StatusCode::OK,
        Some(error) => status_for(error),
    };
    (status, Json(result))
}

pub async fn stats(State(state): State<ApiState>) -> Json<StatsSnapshot> {
    Json(state.orchestrator.stats())
}

fn status_for(error: &ResponseError) -> StatusCode {
    match error {
        ResponseError::Validation { .. } => StatusCode::BAD_REQUEST,
        ResponseError::NotFound { .. } => StatusCode::NOT_FOUND,
        ResponseError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        ResponseError::Processing { .. } | ResponseError::Unknown { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use concierge_agent::llm::{Generation, GenerationRequest, LlmClient, LlmError};
    use concierge_agent::retrieval::NoopRetriever;
    use concierge_agent::{OrchestratorSettings, ResponseOrchestrator};
    use concierge_channel::WhatsAppFormatter;
    use concierge_db::{DemoSeedDataset, Repositories};

    use super::router;

    struct CannedLlm;

    #[async_trait]
    impl LlmClient for CannedLlm {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation, LlmError> {
            Ok(Generation {
                text: "Abrimos de segunda a sábado, das **7h às 19h**. Aos domingos, das 7h às 12h."
                    .to_string(),
                tokens_used: Some(20),
            })
        }
    }

    async fn app() -> axum::Router {
        let repositories = Repositories::in_memory();
        DemoSeedDataset::load(&repositories).await.expect("seed demo data");
        let orchestrator = ResponseOrchestrator::new(
            repositories,
            Arc::new(NoopRetriever),
            Arc::new(CannedLlm),
            Arc::new(WhatsAppFormatter::default()),
            OrchestratorSettings::default(),
        );
        router(Arc::new(orchestrator))
    }

    async fn post_json(app: axum::Router, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/responses")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn demo_request(message: &str) -> Value {
        json!({
            "message": message,
            "conversation_id": "conv-demo-pt",
            "assistant_id": "asst-luna",
            "business_id": "biz-padaria-central",
        })
    }

    #[tokio::test]
    async fn successful_response_returns_formatted_chunks() {
        let (status, body) = post_json(app().await, demo_request("Qual o horário?")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        let first_chunk = body["payload"]["messages"][0].as_str().expect("chunk");
        assert!(first_chunk.contains("*7h às 19h*"));
        assert!(!first_chunk.contains("**"));
        assert_eq!(body["payload"]["response"]["origin"], "generated");
    }

    #[tokio::test]
    async fn invalid_request_maps_to_bad_request() {
        let (status, body) = post_json(app().await, demo_request("  ")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "failure");
        assert_eq!(body["error"]["kind"], "validation");
    }

    #[tokio::test]
    async fn body_missing_required_field_is_a_validation_failure() {
        let mut request = demo_request("Oi");
        request.as_object_mut().expect("object").remove("conversation_id");

        let (status, body) = post_json(app().await, request).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "failure");
        assert_eq!(body["error"]["kind"], "validation");
        assert!(body["error"]["message"].as_str().expect("message").contains("conversation_id"));
        assert_eq!(body["metadata"]["stages"], json!(["received", "errored"]));
    }

    #[tokio::test]
    async fn unknown_conversation_maps_to_not_found() {
        let mut request = demo_request("Oi");
        request["conversation_id"] = json!("conv-missing");

        let (status, body) = post_json(app().await, request).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["kind"], "not_found");
    }

    #[tokio::test]
    async fn stats_reflect_handled_requests() {
        let app = app().await;
        let _ = post_json(app.clone(), demo_request("Qual o horário?")).await;

        let response = app
            .oneshot(Request::builder().uri("/v1/stats").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let stats: Value = serde_json::from_slice(&bytes).expect("json");

        assert_eq!(stats["total_requests"], 1);
        assert_eq!(stats["successful_requests"], 1);
    }
}
