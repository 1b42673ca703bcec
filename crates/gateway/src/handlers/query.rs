//! Query handlers

use axum::{
    extract::State,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::StreamExt;
use validator::Validate;

use serde::{Deserialize, Serialize};

use crate::AppState;
use ragbridge_common::{
    errors::{AppError, Result},
    model::{SourceRecord, TokenUsage},
    MAX_SOURCES,
};

/// Query request
#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 2000))]
    pub question: String,

    /// Retrieval width, knowledge-base mode only
    #[validate(range(min = 1, max = 5))]
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    /// Deliver the answer as a server-sent event stream
    #[serde(default)]
    pub stream: bool,

    /// Conversation continuation, agent mode only
    pub session_id: Option<String>,
}

fn default_max_results() -> usize {
    MAX_SOURCES
}

/// Blocking query response
#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRecord>,
    /// Present in agent mode so the caller can continue the conversation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<TokenUsage>,
}

/// Answer a question against the configured backend.
///
/// With `stream: false` the full aggregate comes back as one JSON body.
/// With `stream: true` the response is an SSE stream of frames: one
/// metadata frame, then content frames, with failures delivered in-band
/// as a terminating error frame.
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Response> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: None,
    })?;

    let service = state
        .service
        .clone()
        .ok_or_else(|| AppError::ServiceUnavailable {
            message: "answer backend is not configured".to_string(),
        })?;

    if request.stream {
        let frames = service.stream(&request.question, request.max_results, request.session_id);
        let events = frames.map(|frame| Event::default().json_data(&frame));
        return Ok(Sse::new(events)
            .keep_alive(KeepAlive::default())
            .into_response());
    }

    let result = service
        .query(&request.question, request.max_results, request.session_id)
        .await?;

    Ok(Json(QueryResponse {
        answer: result.answer,
        sources: result.sources,
        session_id: result.session_id,
        tokens_used: result.token_usage,
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use ragbridge_common::AppConfig;
    use std::sync::Arc;

    #[test]
    fn test_request_defaults() {
        let request: QueryRequest = serde_json::from_str(r#"{"question": "what?"}"#).unwrap();
        assert_eq!(request.max_results, MAX_SOURCES);
        assert!(!request.stream);
        assert!(request.session_id.is_none());
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_request_bounds() {
        let request: QueryRequest =
            serde_json::from_str(r#"{"question": "", "max_results": 3}"#).unwrap();
        assert!(request.validate().is_err());

        let request: QueryRequest =
            serde_json::from_str(r#"{"question": "q", "max_results": 9}"#).unwrap();
        assert!(request.validate().is_err());

        let long = "q".repeat(2001);
        let request: QueryRequest =
            serde_json::from_str(&format!(r#"{{"question": "{long}"}}"#)).unwrap();
        assert!(request.validate().is_err());
    }

    #[tokio::test]
    async fn test_query_without_backend_returns_service_unavailable() {
        let state = AppState {
            config: Arc::new(AppConfig::default()),
            service: None,
        };
        let request: QueryRequest = serde_json::from_str(r#"{"question": "what?"}"#).unwrap();

        let error = query(State(state), Json(request)).await.unwrap_err();
        assert!(matches!(error, AppError::ServiceUnavailable { .. }));
        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_response_omits_absent_optional_fields() {
        let response = QueryResponse {
            answer: "a".into(),
            sources: vec![],
            session_id: None,
            tokens_used: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("tokens_used").is_none());
        assert!(json.get("session_id").is_none());
        assert_eq!(json["answer"], "a");
    }
}
