//! Query orchestration
//!
//! [`QueryService`] is the single entry point the HTTP layer talks to. It
//! owns an immutable handle to the one backend this process was configured
//! with and exposes the two shapes a query can take: a blocking aggregate
//! and a frame stream.

pub mod aggregate;
pub mod stream;

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::backend::bedrock::{BedrockAgentBackend, BedrockKnowledgeBackend};
use crate::backend::{AgentBackend, KnowledgeBackend};
use crate::config::{BackendConfig, BackendMode, PartialResultPolicy};
use crate::errors::Result;
use crate::metrics::record_query;
use crate::model::AggregateResult;

pub use aggregate::{aggregate_agent_events, run_knowledge_query, AgentFailure};
pub use stream::{incremental_knowledge_stream, simulated_agent_stream, FrameStream};

/// The one backend this process fronts, fixed at startup
#[derive(Clone)]
pub enum BackendHandle {
    Agent(Arc<dyn AgentBackend>),
    Knowledge(Arc<dyn KnowledgeBackend>),
}

impl BackendHandle {
    /// Build the live Bedrock-backed handle for the configured mode
    pub async fn from_config(config: &BackendConfig) -> Result<Self> {
        match config.mode {
            BackendMode::Agent => Ok(BackendHandle::Agent(Arc::new(
                BedrockAgentBackend::new(config).await?,
            ))),
            BackendMode::KnowledgeBase => Ok(BackendHandle::Knowledge(Arc::new(
                BedrockKnowledgeBackend::new(config).await?,
            ))),
        }
    }

    pub fn mode(&self) -> BackendMode {
        match self {
            BackendHandle::Agent(_) => BackendMode::Agent,
            BackendHandle::Knowledge(_) => BackendMode::KnowledgeBase,
        }
    }
}

/// Request-facing query orchestrator.
///
/// Holds no per-request state; every call builds its result from scratch.
pub struct QueryService {
    backend: BackendHandle,
    partial_results: PartialResultPolicy,
}

impl QueryService {
    pub fn new(backend: BackendHandle, partial_results: PartialResultPolicy) -> Self {
        Self {
            backend,
            partial_results,
        }
    }

    pub fn mode(&self) -> BackendMode {
        self.backend.mode()
    }

    /// Run one query to completion and return the aggregate.
    ///
    /// Agent mode mints a v4 session id when the caller supplies none, so a
    /// client can continue the conversation with the id echoed back. A
    /// mid-stream agent failure fails the whole query; partial text is
    /// never returned from the blocking path.
    #[instrument(skip(self), fields(mode = self.mode().as_str()))]
    pub async fn query(
        &self,
        question: &str,
        max_results: usize,
        session_id: Option<String>,
    ) -> Result<AggregateResult> {
        let start = Instant::now();

        let result = match &self.backend {
            BackendHandle::Agent(agent) => {
                let session = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                let events = agent.invoke(question, &session).await?;
                aggregate_agent_events(events, session)
                    .await
                    .map_err(|failure| failure.error)
            }
            BackendHandle::Knowledge(backend) => {
                run_knowledge_query(backend.as_ref(), question, max_results).await
            }
        };

        let duration = start.elapsed().as_secs_f64();
        match &result {
            Ok(aggregate) => {
                record_query(
                    self.mode().as_str(),
                    "success",
                    duration,
                    aggregate.sources.len(),
                );
                info!(
                    duration_secs = duration,
                    sources = aggregate.sources.len(),
                    "Query completed"
                );
            }
            Err(error) => {
                record_query(self.mode().as_str(), "error", duration, 0);
                info!(duration_secs = duration, %error, "Query failed");
            }
        }

        result
    }

    /// Run one query as a frame stream.
    ///
    /// Never fails up front; anything that goes wrong surfaces as an
    /// in-band error frame so the transport can stay a plain event stream.
    pub fn stream(
        &self,
        question: &str,
        max_results: usize,
        session_id: Option<String>,
    ) -> FrameStream {
        match &self.backend {
            BackendHandle::Agent(agent) => {
                let session = session_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                simulated_agent_stream(
                    agent.clone(),
                    question.to_string(),
                    session,
                    self.partial_results,
                )
            }
            BackendHandle::Knowledge(backend) => {
                incremental_knowledge_stream(backend.clone(), question.to_string(), max_results)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AgentChunk, AgentEvent, EventStream};
    use crate::errors::AppError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoAgent {
        sessions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AgentBackend for EchoAgent {
        async fn invoke(&self, _question: &str, session_id: &str) -> Result<EventStream> {
            self.sessions.lock().unwrap().push(session_id.to_string());
            Ok(Box::pin(futures::stream::iter(vec![Ok(AgentEvent {
                chunk: Some(AgentChunk {
                    text: Some("answer".into()),
                    attribution: None,
                }),
                attribution: None,
            })])))
        }
    }

    #[tokio::test]
    async fn test_agent_query_mints_session_id() {
        let agent = Arc::new(EchoAgent {
            sessions: Mutex::new(vec![]),
        });
        let service = QueryService::new(
            BackendHandle::Agent(agent.clone()),
            PartialResultPolicy::Discard,
        );

        let result = service.query("q", 5, None).await.unwrap();
        let minted = result.session_id.unwrap();
        // Echoed id matches the one handed to the backend and parses as v4
        assert_eq!(agent.sessions.lock().unwrap()[0], minted);
        assert!(Uuid::parse_str(&minted).is_ok());
    }

    #[tokio::test]
    async fn test_agent_query_reuses_caller_session() {
        let agent = Arc::new(EchoAgent {
            sessions: Mutex::new(vec![]),
        });
        let service = QueryService::new(
            BackendHandle::Agent(agent.clone()),
            PartialResultPolicy::Discard,
        );

        let result = service
            .query("q", 5, Some("existing-session".into()))
            .await
            .unwrap();
        assert_eq!(result.session_id.as_deref(), Some("existing-session"));
        assert_eq!(agent.sessions.lock().unwrap()[0], "existing-session");
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentBackend for FailingAgent {
        async fn invoke(&self, _question: &str, _session_id: &str) -> Result<EventStream> {
            Ok(Box::pin(futures::stream::iter(vec![
                Ok(AgentEvent {
                    chunk: Some(AgentChunk {
                        text: Some("partial".into()),
                        attribution: None,
                    }),
                    attribution: None,
                }),
                Err(AppError::Backend {
                    message: "dropped".into(),
                }),
            ])))
        }
    }

    #[tokio::test]
    async fn test_blocking_query_never_returns_partial_text() {
        let service = QueryService::new(
            BackendHandle::Agent(Arc::new(FailingAgent)),
            // Surface only affects streaming; blocking must still fail
            PartialResultPolicy::Surface,
        );
        let error = service.query("q", 5, None).await.unwrap_err();
        assert!(matches!(error, AppError::Backend { .. }));
    }
}
