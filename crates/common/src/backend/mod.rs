//! Backend client abstractions
//!
//! The answer backend is an external collaborator with two interchangeable
//! modes: direct agent invocation, or knowledge-base retrieval followed by a
//! separate generation call. This module owns the strongly typed structures
//! the rest of the pipeline consumes; all vendor-shape decoding happens once,
//! at this boundary (see [`bedrock`] for the live implementations).

pub mod bedrock;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::pin::Pin;

use crate::errors::Result;
use crate::model::TokenUsage;

/// Backend-specific descriptor of where cited content physically resides.
///
/// Tagged exactly like the vendor payload; anything that is not a known
/// schema decodes as `Other`, the single fallback arm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RawLocation {
    #[serde(rename = "CONFLUENCE")]
    Confluence {
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename = "S3")]
    S3 {
        #[serde(default)]
        uri: Option<String>,
    },
    #[serde(rename = "OTHER")]
    Other {
        #[serde(default)]
        uri: Option<String>,
    },
}

impl Default for RawLocation {
    fn default() -> Self {
        RawLocation::Other { uri: None }
    }
}

/// One reference inside a citation: the cited text plus where it came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedReference {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub location: Option<RawLocation>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// A citation groups one or more retrieved references
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default)]
    pub references: Vec<RetrievedReference>,
}

/// Citation container attached at chunk or event level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// A text fragment with its chunk-level attribution channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentChunk {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
}

/// One event from an agent invocation.
///
/// Either part may be absent; citations can arrive on the chunk-level or the
/// event-level channel, and the two may overlap.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(default)]
    pub chunk: Option<AgentChunk>,
    #[serde(default)]
    pub attribution: Option<Attribution>,
}

/// One ranked match from a knowledge-base retrieval call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub location: RawLocation,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Output of a blocking generation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

/// Ordered event stream from one agent invocation
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// Token-delta stream from an incremental generation call, one item per
/// upstream delta event
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Direct agent invocation: answer text and citations arrive interleaved in
/// a single event stream.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Invoke the agent once; the returned stream is finite and yields
    /// events in arrival order.
    async fn invoke(&self, question: &str, session_id: &str) -> Result<EventStream>;
}

/// Retrieval plus separate generation: citations come from the retrieval
/// call, answer text from the generation call.
#[async_trait]
pub trait KnowledgeBackend: Send + Sync {
    /// Retrieve up to `max_results` ranked matches for the query
    async fn retrieve(&self, query: &str, max_results: usize) -> Result<Vec<RetrievalMatch>>;

    /// Run the generation call to completion
    async fn generate(&self, prompt: &str) -> Result<GenerationOutput>;

    /// Run the generation call incrementally, yielding each text delta as
    /// it arrives
    async fn generate_stream(&self, prompt: &str) -> Result<DeltaStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_location_tagged_decode() {
        let location: RawLocation = serde_json::from_str(
            r#"{"type": "CONFLUENCE", "url": "https://wiki.example.com/p"}"#,
        )
        .unwrap();
        assert_eq!(
            location,
            RawLocation::Confluence {
                url: Some("https://wiki.example.com/p".into())
            }
        );

        let location: RawLocation =
            serde_json::from_str(r#"{"type": "S3", "uri": "s3://bucket/key"}"#).unwrap();
        assert_eq!(
            location,
            RawLocation::S3 {
                uri: Some("s3://bucket/key".into())
            }
        );
    }

    #[test]
    fn test_agent_event_decode_with_both_channels() {
        let event: AgentEvent = serde_json::from_str(
            r#"{
                "chunk": {
                    "text": "partial answer",
                    "attribution": {"citations": [{"references": [{"content": "cited"}]}]}
                },
                "attribution": {"citations": []}
            }"#,
        )
        .unwrap();

        let chunk = event.chunk.unwrap();
        assert_eq!(chunk.text.as_deref(), Some("partial answer"));
        assert_eq!(chunk.attribution.unwrap().citations.len(), 1);
        assert!(event.attribution.unwrap().citations.is_empty());
    }

    #[test]
    fn test_empty_event_decodes() {
        let event: AgentEvent = serde_json::from_str("{}").unwrap();
        assert!(event.chunk.is_none());
        assert!(event.attribution.is_none());
    }
}
