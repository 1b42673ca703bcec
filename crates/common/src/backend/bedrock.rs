//! Bedrock-backed implementations of the backend traits
//!
//! Provides:
//! - Agent runtime wrapper (`invoke_agent` event stream)
//! - Knowledge-base wrapper (`retrieve` + `invoke_model` generation)
//! - Vendor payload decoding into the typed structures in [`super`]
//!
//! Every vendor shape is mapped here and nowhere else; unknown event
//! variants are dropped in a single fallback arm.

use aws_sdk_bedrockagentruntime::types as agent_types;
use aws_sdk_bedrockagentruntime::Client as AgentRuntimeClient;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::types as runtime_types;
use aws_sdk_bedrockruntime::Client as ModelRuntimeClient;
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_smithy_types::Document;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use crate::backend::{
    AgentBackend, AgentChunk, AgentEvent, Attribution, Citation, DeltaStream, EventStream,
    GenerationOutput, KnowledgeBackend, RawLocation, RetrievalMatch, RetrievedReference,
};
use crate::config::BackendConfig;
use crate::errors::{AppError, Result};
use crate::metrics::record_backend_call;
use crate::model::TokenUsage;

/// Anthropic wire version expected by the Bedrock runtime
const ANTHROPIC_VERSION: &str = "bedrock-2023-05-31";

fn backend_err(err: impl std::fmt::Display) -> AppError {
    AppError::Backend {
        message: format!("{}", err),
    }
}

async fn sdk_config(region: &str) -> aws_config::SdkConfig {
    aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

/// Agent-mode client: one `invoke_agent` call per query
#[derive(Clone)]
pub struct BedrockAgentBackend {
    client: AgentRuntimeClient,
    agent_id: String,
    agent_alias_id: String,
}

impl BedrockAgentBackend {
    /// Build the client, failing fast when required identifiers are absent
    pub async fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let shared = sdk_config(&config.region).await;
        Ok(Self {
            client: AgentRuntimeClient::new(&shared),
            agent_id: config.agent_id.clone().unwrap_or_default(),
            agent_alias_id: config.agent_alias_id.clone().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl AgentBackend for BedrockAgentBackend {
    async fn invoke(&self, question: &str, session_id: &str) -> Result<EventStream> {
        let start = Instant::now();
        let output = self
            .client
            .invoke_agent()
            .agent_id(&self.agent_id)
            .agent_alias_id(&self.agent_alias_id)
            .session_id(session_id)
            .input_text(question)
            .send()
            .await;
        record_backend_call("invoke_agent", start.elapsed().as_secs_f64(), output.is_ok());
        let output = output.map_err(|e| backend_err(DisplayErrorContext(&e)))?;

        debug!(agent_id = %self.agent_id, session_id, "Agent invocation started");

        let mut completion = output.completion;
        let stream = async_stream::stream! {
            loop {
                match completion.recv().await {
                    Ok(Some(event)) => {
                        if let Some(mapped) = map_agent_event(event) {
                            yield Ok(mapped);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(backend_err(DisplayErrorContext(&e)));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Knowledge-base client: `retrieve` plus a separate generation call
#[derive(Clone)]
pub struct BedrockKnowledgeBackend {
    agent_client: AgentRuntimeClient,
    model_client: ModelRuntimeClient,
    knowledge_base_id: String,
    model_id: String,
    max_tokens: u32,
}

impl BedrockKnowledgeBackend {
    /// Build the client, failing fast when required identifiers are absent
    pub async fn new(config: &BackendConfig) -> Result<Self> {
        config.validate()?;
        let shared = sdk_config(&config.region).await;
        Ok(Self {
            agent_client: AgentRuntimeClient::new(&shared),
            model_client: ModelRuntimeClient::new(&shared),
            knowledge_base_id: config.knowledge_base_id.clone().unwrap_or_default(),
            model_id: config.model_id.clone(),
            max_tokens: config.max_tokens,
        })
    }

    fn generation_body(&self, prompt: &str) -> Result<Vec<u8>> {
        let body = serde_json::json!({
            "anthropic_version": ANTHROPIC_VERSION,
            "max_tokens": self.max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": 0.3,
            "top_p": 0.9
        });
        Ok(serde_json::to_vec(&body)?)
    }
}

#[async_trait]
impl KnowledgeBackend for BedrockKnowledgeBackend {
    async fn retrieve(&self, query: &str, max_results: usize) -> Result<Vec<RetrievalMatch>> {
        let retrieval_query = agent_types::KnowledgeBaseQuery::builder().text(query).build();

        let vector_search = agent_types::KnowledgeBaseVectorSearchConfiguration::builder()
            .number_of_results(max_results as i32)
            .build();

        let retrieval_configuration = agent_types::KnowledgeBaseRetrievalConfiguration::builder()
            .vector_search_configuration(vector_search)
            .build();

        let start = Instant::now();
        let output = self
            .client_retrieve(retrieval_query, retrieval_configuration)
            .await;
        record_backend_call("retrieve", start.elapsed().as_secs_f64(), output.is_ok());
        let output = output?;

        let matches: Vec<RetrievalMatch> = output
            .retrieval_results()
            .iter()
            .map(map_retrieval_result)
            .collect();

        debug!(
            knowledge_base_id = %self.knowledge_base_id,
            matches = matches.len(),
            "Retrieval completed"
        );

        Ok(matches)
    }

    async fn generate(&self, prompt: &str) -> Result<GenerationOutput> {
        let start = Instant::now();
        let output = self
            .model_client
            .invoke_model()
            .model_id(&self.model_id)
            .content_type("application/json")
            .body(Blob::new(self.generation_body(prompt)?))
            .send()
            .await;
        record_backend_call("invoke_model", start.elapsed().as_secs_f64(), output.is_ok());
        let output = output.map_err(|e| backend_err(DisplayErrorContext(&e)))?;

        parse_model_response(output.body.as_ref())
    }

    async fn generate_stream(&self, prompt: &str) -> Result<DeltaStream> {
        let start = Instant::now();
        let output = self
            .model_client
            .invoke_model_with_response_stream()
            .model_id(&self.model_id)
            .content_type("application/json")
            .body(Blob::new(self.generation_body(prompt)?))
            .send()
            .await;
        record_backend_call(
            "invoke_model_stream",
            start.elapsed().as_secs_f64(),
            output.is_ok(),
        );
        let output = output.map_err(|e| backend_err(DisplayErrorContext(&e)))?;

        let mut events = output.body;
        let stream = async_stream::stream! {
            loop {
                match events.recv().await {
                    Ok(Some(runtime_types::ResponseStream::Chunk(part))) => {
                        let Some(bytes) = part.bytes() else { continue };
                        match parse_delta(bytes.as_ref()) {
                            Ok(Some(text)) => yield Ok(text),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                break;
                            }
                        }
                    }
                    // non-chunk events carry no text
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(backend_err(DisplayErrorContext(&e)));
                        break;
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

impl BedrockKnowledgeBackend {
    async fn client_retrieve(
        &self,
        retrieval_query: agent_types::KnowledgeBaseQuery,
        retrieval_configuration: agent_types::KnowledgeBaseRetrievalConfiguration,
    ) -> Result<aws_sdk_bedrockagentruntime::operation::retrieve::RetrieveOutput> {
        self.agent_client
            .retrieve()
            .knowledge_base_id(&self.knowledge_base_id)
            .retrieval_query(retrieval_query)
            .retrieval_configuration(retrieval_configuration)
            .send()
            .await
            .map_err(|e| backend_err(DisplayErrorContext(&e)))
    }
}

/// Map one agent completion event. Trace and control-flow variants carry no
/// answer content and are dropped here.
fn map_agent_event(event: agent_types::ResponseStream) -> Option<AgentEvent> {
    match event {
        agent_types::ResponseStream::Chunk(part) => {
            let text = part
                .bytes()
                .map(|b| String::from_utf8_lossy(b.as_ref()).into_owned());
            let attribution = part.attribution().map(map_attribution);
            Some(AgentEvent {
                chunk: Some(AgentChunk { text, attribution }),
                attribution: None,
            })
        }
        _ => None,
    }
}

fn map_attribution(attribution: &agent_types::Attribution) -> Attribution {
    Attribution {
        citations: attribution
            .citations()
            .iter()
            .map(|citation| Citation {
                references: citation
                    .retrieved_references()
                    .iter()
                    .map(map_reference)
                    .collect(),
            })
            .collect(),
    }
}

fn map_reference(reference: &agent_types::RetrievedReference) -> RetrievedReference {
    RetrievedReference {
        content: reference
            .content()
            .map(|c| c.text())
            .unwrap_or_default()
            .to_string(),
        location: Some(map_location(reference.location())),
        metadata: map_metadata(reference.metadata()),
        // agent references carry no score
        score: None,
    }
}

fn map_retrieval_result(result: &agent_types::KnowledgeBaseRetrievalResult) -> RetrievalMatch {
    RetrievalMatch {
        content: result
            .content()
            .map(|c| c.text())
            .unwrap_or_default()
            .to_string(),
        location: map_location(result.location()),
        score: result.score().unwrap_or(0.0),
        metadata: map_metadata(result.metadata()),
    }
}

fn map_location(location: Option<&agent_types::RetrievalResultLocation>) -> RawLocation {
    let Some(location) = location else {
        return RawLocation::default();
    };

    if let Some(confluence) = location.confluence_location() {
        RawLocation::Confluence {
            url: confluence.url().map(str::to_string),
        }
    } else if let Some(s3) = location.s3_location() {
        RawLocation::S3 {
            uri: s3.uri().map(str::to_string),
        }
    } else if let Some(web) = location.web_location() {
        RawLocation::Other {
            uri: web.url().map(str::to_string),
        }
    } else {
        RawLocation::default()
    }
}

/// Keep only string-valued metadata; the normalizer only reads string keys
fn map_metadata(metadata: Option<&HashMap<String, Document>>) -> HashMap<String, String> {
    metadata
        .map(|m| {
            m.iter()
                .filter_map(|(key, value)| match value {
                    Document::String(s) => Some((key.clone(), s.clone())),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
struct ModelResponse {
    #[serde(default)]
    content: Vec<ModelContent>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ModelContent {
    #[serde(default)]
    text: String,
}

fn parse_model_response(bytes: &[u8]) -> Result<GenerationOutput> {
    let parsed: ModelResponse = serde_json::from_slice(bytes)?;
    Ok(GenerationOutput {
        text: parsed
            .content
            .into_iter()
            .map(|block| block.text)
            .next()
            .unwrap_or_default(),
        usage: parsed.usage,
    })
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    delta: Option<StreamDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    text: String,
}

/// Decode one streamed payload; only `content_block_delta` events carry text
fn parse_delta(bytes: &[u8]) -> Result<Option<String>> {
    let event: StreamEvent = serde_json::from_slice(bytes).map_err(|e| AppError::Backend {
        message: format!("malformed stream payload: {e}"),
    })?;

    if event.kind != "content_block_delta" {
        return Ok(None);
    }

    let text = event.delta.map(|d| d.text).unwrap_or_default();
    if text.is_empty() {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_response() {
        let body = br#"{
            "content": [{"type": "text", "text": "The answer."}],
            "usage": {"input_tokens": 120, "output_tokens": 18}
        }"#;
        let output = parse_model_response(body).unwrap();
        assert_eq!(output.text, "The answer.");
        let usage = output.usage.unwrap();
        assert_eq!(usage.input_tokens, 120);
        assert_eq!(usage.output_tokens, 18);
    }

    #[test]
    fn test_parse_model_response_without_content() {
        let output = parse_model_response(b"{}").unwrap();
        assert_eq!(output.text, "");
        assert!(output.usage.is_none());
    }

    #[test]
    fn test_parse_delta_extracts_text() {
        let bytes = br#"{"type": "content_block_delta", "delta": {"text": "tok"}}"#;
        assert_eq!(parse_delta(bytes).unwrap(), Some("tok".to_string()));
    }

    #[test]
    fn test_parse_delta_ignores_other_events() {
        let bytes = br#"{"type": "message_start"}"#;
        assert_eq!(parse_delta(bytes).unwrap(), None);

        let bytes = br#"{"type": "content_block_delta", "delta": {"text": ""}}"#;
        assert_eq!(parse_delta(bytes).unwrap(), None);
    }

    #[test]
    fn test_parse_delta_rejects_garbage() {
        assert!(parse_delta(b"not json").is_err());
    }

    #[test]
    fn test_map_metadata_keeps_strings_only() {
        let mut raw = HashMap::new();
        raw.insert(
            "x-amz-bedrock-kb-title".to_string(),
            Document::String("Title".to_string()),
        );
        raw.insert("score".to_string(), Document::from(0.5_f64));

        let mapped = map_metadata(Some(&raw));
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped["x-amz-bedrock-kb-title"], "Title");
    }
}
