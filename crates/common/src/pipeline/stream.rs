//! Streaming frame emission
//!
//! Two emitters share one frame protocol: exactly one metadata frame, then
//! zero or more content frames, with an error frame terminating the stream
//! when something fails.
//!
//! The agent emitter is simulated: the event stream is drained to completion
//! first, then the finished answer is replayed in word groups. The
//! knowledge-base emitter is truly incremental and forwards generation
//! deltas as they arrive.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::warn;

use crate::backend::{AgentBackend, KnowledgeBackend};
use crate::config::PartialResultPolicy;
use crate::metrics::record_stream_frame;
use crate::model::StreamFrame;
use crate::pipeline::aggregate::{
    aggregate_agent_events, build_prompt, context_block, knowledge_sources,
};
use crate::WORDS_PER_FRAME;

/// Ordered frame sequence for one streamed query. Failures surface as
/// in-band error frames, never as stream items of their own.
pub type FrameStream = Pin<Box<dyn Stream<Item = StreamFrame> + Send>>;

/// Split a finished answer into word-group payloads.
///
/// Words are whitespace-delimited; each payload carries up to
/// [`WORDS_PER_FRAME`] words joined by single spaces, and every payload
/// except the last gets a trailing space so clients can concatenate
/// payloads verbatim.
pub(crate) fn chunk_words(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let total = words.chunks(WORDS_PER_FRAME).count();

    words
        .chunks(WORDS_PER_FRAME)
        .enumerate()
        .map(|(i, group)| {
            let mut payload = group.join(" ");
            if i + 1 < total {
                payload.push(' ');
            }
            payload
        })
        .collect()
}

/// Simulated streaming over a full agent invocation.
///
/// The whole event stream is aggregated before the first frame goes out;
/// a mid-stream backend failure is handled per `policy`.
pub fn simulated_agent_stream(
    agent: Arc<dyn AgentBackend>,
    question: String,
    session_id: String,
    policy: PartialResultPolicy,
) -> FrameStream {
    Box::pin(async_stream::stream! {
        let events = match agent.invoke(&question, &session_id).await {
            Ok(events) => events,
            Err(error) => {
                warn!(%error, "Agent invocation failed before streaming");
                record_stream_frame("error");
                yield StreamFrame::Error {
                    message: error.to_string(),
                };
                return;
            }
        };

        match aggregate_agent_events(events, session_id).await {
            Ok(result) => {
                record_stream_frame("metadata");
                yield StreamFrame::Metadata {
                    sources: result.sources,
                    session_id: result.session_id,
                };
                for payload in chunk_words(&result.answer) {
                    record_stream_frame("content");
                    yield StreamFrame::Content { text: payload };
                }
            }
            Err(failure) => {
                warn!(error = %failure.error, "Agent stream failed mid-flight");
                if policy == PartialResultPolicy::Surface {
                    record_stream_frame("metadata");
                    yield StreamFrame::Metadata {
                        sources: failure.partial.sources,
                        session_id: failure.partial.session_id,
                    };
                    for payload in chunk_words(&failure.partial.answer) {
                        record_stream_frame("content");
                        yield StreamFrame::Content { text: payload };
                    }
                }
                record_stream_frame("error");
                yield StreamFrame::Error {
                    message: failure.error.to_string(),
                };
            }
        }
    })
}

/// Incremental streaming over retrieval plus generation.
///
/// Sources are known as soon as retrieval returns, so the metadata frame
/// goes out before the first generation delta.
pub fn incremental_knowledge_stream(
    backend: Arc<dyn KnowledgeBackend>,
    question: String,
    max_results: usize,
) -> FrameStream {
    Box::pin(async_stream::stream! {
        let matches = match backend.retrieve(&question, max_results).await {
            Ok(matches) => matches,
            Err(error) => {
                warn!(%error, "Retrieval failed before streaming");
                record_stream_frame("error");
                yield StreamFrame::Error {
                    message: error.to_string(),
                };
                return;
            }
        };

        let sources = knowledge_sources(&matches);
        let prompt = build_prompt(&question, &context_block(&matches));

        record_stream_frame("metadata");
        yield StreamFrame::Metadata {
            sources,
            session_id: None,
        };

        let mut deltas = match backend.generate_stream(&prompt).await {
            Ok(deltas) => deltas,
            Err(error) => {
                warn!(%error, "Generation stream failed to start");
                record_stream_frame("error");
                yield StreamFrame::Error {
                    message: error.to_string(),
                };
                return;
            }
        };

        while let Some(delta) = deltas.next().await {
            match delta {
                Ok(text) => {
                    record_stream_frame("content");
                    yield StreamFrame::Content { text };
                }
                Err(error) => {
                    warn!(%error, "Generation stream failed mid-flight");
                    record_stream_frame("error");
                    yield StreamFrame::Error {
                        message: error.to_string(),
                    };
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        AgentChunk, AgentEvent, DeltaStream, EventStream, GenerationOutput, RawLocation,
        RetrievalMatch,
    };
    use crate::errors::{AppError, Result};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[test]
    fn test_chunk_words_five_word_groups() {
        assert_eq!(chunk_words("a b c d e f g"), vec!["a b c d e ", "f g"]);
    }

    #[test]
    fn test_chunk_words_exact_group_has_no_trailing_space() {
        assert_eq!(chunk_words("a b c d e"), vec!["a b c d e"]);
    }

    #[test]
    fn test_chunk_words_collapses_whitespace() {
        assert_eq!(chunk_words("a  b\nc"), vec!["a b c"]);
    }

    #[test]
    fn test_chunk_words_empty() {
        assert!(chunk_words("").is_empty());
        assert!(chunk_words("   ").is_empty());
    }

    #[test]
    fn test_chunked_payloads_concatenate_to_normalized_answer() {
        let answer = "one two three four five six seven eight nine ten eleven";
        let rebuilt: String = chunk_words(answer).concat();
        assert_eq!(rebuilt, answer);
    }

    struct ScriptedAgent {
        events: Mutex<Option<Vec<Result<AgentEvent>>>>,
    }

    impl ScriptedAgent {
        fn new(events: Vec<Result<AgentEvent>>) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Some(events)),
            })
        }
    }

    #[async_trait]
    impl AgentBackend for ScriptedAgent {
        async fn invoke(&self, _question: &str, _session_id: &str) -> Result<EventStream> {
            let events = self
                .events
                .lock()
                .unwrap()
                .take()
                .expect("agent invoked twice");
            Ok(Box::pin(futures::stream::iter(events)))
        }
    }

    fn text_event(text: &str) -> Result<AgentEvent> {
        Ok(AgentEvent {
            chunk: Some(AgentChunk {
                text: Some(text.to_string()),
                attribution: None,
            }),
            attribution: None,
        })
    }

    #[tokio::test]
    async fn test_agent_stream_metadata_precedes_content() {
        let agent = ScriptedAgent::new(vec![text_event("one two three four five six")]);
        let frames: Vec<StreamFrame> =
            simulated_agent_stream(agent, "q".into(), "s-1".into(), PartialResultPolicy::Discard)
                .collect()
                .await;

        assert_eq!(frames[0].kind(), "metadata");
        let StreamFrame::Metadata { session_id, .. } = &frames[0] else {
            panic!("first frame must be metadata");
        };
        assert_eq!(session_id.as_deref(), Some("s-1"));

        let payloads: Vec<&str> = frames[1..]
            .iter()
            .map(|f| match f {
                StreamFrame::Content { text } => text.as_str(),
                other => panic!("unexpected frame {}", other.kind()),
            })
            .collect();
        assert_eq!(payloads, vec!["one two three four five ", "six"]);
    }

    #[tokio::test]
    async fn test_agent_stream_emits_metadata_even_without_sources() {
        let agent = ScriptedAgent::new(vec![]);
        let frames: Vec<StreamFrame> =
            simulated_agent_stream(agent, "q".into(), "s-2".into(), PartialResultPolicy::Discard)
                .collect()
                .await;

        // Empty stream still produces metadata plus the sentinel answer
        assert_eq!(frames[0].kind(), "metadata");
        assert!(frames[1..].iter().all(|f| f.kind() == "content"));
    }

    #[tokio::test]
    async fn test_agent_stream_discard_policy_yields_single_error_frame() {
        let agent = ScriptedAgent::new(vec![
            text_event("accumulated "),
            Err(AppError::Backend {
                message: "upstream closed".into(),
            }),
        ]);
        let frames: Vec<StreamFrame> =
            simulated_agent_stream(agent, "q".into(), "s-3".into(), PartialResultPolicy::Discard)
                .collect()
                .await;

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind(), "error");
    }

    #[tokio::test]
    async fn test_agent_stream_surface_policy_replays_partial() {
        let agent = ScriptedAgent::new(vec![
            text_event("partial answer text "),
            Err(AppError::Backend {
                message: "upstream closed".into(),
            }),
        ]);
        let frames: Vec<StreamFrame> =
            simulated_agent_stream(agent, "q".into(), "s-4".into(), PartialResultPolicy::Surface)
                .collect()
                .await;

        assert_eq!(frames.first().unwrap().kind(), "metadata");
        assert_eq!(frames.last().unwrap().kind(), "error");
        assert!(frames[1..frames.len() - 1]
            .iter()
            .all(|f| f.kind() == "content"));
    }

    struct ScriptedKnowledge {
        matches: Vec<RetrievalMatch>,
        deltas: Mutex<Option<Vec<Result<String>>>>,
    }

    #[async_trait]
    impl KnowledgeBackend for ScriptedKnowledge {
        async fn retrieve(&self, _query: &str, max_results: usize) -> Result<Vec<RetrievalMatch>> {
            Ok(self.matches.iter().take(max_results).cloned().collect())
        }

        async fn generate(&self, _prompt: &str) -> Result<GenerationOutput> {
            unimplemented!("not used in streaming tests")
        }

        async fn generate_stream(&self, _prompt: &str) -> Result<DeltaStream> {
            let deltas = self
                .deltas
                .lock()
                .unwrap()
                .take()
                .expect("stream started twice");
            Ok(Box::pin(futures::stream::iter(deltas)))
        }
    }

    #[tokio::test]
    async fn test_knowledge_stream_forwards_deltas() {
        let backend = Arc::new(ScriptedKnowledge {
            matches: vec![RetrievalMatch {
                content: "passage".into(),
                location: RawLocation::S3 {
                    uri: Some("s3://bucket/doc".into()),
                },
                score: 0.5,
                metadata: HashMap::new(),
            }],
            deltas: Mutex::new(Some(vec![Ok("Hel".into()), Ok("lo".into())])),
        });

        let frames: Vec<StreamFrame> =
            incremental_knowledge_stream(backend, "q".into(), 5).collect().await;

        assert_eq!(frames[0].kind(), "metadata");
        let StreamFrame::Metadata { sources, session_id } = &frames[0] else {
            panic!("first frame must be metadata");
        };
        assert_eq!(sources.len(), 1);
        assert!(session_id.is_none());

        let rebuilt: String = frames[1..]
            .iter()
            .map(|f| match f {
                StreamFrame::Content { text } => text.as_str(),
                other => panic!("unexpected frame {}", other.kind()),
            })
            .collect();
        assert_eq!(rebuilt, "Hello");
    }

    #[tokio::test]
    async fn test_knowledge_stream_error_terminates() {
        let backend = Arc::new(ScriptedKnowledge {
            matches: vec![],
            deltas: Mutex::new(Some(vec![
                Ok("tok ".into()),
                Err(AppError::Backend {
                    message: "model throttled".into(),
                }),
            ])),
        });

        let frames: Vec<StreamFrame> =
            incremental_knowledge_stream(backend, "q".into(), 5).collect().await;

        assert_eq!(frames[0].kind(), "metadata");
        assert_eq!(frames[1].kind(), "content");
        assert_eq!(frames.last().unwrap().kind(), "error");
        assert_eq!(frames.len(), 3);
    }
}
