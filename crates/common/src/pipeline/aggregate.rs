//! Blocking aggregation of one query
//!
//! Agent mode drains the full event stream and folds text and citations
//! into one result. Knowledge-base mode retrieves matches, builds a prompt
//! from them, and runs a single generation call.

use futures::StreamExt;
use tracing::debug;

use crate::backend::{
    Attribution, EventStream, KnowledgeBackend, RetrievalMatch, RetrievedReference,
};
use crate::errors::{AppError, Result};
use crate::model::{AggregateResult, SourceRecord, NO_RESPONSE};
use crate::sources::{dedupe_sources, normalize_location};

/// A mid-stream agent failure, carrying whatever was accumulated before the
/// failing event. `partial.answer` is the raw accumulated text; it may be
/// empty and never holds the no-answer sentinel.
#[derive(Debug)]
pub struct AgentFailure {
    pub error: AppError,
    pub partial: AggregateResult,
}

/// Drain an agent event stream into one aggregate result.
///
/// Text fragments concatenate in arrival order. Citations are pooled from
/// both channels, every chunk-level reference ahead of every event-level
/// one, then deduplicated in a single pass so chunk-level records win ties.
pub async fn aggregate_agent_events(
    mut events: EventStream,
    session_id: String,
) -> std::result::Result<AggregateResult, AgentFailure> {
    let mut answer = String::new();
    let mut chunk_refs: Vec<RetrievedReference> = Vec::new();
    let mut event_refs: Vec<RetrievedReference> = Vec::new();

    while let Some(next) = events.next().await {
        match next {
            Ok(event) => {
                if let Some(chunk) = event.chunk {
                    if let Some(text) = chunk.text {
                        answer.push_str(&text);
                    }
                    if let Some(attribution) = chunk.attribution {
                        collect_references(attribution, &mut chunk_refs);
                    }
                }
                if let Some(attribution) = event.attribution {
                    collect_references(attribution, &mut event_refs);
                }
            }
            Err(error) => {
                let partial = assemble(answer, chunk_refs, event_refs, session_id);
                return Err(AgentFailure { error, partial });
            }
        }
    }

    let mut result = assemble(answer, chunk_refs, event_refs, session_id);
    if result.answer.is_empty() {
        result.answer = NO_RESPONSE.to_string();
    }

    debug!(
        sources = result.sources.len(),
        answer_chars = result.answer.chars().count(),
        "Agent aggregation completed"
    );

    Ok(result)
}

fn collect_references(attribution: Attribution, out: &mut Vec<RetrievedReference>) {
    for citation in attribution.citations {
        out.extend(citation.references);
    }
}

fn assemble(
    answer: String,
    chunk_refs: Vec<RetrievedReference>,
    event_refs: Vec<RetrievedReference>,
    session_id: String,
) -> AggregateResult {
    let candidates: Vec<SourceRecord> = chunk_refs
        .into_iter()
        .chain(event_refs)
        .map(reference_record)
        .collect();

    AggregateResult {
        answer,
        sources: dedupe_sources(candidates),
        session_id: Some(session_id),
        token_usage: None,
    }
}

fn reference_record(reference: RetrievedReference) -> SourceRecord {
    normalize_location(
        &reference.location.unwrap_or_default(),
        &reference.content,
        &reference.metadata,
        reference.score,
    )
}

/// Run one retrieval-plus-generation query to completion.
///
/// Retrieval happens even when it yields nothing; generation still runs
/// with an empty context block and the model says what it can.
pub async fn run_knowledge_query(
    backend: &dyn KnowledgeBackend,
    question: &str,
    max_results: usize,
) -> Result<AggregateResult> {
    let matches = backend.retrieve(question, max_results).await?;
    let sources = knowledge_sources(&matches);
    let prompt = build_prompt(question, &context_block(&matches));

    let output = backend.generate(&prompt).await?;

    debug!(
        matches = matches.len(),
        sources = sources.len(),
        "Knowledge query completed"
    );

    Ok(AggregateResult {
        answer: if output.text.is_empty() {
            NO_RESPONSE.to_string()
        } else {
            output.text
        },
        sources,
        session_id: None,
        token_usage: output.usage,
    })
}

/// Normalize and deduplicate retrieval matches, keeping their real scores
pub(crate) fn knowledge_sources(matches: &[RetrievalMatch]) -> Vec<SourceRecord> {
    dedupe_sources(
        matches
            .iter()
            .map(|m| normalize_location(&m.location, &m.content, &m.metadata, Some(m.score)))
            .collect(),
    )
}

/// Join match contents into the prompt context, blank line between matches
pub(crate) fn context_block(matches: &[RetrievalMatch]) -> String {
    matches
        .iter()
        .map(|m| m.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Grounded-answer prompt for the generation call
pub(crate) fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Use the following context to answer the question. Answer only from the \
         context; if it does not contain enough information, say so. Keep the \
         answer concise and cite the sources you used.\n\n\
         Context:\n{context}\n\n\
         Question: {question}\n\n\
         Answer:"
    )
}
