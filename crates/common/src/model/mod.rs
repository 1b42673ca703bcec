//! Normalized answer data model
//!
//! These are the stable shapes the gateway exposes regardless of which
//! backend produced the answer. Everything here is request-scoped and
//! immutable once returned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Answer returned when a query produced no text
pub const NO_RESPONSE: &str = "No response generated";

/// A normalized citation.
///
/// All seven fields are always present on the wire (optional ones as null),
/// regardless of which partial fields the originating channel supplied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Canonical identifier: a URL or opaque URI. Never empty; the sentinel
    /// "Unknown" stands in when no strong identifier exists.
    pub source: String,

    /// Relevance score; 0.0 when the channel supplies none
    pub score: f64,

    /// Excerpt of the cited content, hard-truncated to 200 characters
    pub snippet: String,

    /// Present only when the underlying location is web-addressable
    pub url: Option<String>,

    /// Only populated for wiki-page-sourced citations
    pub title: Option<String>,

    /// Only populated for wiki-page-sourced citations
    pub author: Option<String>,

    /// Truncated excerpt with an "..." marker when truncation occurred
    pub content_preview: Option<String>,
}

/// Token accounting reported by the generation call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    /// Any additional counters the backend reports
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty", default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The aggregate of one query: final answer text plus deduplicated sources.
///
/// Constructed fresh per query, never mutated after return, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub answer: String,

    /// At most five entries, first-seen order after deduplication
    pub sources: Vec<SourceRecord>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

/// One unit of the streaming output protocol.
///
/// Ordering invariant: exactly one `Metadata` frame precedes all `Content`
/// frames; an `Error` frame terminates the sequence and nothing follows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Metadata {
        sources: Vec<SourceRecord>,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    Content {
        text: String,
    },
    Error {
        message: String,
    },
}

impl StreamFrame {
    /// Discriminator string as it appears on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            StreamFrame::Metadata { .. } => "metadata",
            StreamFrame::Content { .. } => "content",
            StreamFrame::Error { .. } => "error",
        }
    }
}
