//! Citation normalization and deduplication
//!
//! Backends describe where cited content lives in several incompatible
//! location schemas (wiki page, object storage, generic URI). This module
//! maps each of them onto the uniform [`SourceRecord`] shape and merges the
//! records collected from overlapping citation channels into one ordered,
//! bounded list.

use std::collections::{HashMap, HashSet};

use crate::backend::RawLocation;
use crate::model::SourceRecord;
use crate::{MAX_SOURCES, SNIPPET_MAX_CHARS};

/// Metadata keys the knowledge base attaches to wiki-page citations
pub const METADATA_TITLE_KEY: &str = "x-amz-bedrock-kb-title";
pub const METADATA_AUTHOR_KEY: &str = "x-amz-bedrock-kb-author";

/// Truncate to a character budget without splitting multi-byte characters
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Excerpt with an explicit truncation marker, used for `content_preview`
fn preview(text: &str) -> String {
    if text.chars().count() > SNIPPET_MAX_CHARS {
        let mut out = truncate_chars(text, SNIPPET_MAX_CHARS);
        out.push_str("...");
        out
    } else {
        text.to_string()
    }
}

/// Whether a URI is directly web-addressable
fn is_web_addressable(uri: &str) -> bool {
    uri.starts_with("http")
}

/// Map one backend location descriptor onto a normalized source record.
///
/// Malformed or missing fields never fail; they default per schema, and
/// `source` falls back to the sentinel `"Unknown"` rather than being empty.
pub fn normalize_location(
    location: &RawLocation,
    content: &str,
    metadata: &HashMap<String, String>,
    score: Option<f64>,
) -> SourceRecord {
    let snippet = truncate_chars(content, SNIPPET_MAX_CHARS);
    let score = score.unwrap_or(0.0);

    match location {
        RawLocation::Confluence { url } => SourceRecord {
            source: url
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            score,
            snippet,
            url: url.clone(),
            title: metadata.get(METADATA_TITLE_KEY).cloned(),
            author: metadata.get(METADATA_AUTHOR_KEY).cloned(),
            content_preview: Some(preview(content)),
        },
        RawLocation::S3 { uri } | RawLocation::Other { uri } => SourceRecord {
            source: uri
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "Unknown".to_string()),
            score,
            snippet,
            url: uri.clone().filter(|u| is_web_addressable(u)),
            title: None,
            author: None,
            content_preview: None,
        },
    }
}

/// Merge candidate records from overlapping citation channels.
///
/// Key: `url` when present and non-empty, else `source`, else `"unknown"`.
/// The first occurrence of a key wins even when a later duplicate carries
/// additional fields; earlier-arriving (chunk-level) citations are
/// authoritative over later (event-level) duplicates. Output preserves
/// first-seen order and is truncated to [`MAX_SOURCES`] entries, each with
/// every field normalized.
pub fn dedupe_sources(candidates: Vec<SourceRecord>) -> Vec<SourceRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut unique = Vec::new();

    for mut candidate in candidates {
        let key = match candidate.url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ if !candidate.source.is_empty() => candidate.source.clone(),
            _ => "unknown".to_string(),
        };
        if !seen.insert(key) {
            continue;
        }

        if candidate.source.is_empty() {
            candidate.source = candidate
                .url
                .clone()
                .filter(|u| !u.is_empty())
                .unwrap_or_else(|| "Unknown".to_string());
        }
        if candidate.snippet.is_empty() {
            if let Some(preview) = &candidate.content_preview {
                candidate.snippet = truncate_chars(preview, SNIPPET_MAX_CHARS);
            }
        }

        unique.push(candidate);
        if unique.len() == MAX_SOURCES {
            break;
        }
    }

    unique
}
