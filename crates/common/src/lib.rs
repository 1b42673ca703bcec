//! RagBridge Common Library
//!
//! Shared code for the RagBridge gateway including:
//! - Normalized answer/source data model
//! - Citation normalization and deduplication
//! - Answer aggregation and stream emission pipeline
//! - Backend client abstractions (Bedrock agent / knowledge base)
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod backend;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod sources;

// Re-export commonly used types
pub use config::AppConfig;
pub use errors::{AppError, Result};
pub use model::{AggregateResult, SourceRecord, StreamFrame};
pub use pipeline::{BackendHandle, QueryService};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum number of sources attached to an answer
pub const MAX_SOURCES: usize = 5;

/// Maximum snippet / preview length in characters
pub const SNIPPET_MAX_CHARS: usize = 200;

/// Words per content frame in simulated streaming
pub const WORDS_PER_FRAME: usize = 5;
