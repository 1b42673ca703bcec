//! Configuration management for the RagBridge gateway
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Answer backend configuration
    pub backend: BackendConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Which answer backend the process fronts.
///
/// Chosen once at startup; a process never serves both modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// Direct agent invocation (answer + citations in one event stream)
    Agent,
    /// Knowledge-base retrieval followed by a separate generation call
    KnowledgeBase,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Agent => "agent",
            BackendMode::KnowledgeBase => "knowledge_base",
        }
    }
}

/// What to do with partially accumulated text/sources when the agent event
/// stream fails after some events were already processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialResultPolicy {
    /// Drop everything accumulated before the failure
    #[default]
    Discard,
    /// In streaming mode, replay accumulated frames before the error frame
    Surface,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend selection: agent or knowledge_base
    #[serde(default = "default_mode")]
    pub mode: BackendMode,

    /// AWS region hosting the Bedrock runtimes
    #[serde(default = "default_region")]
    pub region: String,

    /// Bedrock agent id (required in agent mode)
    pub agent_id: Option<String>,

    /// Bedrock agent alias id (required in agent mode)
    pub agent_alias_id: Option<String>,

    /// Knowledge base id (required in knowledge_base mode)
    pub knowledge_base_id: Option<String>,

    /// Model used for the generation call in knowledge_base mode
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// Token budget for the generation call
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Mid-stream failure handling for agent aggregation
    #[serde(default)]
    pub partial_results: PartialResultPolicy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_mode() -> BackendMode { BackendMode::KnowledgeBase }
fn default_region() -> String { "us-east-1".to_string() }
fn default_model_id() -> String { "anthropic.claude-3-sonnet-20240229-v1:0".to_string() }
fn default_max_tokens() -> u32 { 1000 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "ragbridge".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8000)?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__BACKEND__MODE=agent, APP__BACKEND__AGENT_ID=...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }
}

impl BackendConfig {
    /// Check that all identifiers the selected mode needs are present.
    ///
    /// Runs before any client is built so a misconfigured process fails at
    /// startup rather than at first query.
    pub fn validate(&self) -> Result<(), AppError> {
        match self.mode {
            BackendMode::Agent => {
                if self.agent_id.as_deref().unwrap_or("").is_empty()
                    || self.agent_alias_id.as_deref().unwrap_or("").is_empty()
                {
                    return Err(AppError::Configuration {
                        message: "backend.agent_id and backend.agent_alias_id must be set in agent mode"
                            .to_string(),
                    });
                }
            }
            BackendMode::KnowledgeBase => {
                if self.knowledge_base_id.as_deref().unwrap_or("").is_empty() {
                    return Err(AppError::Configuration {
                        message: "backend.knowledge_base_id must be set in knowledge_base mode"
                            .to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            backend: BackendConfig {
                mode: default_mode(),
                region: default_region(),
                agent_id: None,
                agent_alias_id: None,
                knowledge_base_id: None,
                model_id: default_model_id(),
                max_tokens: default_max_tokens(),
                partial_results: PartialResultPolicy::default(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.backend.mode, BackendMode::KnowledgeBase);
        assert_eq!(config.backend.max_tokens, 1000);
        assert_eq!(config.backend.partial_results, PartialResultPolicy::Discard);
    }

    #[test]
    fn test_validate_agent_mode_requires_both_ids() {
        let mut backend = AppConfig::default().backend;
        backend.mode = BackendMode::Agent;
        backend.agent_id = Some("AGENT123".into());
        // alias still missing
        assert!(backend.validate().is_err());

        backend.agent_alias_id = Some("ALIAS456".into());
        assert!(backend.validate().is_ok());
    }

    #[test]
    fn test_validate_knowledge_base_mode() {
        let mut backend = AppConfig::default().backend;
        assert!(backend.validate().is_err());

        backend.knowledge_base_id = Some("KB789".into());
        assert!(backend.validate().is_ok());
    }

    #[test]
    fn test_empty_string_id_is_rejected() {
        let mut backend = AppConfig::default().backend;
        backend.mode = BackendMode::Agent;
        backend.agent_id = Some(String::new());
        backend.agent_alias_id = Some("ALIAS".into());
        assert!(backend.validate().is_err());
    }
}
