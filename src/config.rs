use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// Configuration was already installed in the global cache.
    #[error("Configuration already initialized")]
    AlreadyInitialized,
}

/// Runtime configuration for the doctoknow services.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Root directory of the filesystem object store; in-memory storage is used when unset.
    pub data_dir: Option<PathBuf>,
    /// Bucket name recorded in `source_uri` metadata attributes.
    pub storage_bucket: String,
    /// Base URL of the Messages-style generation API.
    pub generation_url: String,
    /// Optional API key sent to the generation API.
    pub generation_api_key: Option<String>,
    /// Model identifier used for transcription and knowledge extraction.
    pub generation_model: String,
    /// Maximum output tokens requested per generation call.
    pub generation_max_tokens: u32,
    /// Base URL of the knowledge index / agent runtime API.
    pub retrieval_url: String,
    /// Optional API key sent to the knowledge index / agent runtime API.
    pub retrieval_api_key: Option<String>,
    /// Identifier of the managed knowledge base.
    pub knowledge_base_id: String,
    /// Identifier of the knowledge base data source that is re-synced after batches.
    pub data_source_id: String,
    /// Model used by the retrieve-and-generate call.
    pub model_arn: String,
    /// Model used by the reranking stage.
    pub rerank_model_arn: String,
    /// Agents keyed by agent type.
    pub agents: AgentDirectory,
    /// Character budget for the direct-mode conversation context.
    pub max_context_length: usize,
    /// Connect timeout for outbound HTTP calls, in seconds.
    pub http_connect_timeout_secs: u64,
    /// Read timeout for outbound HTTP calls, in seconds.
    pub http_read_timeout_secs: u64,
    /// Secret used to sign download links.
    pub signing_secret: String,
    /// Public base URL used when building download links.
    pub public_base_url: String,
    /// Lifetime of generated download links, in seconds.
    pub download_url_ttl_secs: u64,
    /// Lifetime of async query records, in seconds.
    pub query_ttl_secs: u64,
    /// Lifetime of chat messages, in days.
    pub history_ttl_days: u64,
    /// Maximum serialized size of a batch submission, in bytes.
    pub max_batch_payload_bytes: usize,
    /// Transport used to dispatch batch work items.
    pub batch_dispatch: BatchDispatchMode,
    /// Delivery attempts per task before it is dead-lettered.
    pub task_max_attempts: u32,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Agent identifiers for each supported agent type.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentDirectory {
    /// Agent used for the `default` type and as the fallback for unconfigured types.
    pub default: Option<AgentRef>,
    /// Agent used for the `verification` type.
    pub verification: Option<AgentRef>,
    /// Agent used for the `specification` type.
    pub specification: Option<AgentRef>,
}

/// Identifier pair addressing one deployed agent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentRef {
    /// Agent identifier.
    pub agent_id: String,
    /// Alias identifier of the deployed agent version.
    pub alias_id: String,
}

/// Supported transports for batch dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchDispatchMode {
    /// Single named batch execution processing every item.
    Orchestrated,
    /// One queued task per work item.
    FanOut,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            data_dir: load_env_optional("DOCTOKNOW_DATA_DIR").map(PathBuf::from),
            storage_bucket: load_env_optional("STORAGE_BUCKET")
                .unwrap_or_else(|| "doctoknow".to_string()),
            generation_url: load_env("GENERATION_URL")?,
            generation_api_key: load_env_optional("GENERATION_API_KEY"),
            generation_model: load_env("GENERATION_MODEL")?,
            generation_max_tokens: load_env_parsed("GENERATION_MAX_TOKENS", 2000)?,
            retrieval_url: load_env("RETRIEVAL_URL")?,
            retrieval_api_key: load_env_optional("RETRIEVAL_API_KEY"),
            knowledge_base_id: load_env("KNOWLEDGE_BASE_ID")?,
            data_source_id: load_env("DATA_SOURCE_ID")?,
            model_arn: load_env("MODEL_ARN")?,
            rerank_model_arn: load_env_optional("RERANK_MODEL_ARN")
                .unwrap_or_else(|| DEFAULT_RERANK_MODEL_ARN.to_string()),
            agents: AgentDirectory {
                default: load_agent("AGENT_ID", "AGENT_ALIAS_ID"),
                verification: load_agent("VERIFICATION_AGENT_ID", "VERIFICATION_AGENT_ALIAS_ID"),
                specification: load_agent(
                    "SPECIFICATION_AGENT_ID",
                    "SPECIFICATION_AGENT_ALIAS_ID",
                ),
            },
            max_context_length: load_env_parsed("MAX_CONTEXT_LENGTH", 10_000)?,
            http_connect_timeout_secs: load_env_parsed("HTTP_CONNECT_TIMEOUT", 10)?,
            http_read_timeout_secs: load_env_parsed("HTTP_READ_TIMEOUT", 900)?,
            signing_secret: load_env("SIGNING_SECRET")?,
            public_base_url: load_env_optional("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:4100".to_string()),
            download_url_ttl_secs: load_env_parsed("DOWNLOAD_URL_TTL_SECS", 604_800)?,
            query_ttl_secs: load_env_parsed("QUERY_TTL_SECS", 3_600)?,
            history_ttl_days: load_env_parsed("HISTORY_TTL_DAYS", 30)?,
            max_batch_payload_bytes: load_env_parsed("MAX_BATCH_PAYLOAD_BYTES", 262_144)?,
            batch_dispatch: load_env_optional("BATCH_DISPATCH")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("BATCH_DISPATCH".into()))
                })
                .transpose()?
                .unwrap_or(BatchDispatchMode::Orchestrated),
            task_max_attempts: load_env_parsed("TASK_MAX_ATTEMPTS", 3)?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }
}

const DEFAULT_RERANK_MODEL_ARN: &str =
    "arn:aws:bedrock:us-west-2::foundation-model/cohere.rerank-v3-5:0";

fn load_env(key: &str) -> Result<String, ConfigError> {
    load_env_optional(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_parsed<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn load_agent(id_key: &str, alias_key: &str) -> Option<AgentRef> {
    let agent_id = load_env_optional(id_key)?;
    let alias_id = load_env_optional(alias_key)?;
    Some(AgentRef { agent_id, alias_id })
}

impl FromStr for BatchDispatchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "orchestrated" => Ok(Self::Orchestrated),
            "fan_out" | "fanout" => Ok(Self::FanOut),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        generation_url = %config.generation_url,
        retrieval_url = %config.retrieval_url,
        knowledge_base_id = %config.knowledge_base_id,
        data_dir = ?config.data_dir,
        batch_dispatch = ?config.batch_dispatch,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)?;
    Ok(get_config())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_dispatch_parses_known_values() {
        assert_eq!(
            "orchestrated".parse::<BatchDispatchMode>(),
            Ok(BatchDispatchMode::Orchestrated)
        );
        assert_eq!(
            "FAN_OUT".parse::<BatchDispatchMode>(),
            Ok(BatchDispatchMode::FanOut)
        );
        assert!("parallel".parse::<BatchDispatchMode>().is_err());
    }

    #[test]
    fn parsed_values_fall_back_to_defaults() {
        let value: usize = load_env_parsed("DOCTOKNOW_TEST_UNSET_VARIABLE", 42).expect("default");
        assert_eq!(value, 42);
    }
}
