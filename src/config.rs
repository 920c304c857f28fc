use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Gateway routing configuration
    pub gateway: GatewayConfig,

    /// State backend configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Cost bookkeeping configuration
    #[serde(default)]
    pub cost: CostConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: LLM_PG_)
            .add_source(
                config::Environment::with_prefix("LLM_PG")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Request timeout (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Providers tried in order when the selected provider fails
    #[serde(default = "default_fallback_chain")]
    pub fallback_chain: Vec<String>,

    /// Per provider-call deadline (seconds)
    #[serde(default = "default_provider_deadline")]
    pub provider_deadline_secs: u64,

    /// IANA timezone used for tenant-local time windows
    #[serde(default = "default_tenant_timezone")]
    pub tenant_timezone: String,

    /// OpenAI-compatible endpoint
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Anthropic-compatible endpoint
    #[serde(default = "default_anthropic_base_url")]
    pub anthropic_base_url: String,

    /// On-premise inference endpoint
    #[serde(default = "default_local_base_url")]
    pub local_base_url: String,

    /// Env var holding the OpenAI API key
    #[serde(default = "default_openai_key_env")]
    pub openai_api_key_env: String,

    /// Env var holding the Anthropic API key
    #[serde(default = "default_anthropic_key_env")]
    pub anthropic_api_key_env: String,

    /// Default model per provider, used when the request has no override
    #[serde(default = "default_openai_model")]
    pub openai_default_model: String,

    #[serde(default = "default_anthropic_model")]
    pub anthropic_default_model: String,

    #[serde(default = "default_local_model")]
    pub local_default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostConfig {
    /// Bookkeeping queue capacity; overflow marks the service degraded
    #[serde(default = "default_bookkeeping_queue_size")]
    pub bookkeeping_queue_size: usize,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            bookkeeping_queue_size: default_bookkeeping_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub prometheus_enabled: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    30
}

fn default_fallback_chain() -> Vec<String> {
    vec![
        "openai".to_string(),
        "anthropic".to_string(),
        "local".to_string(),
    ]
}

fn default_provider_deadline() -> u64 {
    30
}

fn default_tenant_timezone() -> String {
    "UTC".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_local_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_openai_model() -> String {
    "gpt-4-turbo".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-sonnet".to_string()
}

fn default_local_model() -> String {
    "llama-3-8b".to_string()
}

fn default_bookkeeping_queue_size() -> usize {
    10000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "llm-policy-gateway".to_string()
}
