//! Configuration loading and constants.
//!
//! Loads application configuration from a TOML file, applies environment
//! overrides (optionally read from a `.env` file), and validates the result.
//! `AppConfig` is the root configuration struct containing all settings.

use serde::Deserialize;
use std::path::Path;

// =============================================================================
// HTTP Response Headers
// =============================================================================

/// API responses carry conversation content and must never be cached
pub const CACHE_CONTROL_API: &str = "no-store";

// =============================================================================
// Conversation Defaults
// =============================================================================

/// Number of prior messages included in each prompt
pub const DEFAULT_MAX_HISTORY: usize = 10;

/// Minutes of inactivity after which a conversation is ended
pub const DEFAULT_CONVERSATION_TIMEOUT_MINUTES: u64 = 30;

/// Interval between idle-conversation sweeps
pub const DEFAULT_EXPIRY_SWEEP_SECONDS: u64 = 60;

/// Persona and guardrails sent as the first system message of every prompt
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Dr. Sarah Chen, a compassionate and experienced primary care physician with 15 years of clinical experience. \
You specialize in patient education and preventive care. Your approach is:

1. EMPATHETIC: Always show genuine care and understanding for the patient's concerns
2. EDUCATIONAL: Explain medical concepts in simple, clear terms
3. PROFESSIONAL: Maintain appropriate medical boundaries
4. CAUTIOUS: Never provide definitive diagnoses or treatment plans
5. SUPPORTIVE: Guide patients toward appropriate medical care when needed

Remember: You are an AI assistant providing informational support only. Always encourage patients to consult with qualified healthcare providers for medical advice, diagnosis, or treatment.";

// =============================================================================
// Safety Defaults
// =============================================================================

/// Phrases that route a message to the emergency response
pub const DEFAULT_EMERGENCY_KEYWORDS: &[&str] = &[
    "suicide",
    "self-harm",
    "chest pain",
    "difficulty breathing",
    "severe bleeding",
];

// =============================================================================
// Language Model Defaults
// =============================================================================

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4";
pub const DEFAULT_OPENAI_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_OPENAI_MAX_TOKENS: u32 = 1000;
pub const DEFAULT_PRESENCE_PENALTY: f32 = 0.1;
pub const DEFAULT_FREQUENCY_PENALTY: f32 = 0.1;
pub const DEFAULT_OPENAI_TIMEOUT_SECS: u64 = 60;

// =============================================================================
// Default Paths and Strings
// =============================================================================

/// Default configuration file path
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Default application name
pub const DEFAULT_APP_NAME: &str = "DocSphere AI Doctor";

/// Default SQLite database location
pub const DEFAULT_DATABASE_URL: &str = "sqlite://docsphere.db";

/// Default connection pool size
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default log filter when RUST_LOG is not set
pub const DEFAULT_LOG_FILTER: &str = "docsphere=debug,tower_http=info";

/// Default log format (text or json)
pub const DEFAULT_LOG_FORMAT: &str = "text";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSettings,
    /// HTTP server configuration
    pub http: HttpServerConfig,
    /// Language model provider settings
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "AppSettings::default_name")]
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    /// Version string, populated at runtime
    #[serde(skip_deserializing, default = "AppSettings::default_version")]
    pub version: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            debug: false,
            version: Self::default_version(),
        }
    }
}

impl AppSettings {
    fn default_name() -> String {
        DEFAULT_APP_NAME.to_string()
    }

    fn default_version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HttpServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Origins allowed to call the API from a browser. Empty allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain HTTP, for use behind a TLS-terminating proxy
    #[default]
    None,
    /// User-provided certificate and key files
    Manual,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub mode: TlsMode,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
}

/// Settings for the OpenAI-compatible chat completion endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    /// Usually supplied via OPENAI_API_KEY rather than the config file
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "OpenAiConfig::default_base_url")]
    pub base_url: String,
    #[serde(default = "OpenAiConfig::default_model")]
    pub model: String,
    #[serde(default = "OpenAiConfig::default_temperature")]
    pub temperature: f32,
    #[serde(default = "OpenAiConfig::default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "OpenAiConfig::default_presence_penalty")]
    pub presence_penalty: f32,
    #[serde(default = "OpenAiConfig::default_frequency_penalty")]
    pub frequency_penalty: f32,
    #[serde(default = "OpenAiConfig::default_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: Self::default_base_url(),
            model: Self::default_model(),
            temperature: Self::default_temperature(),
            max_tokens: Self::default_max_tokens(),
            presence_penalty: Self::default_presence_penalty(),
            frequency_penalty: Self::default_frequency_penalty(),
            request_timeout_seconds: Self::default_timeout(),
        }
    }
}

impl OpenAiConfig {
    fn default_base_url() -> String {
        DEFAULT_OPENAI_BASE_URL.to_string()
    }
    fn default_model() -> String {
        DEFAULT_OPENAI_MODEL.to_string()
    }
    fn default_temperature() -> f32 {
        DEFAULT_OPENAI_TEMPERATURE
    }
    fn default_max_tokens() -> u32 {
        DEFAULT_OPENAI_MAX_TOKENS
    }
    fn default_presence_penalty() -> f32 {
        DEFAULT_PRESENCE_PENALTY
    }
    fn default_frequency_penalty() -> f32 {
        DEFAULT_FREQUENCY_PENALTY
    }
    fn default_timeout() -> u64 {
        DEFAULT_OPENAI_TIMEOUT_SECS
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "DatabaseConfig::default_url")]
    pub url: String,
    #[serde(default = "DatabaseConfig::default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            max_connections: Self::default_max_connections(),
        }
    }
}

impl DatabaseConfig {
    fn default_url() -> String {
        DEFAULT_DATABASE_URL.to_string()
    }
    fn default_max_connections() -> u32 {
        DEFAULT_DATABASE_MAX_CONNECTIONS
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationConfig {
    /// Prior messages included in each prompt
    #[serde(default = "ConversationConfig::default_max_history")]
    pub max_history: usize,
    /// Inactivity (minutes) after which a conversation is ended
    #[serde(default = "ConversationConfig::default_timeout")]
    pub timeout_minutes: u64,
    #[serde(default = "ConversationConfig::default_sweep")]
    pub expiry_sweep_seconds: u64,
    #[serde(default = "ConversationConfig::default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_history: Self::default_max_history(),
            timeout_minutes: Self::default_timeout(),
            expiry_sweep_seconds: Self::default_sweep(),
            system_prompt: Self::default_system_prompt(),
        }
    }
}

impl ConversationConfig {
    fn default_max_history() -> usize {
        DEFAULT_MAX_HISTORY
    }
    fn default_timeout() -> u64 {
        DEFAULT_CONVERSATION_TIMEOUT_MINUTES
    }
    fn default_sweep() -> u64 {
        DEFAULT_EXPIRY_SWEEP_SECONDS
    }
    fn default_system_prompt() -> String {
        DEFAULT_SYSTEM_PROMPT.to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "SafetyConfig::default_enabled")]
    pub enable_content_filtering: bool,
    #[serde(default = "SafetyConfig::default_keywords")]
    pub emergency_keywords: Vec<String>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enable_content_filtering: Self::default_enabled(),
            emergency_keywords: Self::default_keywords(),
        }
    }
}

impl SafetyConfig {
    fn default_enabled() -> bool {
        true
    }
    fn default_keywords() -> Vec<String> {
        DEFAULT_EMERGENCY_KEYWORDS
            .iter()
            .map(|k| k.to_string())
            .collect()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "text" (human-readable, default) or "json" (structured)
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: DEFAULT_LOG_FORMAT.to_string(),
        }
    }
}

impl LoggingConfig {
    fn default_format() -> String {
        DEFAULT_LOG_FORMAT.to_string()
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load from a TOML file, then apply process environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // A missing .env is normal outside development
        let _ = dotenvy::dotenv();
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load from a TOML file with overrides from `lookup`, then validate.
    pub fn load_with<P, F>(path: P, lookup: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without touching the environment or validating.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("OPENAI_API_KEY") {
            self.openai.api_key = v;
        }
        if let Some(v) = lookup("OPENAI_MODEL") {
            self.openai.model = v;
        }
        if let Some(v) = lookup("OPENAI_BASE_URL") {
            self.openai.base_url = v;
        }
        if let Some(v) = lookup("OPENAI_TEMPERATURE") {
            self.openai.temperature = parse_override("OPENAI_TEMPERATURE", &v)?;
        }
        if let Some(v) = lookup("OPENAI_MAX_TOKENS") {
            self.openai.max_tokens = parse_override("OPENAI_MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("DATABASE_URL") {
            self.database.url = v;
        }
        if let Some(v) = lookup("MAX_CONVERSATION_HISTORY") {
            self.conversation.max_history = parse_override("MAX_CONVERSATION_HISTORY", &v)?;
        }
        if let Some(v) = lookup("CONVERSATION_TIMEOUT_MINUTES") {
            self.conversation.timeout_minutes =
                parse_override("CONVERSATION_TIMEOUT_MINUTES", &v)?;
        }
        if let Some(v) = lookup("MEDICAL_SYSTEM_PROMPT") {
            self.conversation.system_prompt = v;
        }
        if let Some(v) = lookup("ENABLE_CONTENT_FILTERING") {
            self.safety.enable_content_filtering = parse_flag("ENABLE_CONTENT_FILTERING", &v)?;
        }
        if let Some(v) = lookup("EMERGENCY_KEYWORDS") {
            self.safety.emergency_keywords = v
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
        if let Some(v) = lookup("DEBUG") {
            self.app.debug = parse_flag("DEBUG", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.openai.api_key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "OpenAI API key is missing. Set openai.api_key or OPENAI_API_KEY".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.openai.temperature) {
            return Err(ConfigError::Validation(format!(
                "openai.temperature must be between 0.0 and 2.0, got {}",
                self.openai.temperature
            )));
        }
        if self.openai.max_tokens == 0 {
            return Err(ConfigError::Validation(
                "openai.max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.conversation.max_history == 0 {
            return Err(ConfigError::Validation(
                "conversation.max_history must be greater than 0".to_string(),
            ));
        }
        if self.conversation.timeout_minutes == 0 {
            return Err(ConfigError::Validation(
                "conversation.timeout_minutes must be greater than 0".to_string(),
            ));
        }
        if self.http.tls.mode == TlsMode::Manual
            && (self.http.tls.cert_path.is_none() || self.http.tls.key_path.is_none())
        {
            return Err(ConfigError::Validation(
                "http.tls.mode = \"manual\" requires cert_path and key_path".to_string(),
            ));
        }
        if self.safety.enable_content_filtering && self.safety.emergency_keywords.is_empty() {
            return Err(ConfigError::Validation(
                "Content filtering is enabled but no emergency keywords are configured".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Validation(format!("Invalid value for {}: {:?}", key, value)))
}

/// Accepts the usual spellings of a boolean environment flag.
fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Validation(format!(
            "Invalid value for {}: {:?}",
            key, value
        ))),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Configuration error: {0}")]
    Validation(String),
}
