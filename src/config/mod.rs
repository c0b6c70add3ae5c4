//! Config Module - Configuration management

use std::path::Path;
use serde::{Serialize, Deserialize};

use crate::assistant::catalog::TableSchema;
use crate::assistant::validator::ParamStyle;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Main configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub assistant: AssistantConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_ms: u64,
    /// Requests per client IP per minute.
    pub rate_limit_per_minute: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_ms: 60_000,
            rate_limit_per_minute: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://smartsql.db?mode=rwc".to_string(),
            max_connections: 8,
        }
    }
}

/// Sampling options for one kind of completion call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Vec<String>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self { temperature: 0.0, max_tokens: 300, stop: Vec::new() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai", "claude" or "ollama".
    pub provider: String,
    pub model: String,
    /// May be written as `${OPENAI_API_KEY}`.
    pub api_key: Option<String>,
    pub base_url: String,
    /// SQL generation call.
    pub generation: SamplingConfig,
    /// Result summarization call.
    pub summary: SamplingConfig,
    /// Direct answers in "general" mode.
    pub general: SamplingConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key: Some("${OPENAI_API_KEY}".to_string()),
            base_url: "https://api.openai.com/v1".to_string(),
            generation: SamplingConfig { temperature: 0.0, max_tokens: 300, stop: Vec::new() },
            summary: SamplingConfig { temperature: 0.3, max_tokens: 500, stop: Vec::new() },
            general: SamplingConfig { temperature: 0.7, max_tokens: 1500, stop: Vec::new() },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub placeholder_style: ParamStyle,
    pub require_scope_placeholder: bool,
    pub enforce_row_ownership: bool,
    /// Whether callers may ask for `thought_process` in replies.
    pub allow_debug: bool,
    pub summary_preview_rows: usize,
    pub debug_preview_rows: usize,
    pub denied_columns: Vec<String>,
    pub denied_keywords: Vec<String>,
    /// Tables the generator may use; the built-in SmartSQL catalog when empty.
    pub schema_catalog: Vec<TableSchema>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            placeholder_style: ParamStyle::Qmark,
            require_scope_placeholder: false,
            enforce_row_ownership: true,
            allow_debug: true,
            summary_preview_rows: 20,
            debug_preview_rows: 5,
            denied_columns: crate::assistant::validator::DEFAULT_DENIED_COLUMNS
                .iter().map(|s| s.to_string()).collect(),
            denied_keywords: crate::assistant::validator::DEFAULT_DENIED_KEYWORDS
                .iter().map(|s| s.to_string()).collect(),
            schema_catalog: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// May be written as `${JWT_SECRET}`.
    pub jwt_secret: String,
    pub token_ttl_hours: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "${JWT_SECRET}".to_string(),
            token_ttl_hours: 24,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. "info" or "smartsql=debug,sqlx=warn".
    pub level: String,
    /// "compact" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "compact".to_string() }
    }
}

/// Resolve a `${ENV_VAR}` placeholder; other strings pass through unchanged.
pub fn resolve_env(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

impl Config {
    /// Parse a config file, choosing the format by extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content, path)?;
        config.resolve_env();
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(toml::from_str(content)?),
            Some("json") => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Replace `${VAR}` references in secret-bearing fields.
    pub fn resolve_env(&mut self) {
        self.llm.api_key = self.llm.api_key.as_deref().map(resolve_env);
        self.auth.jwt_secret = resolve_env(&self.auth.jwt_secret);
        self.database.url = resolve_env(&self.database.url);
    }

    /// Validate config
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("Invalid server port".to_string());
        }
        if self.database.url.is_empty() {
            errors.push("database.url must be set".to_string());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be > 0".to_string());
        }
        if self.auth.jwt_secret.is_empty() {
            errors.push("auth.jwt_secret must be set (or JWT_SECRET exported)".to_string());
        }
        if self.assistant.summary_preview_rows == 0 {
            errors.push("assistant.summary_preview_rows must be > 0".to_string());
        }
        if self.database.url.starts_with("sqlite") && self.assistant.placeholder_style == ParamStyle::Format {
            errors.push("assistant.placeholder_style 'format' is not understood by SQLite, use qmark or numeric".to_string());
        }
        if !matches!(self.logging.format.as_str(), "compact" | "json") {
            errors.push(format!("logging.format '{}' must be compact or json", self.logging.format));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
