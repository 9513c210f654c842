use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::{ChatId, UserId};

use crate::agent::sweeper::parse_schedule;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid cron expression for the session sweep.
    InvalidCron { expr: String, reason: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidCron { expr, reason } => {
                write!(f, "invalid sweep_schedule '{}': {}", expr, reason)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidCron { .. } | Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// API key for the OpenAI-compatible LLM endpoint
    #[serde(default)]
    llm_api_key: String,
    #[serde(default = "default_llm_base_url")]
    llm_base_url: String,
    #[serde(default = "default_llm_model")]
    llm_model: String,
    /// Users allowed to talk to the bot (empty = everyone)
    #[serde(default)]
    allowed_users: Vec<u64>,
    log_chat_id: Option<i64>,
    /// Directory for state files (logs). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_session_max_age_hours")]
    session_max_age_hours: u64,
    #[serde(default = "default_sweep_schedule")]
    sweep_schedule: String,
    /// Per-message agent timeout in seconds (0 = no timeout).
    #[serde(default = "default_agent_timeout_secs")]
    agent_timeout_secs: u64,
    http_api: Option<HttpApiFile>,
}

#[derive(Deserialize)]
struct HttpApiFile {
    #[serde(default = "default_http_bind")]
    bind: String,
    #[serde(default = "default_http_port")]
    port: u16,
    /// Bearer token required on `/api/v1` routes.
    token: Option<String>,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_session_max_age_hours() -> u64 {
    24
}

fn default_sweep_schedule() -> String {
    "0 */10 * * * *".to_string()
}

fn default_agent_timeout_secs() -> u64 {
    120
}

fn default_http_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8000
}

/// Where the HTTP API listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpApiConfig {
    pub bind: String,
    pub port: u16,
    pub token: Option<String>,
}

pub struct Config {
    pub telegram_bot_token: String,
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,
    pub allowed_users: HashSet<UserId>,
    pub log_chat_id: Option<ChatId>,
    /// Directory for state files (logs).
    pub data_dir: PathBuf,
    /// Sessions idle this long are evicted by the sweeper.
    pub session_max_age: Duration,
    /// Cron expression driving the sweeper.
    pub sweep_schedule: String,
    pub agent_timeout: Option<Duration>,
    pub http_api: Option<HttpApiConfig>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.session_max_age_hours == 0 {
            return Err(ConfigError::Validation("session_max_age_hours must be greater than 0".into()));
        }
        if let Some(ref api) = file.http_api
            && api.port == 0
        {
            return Err(ConfigError::Validation("http_api.port must be non-zero".into()));
        }
        parse_schedule(&file.sweep_schedule).map_err(|reason| ConfigError::InvalidCron {
            expr: file.sweep_schedule.clone(),
            reason,
        })?;

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            llm_api_key: file.llm_api_key,
            llm_base_url: file.llm_base_url,
            llm_model: file.llm_model,
            allowed_users: file.allowed_users.into_iter().map(UserId).collect(),
            log_chat_id: file.log_chat_id.map(ChatId),
            data_dir,
            session_max_age: Duration::from_secs(file.session_max_age_hours * 3600),
            sweep_schedule: file.sweep_schedule,
            agent_timeout: (file.agent_timeout_secs > 0)
                .then(|| Duration::from_secs(file.agent_timeout_secs)),
            http_api: file.http_api.map(|api| HttpApiConfig {
                bind: api.bind,
                port: api.port,
                token: api.token.filter(|t| !t.trim().is_empty()),
            }),
        })
    }

    /// Everyone is allowed when no allow-list is configured.
    pub fn is_allowed(&self, user_id: UserId) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert_eq!(config.llm_base_url, "https://api.openai.com/v1");
        assert_eq!(config.llm_model, "gpt-4o-mini");
        assert_eq!(config.session_max_age, Duration::from_secs(24 * 3600));
        assert_eq!(config.sweep_schedule, "0 */10 * * * *");
        assert_eq!(config.agent_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert!(config.http_api.is_none());
        assert!(config.is_allowed(UserId(42)));
    }

    #[test]
    fn test_full_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "llm_api_key": "sk-test",
            "llm_model": "gpt-4o",
            "allowed_users": [1, 2],
            "log_chat_id": -100123,
            "data_dir": "/var/lib/botify",
            "session_max_age_hours": 2,
            "sweep_schedule": "0 0 * * * *",
            "agent_timeout_secs": 0,
            "http_api": { "port": 9000 }
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.llm_api_key, "sk-test");
        assert_eq!(config.session_max_age, Duration::from_secs(7200));
        assert_eq!(config.agent_timeout, None);
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
        assert_eq!(
            config.http_api,
            Some(HttpApiConfig { bind: "127.0.0.1".to_string(), port: 9000, token: None })
        );
        assert!(config.is_allowed(UserId(2)));
        assert!(!config.is_allowed(UserId(3)));
    }

    #[test]
    fn test_http_api_token() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "http_api": { "bind": "0.0.0.0", "token": "s3cret" }
        }"#);
        let api = Config::load(file.path()).unwrap().http_api.unwrap();
        assert_eq!(api.bind, "0.0.0.0");
        assert_eq!(api.port, 8000);
        assert_eq!(api.token.as_deref(), Some("s3cret"));

        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "http_api": { "token": "  " }
        }"#);
        assert_eq!(Config::load(file.path()).unwrap().http_api.unwrap().token, None);
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{ "telegram_bot_token": "" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format_no_colon() {
        let file = write_config(r#"{ "telegram_bot_token": "invalid_token_no_colon" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("invalid"));
    }

    #[test]
    fn test_invalid_token_format_non_numeric_id() {
        let file = write_config(r#"{ "telegram_bot_token": "notanumber:ABCdef" }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_zero_max_age_rejected() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "session_max_age_hours": 0
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("session_max_age_hours"));
    }

    #[test]
    fn test_invalid_cron() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdef",
            "sweep_schedule": "every so often"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidCron { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
