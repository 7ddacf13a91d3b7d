//! Server configuration loading from file and environment variables.

use parley_voice::{CompletionConfig, OpenAiConfig, SynthesisConfig, TranscriptionConfig};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Shared credentials for the OpenAI-compatible bindings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub synthesis: SynthesisConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    /// Conversation history and expiry.
    #[serde(default)]
    pub session: SessionConfig,

    /// Upload limits and synthesized audio storage.
    #[serde(default)]
    pub audio: AudioConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Session behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Number of most recent messages handed to the conversational model.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Minutes without activity before a session is marked inactive.
    /// Zero disables expiry.
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Audio upload and storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    /// Largest accepted audio upload, in MiB.
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: usize,

    /// Directory where synthesized replies are written and served from.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: String,
}

impl AudioConfig {
    pub fn max_bytes(&self) -> usize {
        self.max_size_mb.saturating_mul(1024 * 1024)
    }
}

impl SessionConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:3000".to_string(),
        "http://localhost:8080".to_string(),
    ]
}

fn default_db_path() -> String {
    "parley.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_history_window() -> usize {
    10
}

fn default_timeout_minutes() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_size_mb() -> usize {
    25
}

fn default_storage_dir() -> String {
    "audio".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            timeout_minutes: default_timeout_minutes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            max_size_mb: default_max_size_mb(),
            storage_dir: default_storage_dir(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_DB_PATH` overrides `database.path`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_OPENAI_API_KEY` (else `OPENAI_API_KEY`) overrides `openai.api_key`
/// - `PARLEY_OPENAI_BASE_URL` overrides `openai.base_url`
/// - `PARLEY_AUDIO_DIR` overrides `audio.storage_dir`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(db_path) = var("PARLEY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(level) = var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(key) = var("PARLEY_OPENAI_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
        if !key.trim().is_empty() {
            config.openai.api_key = Some(key);
        }
    }
    if let Some(url) = var("PARLEY_OPENAI_BASE_URL") {
        config.openai.base_url = url;
    }
    if let Some(dir) = var("PARLEY_AUDIO_DIR") {
        config.audio.storage_dir = dir;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_voice::ProviderKind;
    use std::collections::HashMap;

    #[test]
    fn defaults_without_file() {
        let config = load_config(Some("/nonexistent/parley.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.session.history_window, 10);
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.audio.max_bytes(), 25 * 1024 * 1024);
        assert_eq!(config.synthesis.max_retries, 1);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9100

            [session]
            history_window = 4

            [transcription]
            provider = "local"
            whisper_model = "/models/ggml-small.bin"
            "#,
        )
        .unwrap();

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, default_host());
        assert_eq!(config.session.history_window, 4);
        assert_eq!(config.session.timeout_minutes, 30);
        assert_eq!(config.transcription.provider, ProviderKind::Local);
        assert_eq!(config.transcription.whisper_model, "/models/ggml-small.bin");
        assert_eq!(config.completion.provider, ProviderKind::OpenAi);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(
            load_config(path.to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("PARLEY_PORT", "9200"),
            ("PARLEY_HOST", "0.0.0.0"),
            ("PARLEY_LOG_JSON", "1"),
            ("PARLEY_OPENAI_API_KEY", "sk-env"),
            ("PARLEY_AUDIO_DIR", "/var/lib/parley/audio"),
            ("PARLEY_DB_PATH", ":memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.port, 9200);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert!(config.logging.json);
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.audio.storage_dir, "/var/lib/parley/audio");
        assert_eq!(config.database.path, ":memory:");
    }

    #[test]
    fn standard_openai_key_variable_is_a_fallback() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| (k == "OPENAI_API_KEY").then(|| "sk-std".to_string()));
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-std"));

        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| match k {
            "OPENAI_API_KEY" => Some("sk-std".to_string()),
            "PARLEY_OPENAI_API_KEY" => Some("sk-parley".to_string()),
            _ => None,
        });
        assert_eq!(config.openai.api_key.as_deref(), Some("sk-parley"));
    }

    #[test]
    fn bad_port_override_is_ignored() {
        let mut config = Config::default();
        apply_env_overrides(&mut config, |k| (k == "PARLEY_PORT").then(|| "not-a-port".to_string()));
        assert_eq!(config.server.port, 8000);
    }
}
