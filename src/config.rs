//! Configuration loading, validation, and wiring.
//!
//! Loads `~/.calarm/config.toml` (or an explicit path) with environment
//! variable overrides, validates it, and turns it into the runtime pieces
//! the service needs: an [`ExecCtx`], an [`ExtractionPipeline`] and a
//! [`CalendarPublisher`].

use crate::backend::{Backend, BackoffConfig, LlmConfig, MockBackend, OllamaBackend, OpenAiBackend};
use crate::calendar::{CalendarPublisher, GoogleCalendarPublisher, NoopPublisher, GOOGLE_CALENDAR_BASE_URL};
use crate::exec_ctx::ExecCtx;
use crate::extraction::{ExtractionPipeline, DEFAULT_MAX_ATTEMPTS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Generator backends selectable from configuration.
pub const BACKENDS: [&str; 3] = ["openai", "ollama", "mock"];

/// The root configuration structure.
///
/// Maps directly to `~/.calarm/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Retries allowed after the first generator call.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default)]
    pub generator: GeneratorConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("max_attempts", &self.max_attempts)
            .field("generator", &self.generator)
            .field("server", &self.server)
            .field("calendar", &self.calendar)
            .finish()
    }
}

/// `[generator]`: which model to call and how.
#[derive(Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// `openai`, `ollama` or `mock`.
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Sent as `OpenAI-Organization` by the `openai` backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,

    #[serde(default)]
    pub temperature: f64,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Upper bound on one generator call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Transport retry preset: `none`, `standard` or `interactive`.
    #[serde(default = "default_backoff")]
    pub backoff: String,

    #[serde(default = "default_true")]
    pub require_sentinel: bool,

    /// Extra `[generator.options]` table merged into Ollama's `options`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,

    /// Canned candidates for the `mock` backend, replayed in a cycle.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mock_responses: Vec<String>,
}

fn default_backend() -> String {
    "openai".into()
}
fn default_base_url() -> String {
    "https://api.openai.com".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_backoff() -> String {
    "interactive".into()
}
fn default_true() -> bool {
    true
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            organization: None,
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            backoff: default_backoff(),
            require_sentinel: true,
            options: None,
            mock_responses: Vec::new(),
        }
    }
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("organization", &self.organization)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .field("backoff", &self.backoff)
            .field("require_sentinel", &self.require_sentinel)
            .field("options", &self.options)
            .field("mock_responses", &self.mock_responses.len())
            .finish()
    }
}

/// `[server]`: HTTP bind address and CORS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Origins allowed by CORS.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}
fn default_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_origins(),
        }
    }
}

/// `[calendar]`: Google Calendar publishing.
#[derive(Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// Publish successful readouts. Off by default.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,

    #[serde(default = "default_calendar_base_url")]
    pub base_url: String,

    /// OAuth bearer token with the calendar scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

fn default_calendar_id() -> String {
    "primary".into()
}
fn default_calendar_base_url() -> String {
    GOOGLE_CALENDAR_BASE_URL.into()
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            calendar_id: default_calendar_id(),
            base_url: default_calendar_base_url(),
            access_token: None,
        }
    }
}

impl std::fmt::Debug for CalendarConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarConfig")
            .field("enabled", &self.enabled)
            .field("calendar_id", &self.calendar_id)
            .field("base_url", &self.base_url)
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            generator: GeneratorConfig::default(),
            server: ServerConfig::default(),
            calendar: CalendarConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from `path` (or `~/.calarm/config.toml`), then apply
    /// environment overrides and validate.
    ///
    /// Environment variables:
    /// - `CALARM_API_KEY`, then `OPENAI_API_KEY`: generator key, if the file has none
    /// - `CALARM_MODEL`: generator model
    /// - `CALARM_MAX_ATTEMPTS`: retry budget
    /// - `CALARM_CALENDAR_TOKEN`: calendar bearer token
    /// - `CALARM_ORIGINS` (or `ORIGINS`): comma-separated CORS origins
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::config_dir().join("config.toml"));
        let mut config = Self::read_file(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without environment
    /// overrides. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from `lookup` (normally the process environment).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if self.generator.api_key.is_none() {
            self.generator.api_key = lookup("CALARM_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(model) = lookup("CALARM_MODEL") {
            self.generator.model = model;
        }
        if let Some(raw) = lookup("CALARM_MAX_ATTEMPTS") {
            self.max_attempts = raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "CALARM_MAX_ATTEMPTS must be a positive integer, got `{}`",
                    raw
                ))
            })?;
        }
        if let Some(token) = lookup("CALARM_CALENDAR_TOKEN") {
            self.calendar.access_token = Some(token);
        }
        if let Some(origins) = lookup("CALARM_ORIGINS").or_else(|| lookup("ORIGINS")) {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(String::from)
                .collect();
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".calarm")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_attempts must be at least 1".into(),
            ));
        }

        let generator = &self.generator;
        if !(0.0..=2.0).contains(&generator.temperature) {
            return Err(ConfigError::ValidationError(
                "generator.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if !BACKENDS.contains(&generator.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "generator.backend `{}` is not one of {}",
                generator.backend,
                BACKENDS.join(", ")
            )));
        }
        if generator.backend == "mock" && generator.mock_responses.is_empty() {
            return Err(ConfigError::ValidationError(
                "generator.mock_responses must not be empty for the mock backend".into(),
            ));
        }
        if BackoffConfig::from_preset(&generator.backoff).is_none() {
            return Err(ConfigError::ValidationError(format!(
                "generator.backoff `{}` is not one of none, standard, interactive",
                generator.backoff
            )));
        }
        if generator.options.as_ref().is_some_and(|o| !o.is_object()) {
            return Err(ConfigError::ValidationError(
                "generator.options must be a table".into(),
            ));
        }
        if generator.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "generator.timeout_secs must be greater than 0".into(),
            ));
        }

        if self.calendar.enabled && self.calendar.access_token.is_none() {
            return Err(ConfigError::ValidationError(
                "calendar.access_token (or CALARM_CALENDAR_TOKEN) is required when calendar.enabled"
                    .into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }

    /// The generator backend selected by `generator.backend`.
    pub fn build_backend(&self) -> Arc<dyn Backend> {
        match self.generator.backend.as_str() {
            "ollama" => Arc::new(OllamaBackend),
            "mock" => Arc::new(MockBackend::new(self.generator.mock_responses.clone())),
            _ => Arc::new(self.build_openai()),
        }
    }

    fn build_openai(&self) -> OpenAiBackend {
        let mut backend = OpenAiBackend::new();
        if let Some(ref key) = self.generator.api_key {
            backend = backend.with_api_key(key.clone());
        }
        if let Some(ref org) = self.generator.organization {
            backend = backend.with_organization(org.clone());
        }
        backend
    }

    /// Shared execution context for the service.
    pub fn build_exec_ctx(&self) -> ExecCtx {
        ExecCtx::builder(self.generator.base_url.clone())
            .backend(self.build_backend())
            .backoff(BackoffConfig::from_preset(&self.generator.backoff).unwrap_or_default())
            .timeout(Duration::from_secs(self.generator.timeout_secs))
            .build()
    }

    /// The extraction pipeline described by this configuration.
    pub fn build_pipeline(&self) -> crate::error::Result<ExtractionPipeline> {
        let mut llm = LlmConfig::default()
            .with_temperature(self.generator.temperature)
            .with_max_tokens(self.generator.max_tokens);
        if let Some(ref options) = self.generator.options {
            llm = llm.with_options(options.clone());
        }
        Ok(ExtractionPipeline::new(self.max_attempts)?
            .with_model(self.generator.model.clone())
            .with_config(llm)
            .require_sentinel(self.generator.require_sentinel))
    }

    /// The calendar publisher: Google when enabled, otherwise a no-op.
    pub fn build_publisher(&self, client: reqwest::Client) -> Arc<dyn CalendarPublisher> {
        match (self.calendar.enabled, &self.calendar.access_token) {
            (true, Some(token)) => Arc::new(
                GoogleCalendarPublisher::new(client, self.calendar.calendar_id.clone(), token.clone())
                    .with_base_url(self.calendar.base_url.clone()),
            ),
            _ => Arc::new(NoopPublisher),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.generator.backend, "openai");
        assert_eq!(config.generator.temperature, 0.0);
        assert_eq!(config.calendar.calendar_id, "primary");
        assert!(!config.calendar.enabled);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn config_file_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
max_attempts = 4

[generator]
backend = "ollama"
base_url = "http://localhost:11434"
model = "llama3.2"
backoff = "none"

[server]
port = 9000
allowed_origins = ["https://calarm.example"]
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.max_attempts, 4);
        assert_eq!(config.generator.backend, "ollama");
        assert_eq!(config.generator.max_tokens, 1024);
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.allowed_origins, vec!["https://calarm.example"]);
        assert_eq!(config.build_backend().name(), "ollama");
    }

    #[test]
    fn unparseable_file_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_attempts = \"many\"").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = AppConfig {
            max_attempts: 0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_generator_settings_rejected() {
        let mut config = AppConfig::default();
        config.generator.temperature = 5.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.generator.backend = "bard".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.generator.backoff = "aggressive".into();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.generator.backend = "mock".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn calendar_requires_token_when_enabled() {
        let mut config = AppConfig::default();
        config.calendar.enabled = true;
        assert!(config.validate().is_err());
        config.calendar.access_token = Some("tok".into());
        assert!(config.validate().is_ok());
        assert_eq!(config.build_publisher(reqwest::Client::new()).name(), "google");
    }

    #[test]
    fn env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("OPENAI_API_KEY", "sk-env"),
                ("CALARM_MODEL", "gpt-4o"),
                ("CALARM_MAX_ATTEMPTS", "3"),
                ("CALARM_CALENDAR_TOKEN", "ya29"),
                ("ORIGINS", "https://a.example, https://b.example,"),
            ]))
            .unwrap();
        assert_eq!(config.generator.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.generator.model, "gpt-4o");
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.calendar.access_token.as_deref(), Some("ya29"));
        assert_eq!(
            config.server.allowed_origins,
            vec!["https://a.example", "https://b.example"]
        );
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig::default();
        config.generator.api_key = Some("sk-file".into());
        config
            .apply_env(env(&[("CALARM_API_KEY", "sk-env")]))
            .unwrap();
        assert_eq!(config.generator.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn bad_env_attempts_rejected() {
        let mut config = AppConfig::default();
        assert!(config.apply_env(env(&[("CALARM_MAX_ATTEMPTS", "lots")])).is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.generator.api_key = Some("sk-very-secret".into());
        config.calendar.access_token = Some("ya29.secret".into());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("ya29"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_roundtrip() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.max_attempts, 10);
        assert_eq!(parsed.server.port, 8000);
    }

    #[test]
    fn builds_runtime_pieces() {
        let mut config = AppConfig::default();
        config.max_attempts = 2;
        config.generator.backend = "mock".into();
        config.generator.mock_responses = vec!["{}".into()];
        let ctx = config.build_exec_ctx();
        assert_eq!(ctx.backend.name(), "mock");
        assert_eq!(ctx.backoff.max_retries, 2);
        assert_eq!(ctx.timeout, Duration::from_secs(60));
        assert_eq!(config.build_pipeline().unwrap().max_attempts(), 2);
        assert_eq!(config.build_publisher(reqwest::Client::new()).name(), "noop");
    }

    #[test]
    fn generator_extras_are_wired() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[generator]
backend = "openai"
api_key = "sk-file-key"
organization = "org-calarm"

[generator.options]
top_p = 0.9
num_ctx = 4096
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert!(format!("{:?}", config.build_openai()).contains("org-calarm"));

        let pipeline = config.build_pipeline().unwrap();
        let options = pipeline.config().options.as_ref().unwrap();
        assert_eq!(options["top_p"], 0.9);
        assert_eq!(options["num_ctx"], 4096);
    }

    #[test]
    fn non_table_options_rejected() {
        let mut config = AppConfig::default();
        config.generator.options = Some(serde_json::json!([1, 2]));
        assert!(matches!(config.validate(), Err(ConfigError::ValidationError(_))));
    }
}
