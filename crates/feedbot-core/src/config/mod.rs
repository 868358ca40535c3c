pub mod credentials;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

pub use credentials::{CredentialSource, ServiceAccountKey};

/// Root configuration for feedbot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct Config {
    pub bot: BotConfig,
    pub line: LineConfig,
    pub gemini: GeminiConfig,
    pub store: StoreConfig,
    pub gateway: GatewayConfig,
}

impl Config {
    /// Check that every setting needed to serve traffic is present.
    ///
    /// Called once at startup; a failure here means the process must not
    /// bind its listener.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.line.channel_secret.is_empty() {
            return Err(ConfigError::Missing("line.channelSecret (LINE_SECRET)"));
        }
        if self.line.channel_access_token.is_empty() {
            return Err(ConfigError::Missing("line.channelAccessToken (LINE_TOKEN)"));
        }
        if self.bot.mode == BotMode::Chat && self.gemini.api_key.is_empty() {
            return Err(ConfigError::Missing("gemini.apiKey (GEMINI_API_KEY)"));
        }
        if self.store.backend == StoreBackend::Firestore {
            self.firestore_project()?;
        }
        Ok(())
    }

    /// Load the service-account key and resolve the Firestore project id.
    pub fn firestore_project(&self) -> Result<(ServiceAccountKey, String), ConfigError> {
        let key = self.store.credentials.load()?;
        let project_id = self
            .store
            .project_id
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| key.project_id.clone());
        if project_id.is_empty() {
            return Err(ConfigError::Missing("store.projectId (FIRESTORE_PROJECT_ID)"));
        }
        Ok((key, project_id))
    }

    /// Directory used by the file document store.
    pub fn data_dir(&self) -> PathBuf {
        match self.store.data_dir.as_deref() {
            Some(path) if path.starts_with("~/") => dirs::home_dir()
                .map(|home| home.join(&path[2..]))
                .unwrap_or_else(|| PathBuf::from(path)),
            Some(path) => PathBuf::from(path),
            None => get_data_dir().join("documents"),
        }
    }
}

/// Which dialogue the bot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    /// Free chat with stored history and `/delete`.
    Chat,
    /// `/write` and `/read` course feedback.
    #[default]
    Course,
}

impl FromStr for BotMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "course" => Ok(Self::Course),
            other => Err(ConfigError::Invalid(format!("unknown bot mode: {other}"))),
        }
    }
}

impl std::fmt::Display for BotMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BotMode::Chat => write!(f, "chat"),
            BotMode::Course => write!(f, "course"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BotConfig {
    pub mode: BotMode,
    pub feedback_collection: String,
    pub history_collection: String,
    pub history_document: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            mode: BotMode::default(),
            feedback_collection: "feedbacks".to_string(),
            history_collection: "feedbacks".to_string(),
            history_document: "history".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[derive(Default)]
pub struct LineConfig {
    pub channel_secret: String,
    pub channel_access_token: String,
    pub allow_from: Vec<String>,
    /// Override for the messaging API host, e.g. a local mock.
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: "gemini-1.5-pro".to_string(),
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

/// Document store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Firestore,
    File,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "firestore" => Ok(Self::Firestore),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Invalid(format!("unknown store backend: {other}"))),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Firestore => write!(f, "firestore"),
            StoreBackend::File => write!(f, "file"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub project_id: Option<String>,
    pub database: String,
    pub credentials: CredentialSource,
    pub data_dir: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            project_id: None,
            database: "(default)".to_string(),
            credentials: CredentialSource::default(),
            data_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

// ====== Config loading ======

/// First non-empty value among the given env vars.
fn env_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|v| !v.trim().is_empty())
}

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `FEEDBOT_CONFIG` env var holding the full JSON config
/// 2. Config file (explicit path or `~/.feedbot/config.json`)
/// 3. Individual env vars, merged on top of the file
pub fn load_config_from_env(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    if let Ok(json) = std::env::var("FEEDBOT_CONFIG") {
        return Ok(serde_json::from_str::<Config>(&json)?);
    }

    let mut cfg = load_config(config_path)?;
    apply_env_overrides(&mut cfg)?;
    Ok(cfg)
}

fn apply_env_overrides(cfg: &mut Config) -> Result<(), ConfigError> {
    // LINE
    if let Some(v) = env_var(&["LINE_TOKEN", "LINE_CHANNEL_ACCESS_TOKEN"]) {
        cfg.line.channel_access_token = v;
    }
    if let Some(v) = env_var(&["LINE_SECRET", "LINE_CHANNEL_SECRET"]) {
        cfg.line.channel_secret = v;
    }
    if let Some(v) = env_var(&["LINE_ALLOW_FROM"]) {
        cfg.line.allow_from = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }

    // Gemini
    if let Some(v) = env_var(&["GEMINI_API_KEY", "GOOGLE_API_KEY"]) {
        cfg.gemini.api_key = v;
    }
    if let Some(v) = env_var(&["GEMINI_MODEL"]) {
        cfg.gemini.model = v;
    }

    // Bot + store
    if let Some(v) = env_var(&["FEEDBOT_MODE"]) {
        cfg.bot.mode = v.parse()?;
    }
    if let Some(v) = env_var(&["FEEDBOT_STORE"]) {
        cfg.store.backend = v.parse()?;
    }
    if let Some(v) = env_var(&["FIRESTORE_PROJECT_ID"]) {
        cfg.store.project_id = Some(v);
    }
    if let Some(v) = env_var(&["FIREBASE_KEY_PATH"]) {
        cfg.store.credentials = CredentialSource::LocalFile {
            path: PathBuf::from(v),
        };
    } else if env_var(&[credentials::DEFAULT_CREDENTIAL_VAR]).is_some() {
        cfg.store.credentials = CredentialSource::default();
    }

    Ok(())
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Get the feedbot data directory.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".feedbot")
}

/// Load configuration from file, or defaults when the default file is absent.
///
/// An explicitly given path must exist.
pub fn load_config(config_path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = match config_path {
        Some(p) if !p.exists() => return Err(ConfigError::NotFound(p.to_path_buf())),
        Some(p) => p.to_path_buf(),
        None => get_config_path(),
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::Invalid(format!("failed to read {}: {e}", path.display())))?;
    let config = serde_json::from_str::<Config>(&content)?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}
