use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Env var holding the service-account JSON when no other source is set.
pub const DEFAULT_CREDENTIAL_VAR: &str = "FIREBASE_KEY";

/// Key file looked up in the working directory by [`CredentialSource::FixedPath`].
pub const FIXED_CREDENTIAL_PATH: &str = "firebase_key.json";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Where the document-store service-account key comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum CredentialSource {
    /// Full key JSON stored in an environment variable.
    EnvJson {
        #[serde(default = "default_credential_var")]
        var: String,
    },
    /// Key file at a configured path.
    LocalFile { path: PathBuf },
    /// `firebase_key.json` next to the process.
    FixedPath,
}

fn default_credential_var() -> String {
    DEFAULT_CREDENTIAL_VAR.to_string()
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::EnvJson {
            var: default_credential_var(),
        }
    }
}

impl CredentialSource {
    /// Read and parse the service-account key.
    pub fn load(&self) -> Result<ServiceAccountKey, ConfigError> {
        match self {
            Self::EnvJson { var } => {
                let json = std::env::var(var)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .ok_or_else(|| {
                        ConfigError::Credentials(format!("environment variable {var} is not set"))
                    })?;
                ServiceAccountKey::from_json(&json)
            }
            Self::LocalFile { path } => ServiceAccountKey::from_file(path),
            Self::FixedPath => ServiceAccountKey::from_file(Path::new(FIXED_CREDENTIAL_PATH)),
        }
    }

    /// Human-readable description without secrets.
    pub fn describe(&self) -> String {
        match self {
            Self::EnvJson { var } => format!("env ${var}"),
            Self::LocalFile { path } => format!("file {}", path.display()),
            Self::FixedPath => format!("file ./{FIXED_CREDENTIAL_PATH}"),
        }
    }
}

/// Google service-account key, as downloaded from the cloud console.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub project_id: String,
    pub private_key: String,
    pub client_email: String,
    #[serde(default)]
    pub private_key_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let key: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::Credentials(format!("invalid service-account JSON: {e}")))?;
        if key.private_key.is_empty() || key.client_email.is_empty() {
            return Err(ConfigError::Credentials(
                "service-account key lacks private_key or client_email".to_string(),
            ));
        }
        Ok(key)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Credentials(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}
