//! Configuration (layered: defaults > TOML file > environment).

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use crate::stream::approval::ApprovalPolicy;
use crate::tools::ToolSettings;

pub const DEFAULT_MODEL: &str = "gpt-4.1";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONFIG_FILE: &str = "config.toml";

/// Settings read once per stream start and never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub model: String,
    pub base_url: String,
    pub approval_policy: ApprovalPolicy,
    /// Whole-request deadline enforced by the HTTP transport.
    pub request_timeout_secs: Option<u64>,
    pub tools: ToolSettings,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            approval_policy: ApprovalPolicy::default(),
            request_timeout_secs: None,
            tools: ToolSettings::default(),
        }
    }
}

impl StreamConfig {
    /// Load from the default file location and the process environment.
    pub fn load() -> Result<Self, StreamError> {
        Self::load_from(Self::default_path().as_deref())
    }

    /// Load from `path` (missing file means defaults), then apply the
    /// environment, including a `.env` file if present.
    pub fn load_from(path: Option<&Path>) -> Result<Self, StreamError> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a TOML file. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, StreamError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(StreamError::Io(err)),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, StreamError> {
        toml::from_str(raw)
            .map_err(|e| StreamError::Configuration(format!("invalid config file: {e}")))
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), StreamError> {
        if let Some(model) = lookup("OPENAI_MODEL").filter(|v| !v.is_empty()) {
            self.model = model;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL").filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(policy) = lookup("OPENRESPONSES_APPROVAL_POLICY") {
            self.approval_policy = policy.trim().to_ascii_lowercase().parse().map_err(|_| {
                StreamError::Configuration(format!(
                    "OPENRESPONSES_APPROVAL_POLICY must be never, ask or always (got {policy})"
                ))
            })?;
        }
        if let Some(timeout) = lookup("OPENRESPONSES_TIMEOUT_SECS") {
            let secs = timeout.trim().parse::<u64>().map_err(|_| {
                StreamError::Configuration(format!(
                    "OPENRESPONSES_TIMEOUT_SECS must be a whole number of seconds (got {timeout})"
                ))
            })?;
            self.request_timeout_secs = Some(secs);
        }
        Ok(())
    }

    /// `~/.openresponses/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(".openresponses").join(CONFIG_FILE))
    }
}

/// Supplies the API key for outgoing requests.
pub trait CredentialSource: Send + Sync {
    fn api_key(&self) -> Result<String, StreamError>;
}

/// Reads the key from an environment variable at request time.
#[derive(Debug, Clone)]
pub struct EnvCredentials {
    var: String,
}

impl EnvCredentials {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvCredentials {
    fn default() -> Self {
        Self::new("OPENAI_API_KEY")
    }
}

impl CredentialSource for EnvCredentials {
    fn api_key(&self) -> Result<String, StreamError> {
        match std::env::var(&self.var) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(StreamError::Authentication(format!(
                "Environment variable {} not set",
                self.var
            ))),
        }
    }
}

/// A fixed key supplied by the caller.
#[derive(Clone)]
pub struct StaticCredentials(String);

impl StaticCredentials {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StaticCredentials(..)")
    }
}

impl CredentialSource for StaticCredentials {
    fn api_key(&self) -> Result<String, StreamError> {
        if self.0.is_empty() {
            return Err(StreamError::Authentication("empty API key".into()));
        }
        Ok(self.0.clone())
    }
}

/// Raw frame and body dumps are gated behind `OPENRESPONSES_DEBUG`.
pub fn debug_enabled() -> bool {
    matches!(
        std::env::var("OPENRESPONSES_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE")
    )
}
