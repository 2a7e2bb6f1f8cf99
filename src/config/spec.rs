//! Configuration specification types for the reconciliation engine.
//!
//! This module defines the structs that map to the `convergent.yaml` file:
//! remote API settings, operation polling and retry bounds, verification
//! options, the journal location and the managed resources.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::remote::{DEFAULT_TIMEOUT_SECS, PollPolicy};
use crate::retry::RetryConfig;
use crate::state::{DesiredState, STATE_DIR};

/// Default environment variable holding the bearer token.
pub const DEFAULT_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Remote API settings.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Long-running operation polling.
    #[serde(default)]
    pub polling: PollingConfig,
    /// Backoff for transient errors.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Post-apply verification.
    #[serde(default)]
    pub verify: VerifyConfig,
    /// Journal location.
    #[serde(default)]
    pub state: StateConfig,
    /// Managed resources, in manifest order.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// Remote API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Backend implementation.
    #[serde(default)]
    pub backend: RemoteBackend,
    /// Base URL of the REST API (required for the HTTP backend).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the bearer token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Remote backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RemoteBackend {
    /// Google-style REST API over HTTPS.
    #[default]
    Http,
    /// Simulated in-process remote.
    Memory,
}

/// Long-running operation polling bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollingConfig {
    /// Delay between polls in milliseconds.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Maximum wait per operation in seconds.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

/// Post-apply verification settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VerifyConfig {
    /// Field paths whose differences are not reported as drift.
    #[serde(default)]
    pub ignore: Vec<String>,
}

/// Journal location.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Directory holding `journal.json`.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

/// A single managed resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Unique name within the manifest.
    pub name: String,
    /// Registered resource kind.
    pub kind: String,
    /// Desired-state document.
    #[serde(default = "empty_object")]
    pub desired: Value,
}

impl RemoteConfig {
    /// Returns the request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reads the bearer token from the configured variable, if set.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        std::env::var(&self.token_env).ok().filter(|t| !t.is_empty())
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: RemoteBackend::default(),
            base_url: None,
            token_env: default_token_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl PollingConfig {
    /// Converts to the executor's polling policy.
    #[must_use]
    pub const fn policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.interval_ms),
            Duration::from_secs(self.max_wait_secs),
        )
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

impl ResourceConfig {
    /// Converts the desired document into a [`DesiredState`].
    ///
    /// # Errors
    ///
    /// Returns a validation error if `desired` is not a mapping.
    pub fn desired_state(&self) -> Result<DesiredState> {
        DesiredState::try_from(self.desired.clone()).map_err(|message| {
            ConfigError::validation(message, format!("resources.{}.desired", self.name)).into()
        })
    }
}

impl EngineConfig {
    /// Finds a resource by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }
}

impl std::fmt::Display for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for RemoteBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::validation(
                format!("Unknown remote backend '{other}'"),
                "remote.backend",
            )),
        }
    }
}

fn default_token_env() -> String {
    DEFAULT_TOKEN_ENV.to_string()
}

const fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

const fn default_interval_ms() -> u64 {
    1000
}

const fn default_max_wait_secs() -> u64 {
    600
}

fn default_state_path() -> PathBuf {
    PathBuf::from(STATE_DIR)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
