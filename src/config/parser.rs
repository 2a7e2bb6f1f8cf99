//! Configuration parser for loading manifests.
//!
//! This module loads `convergent.yaml`, applies `CONVERGENT_*` environment
//! overrides and loads a `.env` file when present.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, ConvergentError, Result};

use super::spec::EngineConfig;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "CONVERGENT_CONFIG";

/// Configuration parser for loading manifests.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ConvergentError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<EngineConfig> {
        let config: EngineConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {}, column {}", l.line(), l.column()))
                .or_else(|| source.map(|p| p.display().to_string()));
            ConvergentError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(resources = config.resources.len(), "Parsed configuration");
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognised variables: `CONVERGENT_BASE_URL`, `CONVERGENT_BACKEND`
    /// and `CONVERGENT_STATE_PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an override
    /// has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<EngineConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies overrides looked up through `var`.
    fn apply_env_overrides(
        config: &mut EngineConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(base_url) = var("CONVERGENT_BASE_URL") {
            debug!("Overriding remote.base_url from environment");
            config.remote.base_url = Some(base_url);
        }

        if let Some(backend) = var("CONVERGENT_BACKEND") {
            debug!("Overriding remote.backend from environment");
            config.remote.backend = backend.parse()?;
        }

        if let Some(path) = var("CONVERGENT_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = PathBuf::from(path);
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!(path = %env_path.display(), "Loading environment");
            dotenvy::from_path(&env_path).map_err(|e| {
                ConvergentError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(path = %env_path.display(), ".env file not found");
        }

        Ok(())
    }

    /// Reads a required environment variable.
    ///
    /// # Errors
    ///
    /// Returns `MissingEnvVar` if the variable is not set.
    pub fn require_env(name: &str) -> Result<String> {
        std::env::var(name).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: name.to_string(),
            }
            .into()
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["convergent.yaml", "convergent.yml"];

/// Finds the configuration file in `start_dir` or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!(path = %config_path.display(), "Found configuration file");
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteBackend;
    use std::collections::HashMap;

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_yaml("resources: []\n", None).unwrap();

        assert_eq!(config.remote.backend, RemoteBackend::Http);
        assert_eq!(config.remote.token_env, "GOOGLE_OAUTH_ACCESS_TOKEN");
        assert_eq!(config.polling.interval_ms, 1000);
        assert_eq!(config.polling.max_wait_secs, 600);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.state.path, PathBuf::from(".convergent"));
        assert!(config.resources.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
remote:
  backend: http
  base_url: https://dataplex.googleapis.com
  timeout_secs: 10
polling:
  interval_ms: 250
  max_wait_secs: 60
retry:
  max_attempts: 3
verify:
  ignore: [labels, terraform_labels]
state:
  path: /tmp/convergent
resources:
  - name: full-quality
    kind: dataplex_datascan
    desired:
      project: my-project
      location: us-central1
      data_scan_id: dataquality-full
      data_quality_spec:
        sampling_percent: 5
        rules:
          - column: address
            dimension: VALIDITY
            threshold: 0.99
            non_null_expectation: {}
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();

        assert_eq!(config.remote.base_url.as_deref(), Some("https://dataplex.googleapis.com"));
        assert_eq!(config.polling.policy().interval, std::time::Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 200);
        assert_eq!(config.verify.ignore, vec!["labels", "terraform_labels"]);
        assert_eq!(config.resources.len(), 1);

        let desired = config.resources[0].desired_state().unwrap();
        assert_eq!(
            desired.get("data_quality_spec.rules").and_then(|r| r.as_array()).map(Vec::len),
            Some(1)
        );
    }

    #[test]
    fn test_parse_error_has_location() {
        let err = ConfigParser::new().parse_yaml("resources: [", None).unwrap_err();
        match err {
            ConvergentError::Config(ConfigError::ParseError { location, .. }) => assert!(location.is_some()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml("resources: []\n", None).unwrap();
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CONVERGENT_BASE_URL", "http://localhost:8080"),
            ("CONVERGENT_BACKEND", "memory"),
            ("CONVERGENT_STATE_PATH", "/var/lib/convergent"),
        ]);

        ConfigParser::apply_env_overrides(&mut config, |name| vars.get(name).map(ToString::to_string)).unwrap();

        assert_eq!(config.remote.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.remote.backend, RemoteBackend::Memory);
        assert_eq!(config.state.path, PathBuf::from("/var/lib/convergent"));
    }

    #[test]
    fn test_invalid_backend_override() {
        let mut config = ConfigParser::new().parse_yaml("resources: []\n", None).unwrap();
        let result = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == "CONVERGENT_BACKEND").then(|| String::from("grpc"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let temp = tempfile::TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("convergent.yaml"), "resources: []\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("convergent.yaml"));
    }

    #[test]
    fn test_load_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = ConfigParser::new().load_file(temp.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConvergentError::Config(ConfigError::FileNotFound { .. })));
    }
}
