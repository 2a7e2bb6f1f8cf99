//! Configuration validation for manifests.
//!
//! This module checks a parsed manifest before any remote call is made:
//! remote and polling settings, resource names, registered kinds, and that
//! each desired document matches its kind's schema and resolves to a
//! remote identifier.

use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::planner::DiffEngine;
use crate::retry::RetryConfig;
use crate::schema::SchemaRegistry;

use super::spec::{EngineConfig, PollingConfig, RemoteBackend, RemoteConfig, ResourceConfig};

/// Validator for manifests.
#[derive(Debug)]
pub struct ConfigValidator<'a> {
    /// Registry the resource kinds must be registered in.
    registry: &'a SchemaRegistry,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
    /// Resource names declared more than once.
    pub duplicates: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl<'a> ConfigValidator<'a> {
    /// Creates a validator checking kinds against `registry`.
    #[must_use]
    pub const fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validates a manifest.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateName` if a resource name repeats, otherwise a
    /// `ValidationError` for the first problem found.
    pub fn validate(&self, config: &EngineConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_remote(&config.remote, &mut result);
        Self::validate_polling(&config.polling, &mut result);
        Self::validate_retry(&config.retry, &mut result);
        Self::validate_ignore(&config.verify.ignore, &mut result);
        self.validate_resources(&config.resources, &mut result);

        if let Some(name) = result.duplicates.first() {
            return Err(ConfigError::DuplicateName {
                resource_type: String::from("resource"),
                name: name.clone(),
            }
            .into());
        }

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::validation(&first_error.message, &first_error.field).into());
        }

        debug!(
            resources = config.resources.len(),
            warnings = result.warnings.len(),
            "Configuration validation passed"
        );
        Ok(result)
    }

    fn validate_remote(remote: &RemoteConfig, result: &mut ValidationResult) {
        if remote.backend == RemoteBackend::Http {
            match remote.base_url.as_deref() {
                None | Some("") => result.error("remote.base_url", "Base URL is required for the http backend"),
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    result.error("remote.base_url", format!("Base URL '{url}' must start with http:// or https://"));
                }
                Some(_) => {}
            }

            if remote.token().is_none() {
                result.warnings.push(format!(
                    "{} is not set; requests will be sent without a bearer token",
                    remote.token_env
                ));
            }
        }

        if remote.timeout_secs == 0 {
            result.error("remote.timeout_secs", "Request timeout must be greater than zero");
        }
    }

    fn validate_polling(polling: &PollingConfig, result: &mut ValidationResult) {
        if polling.interval_ms == 0 {
            result.error("polling.interval_ms", "Poll interval must be greater than zero");
        }
        if polling.max_wait_secs == 0 {
            result.error("polling.max_wait_secs", "Maximum wait must be greater than zero");
        } else if polling.interval_ms > polling.max_wait_secs.saturating_mul(1000) {
            result.error("polling.interval_ms", "Poll interval exceeds the maximum wait");
        }
    }

    fn validate_retry(retry: &RetryConfig, result: &mut ValidationResult) {
        if retry.max_attempts == 0 {
            result.error("retry.max_attempts", "At least one attempt is required");
        }
        if retry.multiplier < 1.0 {
            result.error("retry.multiplier", "Backoff multiplier must be at least 1.0");
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            result.error("retry.initial_delay_ms", "Initial delay exceeds the maximum delay");
        }
    }

    fn validate_ignore(ignore: &[String], result: &mut ValidationResult) {
        for (i, path) in ignore.iter().enumerate() {
            if path.trim().is_empty() {
                result.error(format!("verify.ignore[{i}]"), "Ignored field path cannot be empty");
            }
        }
    }

    fn validate_resources(&self, resources: &[ResourceConfig], result: &mut ValidationResult) {
        if resources.is_empty() {
            result.warnings.push(String::from("No resources defined in configuration"));
            return;
        }

        let mut seen_names = HashSet::new();
        let mut seen_ids: HashMap<String, &str> = HashMap::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            if !seen_names.insert(resource.name.as_str()) {
                result.duplicates.push(resource.name.clone());
            }

            if !is_valid_name(&resource.name) {
                result.error(
                    format!("{prefix}.name"),
                    format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.name
                    ),
                );
            }

            let Ok(schema) = self.registry.lookup(&resource.kind) else {
                result.error(
                    format!("{prefix}.kind"),
                    format!("Unknown resource kind '{}'", resource.kind),
                );
                continue;
            };

            let desired = match resource.desired_state() {
                Ok(desired) => desired,
                Err(e) => {
                    result.error(format!("{prefix}.desired"), e.to_string());
                    continue;
                }
            };

            if let Err(e) = DiffEngine::validate(&schema, &desired.document) {
                result.error(format!("{prefix}.desired"), e.to_string());
                continue;
            }

            match schema.resolve_identity(&desired.document) {
                Ok(remote_id) => {
                    if let Some(other) = seen_ids.insert(remote_id.clone(), &resource.name) {
                        result.error(
                            format!("{prefix}.desired"),
                            format!("Resource '{}' targets {remote_id}, already managed by '{other}'", resource.name),
                        );
                    }
                }
                Err(e) => result.error(format!("{prefix}.desired"), e.to_string()),
            }
        }
    }
}

/// Validates a resource name (lowercase alphanumeric with hyphens).
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|first| first.is_ascii_lowercase()) {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.duplicates.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
