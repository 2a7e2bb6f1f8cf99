//! Configuration module for the reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `convergent.yaml`
//! - Validation against the schema registry
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{CONFIG_ENV, ConfigParser, DEFAULT_CONFIG_FILES, find_config_file};
pub use spec::{
    DEFAULT_TOKEN_ENV, EngineConfig, PollingConfig, RemoteBackend, RemoteConfig, ResourceConfig,
    StateConfig, VerifyConfig,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
