//! Configuration hashing for change detection.
//!
//! Hashes are computed over canonical JSON (object keys sorted at every
//! level), so key order in the manifest never changes a fingerprint.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::state::Document;

use super::spec::{EngineConfig, ResourceConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash over every resource of the manifest.
    ///
    /// Remote, polling and journal settings do not contribute.
    #[must_use]
    pub fn hash_config(&self, config: &EngineConfig) -> String {
        let mut hasher = Sha256::new();
        for resource in &config.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource entry.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(resource.kind.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical(&resource.desired).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of a desired-state document.
    #[must_use]
    pub fn hash_document(&self, document: &Document) -> String {
        let mut hasher = Sha256::new();
        hasher.update(canonical(&document.to_value()).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Rebuilds `value` with object keys inserted in sorted order and `null`
/// members dropped.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                let member = &map[key];
                if !member.is_null() {
                    sorted.insert(key.clone(), canonical(member));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}
