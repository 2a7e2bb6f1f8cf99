//! Journal store trait definition.
//!
//! This module defines the common interface for journal storage backends.

use async_trait::async_trait;

use crate::error::Result;

use super::types::Journal;

/// Trait for journal storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the journal.
    ///
    /// Returns `None` if no journal exists yet.
    async fn load(&self) -> Result<Option<Journal>>;

    /// Saves the journal.
    async fn save(&self, journal: &Journal) -> Result<()>;

    /// Deletes the journal.
    async fn delete(&self) -> Result<()>;

    /// Checks if a journal exists.
    async fn exists(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<Option<Journal>> {
        (**self).load().await
    }

    async fn save(&self, journal: &Journal) -> Result<()> {
        (**self).save(journal).await
    }

    async fn delete(&self) -> Result<()> {
        (**self).delete().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
