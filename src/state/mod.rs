//! State documents and the local journal.
//!
//! [`Document`] and its desired/observed wrappers carry resource state
//! through a cycle. The journal persists, per manifest resource, the last
//! applied configuration hash and a bounded operation history.

mod document;
mod local;
mod store;
mod types;

pub use document::{DesiredState, Document, ObservedState, PATH_SEPARATOR, json_type_name};
pub use local::{LocalStateStore, STATE_DIR};
pub use store::StateStore;
pub use types::{HistoryEntry, JOURNAL_VERSION, Journal, MAX_HISTORY, ResourceRecord};
