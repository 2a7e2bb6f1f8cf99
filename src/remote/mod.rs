//! Remote API clients.
//!
//! This module provides the [`RemoteClient`] trait and its backends: an HTTP
//! client for Google-style REST APIs and an in-memory simulated remote.

mod client;
mod http;
mod memory;
mod poll;

pub use client::{Mutation, OperationFault, OperationStatus, RemoteClient, ResourceRef};
#[cfg(test)]
pub use client::MockRemoteClient;
pub use http::{DEFAULT_TIMEOUT_SECS, HttpRemoteClient, extract_error};
pub use memory::{Fault, InMemoryRemote, OperationMode, RemoteCall, RemoteMethod};
pub use poll::{PollPolicy, Poller};
