// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is reported
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are reported
#![warn(unused_variables)]            // Unused variables are reported
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Convergent
//!
//! A declarative resource reconciliation engine for cloud APIs.
//!
//! ## Overview
//!
//! Convergent compares a desired resource document against the state read
//! from a remote API, computes the smallest set of operations that converges
//! them, applies those operations, and verifies that the result is stable.
//! It lets you:
//!
//! - Describe resources as schema-checked YAML documents
//! - Plan creates, in-place updates and replacements per field mutability
//! - Apply plans against long-running-operation REST APIs
//! - Import existing resources back into desired-state documents
//! - Detect drift, modulo an ignore-set of server-managed fields
//!
//! ## Architecture
//!
//! Each resource goes through one reconciliation **cycle**:
//!
//! 1. **Observe**: read the resource through a [`remote::RemoteClient`]
//! 2. **Diff**: compare desired and observed documents using the kind's
//!    [`schema::ResourceSchema`]
//! 3. **Plan**: classify the delta as no-op, create, update or replace
//! 4. **Apply**: issue the calls and wait for long-running operations
//! 5. **Verify**: re-read and re-diff; anything left outside the ignore-set
//!    is drift
//!
//! Cycles for the same remote identity are serialized. Cycles for distinct
//! identities run concurrently.
//!
//! ## Modules
//!
//! - [`schema`]: Field schemas and the kind registry
//! - [`planner`]: Diff computation, plan classification and the apply executor
//! - [`remote`]: Remote API trait, HTTP client and in-memory remote
//! - [`reconciler`]: Cycle orchestration, import and verification
//! - [`config`]: Manifest parsing, validation and hashing
//! - [`state`]: Documents and the local operation journal
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! remote:
//!   backend: http
//!   base_url: https://dataplex.googleapis.com
//!
//! verify:
//!   ignore: [labels, terraform_labels]
//!
//! resources:
//!   - name: full-quality
//!     kind: dataplex_datascan
//!     desired:
//!       project: my-project
//!       location: us-central1
//!       data_scan_id: dataquality-full
//!       data:
//!         resource: //bigquery.googleapis.com/projects/my-project/datasets/d/tables/t
//!       data_quality_spec:
//!         sampling_percent: 5
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod remote;
pub mod retry;
pub mod schema;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, EngineConfig};
pub use error::{ConvergentError, Result};
pub use planner::{ApplyExecutor, Delta, DiffEngine, ManifestPlan, OperationRecord, Plan, PlanAction, ResourcePlan};
pub use reconciler::{CycleReport, DriftReport, Importer, ManagedResource, Reconciler, Verifier};
pub use remote::{HttpRemoteClient, InMemoryRemote, PollPolicy, RemoteClient};
pub use retry::RetryConfig;
pub use schema::{FieldSpec, FieldType, Mutability, ResourceSchema, SchemaRegistry};
pub use state::{DesiredState, Document, Journal, LocalStateStore, ObservedState, StateStore};
