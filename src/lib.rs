//! Strata - CRD-driven Kubernetes operator for StrataDB cluster lifecycle management
//!
//! Strata manages access-control provisioning for managed StrataDB clusters
//! through declarative custom resources. Roles, grants, and users form a
//! dependency chain: a grant must not be applied before its target role
//! exists in the database, and a user must not be created before every role
//! and grant it depends on has converged.
//!
//! # Architecture
//!
//! The heart of the operator is the [`coordinator`] module: a dependency-ordered
//! reconciliation coordinator that sequences work across the three access
//! kinds (Role → Grant → User) per managed cluster. Per-kind controllers
//! observe the CRDs and hand work items to the coordinator; one worker per
//! kind drains a bounded dispatch queue, re-checks dependencies at dispatch
//! time, and retries transient failures with fixed delays until the object
//! converges or is deleted.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (StrataCluster, StrataRole, StrataGrant, StrataUser)
//! - [`coordinator`] - Dependency-ordered reconciliation coordinator
//! - [`controller`] - Kubernetes controller reconciliation logic
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod controller;
pub mod coordinator;
pub mod crd;
pub mod error;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// These constants define the default values used throughout Strata.
// Centralizing them here ensures consistency across controllers, coordinator
// configs, and test fixtures.

/// Default periodic resync interval for the access controllers
///
/// Every live object is rescheduled at least this often. The coordinator's
/// drop-on-full queue policy relies on this resync for recovery, so it must
/// never be disabled.
pub const DEFAULT_RESYNC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Default requeue interval while an object's owning cluster is not ready
pub const DEFAULT_NOT_READY_REQUEUE: std::time::Duration = std::time::Duration::from_secs(30);
