//! pg-replication-operator
//!
//! Keeps PostgreSQL subscriber databases converged onto publications listed
//! in a TOML manifest. Each `reconcile` run performs one convergence pass per
//! replication object and records the outcome in a status directory.
//!
//! # CLI Usage
//!
//! ```bash
//! # Converge every replication object once
//! pg-replication-operator reconcile --config replication.toml
//!
//! # Converge a single object with a shorter deadline
//! pg-replication-operator reconcile --config replication.toml --only orders --timeout 30s
//!
//! # Show the last recorded outcome
//! pg-replication-operator status --config replication.toml --json
//! ```

pub mod config;
pub mod reconciler;
pub mod resolver;

pub use config::{Manifest, ReplicationObject};
pub use reconciler::{ObjectReport, Reconciler};
pub use resolver::FileResolver;
