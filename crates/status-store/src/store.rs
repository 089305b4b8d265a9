//! Status storage trait and types

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pg_replication::{ClassifiedError, ReconciledFingerprint, ReplicationStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one replication object in a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusID {
    pub object: String,
}

impl StatusID {
    /// Object names end up in file names, so path-like names are refused.
    pub fn new(object: impl Into<String>) -> Result<Self> {
        let object = object.into();
        if object.is_empty()
            || object.starts_with('.')
            || object.contains(['/', '\\'])
        {
            bail!("Invalid replication object name '{object}'");
        }
        Ok(Self { object })
    }
}

impl fmt::Display for StatusID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object)
    }
}

/// What is persisted per replication object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredStatus {
    pub replication_status: ReplicationStatus,
    /// Fingerprint of the last successful pass.
    #[serde(default)]
    pub reconciled: Option<ReconciledFingerprint>,
    pub updated_at: DateTime<Utc>,
}

impl StoredStatus {
    /// The record to write after a pass.
    ///
    /// A successful pass replaces the fingerprint. A failed pass only
    /// replaces the status, so the next pass still sees the last converged
    /// state as its prior.
    pub fn after_pass(
        previous: Option<&StoredStatus>,
        outcome: &Result<ReconciledFingerprint, ClassifiedError>,
    ) -> Self {
        let (replication_status, reconciled) = match outcome {
            Ok(fingerprint) => (ReplicationStatus::replicating(), Some(fingerprint.clone())),
            Err(error) => (
                ReplicationStatus::failed(error),
                previous.and_then(|stored| stored.reconciled.clone()),
            ),
        };
        Self {
            replication_status,
            reconciled,
            updated_at: Utc::now(),
        }
    }
}

/// Trait for status storage operations.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Replace the stored status of an object.
    async fn store_status(&self, id: &StatusID, status: &StoredStatus) -> Result<()>;

    /// Read the stored status of an object.
    ///
    /// Returns None if nothing was stored yet.
    async fn read_status(&self, id: &StatusID) -> Result<Option<StoredStatus>>;
}
