//! The record of the last successful pass.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::credentials::DatabaseCredentials;
use crate::table::PgTable;

/// Hex SHA-256 of `value`. Used to notice changes without storing secrets.
pub fn checksum(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// What a pass converged to. Written back only after a fully successful
/// pass and compared against the next pass's desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledFingerprint {
    pub publication_name: String,
    pub publisher_credential_hash: String,
    pub subscriber_credential_hash: String,
    pub tables: BTreeSet<PgTable>,
}

/// A difference between two fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintChange {
    Publication { from: String, to: String },
    PublisherCredentials,
    SubscriberCredentials,
    Tables {
        added: Vec<PgTable>,
        removed: Vec<PgTable>,
    },
}

impl ReconciledFingerprint {
    pub fn compute(
        publication_name: &str,
        publisher: &DatabaseCredentials,
        subscriber: &DatabaseCredentials,
        tables: impl IntoIterator<Item = PgTable>,
    ) -> Self {
        Self {
            publication_name: publication_name.to_string(),
            publisher_credential_hash: checksum(&publisher.connection_string()),
            subscriber_credential_hash: checksum(&subscriber.connection_string()),
            tables: tables.into_iter().collect(),
        }
    }

    /// Lists how `self` differs from the `prior` fingerprint.
    pub fn changes_since(&self, prior: &ReconciledFingerprint) -> Vec<FingerprintChange> {
        let mut changes = Vec::new();
        if self.publication_name != prior.publication_name {
            changes.push(FingerprintChange::Publication {
                from: prior.publication_name.clone(),
                to: self.publication_name.clone(),
            });
        }
        if self.publisher_credential_hash != prior.publisher_credential_hash {
            changes.push(FingerprintChange::PublisherCredentials);
        }
        if self.subscriber_credential_hash != prior.subscriber_credential_hash {
            changes.push(FingerprintChange::SubscriberCredentials);
        }
        let added: Vec<_> = self.tables.difference(&prior.tables).cloned().collect();
        let removed: Vec<_> = prior.tables.difference(&self.tables).cloned().collect();
        if !added.is_empty() || !removed.is_empty() {
            changes.push(FingerprintChange::Tables { added, removed });
        }
        changes
    }
}
