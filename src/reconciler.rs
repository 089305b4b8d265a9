//! Drives passes for the replication objects of a manifest and records their
//! outcome.

use anyhow::{Context, Result};
use futures::future::join_all;
use pg_replication::{run_pass, CredentialResolver, PassOptions, ReplicationPhase};
use status_store::{StatusStore, StoredStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::ReplicationObject;

pub struct Reconciler {
    resolver: Arc<dyn CredentialResolver>,
    store: Arc<dyn StatusStore>,
    pass_timeout: Duration,
    cancel: CancellationToken,
}

/// Outcome of one object's pass.
#[derive(Debug)]
pub struct ObjectReport {
    pub name: String,
    /// What was written to the store; `None` when the pass was cancelled.
    pub stored: Option<StoredStatus>,
}

impl ObjectReport {
    pub fn failed(&self) -> bool {
        !matches!(
            &self.stored,
            Some(stored) if stored.replication_status.phase == ReplicationPhase::Replicating
        )
    }
}

impl Reconciler {
    pub fn new(
        resolver: Arc<dyn CredentialResolver>,
        store: Arc<dyn StatusStore>,
        pass_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver,
            store,
            pass_timeout,
            cancel,
        }
    }

    /// Runs one pass for `object` and stores the result.
    ///
    /// Pass failures end up in the stored status; only store failures are
    /// returned as errors. A cancelled pass stores nothing.
    pub async fn reconcile(&self, object: &ReplicationObject) -> Result<ObjectReport> {
        let id = object.status_id()?;
        let previous = self
            .store
            .read_status(&id)
            .await
            .with_context(|| format!("Failed to read status of '{}'", object.name))?;
        let prior = previous.as_ref().and_then(|stored| stored.reconciled.as_ref());

        let options = PassOptions::new()
            .with_cancellation(self.cancel.clone())
            .with_timeout(self.pass_timeout);
        let outcome = run_pass(&object.desired_state(), prior, self.resolver.as_ref(), options)
            .instrument(info_span!("reconcile", object = %object.name))
            .await;

        match &outcome {
            Ok(fingerprint) => info!(
                object = %object.name,
                publication = %fingerprint.publication_name,
                tables = fingerprint.tables.len(),
                "replicating"
            ),
            Err(e) if e.is_cancelled() && self.cancel.is_cancelled() => {
                warn!(object = %object.name, "pass interrupted, status left unchanged");
                return Ok(ObjectReport {
                    name: object.name.clone(),
                    stored: None,
                });
            }
            Err(e) => error!(
                object = %object.name,
                reason = %e.kind,
                message = %e.message,
                "pass failed"
            ),
        }

        let stored = StoredStatus::after_pass(previous.as_ref(), &outcome);
        self.store
            .store_status(&id, &stored)
            .await
            .with_context(|| format!("Failed to store status of '{}'", object.name))?;
        Ok(ObjectReport {
            name: object.name.clone(),
            stored: Some(stored),
        })
    }

    /// Runs the passes of all `objects` concurrently.
    pub async fn reconcile_all(&self, objects: &[&ReplicationObject]) -> Vec<Result<ObjectReport>> {
        join_all(objects.iter().map(|object| self.reconcile(object))).await
    }
}
