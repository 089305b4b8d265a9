use anyhow::Result;
use async_trait::async_trait;

use crate::store::{StatusID, StatusStore, StoredStatus};

/// Store used for dry runs: every pass starts without a prior fingerprint.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

#[async_trait]
impl StatusStore for NullStore {
    async fn store_status(&self, id: &StatusID, _status: &StoredStatus) -> Result<()> {
        tracing::debug!(object = %id, "discarding status");
        Ok(())
    }

    async fn read_status(&self, _id: &StatusID) -> Result<Option<StoredStatus>> {
        Ok(None)
    }
}
