//! Filesystem-based status storage implementation.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;

use crate::store::{StatusID, StatusStore, StoredStatus};

/// Filesystem implementation of StatusStore trait.
///
/// Stores each object's status as `<dir>/<object>.json`. Writes go to a
/// temporary file that is renamed over the old one, so readers never see a
/// partial record.
pub struct FilesystemStore {
    dir: PathBuf,
}

impl FilesystemStore {
    /// Create a new FilesystemStore with the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, id: &StatusID) -> PathBuf {
        self.dir.join(format!("{}.json", id.object))
    }
}

#[async_trait]
impl StatusStore for FilesystemStore {
    async fn store_status(&self, id: &StatusID, status: &StoredStatus) -> Result<()> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create status directory {}", self.dir.display())
        })?;

        let path = self.path(id);
        let temp = self.dir.join(format!(".{}.json.tmp", id.object));
        std::fs::write(&temp, serde_json::to_string_pretty(status)?)
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        std::fs::rename(&temp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;

        tracing::debug!(object = %id, path = %path.display(), "stored status");
        Ok(())
    }

    async fn read_status(&self, id: &StatusID) -> Result<Option<StoredStatus>> {
        let path = self.path(id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let stored = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse status file {}", path.display()))?;
        Ok(Some(stored))
    }
}
