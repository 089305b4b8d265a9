//! Credentials read from the local filesystem.
//!
//! A reference names a path relative to the manifest directory:
//!
//! - a directory holds one file per key, named after the key (`db.host`,
//!   `db.port`, ...) and containing the raw value, as a mounted secret
//!   volume does. File contents are used verbatim, trailing newlines
//!   included.
//! - a `.toml` or `.json` file holds a table of values. Numbers and booleans
//!   are accepted as strings and nested tables are flattened into dotted
//!   keys, so `[db] host = "x"` and `"db.host" = "x"` are the same.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use pg_replication::{CredentialResolver, CredentialsRef, SecretData};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub struct FileResolver {
    base_dir: PathBuf,
}

impl FileResolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path(&self, reference: &CredentialsRef) -> PathBuf {
        self.base_dir.join(reference.as_str())
    }
}

#[async_trait]
impl CredentialResolver for FileResolver {
    async fn secret_data(&self, reference: &CredentialsRef) -> Result<SecretData> {
        let path = self.path(reference);
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;

        if metadata.is_dir() {
            return read_key_directory(&path).await;
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: serde_json::Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => {
                let table: toml::Table = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))?;
                serde_json::to_value(table)?
            }
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            _ => bail!(
                "Unsupported secret file {}: expected a directory, .toml or .json",
                path.display()
            ),
        };

        let serde_json::Value::Object(map) = value else {
            bail!("Secret file {} does not hold a table", path.display());
        };
        let mut flat = Vec::new();
        flatten("", serde_json::Value::Object(map), &mut flat);
        Ok(SecretData::from_values(flat)?)
    }
}

async fn read_key_directory(dir: &Path) -> Result<SecretData> {
    let mut values = BTreeMap::new();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        // Mounted volumes keep their bookkeeping in dot entries
        if name.starts_with('.') {
            continue;
        }
        let path = entry.path();
        if !tokio::fs::metadata(&path).await?.is_file() {
            continue;
        }
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        values.insert(name, bytes);
    }
    Ok(SecretData::Bytes(values))
}

fn flatten(prefix: &str, value: serde_json::Value, out: &mut Vec<(String, serde_json::Value)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, value) in map {
                let key = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&key, value, out);
            }
        }
        other => out.push((prefix.to_string(), other)),
    }
}
