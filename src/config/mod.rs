//! Replication manifest.
//!
//! ```toml
//! status_dir = ".pg-replication-status"
//! pass_timeout = "5m"
//!
//! [[replication]]
//! name = "orders"
//! publication = "orders_pub"
//! publisher_secret = "secrets/orders-publisher"
//! subscriber_secret = "secrets/orders-subscriber.toml"
//! ```
//!
//! Relative paths, including secret references, are resolved against the
//! directory holding the manifest.

mod duration;

pub use duration::parse_duration;

use anyhow::{bail, Context, Result};
use pg_replication::{CredentialsRef, DesiredState};
use serde::Deserialize;
use status_store::StatusID;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_STATUS_DIR: &str = ".pg-replication-status";
const DEFAULT_PASS_TIMEOUT: &str = "5m";

/// One replication object: a publication to mirror on a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationObject {
    pub name: String,
    pub publication: String,
    pub publisher_secret: CredentialsRef,
    pub subscriber_secret: CredentialsRef,
}

impl ReplicationObject {
    pub fn desired_state(&self) -> DesiredState {
        DesiredState {
            publication_name: self.publication.clone(),
            publisher_credentials: self.publisher_secret.clone(),
            subscriber_credentials: self.subscriber_secret.clone(),
        }
    }

    pub fn status_id(&self) -> Result<StatusID> {
        StatusID::new(self.name.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default = "default_status_dir")]
    pub status_dir: PathBuf,

    #[serde(default = "default_pass_timeout")]
    pub pass_timeout: String,

    #[serde(default, rename = "replication")]
    pub replications: Vec<ReplicationObject>,

    /// Directory the manifest was loaded from.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_status_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATUS_DIR)
}

fn default_pass_timeout() -> String {
    DEFAULT_PASS_TIMEOUT.to_string()
}

impl Manifest {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid manifest {}", path.display()))?;
        manifest.base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(manifest)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(content).context("Failed to parse manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        let timeout = self.pass_timeout()?;
        if timeout.is_zero() {
            bail!("pass_timeout must be greater than zero");
        }

        let mut names = BTreeSet::new();
        for object in &self.replications {
            object.status_id()?;
            if object.publication.is_empty() {
                bail!("Replication '{}' has an empty publication name", object.name);
            }
            if !names.insert(object.name.as_str()) {
                bail!("Duplicate replication name '{}'", object.name);
            }
        }
        Ok(())
    }

    pub fn pass_timeout(&self) -> Result<Duration> {
        parse_duration(&self.pass_timeout)
            .with_context(|| format!("Invalid pass_timeout '{}'", self.pass_timeout))
    }

    /// Status directory, resolved against the manifest directory.
    pub fn status_dir(&self) -> PathBuf {
        self.base_dir.join(&self.status_dir)
    }

    /// All objects, or only the one named `only`.
    pub fn select(&self, only: Option<&str>) -> Result<Vec<&ReplicationObject>> {
        match only {
            None => Ok(self.replications.iter().collect()),
            Some(name) => match self.replications.iter().find(|o| o.name == name) {
                Some(object) => Ok(vec![object]),
                None => bail!("No replication named '{name}' in manifest"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
status_dir = "state"
pass_timeout = "90s"

[[replication]]
name = "orders"
publication = "orders_pub"
publisher_secret = "secrets/publisher"
subscriber_secret = "secrets/subscriber.toml"

[[replication]]
name = "people"
publication = "pub1"
publisher_secret = "secrets/people-publisher.json"
subscriber_secret = "secrets/subscriber.toml"
"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = Manifest::from_toml_str(MANIFEST).unwrap();

        assert_eq!(manifest.pass_timeout().unwrap(), Duration::from_secs(90));
        assert_eq!(manifest.replications.len(), 2);
        let orders = &manifest.replications[0];
        assert_eq!(
            orders.desired_state(),
            DesiredState {
                publication_name: "orders_pub".to_string(),
                publisher_credentials: CredentialsRef::new("secrets/publisher"),
                subscriber_credentials: CredentialsRef::new("secrets/subscriber.toml"),
            }
        );
    }

    #[test]
    fn test_defaults() {
        let manifest = Manifest::from_toml_str("").unwrap();
        assert_eq!(manifest.status_dir, PathBuf::from(DEFAULT_STATUS_DIR));
        assert_eq!(manifest.pass_timeout().unwrap(), Duration::from_secs(300));
        assert!(manifest.replications.is_empty());
    }

    #[test]
    fn test_from_file_resolves_status_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication.toml");
        std::fs::write(&path, MANIFEST).unwrap();

        let manifest = Manifest::from_file(&path).unwrap();
        assert_eq!(manifest.base_dir, dir.path());
        assert_eq!(manifest.status_dir(), dir.path().join("state"));
    }

    #[test]
    fn test_select() {
        let manifest = Manifest::from_toml_str(MANIFEST).unwrap();

        assert_eq!(manifest.select(None).unwrap().len(), 2);
        let only = manifest.select(Some("people")).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].publication, "pub1");
        assert!(manifest.select(Some("missing")).is_err());
    }

    #[test]
    fn test_rejects_invalid_manifests() {
        let duplicate = r#"
[[replication]]
name = "a"
publication = "p"
publisher_secret = "x"
subscriber_secret = "y"

[[replication]]
name = "a"
publication = "q"
publisher_secret = "x"
subscriber_secret = "y"
"#;
        let err = Manifest::from_toml_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("Duplicate replication name 'a'"));

        let bad_name = r#"
[[replication]]
name = "../a"
publication = "p"
publisher_secret = "x"
subscriber_secret = "y"
"#;
        assert!(Manifest::from_toml_str(bad_name).is_err());

        assert!(Manifest::from_toml_str("pass_timeout = \"0s\"").is_err());
        assert!(Manifest::from_toml_str("pass_timeout = \"soon\"").is_err());
        assert!(Manifest::from_toml_str("unknown_key = 1").is_err());
    }
}
