//! Database credentials and their decoding from secret material.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use thiserror::Error;

const KEY_HOST: &str = "db.host";
const KEY_PORT: &str = "db.port";
const KEY_USER: &str = "db.user";
const KEY_PASSWORD: &str = "db.password";
const KEY_NAME: &str = "db.name";
const KEY_ADMIN_USER: &str = "db.admin_user";
const KEY_ADMIN_PASSWORD: &str = "db.admin_password";

/// Opaque handle naming where a set of credentials lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialsRef(String);

impl CredentialsRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CredentialsRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret material as handed over by a secret store.
///
/// Secrets arrive either with string values or with raw byte values; both
/// use the same `db.*` keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretData {
    Strings(BTreeMap<String, String>),
    Bytes(BTreeMap<String, Vec<u8>>),
}

impl SecretData {
    /// Builds a string-keyed secret from loosely typed values, rendering
    /// numbers and booleans as strings.
    pub fn from_values(
        values: impl IntoIterator<Item = (String, serde_json::Value)>,
    ) -> Result<Self, CredentialsError> {
        let mut strings = BTreeMap::new();
        for (key, value) in values {
            let value = match value {
                serde_json::Value::String(s) => s,
                serde_json::Value::Number(n) => n.to_string(),
                serde_json::Value::Bool(b) => b.to_string(),
                _ => return Err(CredentialsError::NotAScalar { key }),
            };
            strings.insert(key, value);
        }
        Ok(SecretData::Strings(strings))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            SecretData::Strings(map) => map.is_empty(),
            SecretData::Bytes(map) => map.is_empty(),
        }
    }

    fn value(&self, key: &'static str) -> Result<Option<String>, CredentialsError> {
        match self {
            SecretData::Strings(map) => Ok(map.get(key).cloned()),
            SecretData::Bytes(map) => map
                .get(key)
                .map(|bytes| {
                    String::from_utf8(bytes.clone()).map_err(|_| CredentialsError::NotUtf8 { key })
                })
                .transpose(),
        }
    }

    fn required(&self, key: &'static str) -> Result<String, CredentialsError> {
        self.value(key)?
            .ok_or(CredentialsError::MissingKey { key })
    }
}

/// Reasons secret material cannot be turned into credentials.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("no secret data")]
    NoSecretData,

    #[error("missing key '{key}'")]
    MissingKey { key: &'static str },

    #[error("value of '{key}' is not valid UTF-8")]
    NotUtf8 { key: &'static str },

    #[error("value of '{key}' is not a string, number or boolean")]
    NotAScalar { key: String },

    #[error("invalid port '{value}'")]
    InvalidPort { value: String },
}

/// Connection parameters for one PostgreSQL database.
#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseCredentials {
    pub host: String,
    pub port: String,
    pub user: String,
    pub password: String,
    pub database_name: String,
    pub admin_user: String,
    pub admin_password: String,
}

impl DatabaseCredentials {
    /// Decodes credentials from either secret encoding.
    ///
    /// Keys are matched exactly. The admin keys are optional and default to
    /// empty strings; every other key is required.
    pub fn decode(data: &SecretData) -> Result<Self, CredentialsError> {
        if data.is_empty() {
            return Err(CredentialsError::NoSecretData);
        }

        let port = data.required(KEY_PORT)?;
        if port.parse::<u16>().is_err() {
            return Err(CredentialsError::InvalidPort { value: port });
        }

        Ok(Self {
            host: data.required(KEY_HOST)?,
            port,
            user: data.required(KEY_USER)?,
            password: data.required(KEY_PASSWORD)?,
            database_name: data.required(KEY_NAME)?,
            admin_user: data.value(KEY_ADMIN_USER)?.unwrap_or_default(),
            admin_password: data.value(KEY_ADMIN_PASSWORD)?.unwrap_or_default(),
        })
    }

    /// libpq keyword/value connection string.
    ///
    /// Field order is fixed and TLS is disabled, so equal credentials always
    /// produce the same string. The subscription stores this string verbatim
    /// and later passes compare against it.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            conninfo_value(&self.host),
            conninfo_value(&self.port),
            conninfo_value(&self.user),
            conninfo_value(&self.password),
            conninfo_value(&self.database_name),
        )
    }
}

impl std::fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database_name", &self.database_name)
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .finish()
    }
}

// Single-quote a conninfo value when libpq would otherwise split or
// misread it.
fn conninfo_value(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quotes {
        return Cow::Borrowed(value);
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    Cow::Owned(format!("'{escaped}'"))
}

/// Looks up secret material for a [`CredentialsRef`].
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Fetches the raw secret behind `reference`.
    async fn secret_data(&self, reference: &CredentialsRef) -> anyhow::Result<SecretData>;

    /// Fetches and decodes the credentials behind `reference`.
    async fn resolve(&self, reference: &CredentialsRef) -> anyhow::Result<DatabaseCredentials> {
        let data = self
            .secret_data(reference)
            .await
            .with_context(|| format!("Failed to read secret '{reference}'"))?;
        DatabaseCredentials::decode(&data)
            .with_context(|| format!("Failed to decode credentials from secret '{reference}'"))
    }
}
