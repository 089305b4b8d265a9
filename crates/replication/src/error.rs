//! Error taxonomy for a convergence pass.
//!
//! Stage functions return `anyhow::Result` and attach [`Condition`] values
//! for the outcomes callers need to match on. The pass boundary turns every
//! failure into a [`ClassifiedError`] tagged with the failing stage's
//! [`ErrorKind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The stage a pass failed in. Serialized as the status reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Credentials could not be resolved or decoded.
    CredentialError,
    /// Publisher or subscriber connection could not be opened.
    ConnectError,
    /// The publication is missing or not eligible for replication.
    PublicationError,
    /// Listing the publication's tables or reading their columns failed.
    PublicationTablesError,
    /// A subscriber schema could not be checked or created.
    SubscriptionSchemaError,
    /// A subscriber table could not be checked, created or archived, or it
    /// drifted from the publication.
    SubscriptionTableError,
    /// The subscription could not be created, altered, enabled or disabled.
    SubscriptionError,
    /// The pass was cancelled or ran past its deadline.
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::CredentialError => "CredentialError",
            ErrorKind::ConnectError => "ConnectError",
            ErrorKind::PublicationError => "PublicationError",
            ErrorKind::PublicationTablesError => "PublicationTablesError",
            ErrorKind::SubscriptionSchemaError => "SubscriptionSchemaError",
            ErrorKind::SubscriptionTableError => "SubscriptionTableError",
            ErrorKind::SubscriptionError => "SubscriptionError",
            ErrorKind::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcomes of catalog checks that are failures but not database errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Condition {
    /// The named object does not exist.
    #[error("{object} does not exist")]
    NotFound { object: String },

    /// The named object exists but its shape or flags are not acceptable.
    #[error("{object} has wrong attributes: {reason}")]
    WrongAttributes { object: String, reason: String },
}

/// A pass failure carrying the stage classification and a readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classifies an `anyhow` error, keeping its whole context chain.
    pub fn from_error(kind: ErrorKind, error: &anyhow::Error) -> Self {
        Self::new(kind, format!("{error:#}"))
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }
}

/// Attaches a stage classification to a fallible result.
///
/// ```
/// use pg_replication::{Classify, ErrorKind};
///
/// let result: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
/// let err = result.classify(ErrorKind::ConnectError).unwrap_err();
/// assert_eq!(err.kind, ErrorKind::ConnectError);
/// assert_eq!(err.message, "connection refused");
/// ```
pub trait Classify<T> {
    fn classify(self, kind: ErrorKind) -> Result<T, ClassifiedError>;
}

impl<T> Classify<T> for anyhow::Result<T> {
    fn classify(self, kind: ErrorKind) -> Result<T, ClassifiedError> {
        self.map_err(|e| ClassifiedError::from_error(kind, &e))
    }
}
