//! Outcome of the last pass as reported to operators.

use serde::{Deserialize, Serialize};

use crate::error::ClassifiedError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationPhase {
    #[default]
    Pending,
    Replicating,
    Failed,
    Unknown,
}

/// Last-pass outcome. Each pass replaces it entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub phase: ReplicationPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ReplicationStatus {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn replicating() -> Self {
        Self {
            phase: ReplicationPhase::Replicating,
            reason: None,
            message: None,
        }
    }

    pub fn failed(error: &ClassifiedError) -> Self {
        Self {
            phase: ReplicationPhase::Failed,
            reason: Some(error.kind.to_string()),
            message: Some(error.message.clone()),
        }
    }
}
