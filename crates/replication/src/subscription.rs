//! Subscription lifecycle on the subscriber.
//!
//! The subscription is named after the publication it pulls from. Its state
//! is read from `pg_subscription` and moved to enabled with the desired
//! connection string:
//!
//! ```text
//! Absent        --CREATE, ENABLE-->          EnabledCorrect
//! Disabled      --ALTER CONNECTION, ENABLE--> EnabledCorrect
//! EnabledWrong  --ALTER CONNECTION, ENABLE--> EnabledCorrect
//! EnabledCorrect (no-op)
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::SubscriberCatalog;
use crate::statement::Statement;

/// A row of `pg_subscription`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub name: String,
    pub enabled: bool,
    pub connection_info: String,
}

impl std::fmt::Debug for SubscriptionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRecord")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("connection_info", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Absent,
    EnabledCorrect,
    /// Enabled, but connected with a different connection string.
    EnabledWrong,
    Disabled,
}

impl SubscriptionState {
    pub fn observe(record: Option<&SubscriptionRecord>, connection_info: &str) -> Self {
        match record {
            None => SubscriptionState::Absent,
            Some(record) if !record.enabled => SubscriptionState::Disabled,
            Some(record) if record.connection_info != connection_info => {
                SubscriptionState::EnabledWrong
            }
            Some(_) => SubscriptionState::EnabledCorrect,
        }
    }

    /// Statements that take this state to [`SubscriptionState::EnabledCorrect`].
    pub fn plan(&self, name: &str, connection_info: &str) -> Vec<Statement> {
        let enable = Statement::EnableSubscription {
            name: name.to_string(),
        };
        match self {
            SubscriptionState::Absent => vec![
                Statement::CreateSubscription {
                    name: name.to_string(),
                    connection_info: connection_info.to_string(),
                },
                enable,
            ],
            SubscriptionState::Disabled | SubscriptionState::EnabledWrong => vec![
                Statement::AlterSubscriptionConnection {
                    name: name.to_string(),
                    connection_info: connection_info.to_string(),
                },
                enable,
            ],
            SubscriptionState::EnabledCorrect => Vec::new(),
        }
    }
}

/// Brings subscription `name` to enabled with `connection_info`.
///
/// Returns the state observed before any change was made.
pub async fn reconcile<S>(subscriber: &S, name: &str, connection_info: &str) -> Result<SubscriptionState>
where
    S: SubscriberCatalog + ?Sized,
{
    let record = subscriber.subscription(name).await?;
    let state = SubscriptionState::observe(record.as_ref(), connection_info);
    match state {
        SubscriptionState::EnabledCorrect => {}
        SubscriptionState::Absent => info!(subscription = name, "subscription does not exist"),
        SubscriptionState::Disabled | SubscriptionState::EnabledWrong => {
            info!(subscription = name, ?state, "wrong attributes")
        }
    }

    for statement in state.plan(name, connection_info) {
        subscriber
            .execute(&statement)
            .await
            .with_context(|| format!("Failed to {statement}"))?;
        info!(subscription = name, "{statement}");
    }

    info!(subscription = name, "checked subscription");
    Ok(state)
}

/// Disables subscription `name`.
///
/// A missing subscription counts as disabled, since an earlier partial pass
/// may already have removed it. Returns whether a statement was issued.
pub async fn disable<S>(subscriber: &S, name: &str) -> Result<bool>
where
    S: SubscriberCatalog + ?Sized,
{
    let Some(record) = subscriber.subscription(name).await? else {
        warn!(subscription = name, "old subscription does not exist");
        return Ok(false);
    };
    if !record.enabled {
        info!(subscription = name, "old subscription already disabled");
        return Ok(false);
    }

    subscriber
        .execute(&Statement::DisableSubscription {
            name: name.to_string(),
        })
        .await
        .with_context(|| format!("Failed to disable subscription '{name}'"))?;
    info!(subscription = name, "disabled subscription");
    Ok(true)
}
