//! Retiring the wiring of a previous publication identity.
//!
//! When the desired publication name differs from the one recorded by the
//! last successful pass, every table of the old fingerprint is renamed to
//! `<table>_<old publication>` so its data survives, and the old
//! subscription is disabled. The new tables and subscription are created
//! afterwards by the regular stages.

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::catalog::SubscriberCatalog;
use crate::error::{Classify, ClassifiedError, ErrorKind};
use crate::fingerprint::ReconciledFingerprint;
use crate::statement::Statement;
use crate::subscription;
use crate::table::PgTable;

/// Archives every table of `old` and disables its subscription.
///
/// Safe to re-run: tables already archived and subscriptions already gone are
/// skipped.
pub async fn archive_old_wiring<S>(
    subscriber: &S,
    old: &ReconciledFingerprint,
) -> Result<(), ClassifiedError>
where
    S: SubscriberCatalog + ?Sized,
{
    info!(
        publication = %old.publication_name,
        tables = old.tables.len(),
        "publication changed, archiving old tables"
    );

    for table in &old.tables {
        archive_table(subscriber, table, &old.publication_name)
            .await
            .classify(ErrorKind::SubscriptionTableError)?;
    }

    subscription::disable(subscriber, &old.publication_name)
        .await
        .classify(ErrorKind::SubscriptionError)?;
    Ok(())
}

async fn archive_table<S>(subscriber: &S, table: &PgTable, old_publication: &str) -> Result<()>
where
    S: SubscriberCatalog + ?Sized,
{
    if !subscriber.table_exists(table).await? {
        warn!(schema = %table.schema, table = %table.name, "missing old subscription table");
        return Ok(());
    }

    let archived = table.archived(old_publication);
    if subscriber.table_exists(&archived).await? {
        info!(
            schema = %table.schema,
            table = %table.name,
            archived = %archived.name,
            "old table already archived"
        );
        return Ok(());
    }

    subscriber
        .execute(&Statement::RenameTable {
            table: table.clone(),
            new_name: archived.name.clone(),
        })
        .await
        .with_context(|| format!("Failed to archive table {table} as {archived}"))?;
    info!(
        schema = %table.schema,
        table = %table.name,
        archived = %archived.name,
        "archived old table"
    );
    Ok(())
}
