//! Publication checks on the publisher side.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::catalog::{PublicationAttributes, PublisherCatalog};
use crate::error::Condition;
use crate::table::{PgTable, PgTableDetail};

/// Checks that `publication` exists and can be replicated table by table.
///
/// Fails with [`Condition::NotFound`] when there is no such publication and
/// with [`Condition::WrongAttributes`] when it is `FOR ALL TABLES`, does not
/// publish all of insert/update/delete/truncate, or includes whole schemas.
pub async fn validate<P>(publisher: &P, publication: &str) -> Result<()>
where
    P: PublisherCatalog + ?Sized,
{
    let attributes = publisher
        .publication_attributes(publication)
        .await?
        .ok_or_else(|| Condition::NotFound {
            object: format!("publication '{publication}'"),
        })?;

    if let Some(reason) = ineligibility(&attributes) {
        return Err(Condition::WrongAttributes {
            object: format!("publication '{publication}'"),
            reason: reason.to_string(),
        }
        .into());
    }

    info!(publication, "checked publication");
    Ok(())
}

fn ineligibility(attributes: &PublicationAttributes) -> Option<&'static str> {
    if attributes.all_tables {
        Some("published FOR ALL TABLES")
    } else if !attributes.all_operations {
        Some("does not publish all of insert, update, delete and truncate")
    } else if attributes.schema_memberships > 0 {
        Some("publishes whole schemas")
    } else {
        None
    }
}

/// Tables currently attached to `publication`.
pub async fn list_tables<P>(publisher: &P, publication: &str) -> Result<Vec<PgTable>>
where
    P: PublisherCatalog + ?Sized,
{
    let tables = publisher
        .publication_tables(publication)
        .await
        .with_context(|| format!("Failed to list tables of publication '{publication}'"))?;
    info!(publication, count = tables.len(), "checked publication tables");
    Ok(tables)
}

/// The columns of `table` that `publication` exposes, in physical order.
pub async fn table_detail<P>(publisher: &P, publication: &str, table: &PgTable) -> Result<PgTableDetail>
where
    P: PublisherCatalog + ?Sized,
{
    let columns = publisher
        .published_columns(publication, table)
        .await
        .with_context(|| format!("Failed to read publication details of {table}"))?;
    debug!(
        schema = %table.schema,
        table = %table.name,
        columns = columns.len(),
        "read publication details"
    );
    Ok(PgTableDetail::new(table.clone(), columns))
}
