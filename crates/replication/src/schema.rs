//! Subscriber-side schemas and tables.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::SubscriberCatalog;
use crate::error::Condition;
use crate::statement::Statement;
use crate::table::{PgTable, PgTableDetail};

/// What [`ensure_table`] found on the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOutcome {
    Created,
    Matching,
}

/// Creates `schema` on the subscriber if it is missing.
pub async fn ensure_schema<S>(subscriber: &S, schema: &str) -> Result<()>
where
    S: SubscriberCatalog + ?Sized,
{
    if subscriber.schema_exists(schema).await? {
        debug!(schema, "checked subscription schema");
        return Ok(());
    }

    info!(schema, "schema does not exist");
    // IF NOT EXISTS keeps a concurrent creator from failing this pass
    subscriber
        .execute(&Statement::CreateSchema {
            schema: schema.to_string(),
        })
        .await
        .with_context(|| format!("Failed to create schema '{schema}'"))?;
    info!(schema, "created subscription schema");
    Ok(())
}

/// Makes sure the subscriber hosts a table shaped like `detail`.
///
/// A missing table is created from the published columns. An existing table
/// is compared column by column and any difference fails with
/// [`Condition::WrongAttributes`]; existing tables are never dropped or
/// rebuilt here because they may already hold replicated data.
pub async fn ensure_table<S>(subscriber: &S, detail: &PgTableDetail) -> Result<TableOutcome>
where
    S: SubscriberCatalog + ?Sized,
{
    let table = &detail.table;

    if !subscriber.table_exists(table).await? {
        subscriber
            .execute(&Statement::CreateTable(detail.clone()))
            .await
            .with_context(|| format!("Failed to create table {table}"))?;
        info!(schema = %table.schema, table = %table.name, "created subscription table");
        return Ok(TableOutcome::Created);
    }

    let actual = subscriber.table_columns(table).await?;
    if let Some(difference) = detail.first_difference(&actual) {
        warn!(
            schema = %table.schema,
            table = %table.name,
            %difference,
            "table differs from publication"
        );
        return Err(Condition::WrongAttributes {
            object: format!("table {table}"),
            reason: difference,
        }
        .into());
    }

    debug!(schema = %table.schema, table = %table.name, "checked subscription table");
    Ok(TableOutcome::Matching)
}

/// Compatibility view step of the per-table loop.
///
/// Runs after the subscription is in place. No view is created yet; the step
/// exists so a view over the replicated table can be added without changing
/// the pass order.
pub async fn ensure_compatibility_view<S>(_subscriber: &S, table: &PgTable) -> Result<()>
where
    S: SubscriberCatalog + ?Sized,
{
    debug!(schema = %table.schema, table = %table.name, "no compatibility view required");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeSubscriber;
    use crate::PgColumn;

    fn people() -> PgTableDetail {
        let mut id = PgColumn::new("id", "uuid");
        id.nullable = false;
        let mut name = PgColumn::new("name", "character varying");
        name.char_max_length = Some(255);
        PgTableDetail::new(PgTable::new("public", "people"), vec![id, name])
    }

    #[tokio::test]
    async fn test_missing_schema_is_created_once() {
        let subscriber = FakeSubscriber::new();

        ensure_schema(&subscriber, "published_data").await.unwrap();
        assert_eq!(
            subscriber.statements(),
            vec![Statement::CreateSchema {
                schema: "published_data".to_string()
            }]
        );

        ensure_schema(&subscriber, "published_data").await.unwrap();
        assert_eq!(subscriber.statements().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_created() {
        let subscriber = FakeSubscriber::new();
        subscriber.add_schema("public");
        let detail = people();

        let outcome = ensure_table(&subscriber, &detail).await.unwrap();
        assert_eq!(outcome, TableOutcome::Created);
        assert_eq!(
            subscriber.statements(),
            vec![Statement::CreateTable(detail.clone())]
        );
        assert_eq!(subscriber.columns_of(&detail.table), Some(detail.columns.clone()));
    }

    #[tokio::test]
    async fn test_matching_table_issues_nothing() {
        let subscriber = FakeSubscriber::new();
        let detail = people();
        subscriber.add_table(detail.table.clone(), detail.columns.clone());

        let outcome = ensure_table(&subscriber, &detail).await.unwrap();
        assert_eq!(outcome, TableOutcome::Matching);
        assert!(subscriber.statements().is_empty());
    }

    #[tokio::test]
    async fn test_drifted_table_is_reported_not_rebuilt() {
        let subscriber = FakeSubscriber::new();
        let detail = people();
        let mut columns = detail.columns.clone();
        columns.push(PgColumn::new("extra_column", "timestamp without time zone"));
        subscriber.add_table(detail.table.clone(), columns);

        let err = ensure_table(&subscriber, &detail).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Condition>(),
            Some(Condition::WrongAttributes { object, .. }) if object == "table public.people"
        ));
        assert!(subscriber.statements().is_empty());
    }

    #[tokio::test]
    async fn test_swapped_column_order_is_drift() {
        let subscriber = FakeSubscriber::new();
        let detail = people();
        let mut columns = detail.columns.clone();
        columns.reverse();
        subscriber.add_table(detail.table.clone(), columns);

        let err = ensure_table(&subscriber, &detail).await.unwrap_err();
        assert!(err.to_string().contains("position 1"));
    }
}
