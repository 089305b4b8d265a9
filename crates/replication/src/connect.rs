//! Connections to the publisher and subscriber databases.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls, Row};
use tracing::{error, info};

use crate::catalog::{PublicationAttributes, PublisherCatalog, SubscriberCatalog};
use crate::credentials::DatabaseCredentials;
use crate::statement::Statement;
use crate::subscription::SubscriptionRecord;
use crate::table::{PgColumn, PgTable};

// Precision metadata is only kept where PostgreSQL accepts it back as a
// type modifier, so the same query serves both drift comparison and DDL.
const COLUMN_SELECT: &str = "
    SELECT c.column_name::text,
           c.column_default::text,
           (c.is_nullable = 'YES'),
           c.data_type::text,
           c.character_maximum_length::int4,
           CASE WHEN c.data_type = 'numeric' THEN c.numeric_precision::int4 END,
           CASE WHEN c.data_type = 'numeric' THEN c.numeric_scale::int4 END,
           CASE WHEN c.data_type IN ('time without time zone', 'time with time zone',
                                     'timestamp without time zone', 'timestamp with time zone',
                                     'interval')
                THEN c.datetime_precision::int4 END
      FROM information_schema.columns c";

/// An open connection owned by exactly one pass.
///
/// The background connection task is aborted when this value is dropped, so
/// every exit path of a pass releases the connection.
pub struct PgConnection {
    client: Client,
    connection: JoinHandle<()>,
    database: String,
}

/// Opens a connection with `credentials` and checks that it answers.
pub async fn connect(credentials: &DatabaseCredentials) -> Result<PgConnection> {
    let database = credentials.database_name.clone();
    let (client, connection) = tokio_postgres::connect(&credentials.connection_string(), NoTls)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to database '{}' at {}:{}",
                database, credentials.host, credentials.port
            )
        })?;

    let task_database = database.clone();
    let connection = tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!("Connection error on database '{task_database}': {e}");
        }
    });

    let conn = PgConnection {
        client,
        connection,
        database,
    };
    conn.client
        .simple_query("SELECT 1")
        .await
        .with_context(|| format!("Failed to ping database '{}'", conn.database))?;

    info!(
        host = %credentials.host,
        port = %credentials.port,
        "connected to {} database",
        conn.database
    );
    Ok(conn)
}

impl Drop for PgConnection {
    fn drop(&mut self) {
        self.connection.abort();
    }
}

fn column_from_row(row: &Row) -> PgColumn {
    PgColumn {
        name: row.get(0),
        default_expression: row.get(1),
        nullable: row.get(2),
        data_type: row.get(3),
        char_max_length: row.get(4),
        numeric_precision: row.get(5),
        numeric_scale: row.get(6),
        datetime_precision: row.get(7),
    }
}

#[async_trait]
impl PublisherCatalog for PgConnection {
    async fn publication_attributes(
        &self,
        publication: &str,
    ) -> Result<Option<PublicationAttributes>> {
        let query = "
            SELECT p.puballtables,
                   (p.pubinsert AND p.pubupdate AND p.pubdelete AND p.pubtruncate),
                   (SELECT COUNT(*) FROM pg_publication_namespace pn WHERE pn.pnpubid = p.oid)
              FROM pg_publication p
             WHERE p.pubname = $1";
        let row = self
            .client
            .query_opt(query, &[&publication])
            .await
            .context("Failed to read publication attributes")?;

        Ok(row.map(|row| PublicationAttributes {
            all_tables: row.get(0),
            all_operations: row.get(1),
            schema_memberships: row.get(2),
        }))
    }

    async fn publication_tables(&self, publication: &str) -> Result<Vec<PgTable>> {
        let query = "
            SELECT n.nspname::text, r.relname::text
              FROM pg_publication p
              JOIN pg_publication_rel pr ON p.oid = pr.prpubid
              JOIN pg_class r ON pr.prrelid = r.oid
              JOIN pg_namespace n ON r.relnamespace = n.oid
             WHERE p.pubname = $1
             ORDER BY n.nspname, r.relname";
        let rows = self
            .client
            .query(query, &[&publication])
            .await
            .context("Failed to list publication tables")?;

        Ok(rows
            .iter()
            .map(|row| PgTable::new(row.get::<_, String>(0), row.get::<_, String>(1)))
            .collect())
    }

    async fn published_columns(&self, publication: &str, table: &PgTable) -> Result<Vec<PgColumn>> {
        let query = format!(
            "{COLUMN_SELECT}
              JOIN pg_publication_tables pt
                ON c.table_schema = pt.schemaname
               AND c.table_name = pt.tablename
               AND c.column_name = ANY(pt.attnames)
             WHERE pt.pubname = $1 AND c.table_schema::text = $2 AND c.table_name::text = $3
             ORDER BY c.ordinal_position"
        );
        let rows = self
            .client
            .query(&query, &[&publication, &table.schema, &table.name])
            .await
            .with_context(|| format!("Failed to read published columns of {table}"))?;

        Ok(rows.iter().map(column_from_row).collect())
    }
}

#[async_trait]
impl SubscriberCatalog for PgConnection {
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let row = self
            .client
            .query_opt("SELECT true FROM pg_namespace WHERE nspname = $1", &[&schema])
            .await
            .with_context(|| format!("Failed to look up schema '{schema}'"))?;
        Ok(row.is_some())
    }

    async fn table_exists(&self, table: &PgTable) -> Result<bool> {
        let row = self
            .client
            .query_opt(
                "SELECT true FROM pg_tables WHERE schemaname = $1 AND tablename = $2",
                &[&table.schema, &table.name],
            )
            .await
            .with_context(|| format!("Failed to look up table {table}"))?;
        Ok(row.is_some())
    }

    async fn table_columns(&self, table: &PgTable) -> Result<Vec<PgColumn>> {
        let query = format!(
            "{COLUMN_SELECT}
             WHERE c.table_schema::text = $1 AND c.table_name::text = $2
             ORDER BY c.ordinal_position"
        );
        let rows = self
            .client
            .query(&query, &[&table.schema, &table.name])
            .await
            .with_context(|| format!("Failed to read columns of {table}"))?;

        Ok(rows.iter().map(column_from_row).collect())
    }

    async fn subscription(&self, name: &str) -> Result<Option<SubscriptionRecord>> {
        let query = "
            SELECT s.subname::text, s.subenabled, s.subconninfo
              FROM pg_subscription s
             WHERE s.subname = $1
               AND s.subdbid = (SELECT oid FROM pg_database WHERE datname = current_database())";
        let row = self
            .client
            .query_opt(query, &[&name])
            .await
            .with_context(|| format!("Failed to look up subscription '{name}'"))?;

        Ok(row.map(|row| SubscriptionRecord {
            name: row.get(0),
            enabled: row.get(1),
            connection_info: row.get(2),
        }))
    }

    // Callers attach the statement to the error; the SQL itself may carry a
    // password and stays out of it.
    async fn execute(&self, statement: &Statement) -> Result<()> {
        self.client.batch_execute(&statement.to_sql()).await?;
        Ok(())
    }
}
