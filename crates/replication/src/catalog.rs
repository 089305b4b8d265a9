//! Catalog access used by the convergence stages.
//!
//! The stages only talk to the databases through these traits so they can
//! run against [`crate::PgConnection`] or against the in-memory catalogs in
//! [`crate::testing`].

use anyhow::Result;
use async_trait::async_trait;

use crate::statement::Statement;
use crate::subscription::SubscriptionRecord;
use crate::table::{PgColumn, PgTable};

/// Replication-relevant flags of a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicationAttributes {
    /// Published `FOR ALL TABLES`.
    pub all_tables: bool,
    /// Publishes insert, update, delete and truncate.
    pub all_operations: bool,
    /// Number of `FOR TABLES IN SCHEMA` memberships.
    pub schema_memberships: i64,
}

/// Read-only view of the publisher.
#[async_trait]
pub trait PublisherCatalog: Send + Sync {
    /// Returns `None` when no publication has this name.
    async fn publication_attributes(&self, publication: &str)
        -> Result<Option<PublicationAttributes>>;

    /// Tables attached to the publication.
    async fn publication_tables(&self, publication: &str) -> Result<Vec<PgTable>>;

    /// Columns of `table` that the publication exposes, in physical order.
    async fn published_columns(&self, publication: &str, table: &PgTable) -> Result<Vec<PgColumn>>;
}

/// The subscriber, which the stages both inspect and change.
#[async_trait]
pub trait SubscriberCatalog: Send + Sync {
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    async fn table_exists(&self, table: &PgTable) -> Result<bool>;

    /// All columns of `table`, in physical order.
    async fn table_columns(&self, table: &PgTable) -> Result<Vec<PgColumn>>;

    /// Returns `None` when the subscription does not exist in this database.
    async fn subscription(&self, name: &str) -> Result<Option<SubscriptionRecord>>;

    /// Applies one DDL or DCL statement.
    async fn execute(&self, statement: &Statement) -> Result<()>;
}
