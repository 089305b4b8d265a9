//! In-memory publisher and subscriber catalogs.
//!
//! The subscriber applies each [`Statement`] to its own state the way
//! PostgreSQL would, including failing on missing objects, and records the
//! statements that succeeded.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::catalog::{PublicationAttributes, PublisherCatalog, SubscriberCatalog};
use crate::credentials::{CredentialResolver, CredentialsRef, SecretData};
use crate::statement::Statement;
use crate::subscription::SubscriptionRecord;
use crate::table::{PgColumn, PgTable, MAX_IDENTIFIER_LEN};

/// Attributes of a publication that passes validation.
pub fn eligible_publication() -> PublicationAttributes {
    PublicationAttributes {
        all_tables: false,
        all_operations: true,
        schema_memberships: 0,
    }
}

#[derive(Default)]
struct PublisherState {
    publications: BTreeMap<String, PublicationAttributes>,
    tables: BTreeMap<String, BTreeMap<PgTable, Vec<PgColumn>>>,
}

#[derive(Default)]
pub struct FakePublisher {
    state: Mutex<PublisherState>,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, PublisherState> {
        self.state.lock().expect("publisher state poisoned")
    }

    pub fn add_publication(&self, name: &str, attributes: PublicationAttributes) {
        self.state()
            .publications
            .insert(name.to_string(), attributes);
    }

    /// Attaches `table` to `publication`, exposing `columns`.
    pub fn add_table(&self, publication: &str, table: PgTable, columns: Vec<PgColumn>) {
        self.state()
            .tables
            .entry(publication.to_string())
            .or_default()
            .insert(table, columns);
    }

    pub fn remove_table(&self, publication: &str, table: &PgTable) {
        if let Some(tables) = self.state().tables.get_mut(publication) {
            tables.remove(table);
        }
    }
}

#[async_trait]
impl PublisherCatalog for FakePublisher {
    async fn publication_attributes(
        &self,
        publication: &str,
    ) -> Result<Option<PublicationAttributes>> {
        Ok(self.state().publications.get(publication).copied())
    }

    async fn publication_tables(&self, publication: &str) -> Result<Vec<PgTable>> {
        Ok(self
            .state()
            .tables
            .get(publication)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn published_columns(&self, publication: &str, table: &PgTable) -> Result<Vec<PgColumn>> {
        Ok(self
            .state()
            .tables
            .get(publication)
            .and_then(|tables| tables.get(table))
            .cloned()
            .unwrap_or_default())
    }
}

type FailurePredicate = Box<dyn Fn(&Statement) -> bool + Send + Sync>;

#[derive(Default)]
struct SubscriberState {
    schemas: BTreeSet<String>,
    tables: BTreeMap<PgTable, Vec<PgColumn>>,
    subscriptions: BTreeMap<String, SubscriptionRecord>,
    statements: Vec<Statement>,
    fail_on: Option<FailurePredicate>,
}

impl SubscriberState {
    fn apply(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::CreateSchema { schema } => {
                self.schemas.insert(schema.clone());
            }
            Statement::CreateTable(detail) => {
                if !self.schemas.contains(&detail.table.schema) {
                    bail!("schema \"{}\" does not exist", detail.table.schema);
                }
                if self.tables.contains_key(&detail.table) {
                    bail!("relation \"{}\" already exists", detail.table);
                }
                self.tables
                    .insert(detail.table.clone(), detail.columns.clone());
            }
            Statement::RenameTable { table, new_name } => {
                check_identifier(new_name)?;
                let Some(columns) = self.tables.remove(table) else {
                    bail!("relation \"{table}\" does not exist");
                };
                let renamed = PgTable::new(table.schema.clone(), new_name.clone());
                if self.tables.contains_key(&renamed) {
                    self.tables.insert(table.clone(), columns);
                    bail!("relation \"{renamed}\" already exists");
                }
                self.tables.insert(renamed, columns);
            }
            Statement::CreateSubscription {
                name,
                connection_info,
            } => {
                if self.subscriptions.contains_key(name) {
                    bail!("subscription \"{name}\" already exists");
                }
                self.subscriptions.insert(
                    name.clone(),
                    SubscriptionRecord {
                        name: name.clone(),
                        enabled: false,
                        connection_info: connection_info.clone(),
                    },
                );
            }
            Statement::AlterSubscriptionConnection {
                name,
                connection_info,
            } => self.subscription_mut(name)?.connection_info = connection_info.clone(),
            Statement::EnableSubscription { name } => self.subscription_mut(name)?.enabled = true,
            Statement::DisableSubscription { name } => {
                self.subscription_mut(name)?.enabled = false
            }
        }
        Ok(())
    }

    fn subscription_mut(&mut self, name: &str) -> Result<&mut SubscriptionRecord> {
        match self.subscriptions.get_mut(name) {
            Some(record) => Ok(record),
            None => bail!("subscription \"{name}\" does not exist"),
        }
    }
}

#[derive(Default)]
pub struct FakeSubscriber {
    state: Mutex<SubscriberState>,
}

impl FakeSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, SubscriberState> {
        self.state.lock().expect("subscriber state poisoned")
    }

    pub fn add_schema(&self, schema: &str) {
        self.state().schemas.insert(schema.to_string());
    }

    /// Adds `table` and its schema.
    pub fn add_table(&self, table: PgTable, columns: Vec<PgColumn>) {
        let mut state = self.state();
        state.schemas.insert(table.schema.clone());
        state.tables.insert(table, columns);
    }

    pub fn add_subscription(&self, record: SubscriptionRecord) {
        self.state()
            .subscriptions
            .insert(record.name.clone(), record);
    }

    /// Makes every statement matching `predicate` fail without effect.
    pub fn fail_on(&self, predicate: impl Fn(&Statement) -> bool + Send + Sync + 'static) {
        self.state().fail_on = Some(Box::new(predicate));
    }

    pub fn clear_failure(&self) {
        self.state().fail_on = None;
    }

    /// Statements applied so far, in order.
    pub fn statements(&self) -> Vec<Statement> {
        self.state().statements.clone()
    }

    pub fn columns_of(&self, table: &PgTable) -> Option<Vec<PgColumn>> {
        self.state().tables.get(table).cloned()
    }

    pub fn subscription_record(&self, name: &str) -> Option<SubscriptionRecord> {
        self.state().subscriptions.get(name).cloned()
    }
}

/// Over-long names are rejected, as the server does for `name` parameters.
fn check_identifier(name: &str) -> Result<()> {
    if name.len() > MAX_IDENTIFIER_LEN {
        bail!("identifier too long: \"{name}\"");
    }
    Ok(())
}

#[async_trait]
impl SubscriberCatalog for FakeSubscriber {
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        Ok(self.state().schemas.contains(schema))
    }

    async fn table_exists(&self, table: &PgTable) -> Result<bool> {
        check_identifier(&table.name)?;
        Ok(self.state().tables.contains_key(table))
    }

    async fn table_columns(&self, table: &PgTable) -> Result<Vec<PgColumn>> {
        Ok(self.state().tables.get(table).cloned().unwrap_or_default())
    }

    async fn subscription(&self, name: &str) -> Result<Option<SubscriptionRecord>> {
        Ok(self.state().subscriptions.get(name).cloned())
    }

    async fn execute(&self, statement: &Statement) -> Result<()> {
        let mut state = self.state();
        if state
            .fail_on
            .as_ref()
            .is_some_and(|predicate| predicate(statement))
        {
            bail!("injected failure");
        }
        state.apply(statement)?;
        state.statements.push(statement.clone());
        Ok(())
    }
}

/// Resolves references from a fixed map of string secrets.
#[derive(Default)]
pub struct StaticResolver {
    secrets: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: &str, values: &[(&str, &str)]) {
        let values = values
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        self.secrets
            .lock()
            .expect("resolver state poisoned")
            .insert(reference.to_string(), values);
    }
}

#[async_trait]
impl CredentialResolver for StaticResolver {
    async fn secret_data(&self, reference: &CredentialsRef) -> Result<SecretData> {
        let secrets = self.secrets.lock().expect("resolver state poisoned");
        match secrets.get(reference.as_str()) {
            Some(values) => Ok(SecretData::Strings(values.clone())),
            None => bail!("secret '{reference}' not found"),
        }
    }
}
