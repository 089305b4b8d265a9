//! DDL and DCL statements issued against the subscriber.

use pg_escape::{quote_identifier, quote_literal};
use std::fmt;

use crate::table::{PgTable, PgTableDetail};

/// A change to the subscriber, rendered to SQL by [`Statement::to_sql`].
///
/// `Debug` and `Display` never show connection strings since they carry the
/// publisher password.
#[derive(Clone, PartialEq, Eq)]
pub enum Statement {
    CreateSchema {
        schema: String,
    },
    CreateTable(PgTableDetail),
    RenameTable {
        table: PgTable,
        new_name: String,
    },
    CreateSubscription {
        name: String,
        connection_info: String,
    },
    AlterSubscriptionConnection {
        name: String,
        connection_info: String,
    },
    EnableSubscription {
        name: String,
    },
    DisableSubscription {
        name: String,
    },
}

impl Statement {
    pub fn to_sql(&self) -> String {
        match self {
            Statement::CreateSchema { schema } => {
                format!("CREATE SCHEMA IF NOT EXISTS {}", quote_identifier(schema))
            }
            Statement::CreateTable(detail) => detail.create_statement(),
            Statement::RenameTable { table, new_name } => format!(
                "ALTER TABLE {} RENAME TO {}",
                table.quoted(),
                quote_identifier(new_name)
            ),
            Statement::CreateSubscription {
                name,
                connection_info,
            } => format!(
                "CREATE SUBSCRIPTION {} CONNECTION {} PUBLICATION {} WITH (connect = false)",
                quote_identifier(name),
                quote_literal(connection_info),
                quote_identifier(name)
            ),
            Statement::AlterSubscriptionConnection {
                name,
                connection_info,
            } => format!(
                "ALTER SUBSCRIPTION {} CONNECTION {}",
                quote_identifier(name),
                quote_literal(connection_info)
            ),
            Statement::EnableSubscription { name } => {
                format!("ALTER SUBSCRIPTION {} ENABLE", quote_identifier(name))
            }
            Statement::DisableSubscription { name } => {
                format!("ALTER SUBSCRIPTION {} DISABLE", quote_identifier(name))
            }
        }
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateSchema { schema } => write!(f, "create schema {schema}"),
            Statement::CreateTable(detail) => write!(f, "create table {}", detail.table),
            Statement::RenameTable { table, new_name } => {
                write!(f, "rename table {table} to {new_name}")
            }
            Statement::CreateSubscription { name, .. } => write!(f, "create subscription {name}"),
            Statement::AlterSubscriptionConnection { name, .. } => {
                write!(f, "alter connection of subscription {name}")
            }
            Statement::EnableSubscription { name } => write!(f, "enable subscription {name}"),
            Statement::DisableSubscription { name } => write!(f, "disable subscription {name}"),
        }
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Statement({self})")
    }
}
