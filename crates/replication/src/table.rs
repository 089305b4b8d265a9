//! Table identities and column shapes, plus the DDL derived from them.

use pg_escape::quote_identifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest identifier PostgreSQL keeps, in bytes (`NAMEDATALEN - 1`).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// A replicated relation, identified by schema and table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PgTable {
    pub schema: String,
    pub name: String,
}

impl PgTable {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// `schema.name` with both parts quoted for use in SQL.
    pub fn quoted(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }

    /// The name this table is moved to when `publication` is retired.
    ///
    /// Cut to [`MAX_IDENTIFIER_LEN`] bytes the way the server truncates
    /// identifiers, so lookups and the rename agree on the name.
    pub fn archived(&self, publication: &str) -> PgTable {
        let mut name = format!("{}_{}", self.name, publication);
        name.truncate(identifier_prefix_len(&name));
        PgTable::new(self.schema.clone(), name)
    }
}

/// Length of the longest prefix of `name` that fits an identifier and ends
/// on a char boundary.
fn identifier_prefix_len(name: &str) -> usize {
    if name.len() <= MAX_IDENTIFIER_LEN {
        return name.len();
    }
    (0..=MAX_IDENTIFIER_LEN)
        .rev()
        .find(|&end| name.is_char_boundary(end))
        .unwrap_or(0)
}

impl fmt::Display for PgTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// One column as reported by `information_schema.columns`.
///
/// Optional metadata stays `None` when the catalog reports NULL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgColumn {
    pub name: String,
    pub default_expression: Option<String>,
    pub nullable: bool,
    pub data_type: String,
    pub char_max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
}

impl PgColumn {
    /// A nullable column without default or type modifiers.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_expression: None,
            nullable: true,
            data_type: data_type.into(),
            char_max_length: None,
            numeric_precision: None,
            numeric_scale: None,
            datetime_precision: None,
        }
    }

    /// Column definition for `CREATE TABLE`.
    ///
    /// The type modifier comes from the first present of character length,
    /// numeric precision/scale and datetime precision, followed by
    /// `NOT NULL` and then `DEFAULT`.
    pub fn definition(&self) -> String {
        let mut def = format!("{} {}", quote_identifier(&self.name), self.type_with_modifier());
        if !self.nullable {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_expression {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        def
    }

    fn type_modifier(&self) -> Option<String> {
        if let Some(length) = self.char_max_length {
            return Some(format!("({length})"));
        }
        if let Some(precision) = self.numeric_precision {
            return Some(match self.numeric_scale {
                Some(scale) => format!("({precision}, {scale})"),
                None => format!("({precision})"),
            });
        }
        self.datetime_precision
            .map(|precision| format!("({precision})"))
    }

    fn type_with_modifier(&self) -> String {
        let Some(modifier) = self.type_modifier() else {
            return self.data_type.clone();
        };
        // "timestamp without time zone" takes its precision after the first word
        for zone in [" with time zone", " without time zone"] {
            if let Some(base) = self.data_type.strip_suffix(zone) {
                return format!("{base}{modifier}{zone}");
            }
        }
        format!("{}{modifier}", self.data_type)
    }

    fn describe_difference(&self, other: &PgColumn) -> Option<String> {
        let field = if self.name != other.name {
            "name"
        } else if self.data_type != other.data_type {
            "data type"
        } else if self.nullable != other.nullable {
            "nullability"
        } else if self.default_expression != other.default_expression {
            "default"
        } else if self.char_max_length != other.char_max_length {
            "character length"
        } else if self.numeric_precision != other.numeric_precision {
            "numeric precision"
        } else if self.numeric_scale != other.numeric_scale {
            "numeric scale"
        } else if self.datetime_precision != other.datetime_precision {
            "datetime precision"
        } else {
            return None;
        };
        Some(format!(
            "{field} of column '{}' differs (expected {}, found {})",
            self.name,
            self.definition(),
            other.definition()
        ))
    }
}

/// A table together with its columns in physical order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PgTableDetail {
    pub table: PgTable,
    pub columns: Vec<PgColumn>,
}

impl PgTableDetail {
    pub fn new(table: PgTable, columns: Vec<PgColumn>) -> Self {
        Self { table, columns }
    }

    pub fn column_definitions(&self) -> String {
        self.columns
            .iter()
            .map(PgColumn::definition)
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn create_statement(&self) -> String {
        format!(
            "CREATE TABLE {} ({})",
            self.table.quoted(),
            self.column_definitions()
        )
    }

    /// Compares `actual` against these columns position by position and
    /// describes the first mismatch. Column order matters.
    pub fn first_difference(&self, actual: &[PgColumn]) -> Option<String> {
        if self.columns.len() != actual.len() {
            return Some(format!(
                "expected {} columns, found {}",
                self.columns.len(),
                actual.len()
            ));
        }
        self.columns
            .iter()
            .zip(actual)
            .enumerate()
            .find_map(|(position, (expected, found))| {
                expected
                    .describe_difference(found)
                    .map(|difference| format!("position {}: {difference}", position + 1))
            })
    }
}
