//! Automatic Schema Synchronization
//!
//! Table schemas are declared in code; on startup any column missing from an
//! existing table is added with `ALTER TABLE ... ADD COLUMN`.
//!
//! Three-phase initialization:
//! 1. **CREATE TABLE IF NOT EXISTS** - Create missing tables
//! 2. **Auto-Sync** - Add missing columns (THIS MODULE)
//! 3. **Manual Migrations** - Data transformations (migrations.rs)
//!
//! Type and constraint changes are reported as drift and left to a manual
//! migration; SQLite cannot alter them in place.

use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint
    pub primary_key: bool,
    /// DEFAULT value
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            default_value: None,
        }
    }

    /// Mark column as PRIMARY KEY
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Set DEFAULT value (SQL literal)
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Column clause for `ALTER TABLE ... ADD COLUMN`
    ///
    /// SQLite rejects NOT NULL without a default on ADD COLUMN, so NOT NULL
    /// is only emitted when a default exists.
    pub fn add_column_sql(&self) -> String {
        let mut sql = format!("{} {}", self.name, self.sql_type);
        if let Some(default) = &self.default_value {
            if self.not_null {
                sql.push_str(" NOT NULL");
            }
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Actual column from PRAGMA table_info
#[derive(Debug, Clone)]
pub struct ActualColumn {
    pub name: String,
    pub type_name: String,
    pub not_null: bool,
    pub pk: bool,
}

/// Schema drift detected between expected and actual schema
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaDrift {
    /// Column missing from database (auto-fixed)
    MissingColumn { table: String, column: String },
    /// Column type mismatch (requires manual migration)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
}

/// Defines expected schema for a database table
pub trait TableSchema {
    /// Table name in database
    fn table_name() -> &'static str;

    /// Expected column definitions
    fn expected_columns() -> Vec<ColumnDefinition>;
}

/// Schema introspection and column sync
pub struct SchemaSync;

impl SchemaSync {
    /// Read actual columns using PRAGMA table_info
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        Ok(rows
            .iter()
            .map(|row| ActualColumn {
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect())
    }

    /// Compare expected and actual columns
    pub fn detect_drift(
        table: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();
        for column in expected {
            match actual.iter().find(|a| a.name.eq_ignore_ascii_case(&column.name)) {
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table.to_string(),
                    column: column.name.clone(),
                }),
                Some(found) if !found.type_name.eq_ignore_ascii_case(&column.sql_type) => {
                    drift.push(SchemaDrift::TypeMismatch {
                        table: table.to_string(),
                        column: column.name.clone(),
                        expected: column.sql_type.clone(),
                        actual: found.type_name.clone(),
                    })
                }
                Some(_) => {}
            }
        }
        drift
    }

    /// Add missing columns to one table, returns the number of columns added
    pub async fn sync_table<T: TableSchema>(pool: &SqlitePool) -> Result<usize> {
        let table = T::table_name();
        let actual = Self::introspect_table(pool, table).await?;
        if actual.is_empty() {
            warn!(table, "Table does not exist, skipping schema sync");
            return Ok(0);
        }

        let expected = T::expected_columns();
        let mut added = 0;
        for drift in Self::detect_drift(table, &expected, &actual) {
            match drift {
                SchemaDrift::MissingColumn { column, .. } => {
                    let Some(def) = expected.iter().find(|c| c.name == column) else {
                        continue;
                    };
                    let sql = format!("ALTER TABLE {} ADD COLUMN {}", table, def.add_column_sql());
                    sqlx::query(&sql).execute(pool).await?;
                    info!(table, column = %def.name, "Added missing column");
                    added += 1;
                }
                SchemaDrift::TypeMismatch {
                    column,
                    expected,
                    actual,
                    ..
                } => {
                    warn!(
                        table,
                        column = %column,
                        expected = %expected,
                        actual = %actual,
                        "Column type mismatch, manual migration required"
                    );
                }
            }
        }

        Ok(added)
    }
}
