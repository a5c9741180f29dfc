use std::fmt::Debug;

use async_trait::async_trait;

use crate::query::sql::{Dialect, Statement};

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct TableStatsRecord {
    pub table_name: String,
    pub row_estimate: i64,
    pub total_size: Option<String>,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct ColumnRecord {
    pub column_name: String,
    pub data_type: String,
    pub nullable: bool,
    pub has_default: bool,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct KeyConstraintRecord {
    pub constraint_name: String,
    /// `PRIMARY KEY` or `UNIQUE`
    pub constraint_type: String,
    pub column_name: String,
}

#[derive(sqlx::FromRow, Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyRecord {
    pub column_name: String,
    pub foreign_table: String,
    pub foreign_column: Option<String>,
}

pub const PRIMARY_KEY: &str = "PRIMARY KEY";
pub const UNIQUE: &str = "UNIQUE";

/// Wrapper for conversion of database-specific error codes into actual errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unique constraint violated: {0}")]
    UniqueConstraintViolation(sqlx::Error),
    #[error("Foreign key constraint violated: {0}")]
    FKConstraintViolation(sqlx::Error),
    #[error("Not-null constraint violated: {0}")]
    NotNullViolation(sqlx::Error),

    /// A single-row mutation matched more than one row and was rolled back
    #[error("Statement would have affected {0} rows, rolled back")]
    AmbiguousMutation(u64),

    // All other errors
    #[error(transparent)]
    SqlxError(sqlx::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[async_trait]
pub trait Repository: Send + Sync + Debug {
    fn dialect(&self) -> Dialect;

    async fn schema_exists(&self, schema_name: &str) -> Result<bool, Error>;

    /// Row estimates and sizes of partitioned/chunked tables, with children
    /// summed onto their parent
    async fn list_partitioned_table_stats(
        &self,
        schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>, Error>;

    async fn list_plain_table_stats(
        &self,
        schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>, Error>;

    /// Columns of a readable table, in declaration order. Empty if the table
    /// doesn't exist or can't be read.
    async fn get_columns(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<ColumnRecord>, Error>;

    /// Primary key and unique constraint columns, grouped by constraint and
    /// in key order within each
    async fn get_key_constraints(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<KeyConstraintRecord>, Error>;

    async fn get_foreign_keys(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<ForeignKeyRecord>, Error>;

    async fn fetch_count(&self, statement: &Statement) -> Result<i64, Error>;

    /// Every cell comes back as text (or NULL)
    async fn fetch_rows(
        &self,
        statement: &Statement,
    ) -> Result<Vec<Vec<Option<String>>>, Error>;

    /// Run a single-row mutation in its own transaction, returning the number
    /// of affected rows (0 or 1)
    async fn execute_mutation(&self, statement: &Statement) -> Result<u64, Error>;
}
