use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use tracing::{debug, warn};

use crate::data_types::TableKey;
use crate::implement_repository;
use crate::query::sql::{qualified_table, quote_identifier, Dialect, Statement};

use super::{
    default::RepositoryQueries,
    interface::{
        ColumnRecord, Error, ForeignKeyRecord, KeyConstraintRecord, Repository, Result,
        TableStatsRecord,
    },
};

/// SQLite store. "Schemas" are the attached databases (`main`, `temp` or
/// anything added with `ATTACH`).
#[derive(Debug)]
pub struct SqliteRepository {
    pub executor: Pool<Sqlite>,
}

impl SqliteRepository {
    pub const DIALECT: Dialect = Dialect::SQLITE;
    pub const QUERIES: RepositoryQueries = RepositoryQueries {
        schema_exists: "SELECT COUNT(*) FROM pragma_database_list WHERE name = $1",
        partitioned_table_stats: None,
        // A lone INTEGER PRIMARY KEY aliases the rowid, so it fills itself in
        columns: r#"
        SELECT
            name AS column_name,
            type AS data_type,
            ("notnull" = 0 AND pk = 0) AS nullable,
            (dflt_value IS NOT NULL OR (
                pk = 1
                AND upper(type) = 'INTEGER'
                AND (SELECT COUNT(*) FROM pragma_table_info($2, $1) WHERE pk > 0) = 1
            )) AS has_default
        FROM pragma_table_info($2, $1)
        ORDER BY cid"#,
        key_constraints: r#"
        SELECT constraint_name, constraint_type, column_name FROM (
            SELECT
                'primary' AS constraint_name,
                'PRIMARY KEY' AS constraint_type,
                name AS column_name,
                pk AS position
            FROM pragma_table_info($2, $1)
            WHERE pk > 0
            UNION ALL
            SELECT
                il.name,
                'UNIQUE',
                ii.name,
                ii.seqno
            FROM pragma_index_list($2, $1) AS il
            INNER JOIN pragma_index_info(il.name, $1) AS ii
            WHERE il."unique" = 1 AND il.origin <> 'pk'
        )
        ORDER BY constraint_type, constraint_name, position"#,
        foreign_keys: r#"
        SELECT
            "from" AS column_name,
            "table" AS foreign_table,
            "to" AS foreign_column
        FROM pragma_foreign_key_list($2, $1)
        ORDER BY id, seq"#,
    };

    pub async fn try_new(
        dsn: String,
        max_connections: u32,
    ) -> std::result::Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&dsn)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if dsn.contains(":memory:") {
            // Every connection would get its own empty database otherwise
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        Ok(Self { executor: pool })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.sqlite.org/rescode.html
            let message = d.message();

            // sqlx doesn't reliably surface the extended result codes for
            // these, so match on the message instead
            if message.contains("FOREIGN KEY constraint failed") {
                return Error::FKConstraintViolation(error);
            }
            if message.contains("UNIQUE constraint failed") {
                return Error::UniqueConstraintViolation(error);
            }
            if message.contains("NOT NULL constraint failed") {
                return Error::NotNullViolation(error);
            }
        }
        Error::SqlxError(error)
    }

    /// Exact counts: SQLite keeps no statistics worth estimating from, and
    /// reports no per-table size
    async fn plain_table_stats(
        &self,
        schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>, Error> {
        let names: Vec<String> = sqlx::query_scalar(&format!(
            r#"SELECT name FROM {}.sqlite_master
            WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY name"#,
            quote_identifier(schema_name)
        ))
        .fetch_all(&self.executor)
        .await
        .map_err(Self::interpret_error)?;

        let mut stats = Vec::with_capacity(names.len());
        for table_name in names {
            let key = TableKey::new(schema_name, table_name);
            let row_estimate: i64 = sqlx::query_scalar(&format!(
                "SELECT COUNT(*) FROM {}",
                qualified_table(&key)
            ))
            .fetch_one(&self.executor)
            .await
            .map_err(Self::interpret_error)?;

            stats.push(TableStatsRecord {
                table_name: key.table_name,
                row_estimate,
                total_size: None,
            });
        }

        Ok(stats)
    }
}

implement_repository!(SqliteRepository, Sqlite);
