use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Row};
use tracing::{debug, warn};

use crate::implement_repository;
use crate::query::sql::{Dialect, Statement};

use super::{
    default::RepositoryQueries,
    interface::{
        ColumnRecord, Error, ForeignKeyRecord, KeyConstraintRecord, Repository, Result,
        TableStatsRecord,
    },
};

#[derive(Debug)]
pub struct PostgresRepository {
    pub executor: PgPool,
}

impl PostgresRepository {
    pub const DIALECT: Dialect = Dialect::POSTGRES;
    pub const QUERIES: RepositoryQueries = RepositoryQueries {
        schema_exists: "SELECT COUNT(*) FROM pg_namespace WHERE nspname = $1",
        // Declarative partitions and inheritance children (which is also how
        // TimescaleDB lays out hypertable chunks) are summed onto the parent
        partitioned_table_stats: Some(
            r#"
        SELECT
            CAST(parent.relname AS TEXT) AS table_name,
            CAST(SUM(GREATEST(child.reltuples, 0)) AS BIGINT) AS row_estimate,
            pg_size_pretty(CAST(SUM(pg_total_relation_size(child.oid)) AS BIGINT)) AS total_size
        FROM pg_inherits
        INNER JOIN pg_class parent ON parent.oid = pg_inherits.inhparent
        INNER JOIN pg_namespace ON pg_namespace.oid = parent.relnamespace
        INNER JOIN pg_class child ON child.oid = pg_inherits.inhrelid
        WHERE pg_namespace.nspname = $1
        GROUP BY parent.relname
        ORDER BY parent.relname"#,
        ),
        columns: r#"
        SELECT
            CAST(a.attname AS TEXT) AS column_name,
            format_type(a.atttypid, a.atttypmod) AS data_type,
            NOT a.attnotnull AS nullable,
            (a.atthasdef OR a.attidentity <> '' OR a.attgenerated <> '') AS has_default
        FROM pg_attribute a
        INNER JOIN pg_class c ON c.oid = a.attrelid
        INNER JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
            AND c.relname = $2
            AND a.attnum > 0
            AND NOT a.attisdropped
            AND has_table_privilege(c.oid, 'SELECT')
        ORDER BY a.attnum"#,
        key_constraints: r#"
        SELECT
            CAST(tc.constraint_name AS TEXT) AS constraint_name,
            CAST(tc.constraint_type AS TEXT) AS constraint_type,
            CAST(kcu.column_name AS TEXT) AS column_name
        FROM information_schema.table_constraints tc
        INNER JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_schema = tc.constraint_schema
            AND kcu.constraint_name = tc.constraint_name
            AND kcu.table_name = tc.table_name
        WHERE tc.table_schema = $1
            AND tc.table_name = $2
            AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
        ORDER BY tc.constraint_type, tc.constraint_name, kcu.ordinal_position"#,
        foreign_keys: r#"
        SELECT
            CAST(kcu.column_name AS TEXT) AS column_name,
            CAST(ccu.table_name AS TEXT) AS foreign_table,
            CAST(ccu.column_name AS TEXT) AS foreign_column
        FROM information_schema.table_constraints tc
        INNER JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_schema = tc.constraint_schema
            AND kcu.constraint_name = tc.constraint_name
            AND kcu.table_name = tc.table_name
        INNER JOIN information_schema.constraint_column_usage ccu
            ON ccu.constraint_schema = tc.constraint_schema
            AND ccu.constraint_name = tc.constraint_name
        WHERE tc.table_schema = $1
            AND tc.table_name = $2
            AND tc.constraint_type = 'FOREIGN KEY'
        ORDER BY kcu.ordinal_position"#,
    };

    const PLAIN_TABLE_STATS: &'static str = r#"
        SELECT
            CAST(c.relname AS TEXT) AS table_name,
            CAST(GREATEST(c.reltuples, 0) AS BIGINT) AS row_estimate,
            pg_size_pretty(pg_total_relation_size(c.oid)) AS total_size
        FROM pg_class c
        INNER JOIN pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1
            AND c.relkind IN ('r', 'p', 'v', 'm', 'f')
        ORDER BY c.relname"#;

    pub async fn try_new(
        dsn: String,
        max_connections: u32,
    ) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .idle_timeout(Duration::from_millis(30000))
            .test_before_acquire(true)
            .connect(&dsn)
            .await?;

        Ok(Self { executor: pool })
    }

    pub fn interpret_error(error: sqlx::Error) -> Error {
        if let sqlx::Error::Database(ref d) = error {
            // Reference: https://www.postgresql.org/docs/current/errcodes-appendix.html
            if let Some(code) = d.code() {
                match code.as_ref() {
                    "23505" => return Error::UniqueConstraintViolation(error),
                    "23503" => return Error::FKConstraintViolation(error),
                    "23502" => return Error::NotNullViolation(error),
                    _ => {}
                }
            }
        }
        Error::SqlxError(error)
    }

    async fn plain_table_stats(
        &self,
        schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>, Error> {
        let stats = sqlx::query_as(Self::PLAIN_TABLE_STATS)
            .bind(schema_name)
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err(Self::interpret_error)?;
        Ok(stats)
    }
}

implement_repository!(PostgresRepository, Postgres);
