/// Default implementation for a Repository that factors out common
/// query patterns between Postgres and SQLite.
///
/// Usage:
///
/// The struct has to have certain fields and items, since this macro relies on them:
///
/// ```ignore
/// pub struct MyRepository {
///     pub executor: sqlx::Pool<sqlx::SqlxDatabaseType>
/// }
///
/// impl MyRepository {
///     pub const DIALECT: Dialect = Dialect::POSTGRES;
///     pub const QUERIES: RepositoryQueries = RepositoryQueries {
///         columns: "SELECT ...",
///         ...
///     };
///     pub fn interpret_error(error: sqlx::Error) -> Error {
///         // Turn database-specific error codes into the Error enum values
///         // like UniqueConstraintViolation/FKConstraintViolation
///     }
///     async fn plain_table_stats(&self, schema_name: &str) -> Result<Vec<TableStatsRecord>, Error> {
///         // Catalogs differ too much to share this one
///     }
/// }
///
/// implement_repository!(MyRepository, sqlx::SqlxDatabaseType);
/// ```
///
/// A generic `Pool<Any>` or an implementation generic over `sqlx::Database`
/// would avoid the macro, but both run into borrow checker trouble with
/// the argument types (https://github.com/launchbadge/sqlx/issues/1978),
/// so the shared code is stamped out per backend instead.

/// Queries that are different between SQLite and PG. Every one of them
/// binds the schema name as `$1` and, where relevant, the table name as `$2`.
pub struct RepositoryQueries {
    pub schema_exists: &'static str,
    /// `None` if the store has no notion of partitioned tables
    pub partitioned_table_stats: Option<&'static str>,
    pub columns: &'static str,
    pub key_constraints: &'static str,
    pub foreign_keys: &'static str,
}

#[macro_export]
macro_rules! implement_repository {
    ($repo: ident, $db: ty) => {

impl $repo {
    fn arguments<'q>(params: &[$crate::query::sql::Param]) -> <$db as sqlx::database::HasArguments<'q>>::Arguments {
        use sqlx::Arguments;
        use $crate::data_types::{ColumnKind, Value};

        let mut arguments = <$db as sqlx::database::HasArguments<'q>>::Arguments::default();
        for param in params {
            // NULLs still need a type, otherwise PG can't infer one for
            // e.g. `$1 IS NULL` or a CASE branch
            match (&param.value, param.kind) {
                (Value::Null, ColumnKind::Integer) => arguments.add(None::<i64>),
                (Value::Null, ColumnKind::Floating) => arguments.add(None::<f64>),
                (Value::Null, ColumnKind::Boolean) => arguments.add(None::<bool>),
                (Value::Null, ColumnKind::DateTime) => {
                    arguments.add(None::<chrono::NaiveDateTime>)
                }
                (Value::Null, ColumnKind::Text) => arguments.add(None::<String>),
                (Value::Integer(v), _) => arguments.add(*v),
                (Value::Float(v), _) => arguments.add(*v),
                (Value::Text(v), _) => arguments.add(v.clone()),
                (Value::Boolean(v), _) => arguments.add(*v),
                (Value::DateTime(v), _) => arguments.add(*v),
            }
        }
        arguments
    }
}

#[async_trait]
impl Repository for $repo {
    fn dialect(&self) -> Dialect {
        $repo::DIALECT
    }

    async fn schema_exists(&self, schema_name: &str) -> Result<bool, Error> {
        let matching: i64 = sqlx::query_scalar($repo::QUERIES.schema_exists)
            .bind(schema_name)
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?;
        Ok(matching > 0)
    }

    async fn list_partitioned_table_stats(
        &self,
        schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>, Error> {
        let Some(query) = $repo::QUERIES.partitioned_table_stats else {
            return Ok(vec![]);
        };

        let stats = sqlx::query_as(query)
            .bind(schema_name)
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err($repo::interpret_error)?;
        Ok(stats)
    }

    async fn list_plain_table_stats(
        &self,
        schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>, Error> {
        self.plain_table_stats(schema_name).await
    }

    async fn get_columns(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<ColumnRecord>, Error> {
        let columns = sqlx::query_as($repo::QUERIES.columns)
            .bind(schema_name)
            .bind(table_name)
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err($repo::interpret_error)?;
        Ok(columns)
    }

    async fn get_key_constraints(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<KeyConstraintRecord>, Error> {
        let keys = sqlx::query_as($repo::QUERIES.key_constraints)
            .bind(schema_name)
            .bind(table_name)
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err($repo::interpret_error)?;
        Ok(keys)
    }

    async fn get_foreign_keys(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<ForeignKeyRecord>, Error> {
        let foreign_keys = sqlx::query_as($repo::QUERIES.foreign_keys)
            .bind(schema_name)
            .bind(table_name)
            .fetch(&self.executor)
            .try_collect()
            .await
            .map_err($repo::interpret_error)?;
        Ok(foreign_keys)
    }

    async fn fetch_count(&self, statement: &Statement) -> Result<i64, Error> {
        debug!("Counting: {}", statement.sql);
        let count: i64 = sqlx::query_scalar_with(&statement.sql, $repo::arguments(&statement.params))
            .fetch_one(&self.executor)
            .await
            .map_err($repo::interpret_error)?;
        Ok(count)
    }

    async fn fetch_rows(
        &self,
        statement: &Statement,
    ) -> Result<Vec<Vec<Option<String>>>, Error> {
        debug!("Selecting: {}", statement.sql);
        let rows = sqlx::query_with(&statement.sql, $repo::arguments(&statement.params))
            .fetch_all(&self.executor)
            .await
            .map_err($repo::interpret_error)?;

        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|i| row.try_get::<Option<String>, _>(i))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err($repo::interpret_error)
    }

    async fn execute_mutation(&self, statement: &Statement) -> Result<u64, Error> {
        debug!("Mutating: {}", statement.sql);
        let mut tx = self.executor.begin().await.map_err($repo::interpret_error)?;

        let affected = sqlx::query_with(&statement.sql, $repo::arguments(&statement.params))
            .execute(&mut *tx)
            .await
            .map_err($repo::interpret_error)?
            .rows_affected();

        if affected > 1 {
            warn!("Mutation matched {affected} rows, rolling back: {}", statement.sql);
            tx.rollback().await.map_err($repo::interpret_error)?;
            return Err(Error::AmbiguousMutation(affected));
        }

        tx.commit().await.map_err($repo::interpret_error)?;
        Ok(affected)
    }
}

};
}
