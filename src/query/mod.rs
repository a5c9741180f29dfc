use crate::catalog::CatalogError;
use crate::data_types::{ColumnKind, Operation, TableKey};
use crate::repository::interface::Error as RepositoryError;

pub mod coerce;
pub mod executor;
pub mod export;
pub mod pagination;
pub mod params;
pub mod predicate;
pub mod sql;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Value {value:?} for column {column:?} is not a valid {kind}")]
    Coercion {
        column: String,
        value: String,
        kind: ColumnKind,
    },

    #[error("No value given for identity column {column:?}")]
    MissingIdentity { column: String },

    #[error(
        "{operation} on {table} matched no row; it may have been changed or removed in the meantime"
    )]
    ConcurrentModification { operation: Operation, table: TableKey },

    #[error("{operation} on {table} would have affected {affected} rows and was rolled back")]
    AmbiguousIdentity {
        operation: Operation,
        table: TableKey,
        affected: u64,
    },

    #[error("Store error while running {operation} on {table}: {source}")]
    Store {
        operation: Operation,
        table: TableKey,
        #[source]
        source: RepositoryError,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl QueryError {
    /// For use with `map_err`. A mutation the store refused because it hit
    /// several rows becomes `AmbiguousIdentity`.
    pub fn store(
        operation: Operation,
        table: &TableKey,
    ) -> impl FnOnce(RepositoryError) -> QueryError + '_ {
        move |source| match source {
            RepositoryError::AmbiguousMutation(affected) => QueryError::AmbiguousIdentity {
                operation,
                table: table.clone(),
                affected,
            },
            source => QueryError::Store {
                operation,
                table: table.clone(),
                source,
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueryError::Catalog(e) if e.is_not_found())
    }

    /// Errors caused by what the caller sent rather than by the store
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            QueryError::Coercion { .. }
                | QueryError::MissingIdentity { .. }
                | QueryError::Catalog(CatalogError::SchemaNotAllowed { .. })
        )
    }
}

pub type QueryResult<T, E = QueryError> = Result<T, E>;
