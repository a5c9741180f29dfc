use std::fmt::Display;

use crate::data_types::{Operation, TableKey};
use crate::repository::interface::Error as RepositoryError;

pub mod cache;
pub mod entity;
pub mod introspect;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Schema {name:?} doesn't exist")]
    SchemaDoesNotExist { name: String },

    #[error("Table {key} doesn't exist or isn't readable")]
    TableDoesNotExist { key: TableKey },

    #[error("Schema {name:?} is not in the list of browsable schemas")]
    SchemaNotAllowed { name: String },

    #[error("Store error while running {operation} on {target}: {source}")]
    Store {
        operation: Operation,
        /// The schema or table the operation ran against
        target: String,
        #[source]
        source: RepositoryError,
    },
}

impl CatalogError {
    /// For use with `map_err`: attach the operation and its target to a
    /// repository error
    pub fn store(
        operation: Operation,
        target: impl Display,
    ) -> impl FnOnce(RepositoryError) -> CatalogError {
        move |source| CatalogError::Store {
            operation,
            target: target.to_string(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CatalogError::SchemaDoesNotExist { .. } | CatalogError::TableDoesNotExist { .. }
        )
    }
}

pub type CatalogResult<T, E = CatalogError> = Result<T, E>;
