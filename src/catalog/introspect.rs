use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use crate::catalog::{CatalogError, CatalogResult};
use crate::data_types::{ColumnDescriptor, ColumnKind, ForeignKeyRef, Operation, TableKey};
use crate::repository::interface::{Repository, PRIMARY_KEY, UNIQUE};

/// A table as the store describes it, before any identity is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMetadata {
    pub key: TableKey,
    pub columns: Vec<ColumnDescriptor>,
    /// Declared primary key, in key order; empty if there is none
    pub primary_key: Vec<String>,
}

/// Loads column metadata for one table at a time. Doesn't cache.
pub struct SchemaIntrospector {
    repository: Arc<dyn Repository>,
}

impl SchemaIntrospector {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self { repository }
    }

    pub async fn introspect(&self, key: &TableKey) -> CatalogResult<TableMetadata> {
        let on_error = || CatalogError::store(Operation::Introspect, key);

        let columns = self
            .repository
            .get_columns(&key.schema_name, &key.table_name)
            .await
            .map_err(on_error())?;

        if columns.is_empty() {
            return Err(CatalogError::TableDoesNotExist { key: key.clone() });
        }

        let constraints = self
            .repository
            .get_key_constraints(&key.schema_name, &key.table_name)
            .await
            .map_err(on_error())?;
        let foreign_keys = self
            .repository
            .get_foreign_keys(&key.schema_name, &key.table_name)
            .await
            .map_err(on_error())?;

        let primary_key: Vec<String> = constraints
            .iter()
            .filter(|c| c.constraint_type == PRIMARY_KEY)
            .map(|c| c.column_name.clone())
            .collect();

        // Only a constraint over a single column makes that column unique
        let mut unique_constraints: HashMap<&str, Vec<&str>> = HashMap::new();
        for constraint in constraints.iter().filter(|c| c.constraint_type == UNIQUE) {
            unique_constraints
                .entry(constraint.constraint_name.as_str())
                .or_default()
                .push(constraint.column_name.as_str());
        }
        let mut unique_columns: HashSet<&str> = unique_constraints
            .values()
            .filter(|columns| columns.len() == 1)
            .map(|columns| columns[0])
            .collect();
        if let [single] = primary_key.as_slice() {
            unique_columns.insert(single.as_str());
        }

        let mut references: HashMap<&str, ForeignKeyRef> = HashMap::new();
        for fk in &foreign_keys {
            references
                .entry(fk.column_name.as_str())
                .or_insert_with(|| ForeignKeyRef {
                    table: fk.foreign_table.clone(),
                    column: fk.foreign_column.clone(),
                });
        }

        let columns = columns
            .into_iter()
            .map(|record| ColumnDescriptor {
                kind: ColumnKind::from_type_name(&record.data_type),
                unique: unique_columns.contains(record.column_name.as_str()),
                foreign_key: references.remove(record.column_name.as_str()),
                name: record.column_name,
                data_type: record.data_type,
                nullable: record.nullable,
                has_default: record.has_default,
            })
            .collect::<Vec<_>>();

        debug!(
            "Introspected {key}: {} columns, primary key {primary_key:?}",
            columns.len()
        );

        Ok(TableMetadata {
            key: key.clone(),
            columns,
            primary_key,
        })
    }
}
