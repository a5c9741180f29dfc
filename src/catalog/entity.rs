//! Turning introspected tables into addressable entities, memoized per table.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::catalog::introspect::{SchemaIntrospector, TableMetadata};
use crate::catalog::{CatalogError, CatalogResult};
use crate::data_types::{EntityDescriptor, TableKey};
use crate::repository::interface::Repository;

pub struct EntityRegistry {
    introspector: SchemaIntrospector,
    entities: DashMap<TableKey, Arc<EntityDescriptor>>,
}

impl EntityRegistry {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            introspector: SchemaIntrospector::new(repository),
            entities: DashMap::new(),
        }
    }

    /// Resolve a table into an entity. Built entities live until invalidated;
    /// if two callers race to build the same one, the first stored wins and
    /// both get that copy.
    pub async fn get_entity(&self, key: &TableKey) -> CatalogResult<Arc<EntityDescriptor>> {
        if let Some(entity) = self.entities.get(key) {
            return Ok(entity.clone());
        }

        let metadata = self.introspector.introspect(key).await?;
        let built = Arc::new(build_entity(metadata)?);
        if built.identity_synthesized {
            info!(
                "{key} has no primary key, addressing rows by {:?}",
                built.identity
            );
        }

        let entity = self.entities.entry(key.clone()).or_insert(built).clone();
        Ok(entity)
    }

    pub fn invalidate(&self, key: &TableKey) {
        debug!("Dropping cached entity {key}");
        self.entities.remove(key);
    }

    pub fn invalidate_schema(&self, schema_name: &str) {
        self.entities.retain(|key, _| key.schema_name != schema_name);
    }
}

/// Pick the identity columns: the declared primary key if there is one,
/// otherwise the first unique-or-non-nullable column, otherwise the first
/// column. Only ever depends on declaration order, so the same table always
/// gets the same fallback.
pub fn build_entity(metadata: TableMetadata) -> CatalogResult<EntityDescriptor> {
    let TableMetadata {
        key,
        columns,
        primary_key,
    } = metadata;

    let declared = primary_key
        .into_iter()
        .filter(|name| columns.iter().any(|c| &c.name == name))
        .collect::<Vec<_>>();

    if !declared.is_empty() {
        return Ok(EntityDescriptor {
            key,
            columns,
            identity: declared,
            identity_synthesized: false,
        });
    }

    let fallback = columns
        .iter()
        .find(|c| c.unique || !c.nullable)
        .or_else(|| columns.first())
        .map(|c| c.name.clone());

    match fallback {
        Some(name) => Ok(EntityDescriptor {
            key,
            columns,
            identity: vec![name],
            identity_synthesized: true,
        }),
        None => Err(CatalogError::TableDoesNotExist { key }),
    }
}
