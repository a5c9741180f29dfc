//! Time-bounded, per-schema cache of table inventories.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use tracing::{debug, info};

use crate::catalog::{CatalogError, CatalogResult};
use crate::data_types::{Operation, TableKey, TableStats, Timestamp};
use crate::repository::interface::{Repository, TableStatsRecord};

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(30 * 60);

pub struct TableStatsCache {
    repository: Arc<dyn Repository>,
    // Entries are replaced wholesale on refresh, never merged
    cache: Cache<String, Arc<Vec<TableStats>>>,
}

impl TableStatsCache {
    pub fn new(repository: Arc<dyn Repository>, ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).build();
        Self { repository, cache }
    }

    /// Tables in a schema, sorted by name. Concurrent misses on the same
    /// schema may each hit the store; a failed load leaves the cache as is.
    pub async fn list_tables(&self, schema_name: &str) -> CatalogResult<Arc<Vec<TableStats>>> {
        if let Some(stats) = self.cache.get(schema_name).await {
            debug!("Catalog cache hit for schema {schema_name:?}");
            return Ok(stats);
        }

        let stats = Arc::new(self.load(schema_name).await?);
        info!(
            "Refreshed catalog for schema {schema_name:?}: {} tables",
            stats.len()
        );
        self.cache
            .insert(schema_name.to_string(), stats.clone())
            .await;
        Ok(stats)
    }

    /// Cached row estimate for a table, if the table is listed at all
    pub async fn row_estimate(&self, key: &TableKey) -> CatalogResult<Option<i64>> {
        let stats = self.list_tables(&key.schema_name).await?;
        Ok(stats
            .iter()
            .find(|s| s.key == *key)
            .map(|s| s.row_estimate))
    }

    pub async fn invalidate(&self, schema_name: &str) {
        self.cache.invalidate(schema_name).await;
    }

    async fn load(&self, schema_name: &str) -> CatalogResult<Vec<TableStats>> {
        let on_error = || CatalogError::store(Operation::ListTables, schema_name);

        if !self
            .repository
            .schema_exists(schema_name)
            .await
            .map_err(on_error())?
        {
            return Err(CatalogError::SchemaDoesNotExist {
                name: schema_name.to_string(),
            });
        }

        let partitioned = self
            .repository
            .list_partitioned_table_stats(schema_name)
            .await
            .map_err(on_error())?;
        let plain = self
            .repository
            .list_plain_table_stats(schema_name)
            .await
            .map_err(on_error())?;

        Ok(merge_stats(schema_name, partitioned, plain, Utc::now()))
    }
}

/// Merge both inventories by table name, keeping whichever entry reports
/// more rows (ties go to the partitioned one)
fn merge_stats(
    schema_name: &str,
    partitioned: Vec<TableStatsRecord>,
    plain: Vec<TableStatsRecord>,
    fetched_at: Timestamp,
) -> Vec<TableStats> {
    let mut merged: BTreeMap<String, TableStatsRecord> = BTreeMap::new();

    for record in partitioned.into_iter().chain(plain) {
        match merged.get(&record.table_name) {
            Some(existing) if existing.row_estimate >= record.row_estimate => {}
            _ => {
                merged.insert(record.table_name.clone(), record);
            }
        }
    }

    merged
        .into_values()
        .map(|record| TableStats {
            key: TableKey::new(schema_name, record.table_name),
            row_estimate: record.row_estimate,
            total_size: record.total_size,
            fetched_at,
        })
        .collect()
}
