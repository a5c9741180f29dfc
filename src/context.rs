//! The entry point callers use: resolves tables by name, enforces the
//! schema allow-list and ties the catalog and query layers together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use crate::catalog::cache::TableStatsCache;
use crate::catalog::entity::EntityRegistry;
use crate::catalog::{CatalogError, CatalogResult};
use crate::data_types::{EntityDescriptor, Row, TableKey, TableStats};
use crate::query::executor::TableExecutor;
use crate::query::export::{export_filename, export_stream, ExportStream};
use crate::query::pagination::{PaginationPlanner, PaginationStrategy};
use crate::query::params::QueryRequest;
use crate::query::predicate::{self, FilterWarning, PredicateNode};
use crate::query::QueryResult;
use crate::repository::interface::Repository;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult {
    pub rows: Vec<Row>,
    pub total_count: u64,
    /// The total came from catalog statistics rather than a COUNT
    pub total_is_estimate: bool,
    pub strategy: PaginationStrategy,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
    pub has_previous: bool,
    pub has_next: bool,
    pub window: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    pub warnings: Vec<FilterWarning>,
}

pub struct Export {
    /// Suggested download name
    pub filename: String,
    pub warnings: Vec<FilterWarning>,
    pub lines: ExportStream,
}

pub struct RowscopeContext {
    pub repository: Arc<dyn Repository>,
    pub catalog: TableStatsCache,
    pub entities: EntityRegistry,
    pub executor: Arc<TableExecutor>,
    pub planner: PaginationPlanner,
    /// Schemas callers may touch; empty allows all
    pub schemas: Vec<String>,
    pub export_batch_size: u64,
}

impl RowscopeContext {
    pub fn new(
        repository: Arc<dyn Repository>,
        planner: PaginationPlanner,
        catalog_ttl: Duration,
        schemas: Vec<String>,
        audit_columns: Vec<String>,
        export_batch_size: u64,
    ) -> Self {
        Self {
            catalog: TableStatsCache::new(repository.clone(), catalog_ttl),
            entities: EntityRegistry::new(repository.clone()),
            executor: Arc::new(TableExecutor::new(repository.clone(), audit_columns)),
            repository,
            planner,
            schemas,
            export_batch_size,
        }
    }

    fn check_schema(&self, schema_name: &str) -> CatalogResult<()> {
        if self.schemas.is_empty() || self.schemas.iter().any(|s| s == schema_name) {
            Ok(())
        } else {
            Err(CatalogError::SchemaNotAllowed {
                name: schema_name.to_string(),
            })
        }
    }

    pub async fn list_tables(&self, schema_name: &str) -> CatalogResult<Arc<Vec<TableStats>>> {
        self.check_schema(schema_name)?;
        self.catalog.list_tables(schema_name).await
    }

    pub async fn get_entity(
        &self,
        schema_name: &str,
        table_name: &str,
    ) -> CatalogResult<Arc<EntityDescriptor>> {
        self.check_schema(schema_name)?;
        self.entities
            .get_entity(&TableKey::new(schema_name, table_name))
            .await
    }

    /// Filter, count and page through a table
    pub async fn query(
        &self,
        schema_name: &str,
        table_name: &str,
        request: &QueryRequest,
    ) -> QueryResult<PageResult> {
        let entity = self.get_entity(schema_name, table_name).await?;
        let compiled = predicate::build(&entity, &request.filters, request.date_range.as_ref());
        if let Some(predicate) = &compiled.predicate {
            debug!("Querying {} where {predicate}", entity.key);
        }

        let (total_count, total_is_estimate) = self
            .total_count(&entity, compiled.predicate.as_ref())
            .await?;
        let plan = self.planner.plan(total_count, &request.page);

        let fetched = self
            .executor
            .fetch_page(&entity, compiled.predicate, &plan, request.sort.as_ref())
            .await?;

        let mut warnings = compiled.warnings;
        warnings.extend(fetched.warnings);

        Ok(PageResult {
            rows: fetched.rows,
            total_count,
            total_is_estimate,
            strategy: plan.strategy,
            page: plan.page,
            page_size: plan.page_size,
            total_pages: plan.total_pages,
            has_previous: fetched.has_previous,
            has_next: fetched.has_next,
            window: plan.window,
            next_cursor: fetched.next_cursor,
            warnings,
        })
    }

    /// Exact count, unless nothing is filtered and the catalog already knows
    /// the table is too big to be worth scanning
    async fn total_count(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<&PredicateNode>,
    ) -> QueryResult<(u64, bool)> {
        if predicate.is_none() {
            match self.catalog.row_estimate(&entity.key).await {
                Ok(Some(estimate)) => {
                    let estimate = estimate.max(0) as u64;
                    if estimate > self.planner.keyset_threshold() {
                        debug!("Using estimated count {estimate} for {}", entity.key);
                        return Ok((estimate, true));
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("No row estimate for {}, counting instead: {e}", entity.key),
            }
        }

        Ok((self.executor.count(entity, predicate).await?, false))
    }

    pub async fn insert(
        &self,
        schema_name: &str,
        table_name: &str,
        values: &HashMap<String, String>,
    ) -> QueryResult<()> {
        let entity = self.get_entity(schema_name, table_name).await?;
        self.executor.insert(&entity, values).await
    }

    /// `identity` holds the identity values as they were when the row was
    /// read; a row that no longer matches them is reported, not skipped.
    pub async fn update(
        &self,
        schema_name: &str,
        table_name: &str,
        identity: &HashMap<String, String>,
        changes: &HashMap<String, String>,
    ) -> QueryResult<()> {
        let entity = self.get_entity(schema_name, table_name).await?;
        self.executor.update(&entity, identity, changes).await
    }

    pub async fn delete(
        &self,
        schema_name: &str,
        table_name: &str,
        identity: &HashMap<String, String>,
    ) -> QueryResult<()> {
        let entity = self.get_entity(schema_name, table_name).await?;
        self.executor.delete(&entity, identity).await
    }

    /// Lazily stream the filtered table as CSV. Paging and sorting in the
    /// request are ignored; rows always come out in identity order.
    pub async fn stream_export(
        &self,
        schema_name: &str,
        table_name: &str,
        request: &QueryRequest,
    ) -> QueryResult<Export> {
        let entity = self.get_entity(schema_name, table_name).await?;
        let compiled = predicate::build(&entity, &request.filters, request.date_range.as_ref());

        Ok(Export {
            filename: export_filename(&entity.key, Utc::now()),
            warnings: compiled.warnings,
            lines: export_stream(
                self.executor.clone(),
                entity,
                compiled.predicate,
                self.export_batch_size,
            ),
        })
    }

    /// Forget cached inventory and entities for a schema
    pub async fn invalidate(&self, schema_name: &str) {
        self.catalog.invalidate(schema_name).await;
        self.entities.invalidate_schema(schema_name);
    }
}
