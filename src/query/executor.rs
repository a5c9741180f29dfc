//! Running reads and single-row writes against one entity at a time.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::data_types::{ColumnDescriptor, EntityDescriptor, Operation, Row, Value};
use crate::query::coerce::{coerce_value, decode_stored};
use crate::query::pagination::{PagePlan, PaginationStrategy};
use crate::query::params::SortRequest;
use crate::query::predicate::{FilterOperator, FilterWarning, Operand, PredicateNode};
use crate::query::sql::{
    count_statement, delete_statement, insert_statement, select_statement, update_statement,
    OrderTerm, Statement,
};
use crate::query::{QueryError, QueryResult};
use crate::repository::interface::Repository;

/// Bookkeeping columns the store maintains itself; never written by callers
pub const DEFAULT_AUDIT_COLUMNS: &[&str] =
    &["created_at", "updated_at", "modified_at", "inserted_at"];

/// One page worth of rows plus the navigation facts only the fetch itself
/// can settle
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub rows: Vec<Row>,
    pub has_previous: bool,
    pub has_next: bool,
    /// Keyset mode: pass back as the cursor to get the following page
    pub next_cursor: Option<String>,
    pub warnings: Vec<FilterWarning>,
}

pub struct TableExecutor {
    repository: Arc<dyn Repository>,
    audit_columns: Vec<String>,
}

impl TableExecutor {
    pub fn new(repository: Arc<dyn Repository>, audit_columns: Vec<String>) -> Self {
        Self {
            repository,
            audit_columns,
        }
    }

    pub fn is_audit_column(&self, name: &str) -> bool {
        self.audit_columns
            .iter()
            .any(|c| c.eq_ignore_ascii_case(name))
    }

    pub async fn count(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<&PredicateNode>,
    ) -> QueryResult<u64> {
        let statement = count_statement(self.repository.dialect(), entity, predicate);
        let count = self
            .repository
            .fetch_count(&statement)
            .await
            .map_err(QueryError::store(Operation::Count, &entity.key))?;
        Ok(count.max(0) as u64)
    }

    pub async fn select(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<&PredicateNode>,
        order: &[OrderTerm],
        limit: u64,
        offset: u64,
    ) -> QueryResult<Vec<Row>> {
        let statement = select_statement(
            self.repository.dialect(),
            entity,
            predicate,
            order,
            limit,
            offset,
        );
        let rows = self
            .repository
            .fetch_rows(&statement)
            .await
            .map_err(QueryError::store(Operation::Select, &entity.key))?;

        Ok(rows
            .into_iter()
            .map(|cells| decode_row(entity, cells))
            .collect())
    }

    /// Fetch the rows a page plan describes. Keyset pages always come back
    /// in identity order; the requested sort only applies to offset pages.
    pub async fn fetch_page(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<PredicateNode>,
        plan: &PagePlan,
        sort: Option<&SortRequest>,
    ) -> QueryResult<FetchedPage> {
        match plan.strategy {
            PaginationStrategy::Offset => {
                let order = sort_order(entity, sort);
                let rows = self
                    .select(entity, predicate.as_ref(), &order, plan.page_size, plan.offset)
                    .await?;
                Ok(FetchedPage {
                    rows,
                    has_previous: plan.has_previous,
                    has_next: plan.has_next,
                    next_cursor: None,
                    warnings: vec![],
                })
            }
            PaginationStrategy::Keyset => self.fetch_keyset_page(entity, predicate, plan).await,
        }
    }

    async fn fetch_keyset_page(
        &self,
        entity: &EntityDescriptor,
        predicate: Option<PredicateNode>,
        plan: &PagePlan,
    ) -> QueryResult<FetchedPage> {
        let mut warnings = vec![];
        let cursor_column = entity.identity_columns().next();

        let after = match (&plan.cursor, cursor_column) {
            (Some(raw), Some(column)) => match coerce_value(raw, column.kind) {
                Some(value) => Some(PredicateNode::leaf(
                    &column.name,
                    FilterOperator::Greater,
                    Operand::Single(value),
                )),
                None => {
                    debug!("Cursor {raw:?} doesn't fit {} on {}", column.name, entity.key);
                    warnings.push(FilterWarning::InvalidCursor { value: raw.clone() });
                    None
                }
            },
            _ => None,
        };
        let has_previous = after.is_some();
        let predicate = PredicateNode::conjoin(predicate, after);

        // One row past the page tells us whether there's another page
        let mut rows = self
            .select(
                entity,
                predicate.as_ref(),
                &identity_order(entity),
                plan.page_size + 1,
                0,
            )
            .await?;
        let has_next = rows.len() as u64 > plan.page_size;
        rows.truncate(plan.page_size as usize);

        let next_cursor = match (has_next, cursor_column) {
            (true, Some(column)) => rows
                .last()
                .and_then(|row| row.get(&column.name))
                .filter(|value| !value.is_null())
                .map(Value::to_string),
            _ => None,
        };

        Ok(FetchedPage {
            rows,
            has_previous,
            has_next,
            next_cursor,
            warnings,
        })
    }

    pub async fn insert(
        &self,
        entity: &EntityDescriptor,
        values: &HashMap<String, String>,
    ) -> QueryResult<()> {
        let values = self.writable_values(entity, values)?;
        let statement = insert_statement(self.repository.dialect(), entity, values);

        self.repository
            .execute_mutation(&statement)
            .await
            .map_err(QueryError::store(Operation::Insert, &entity.key))?;
        info!("Inserted a row into {}", entity.key);
        Ok(())
    }

    pub async fn update(
        &self,
        entity: &EntityDescriptor,
        identity: &HashMap<String, String>,
        changes: &HashMap<String, String>,
    ) -> QueryResult<()> {
        let identity = identity_predicate(entity, identity)?;
        let changes = self.writable_values(entity, changes)?;
        if changes.is_empty() {
            // Still report a row that has gone away
            debug!("Nothing to update on {} where {identity}", entity.key);
            return match self.count(entity, Some(&identity)).await? {
                0 => Err(QueryError::ConcurrentModification {
                    operation: Operation::Update,
                    table: entity.key.clone(),
                }),
                1 => Ok(()),
                affected => Err(QueryError::AmbiguousIdentity {
                    operation: Operation::Update,
                    table: entity.key.clone(),
                    affected,
                }),
            };
        }

        let statement =
            update_statement(self.repository.dialect(), entity, changes, &identity);
        self.run_single_row(entity, Operation::Update, &statement)
            .await?;
        info!("Updated {} where {identity}", entity.key);
        Ok(())
    }

    pub async fn delete(
        &self,
        entity: &EntityDescriptor,
        identity: &HashMap<String, String>,
    ) -> QueryResult<()> {
        let identity = identity_predicate(entity, identity)?;
        let statement = delete_statement(self.repository.dialect(), entity, &identity);
        self.run_single_row(entity, Operation::Delete, &statement)
            .await?;
        info!("Deleted from {} where {identity}", entity.key);
        Ok(())
    }

    async fn run_single_row(
        &self,
        entity: &EntityDescriptor,
        operation: Operation,
        statement: &Statement,
    ) -> QueryResult<()> {
        let affected = self
            .repository
            .execute_mutation(statement)
            .await
            .map_err(QueryError::store(operation, &entity.key))?;

        if affected == 0 {
            return Err(QueryError::ConcurrentModification {
                operation,
                table: entity.key.clone(),
            });
        }
        Ok(())
    }

    /// Coerce caller-supplied values for a write, in column declaration
    /// order. Unknown and audit columns are skipped. Blank input means NULL
    /// on nullable columns and "use the default" where there is one.
    fn writable_values<'e>(
        &self,
        entity: &'e EntityDescriptor,
        raw_values: &HashMap<String, String>,
    ) -> QueryResult<Vec<(&'e ColumnDescriptor, Value)>> {
        for name in raw_values.keys() {
            if entity.column(name).is_none() {
                debug!("Ignoring unknown column {name:?} for {}", entity.key);
            }
        }

        let mut values = vec![];
        for column in &entity.columns {
            let Some(raw) = raw_values.get(&column.name) else {
                continue;
            };
            if self.is_audit_column(&column.name) {
                debug!("Skipping audit column {} on {}", column.name, entity.key);
                continue;
            }

            let coercion_error = || QueryError::Coercion {
                column: column.name.clone(),
                value: raw.clone(),
                kind: column.kind,
            };

            let value = if raw.trim().is_empty() {
                if column.nullable {
                    Value::Null
                } else if column.is_required() {
                    coerce_value(raw, column.kind).ok_or_else(coercion_error)?
                } else {
                    continue;
                }
            } else {
                match coerce_value(raw, column.kind) {
                    Some(value) => value,
                    None if column.nullable => {
                        debug!(
                            "{raw:?} isn't a valid {} for {}, writing NULL",
                            column.kind, column.name
                        );
                        Value::Null
                    }
                    None => return Err(coercion_error()),
                }
            };
            values.push((column, value));
        }
        Ok(values)
    }
}

fn decode_row(entity: &EntityDescriptor, cells: Vec<Option<String>>) -> Row {
    entity
        .columns
        .iter()
        .zip(cells)
        .map(|(column, cell)| (column.name.clone(), decode_stored(cell, column.kind)))
        .collect()
}

pub fn identity_order(entity: &EntityDescriptor) -> Vec<OrderTerm> {
    entity.identity.iter().map(OrderTerm::ascending).collect()
}

/// The requested sort (if it names a real column), with the identity as a
/// tie-breaker so pages never overlap
pub fn sort_order(entity: &EntityDescriptor, sort: Option<&SortRequest>) -> Vec<OrderTerm> {
    let mut order = vec![];
    if let Some(sort) = sort {
        match entity.column(&sort.column) {
            Some(column) => order.push(OrderTerm {
                column: column.name.clone(),
                descending: sort.descending,
            }),
            None => debug!("Ignoring sort on unknown column {:?}", sort.column),
        }
    }
    for term in identity_order(entity) {
        if !order.iter().any(|t| t.column == term.column) {
            order.push(term);
        }
    }
    order
}

/// Match exactly one row by its identity values. A blank value for a
/// nullable identity column matches NULL.
pub fn identity_predicate(
    entity: &EntityDescriptor,
    identity: &HashMap<String, String>,
) -> QueryResult<PredicateNode> {
    let mut predicate = None;
    for name in &entity.identity {
        let raw = identity
            .get(name)
            .ok_or_else(|| QueryError::MissingIdentity {
                column: name.clone(),
            })?;
        let column = entity
            .column(name)
            .ok_or_else(|| QueryError::MissingIdentity {
                column: name.clone(),
            })?;

        let leaf = if raw.trim().is_empty() && column.nullable {
            PredicateNode::leaf(name, FilterOperator::IsNull, Operand::None)
        } else {
            let value = coerce_value(raw, column.kind).ok_or_else(|| QueryError::Coercion {
                column: name.clone(),
                value: raw.clone(),
                kind: column.kind,
            })?;
            PredicateNode::leaf(name, FilterOperator::Equals, Operand::Single(value))
        };
        predicate = PredicateNode::conjoin(predicate, Some(leaf));
    }

    predicate.ok_or_else(|| QueryError::MissingIdentity {
        column: String::new(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::data_types::EntityDescriptor;
    use crate::query::pagination::{PageRequest, PaginationPlanner};
    use crate::query::sql::Param;
    use crate::testutils::{entity, MockRepository};

    fn readings() -> EntityDescriptor {
        let mut readings = entity(
            "readings",
            &[
                ("id", "integer", false),
                ("device", "text", false),
                ("amount", "double precision", true),
                ("updated_at", "timestamp", true),
            ],
            &["id"],
        );
        readings.columns[0].has_default = true;
        readings
    }

    fn executor(repository: Arc<MockRepository>) -> TableExecutor {
        TableExecutor::new(
            repository,
            DEFAULT_AUDIT_COLUMNS.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_insert_skips_audit_unknown_and_defaulted() {
        let repository = Arc::new(MockRepository::default());
        repository.affected.store(1, Ordering::SeqCst);

        executor(repository.clone())
            .insert(
                &readings(),
                &values(&[
                    ("id", ""),
                    ("device", "probe-1"),
                    ("amount", "not a number"),
                    ("updated_at", "2024-01-01"),
                    ("colour", "red"),
                ]),
            )
            .await
            .unwrap();

        let statements = repository.recorded();
        assert_eq!(
            statements[0].sql,
            r#"INSERT INTO "public"."readings" ("device", "amount") VALUES ($1, $2)"#
        );
        assert_eq!(statements[0].params[1].value, Value::Null);
    }

    #[tokio::test]
    async fn test_insert_rejects_invalid_required_value() {
        let repository = Arc::new(MockRepository::default());
        let mut readings = readings();
        readings.columns[0].has_default = false;

        let error = executor(repository.clone())
            .insert(&readings, &values(&[("id", "twelve"), ("device", "x")]))
            .await
            .unwrap_err();

        assert!(matches!(error, QueryError::Coercion { ref column, .. } if column == "id"));
        assert!(error.is_invalid_input());
        assert!(repository.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_update_by_identity() {
        let repository = Arc::new(MockRepository::default());
        repository.affected.store(1, Ordering::SeqCst);

        executor(repository.clone())
            .update(
                &readings(),
                &values(&[("id", "7")]),
                &values(&[("amount", "2.5"), ("updated_at", "now")]),
            )
            .await
            .unwrap();

        let statement = &repository.recorded()[0];
        assert_eq!(
            statement.sql,
            r#"UPDATE "public"."readings" SET "amount" = $1 WHERE "id" = $2"#
        );
        assert_eq!(statement.params[1].value, Value::Integer(7));
    }

    #[tokio::test]
    async fn test_update_nothing_matched() {
        let repository = Arc::new(MockRepository::default());

        let error = executor(repository)
            .update(
                &readings(),
                &values(&[("id", "7")]),
                &values(&[("device", "probe-2")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QueryError::ConcurrentModification {
                operation: Operation::Update,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_update_without_writable_changes_checks_row() {
        let gone = Arc::new(MockRepository::default());
        let error = executor(gone.clone())
            .update(
                &readings(),
                &values(&[("id", "7")]),
                &values(&[("updated_at", "2024-01-01")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QueryError::ConcurrentModification {
                operation: Operation::Update,
                ..
            }
        ));
        let statements = gone.recorded();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].sql,
            r#"SELECT COUNT(*) FROM "public"."readings" WHERE "id" = $1"#
        );

        let present = Arc::new(MockRepository {
            count: 1,
            ..Default::default()
        });
        executor(present)
            .update(&readings(), &values(&[("id", "7")]), &values(&[]))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_ambiguous_identity() {
        let repository = Arc::new(MockRepository::default());
        repository.affected.store(3, Ordering::SeqCst);

        let error = executor(repository)
            .delete(&readings(), &values(&[("id", "7")]))
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            QueryError::AmbiguousIdentity { affected: 3, .. }
        ));
    }

    #[tokio::test]
    async fn test_delete_requires_identity() {
        let repository = Arc::new(MockRepository::default());
        let error = executor(repository)
            .delete(&readings(), &values(&[("device", "probe-1")]))
            .await
            .unwrap_err();
        assert!(matches!(error, QueryError::MissingIdentity { ref column } if column == "id"));
    }

    #[test]
    fn test_nullable_identity_matches_null() {
        let entity = entity(
            "pairs",
            &[("left", "text", false), ("right", "integer", true)],
            &["left", "right"],
        );
        let predicate =
            identity_predicate(&entity, &values(&[("left", "a"), ("right", "")])).unwrap();
        assert_eq!(predicate.to_string(), "(left = 'a') AND (right IS NULL)");
    }

    #[test]
    fn test_sort_order() {
        let entity = readings();
        let sort = SortRequest {
            column: "amount".to_string(),
            descending: true,
        };
        assert_eq!(
            sort_order(&entity, Some(&sort)),
            vec![
                OrderTerm {
                    column: "amount".to_string(),
                    descending: true
                },
                OrderTerm::ascending("id")
            ]
        );

        let unknown = SortRequest {
            column: "nope".to_string(),
            descending: false,
        };
        assert_eq!(
            sort_order(&entity, Some(&unknown)),
            vec![OrderTerm::ascending("id")]
        );
    }

    #[tokio::test]
    async fn test_offset_page_decodes_rows() {
        let repository = Arc::new(MockRepository::default());
        repository.push_rows(vec![
            vec![Some("1"), Some("probe-1"), Some("2.5"), None],
            vec![Some("2"), Some("probe-2"), None, Some("2024-01-05 10:00:00")],
        ]);

        let plan = PaginationPlanner::default().plan(
            12,
            &PageRequest {
                page: Some(2),
                page_size: Some(10),
                ..Default::default()
            },
        );
        let page = executor(repository.clone())
            .fetch_page(&readings(), None, &plan, None)
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0].get("amount"), Some(&Value::Float(2.5)));
        assert_eq!(page.rows[0].get("updated_at"), Some(&Value::Null));
        assert!(page.has_previous);
        assert!(!page.has_next);
        assert!(repository.recorded()[0].sql.ends_with("LIMIT 10 OFFSET 10"));
    }

    #[tokio::test]
    async fn test_keyset_page_probes_for_next() {
        let repository = Arc::new(MockRepository::default());
        repository.push_rows(vec![
            vec![Some("41"), Some("a"), None, None],
            vec![Some("42"), Some("b"), None, None],
            vec![Some("43"), Some("c"), None, None],
        ]);

        let planner = PaginationPlanner::new(5, 2, 100);
        let plan = planner.plan(
            100,
            &PageRequest {
                cursor: Some("40".to_string()),
                ..Default::default()
            },
        );
        let page = executor(repository.clone())
            .fetch_page(&readings(), None, &plan, None)
            .await
            .unwrap();

        assert_eq!(page.rows.len(), 2);
        assert!(page.has_next);
        assert!(page.has_previous);
        assert_eq!(page.next_cursor.as_deref(), Some("42"));

        let statement = &repository.recorded()[0];
        assert!(statement.sql.contains(r#"WHERE "id" > $1"#));
        assert!(statement.sql.ends_with(r#"ORDER BY "id" ASC LIMIT 3"#));
        assert_eq!(
            statement.params,
            vec![Param {
                value: Value::Integer(40),
                kind: crate::data_types::ColumnKind::Integer
            }]
        );
    }

    #[tokio::test]
    async fn test_keyset_invalid_cursor_starts_over() {
        let repository = Arc::new(MockRepository::default());
        repository.push_rows(vec![vec![Some("1"), Some("a"), None, None]]);

        let plan = PaginationPlanner::new(5, 2, 100).plan(
            100,
            &PageRequest {
                cursor: Some("abc".to_string()),
                ..Default::default()
            },
        );
        let page = executor(repository.clone())
            .fetch_page(&readings(), None, &plan, None)
            .await
            .unwrap();

        assert!(!page.has_previous);
        assert!(!page.has_next);
        assert_eq!(page.next_cursor, None);
        assert_eq!(
            page.warnings,
            vec![FilterWarning::InvalidCursor {
                value: "abc".to_string()
            }]
        );
        assert!(!repository.recorded()[0].sql.contains("WHERE"));
    }
}
