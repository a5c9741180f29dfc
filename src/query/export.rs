//! Streaming a filtered table out as CSV, one bounded batch at a time.

use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use itertools::Itertools;
use tracing::{debug, info};

use crate::data_types::{ColumnKind, EntityDescriptor, Row, TableKey, Timestamp, Value};
use crate::query::executor::{identity_order, TableExecutor};
use crate::query::predicate::{FilterOperator, Operand, PredicateNode};
use crate::query::QueryResult;

pub const DEFAULT_EXPORT_BATCH_SIZE: u64 = 1000;

/// CSV lines, header first, each terminated by `\n`
pub type ExportStream = BoxStream<'static, QueryResult<String>>;

pub fn export_filename(key: &TableKey, at: Timestamp) -> String {
    format!(
        "{}_{}_{}.csv",
        key.schema_name,
        key.table_name,
        at.format("%Y%m%d_%H%M%S")
    )
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

pub fn csv_line<I, S>(fields: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = fields
        .into_iter()
        .map(|field| quote_field(field.as_ref()))
        .join(",");
    line.push('\n');
    line
}

fn row_line(entity: &EntityDescriptor, row: &Row) -> String {
    csv_line(entity.columns.iter().map(|column| {
        row.get(&column.name)
            .map(Value::to_string)
            .unwrap_or_default()
    }))
}

enum Batch {
    Header,
    Rows {
        offset: u64,
        after: Option<Value>,
    },
    Done,
}

/// Stream every row matching `predicate`, ordered by identity. With a single
/// declared numeric or date/time identity, batches continue after the last
/// identity seen; otherwise they walk forward by offset. Nothing is fetched
/// until the stream is polled, and a store error ends it.
pub fn export_stream(
    executor: Arc<TableExecutor>,
    entity: Arc<EntityDescriptor>,
    predicate: Option<PredicateNode>,
    batch_size: u64,
) -> ExportStream {
    let source = Arc::new(BatchSource {
        seek_column: seek_column(&entity),
        executor,
        entity,
        predicate,
        batch_size: batch_size.max(1),
    });

    stream::try_unfold(Batch::Header, move |state| {
        let source = source.clone();
        async move { source.next_batch(state).await }
    })
    .map_ok(|lines: Vec<String>| stream::iter(lines.into_iter().map(Ok)))
    .try_flatten()
    .boxed()
}

struct BatchSource {
    executor: Arc<TableExecutor>,
    entity: Arc<EntityDescriptor>,
    predicate: Option<PredicateNode>,
    seek_column: Option<String>,
    batch_size: u64,
}

impl BatchSource {
    async fn next_batch(&self, state: Batch) -> QueryResult<Option<(Vec<String>, Batch)>> {
        let (offset, after) = match state {
            Batch::Header => {
                let header = csv_line(self.entity.column_names());
                let first = Batch::Rows {
                    offset: 0,
                    after: None,
                };
                return Ok(Some((vec![header], first)));
            }
            Batch::Done => {
                info!("Finished exporting {}", self.entity.key);
                return Ok(None);
            }
            Batch::Rows { offset, after } => (offset, after),
        };

        let (predicate, offset) = match (&self.seek_column, after) {
            (Some(column), Some(last)) => {
                let after_last =
                    PredicateNode::leaf(column, FilterOperator::Greater, Operand::Single(last));
                (
                    PredicateNode::conjoin(self.predicate.clone(), Some(after_last)),
                    0,
                )
            }
            _ => (self.predicate.clone(), offset),
        };

        let rows = self
            .executor
            .select(
                &self.entity,
                predicate.as_ref(),
                &identity_order(&self.entity),
                self.batch_size,
                offset,
            )
            .await?;
        debug!(
            "Export batch of {} rows from {} at offset {offset}",
            rows.len(),
            self.entity.key
        );

        if rows.is_empty() {
            info!("Finished exporting {}", self.entity.key);
            return Ok(None);
        }

        let next = if (rows.len() as u64) < self.batch_size {
            Batch::Done
        } else {
            let last_seen = self
                .seek_column
                .as_ref()
                .and_then(|column| rows.last().and_then(|row| row.get(column)))
                .filter(|value| !value.is_null())
                .cloned();
            Batch::Rows {
                offset: offset + self.batch_size,
                after: last_seen,
            }
        };

        let lines = rows.iter().map(|row| row_line(&self.entity, row)).collect();
        Ok(Some((lines, next)))
    }
}

fn seek_column(entity: &EntityDescriptor) -> Option<String> {
    if entity.identity_synthesized || entity.identity.len() != 1 {
        return None;
    }
    entity
        .identity_columns()
        .find(|column| column.kind.is_numeric() || column.kind == ColumnKind::DateTime)
        .map(|column| column.name.clone())
}
