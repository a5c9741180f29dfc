use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::data_types::{ColumnDescriptor, ColumnKind, EntityDescriptor, TableKey};
use crate::query::sql::{Dialect, Statement};
use crate::repository::interface::{
    ColumnRecord, Error, ForeignKeyRecord, KeyConstraintRecord, Repository, Result,
    TableStatsRecord,
};

/// Build an entity in the `public` schema from `(name, store type, nullable)`
/// triples. Identity columns are marked unique when there's just one.
pub fn entity(
    table_name: &str,
    columns: &[(&str, &str, bool)],
    identity: &[&str],
) -> EntityDescriptor {
    let columns = columns
        .iter()
        .map(|(name, data_type, nullable)| ColumnDescriptor {
            name: name.to_string(),
            data_type: data_type.to_string(),
            kind: ColumnKind::from_type_name(data_type),
            nullable: *nullable,
            unique: identity.len() == 1 && identity[0] == *name,
            has_default: false,
            foreign_key: None,
        })
        .collect();

    EntityDescriptor {
        key: TableKey::new("public", table_name),
        columns,
        identity: identity.iter().map(|s| s.to_string()).collect(),
        identity_synthesized: false,
    }
}

pub fn stats_record(
    table_name: &str,
    row_estimate: i64,
    total_size: Option<&str>,
) -> TableStatsRecord {
    TableStatsRecord {
        table_name: table_name.to_string(),
        row_estimate,
        total_size: total_size.map(str::to_string),
    }
}

pub fn column_record(
    column_name: &str,
    data_type: &str,
    nullable: bool,
    has_default: bool,
) -> ColumnRecord {
    ColumnRecord {
        column_name: column_name.to_string(),
        data_type: data_type.to_string(),
        nullable,
        has_default,
    }
}

pub fn key_record(
    constraint_name: &str,
    constraint_type: &str,
    column_name: &str,
) -> KeyConstraintRecord {
    KeyConstraintRecord {
        constraint_name: constraint_name.to_string(),
        constraint_type: constraint_type.to_string(),
        column_name: column_name.to_string(),
    }
}

/// In-memory stand-in for a store. Only the `public` schema exists. Every
/// statement it receives is recorded; `fetch_rows` hands out the queued
/// batches in order, then empty results.
#[derive(Debug, Default)]
pub struct MockRepository {
    pub partitioned: Vec<TableStatsRecord>,
    pub plain: Vec<TableStatsRecord>,
    pub columns: HashMap<String, Vec<ColumnRecord>>,
    pub keys: HashMap<String, Vec<KeyConstraintRecord>>,
    pub foreign_keys: HashMap<String, Vec<ForeignKeyRecord>>,
    pub count: i64,
    pub affected: AtomicU64,
    pub row_batches: Mutex<VecDeque<Vec<Vec<Option<String>>>>>,

    pub fail: AtomicBool,
    /// Fail only the table statistics lookups
    pub fail_stats: AtomicBool,
    pub stats_calls: AtomicUsize,
    pub introspect_calls: AtomicUsize,
    pub statements: Mutex<Vec<Statement>>,
}

impl MockRepository {
    pub fn push_rows(&self, rows: Vec<Vec<Option<&str>>>) {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.map(str::to_string)).collect())
            .collect();
        self.row_batches.lock().unwrap().push_back(rows);
    }

    pub fn recorded(&self) -> Vec<Statement> {
        self.statements.lock().unwrap().clone()
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            Err(Error::SqlxError(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn check_stats(&self) -> Result<()> {
        self.check()?;
        if self.fail_stats.load(Ordering::SeqCst) {
            Err(Error::SqlxError(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }

    fn record(&self, statement: &Statement) -> Result<()> {
        self.check()?;
        self.statements.lock().unwrap().push(statement.clone());
        Ok(())
    }
}

#[async_trait]
impl Repository for MockRepository {
    fn dialect(&self) -> Dialect {
        Dialect::POSTGRES
    }

    async fn schema_exists(&self, schema_name: &str) -> Result<bool> {
        self.check()?;
        Ok(schema_name == "public")
    }

    async fn list_partitioned_table_stats(
        &self,
        _schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>> {
        self.check_stats()?;
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.partitioned.clone())
    }

    async fn list_plain_table_stats(
        &self,
        _schema_name: &str,
    ) -> Result<Vec<TableStatsRecord>> {
        self.check_stats()?;
        Ok(self.plain.clone())
    }

    async fn get_columns(
        &self,
        _schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<ColumnRecord>> {
        self.check()?;
        self.introspect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.columns.get(table_name).cloned().unwrap_or_default())
    }

    async fn get_key_constraints(
        &self,
        _schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<KeyConstraintRecord>> {
        self.check()?;
        Ok(self.keys.get(table_name).cloned().unwrap_or_default())
    }

    async fn get_foreign_keys(
        &self,
        _schema_name: &str,
        table_name: &str,
    ) -> Result<Vec<ForeignKeyRecord>> {
        self.check()?;
        Ok(self.foreign_keys.get(table_name).cloned().unwrap_or_default())
    }

    async fn fetch_count(&self, statement: &Statement) -> Result<i64> {
        self.record(statement)?;
        Ok(self.count)
    }

    async fn fetch_rows(&self, statement: &Statement) -> Result<Vec<Vec<Option<String>>>> {
        self.record(statement)?;
        Ok(self
            .row_batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default())
    }

    async fn execute_mutation(&self, statement: &Statement) -> Result<u64> {
        self.record(statement)?;
        let affected = self.affected.load(Ordering::SeqCst);
        if affected > 1 {
            return Err(Error::AmbiguousMutation(affected));
        }
        Ok(affected)
    }
}
