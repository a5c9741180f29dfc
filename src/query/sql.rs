//! Rendering statements against a dynamically described table.
//!
//! Everything the caller controls goes into bound parameters; identifiers
//! only ever come from introspected metadata and are always quoted.
//! Placeholders are `$n`, which both PostgreSQL and SQLite accept.

use std::fmt::Write;

use itertools::Itertools;
use tracing::debug;

use crate::data_types::{ColumnDescriptor, ColumnKind, EntityDescriptor, TableKey, Value};
use crate::query::predicate::{FilterOperator, Operand, PredicateNode};

/// The bits of SQL that differ between backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dialect {
    /// Case-insensitive pattern match
    pub contains_operator: &'static str,
    /// Whether columns browsed as text but stored as something else (uuid,
    /// json, enums...) need explicit casts to compare with / accept text
    pub cast_text_columns: bool,
}

impl Dialect {
    pub const POSTGRES: Dialect = Dialect {
        contains_operator: "ILIKE",
        cast_text_columns: true,
    };

    // SQLite's LIKE is already case-insensitive for ASCII and its columns
    // take whatever they're given
    pub const SQLITE: Dialect = Dialect {
        contains_operator: "LIKE",
        cast_text_columns: false,
    };
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn qualified_table(key: &TableKey) -> String {
    format!(
        "{}.{}",
        quote_identifier(&key.schema_name),
        quote_identifier(&key.table_name)
    )
}

/// A bound value, together with the kind of the column it targets so that
/// NULLs can be bound with the right type
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub value: Value,
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderTerm {
    pub column: String,
    pub descending: bool,
}

impl OrderTerm {
    pub fn ascending(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

struct StatementBuilder<'a> {
    dialect: Dialect,
    entity: &'a EntityDescriptor,
    sql: String,
    params: Vec<Param>,
}

impl<'a> StatementBuilder<'a> {
    fn new(dialect: Dialect, entity: &'a EntityDescriptor) -> Self {
        Self {
            dialect,
            entity,
            sql: String::new(),
            params: vec![],
        }
    }

    fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    fn push_bind(&mut self, value: Value, kind: ColumnKind) -> &mut Self {
        self.params.push(Param { value, kind });
        // Writing to a String can't fail
        let _ = write!(self.sql, "${}", self.params.len());
        self
    }

    fn needs_text_cast(&self, column: &ColumnDescriptor) -> bool {
        self.dialect.cast_text_columns
            && column.kind == ColumnKind::Text
            && !column.is_native_text()
    }

    fn push_table(&mut self) -> &mut Self {
        let table = qualified_table(&self.entity.key);
        self.push(&table)
    }

    /// Column reference on the comparison side of a predicate
    fn push_column_ref(&mut self, name: &str) -> &mut Self {
        let quoted = quote_identifier(name);
        match self.entity.column(name) {
            Some(column) if self.needs_text_cast(column) => {
                self.push(&format!("CAST({quoted} AS TEXT)"))
            }
            _ => self.push(&quoted),
        }
    }

    /// A value being written into a column
    fn push_column_value(&mut self, column: &ColumnDescriptor, value: Value) -> &mut Self {
        if self.needs_text_cast(column) {
            self.push("CAST(");
            self.push_bind(value, column.kind);
            let data_type = column.data_type.clone();
            self.push(" AS ").push(&data_type).push(")")
        } else {
            self.push_bind(value, column.kind)
        }
    }

    fn column_kind(&self, name: &str) -> ColumnKind {
        self.entity
            .column(name)
            .map(|c| c.kind)
            .unwrap_or(ColumnKind::Text)
    }

    fn push_predicate(&mut self, node: &PredicateNode) -> &mut Self {
        match node {
            PredicateNode::And(left, right) => {
                self.push("(")
                    .push_predicate(left)
                    .push(" AND ")
                    .push_predicate(right)
                    .push(")")
            }
            PredicateNode::Or(left, right) => {
                self.push("(")
                    .push_predicate(left)
                    .push(" OR ")
                    .push_predicate(right)
                    .push(")")
            }
            PredicateNode::Leaf {
                column,
                operator,
                operand,
            } => self.push_leaf(column, *operator, operand),
        }
    }

    fn push_leaf(
        &mut self,
        column: &str,
        operator: FilterOperator,
        operand: &Operand,
    ) -> &mut Self {
        let kind = self.column_kind(column);

        match (operator, operand) {
            (FilterOperator::IsNull, _) => self.push_column_ref(column).push(" IS NULL"),
            (FilterOperator::IsNotNull, _) => {
                self.push_column_ref(column).push(" IS NOT NULL")
            }
            (FilterOperator::Contains, Operand::Single(value)) => {
                let pattern = format!("%{}%", escape_like(&value.to_string()));
                let op = format!(" {} ", self.dialect.contains_operator);
                self.push_column_ref(column)
                    .push(&op)
                    .push_bind(Value::Text(pattern), ColumnKind::Text)
                    .push(" ESCAPE '\\'")
            }
            (FilterOperator::InSet | FilterOperator::NotInSet, Operand::List(values)) => {
                let op = if operator == FilterOperator::InSet {
                    " IN ("
                } else {
                    " NOT IN ("
                };
                self.push_column_ref(column).push(op);
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.push(", ");
                    }
                    self.push_bind(value.clone(), kind);
                }
                self.push(")")
            }
            (_, Operand::Single(value)) if !matches!(operator, FilterOperator::InSet | FilterOperator::NotInSet) => {
                let op = format!(" {} ", operator.symbol());
                self.push_column_ref(column)
                    .push(&op)
                    .push_bind(value.clone(), kind)
            }
            (operator, operand) => {
                debug!("Operand {operand:?} doesn't fit {operator:?} on {column}, matching nothing");
                self.push("1 = 0")
            }
        }
    }

    fn push_where(&mut self, predicate: Option<&PredicateNode>) -> &mut Self {
        if let Some(predicate) = predicate {
            self.push(" WHERE ").push_predicate(predicate);
        }
        self
    }

    /// Unaliased, so ORDER BY and WHERE resolve to the typed source columns.
    /// Rows are decoded by position.
    fn push_select_list(&mut self) -> &mut Self {
        let list = self
            .entity
            .columns
            .iter()
            .map(|c| format!("CAST({} AS TEXT)", quote_identifier(&c.name)))
            .join(", ");
        self.push(&list)
    }

    fn build(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

pub fn count_statement(
    dialect: Dialect,
    entity: &EntityDescriptor,
    predicate: Option<&PredicateNode>,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect, entity);
    builder
        .push("SELECT COUNT(*) FROM ")
        .push_table()
        .push_where(predicate);
    builder.build()
}

/// Select every column as text, in declaration order
pub fn select_statement(
    dialect: Dialect,
    entity: &EntityDescriptor,
    predicate: Option<&PredicateNode>,
    order: &[OrderTerm],
    limit: u64,
    offset: u64,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect, entity);
    builder
        .push("SELECT ")
        .push_select_list()
        .push(" FROM ")
        .push_table()
        .push_where(predicate);

    if !order.is_empty() {
        let terms = order
            .iter()
            .map(|term| {
                format!(
                    "{} {}",
                    quote_identifier(&term.column),
                    if term.descending { "DESC" } else { "ASC" }
                )
            })
            .join(", ");
        builder.push(" ORDER BY ").push(&terms);
    }

    builder.push(&format!(" LIMIT {limit}"));
    if offset > 0 {
        builder.push(&format!(" OFFSET {offset}"));
    }
    builder.build()
}

pub fn insert_statement(
    dialect: Dialect,
    entity: &EntityDescriptor,
    values: Vec<(&ColumnDescriptor, Value)>,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect, entity);
    builder.push("INSERT INTO ").push_table();

    if values.is_empty() {
        builder.push(" DEFAULT VALUES");
        return builder.build();
    }

    let columns = values
        .iter()
        .map(|(c, _)| quote_identifier(&c.name))
        .join(", ");
    builder.push(" (").push(&columns).push(") VALUES (");
    for (i, (column, value)) in values.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        builder.push_column_value(column, value);
    }
    builder.push(")");
    builder.build()
}

pub fn update_statement(
    dialect: Dialect,
    entity: &EntityDescriptor,
    changes: Vec<(&ColumnDescriptor, Value)>,
    identity: &PredicateNode,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect, entity);
    builder.push("UPDATE ").push_table().push(" SET ");
    for (i, (column, value)) in changes.into_iter().enumerate() {
        if i > 0 {
            builder.push(", ");
        }
        let quoted = quote_identifier(&column.name);
        builder.push(&quoted).push(" = ").push_column_value(column, value);
    }
    builder.push_where(Some(identity));
    builder.build()
}

pub fn delete_statement(
    dialect: Dialect,
    entity: &EntityDescriptor,
    identity: &PredicateNode,
) -> Statement {
    let mut builder = StatementBuilder::new(dialect, entity);
    builder
        .push("DELETE FROM ")
        .push_table()
        .push_where(Some(identity));
    builder.build()
}
