//! Compiling declarative filter descriptors into a predicate tree.
//!
//! Individual filters that can't be applied (unknown column, missing value,
//! value that doesn't coerce to the column kind) are dropped with a warning;
//! they never invalidate the rest of the request. Filters are folded left to
//! right, each one joining the whole accumulated expression with its own
//! connective, so `[a, OR b, AND c]` means `((a OR b) AND c)`.

use std::fmt::{Display, Formatter};

use serde::Serialize;
use strum_macros::EnumString;
use tracing::{debug, warn};

use crate::data_types::{ColumnDescriptor, ColumnKind, EntityDescriptor, Value};
use crate::query::coerce::{coerce_value, parse_date_time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum FilterOperator {
    #[strum(serialize = "=", serialize = "==", serialize = "eq", serialize = "equals")]
    Equals,
    #[strum(
        serialize = "!=",
        serialize = "<>",
        serialize = "ne",
        serialize = "neq",
        serialize = "not_equals"
    )]
    NotEquals,
    #[strum(serialize = ">", serialize = "gt")]
    Greater,
    #[strum(serialize = "<", serialize = "lt")]
    Less,
    #[strum(serialize = ">=", serialize = "gte", serialize = "ge")]
    GreaterOrEqual,
    #[strum(serialize = "<=", serialize = "lte", serialize = "le")]
    LessOrEqual,
    #[strum(serialize = "is_null", serialize = "null")]
    IsNull,
    #[strum(serialize = "is_not_null", serialize = "not_null")]
    IsNotNull,
    #[strum(serialize = "contains", serialize = "like", serialize = "ilike")]
    Contains,
    #[strum(serialize = "in")]
    InSet,
    #[strum(serialize = "not_in")]
    NotInSet,
}

impl FilterOperator {
    pub fn requires_value(&self) -> bool {
        !matches!(self, FilterOperator::IsNull | FilterOperator::IsNotNull)
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "=",
            FilterOperator::NotEquals => "<>",
            FilterOperator::Greater => ">",
            FilterOperator::Less => "<",
            FilterOperator::GreaterOrEqual => ">=",
            FilterOperator::LessOrEqual => "<=",
            FilterOperator::IsNull => "IS NULL",
            FilterOperator::IsNotNull => "IS NOT NULL",
            FilterOperator::Contains => "CONTAINS",
            FilterOperator::InSet => "IN",
            FilterOperator::NotInSet => "NOT IN",
        }
    }

    /// The operator actually applied to a column of this kind. Text columns
    /// default to substring containment, everything else to equality;
    /// containment only makes sense on text.
    pub fn resolve(requested: Option<FilterOperator>, kind: ColumnKind) -> FilterOperator {
        match requested {
            Some(FilterOperator::Contains) | None if kind == ColumnKind::Text => {
                FilterOperator::Contains
            }
            Some(FilterOperator::Contains) | None => FilterOperator::Equals,
            Some(op) => op,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Connective {
    #[default]
    #[strum(serialize = "and", serialize = "&&")]
    And,
    #[strum(serialize = "or", serialize = "||")]
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescriptor {
    pub column: String,
    /// `None` when the caller didn't say, or said something unsupported
    pub operator: Option<FilterOperator>,
    pub value: Option<String>,
    /// How this filter joins everything before it; ignored on the first one
    pub connective: Connective,
}

impl FilterDescriptor {
    pub fn new(
        column: impl Into<String>,
        operator: Option<FilterOperator>,
        value: Option<&str>,
    ) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.map(str::to_string),
            connective: Connective::And,
        }
    }

    pub fn or(mut self) -> Self {
        self.connective = Connective::Or;
        self
    }
}

/// Inclusive bounds on a date/time column. A missing bound is unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRangeDescriptor {
    pub column: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    Single(Value),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateNode {
    Leaf {
        column: String,
        operator: FilterOperator,
        operand: Operand,
    },
    And(Box<PredicateNode>, Box<PredicateNode>),
    Or(Box<PredicateNode>, Box<PredicateNode>),
}

impl PredicateNode {
    pub fn leaf(column: impl Into<String>, operator: FilterOperator, operand: Operand) -> Self {
        PredicateNode::Leaf {
            column: column.into(),
            operator,
            operand,
        }
    }

    pub fn and(self, other: PredicateNode) -> Self {
        PredicateNode::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: PredicateNode) -> Self {
        PredicateNode::Or(Box::new(self), Box::new(other))
    }

    fn join(self, connective: Connective, other: PredicateNode) -> Self {
        match connective {
            Connective::And => self.and(other),
            Connective::Or => self.or(other),
        }
    }

    /// AND an optional predicate onto an optional root
    pub fn conjoin(root: Option<PredicateNode>, other: Option<PredicateNode>) -> Option<Self> {
        match (root, other) {
            (Some(root), Some(other)) => Some(root.and(other)),
            (root, None) => root,
            (None, other) => other,
        }
    }
}

impl Display for PredicateNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PredicateNode::Leaf {
                column,
                operator,
                operand,
            } => match operand {
                Operand::None => write!(f, "{column} {}", operator.symbol()),
                Operand::Single(Value::Text(v)) => {
                    write!(f, "{column} {} '{v}'", operator.symbol())
                }
                Operand::Single(v) => write!(f, "{column} {} {v}", operator.symbol()),
                Operand::List(values) => {
                    let joined = values
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "{column} {} ({joined})", operator.symbol())
                }
            },
            PredicateNode::And(left, right) => write!(f, "({left}) AND ({right})"),
            PredicateNode::Or(left, right) => write!(f, "({left}) OR ({right})"),
        }
    }
}

/// Reasons a filter or date range was (partly) ignored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum FilterWarning {
    UnknownColumn { column: String },
    MissingValue { column: String },
    InvalidValue { column: String, value: String, kind: ColumnKind },
    InvalidDateRange { column: String, reason: String },
    InvalidCursor { value: String },
}

impl Display for FilterWarning {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterWarning::UnknownColumn { column } => {
                write!(f, "Ignored filter on unknown column {column:?}")
            }
            FilterWarning::MissingValue { column } => {
                write!(f, "Ignored filter on {column:?}: no value given")
            }
            FilterWarning::InvalidValue {
                column,
                value,
                kind,
            } => write!(
                f,
                "Ignored filter on {column:?}: {value:?} is not a valid {kind} value"
            ),
            FilterWarning::InvalidDateRange { column, reason } => {
                write!(f, "Ignored date range on {column:?}: {reason}")
            }
            FilterWarning::InvalidCursor { value } => {
                write!(f, "Ignored invalid cursor {value:?}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledFilter {
    pub predicate: Option<PredicateNode>,
    pub warnings: Vec<FilterWarning>,
}

/// Compile the filters and optional date range for an entity. The date
/// range, when valid, is ANDed onto the folded filter expression as a whole.
pub fn build(
    entity: &EntityDescriptor,
    filters: &[FilterDescriptor],
    date_range: Option<&DateRangeDescriptor>,
) -> CompiledFilter {
    let mut warnings = vec![];

    let mut root: Option<PredicateNode> = None;
    for filter in filters {
        match build_filter(entity, filter) {
            Ok(predicate) => {
                root = Some(match root {
                    None => predicate,
                    Some(root) => root.join(filter.connective, predicate),
                })
            }
            Err(warning) => {
                debug!("Dropping filter on {}: {warning}", entity.key);
                warnings.push(warning);
            }
        }
    }

    let range = match date_range {
        Some(range) => match build_date_range(entity, range) {
            Ok(range) => range,
            Err(warning) => {
                warn!("Rejected date range on {}: {warning}", entity.key);
                warnings.push(warning);
                None
            }
        },
        None => None,
    };

    CompiledFilter {
        predicate: PredicateNode::conjoin(range, root),
        warnings,
    }
}

fn build_filter(
    entity: &EntityDescriptor,
    filter: &FilterDescriptor,
) -> Result<PredicateNode, FilterWarning> {
    let column = entity
        .column(&filter.column)
        .ok_or_else(|| FilterWarning::UnknownColumn {
            column: filter.column.clone(),
        })?;

    let operator = FilterOperator::resolve(filter.operator, column.kind);

    if !operator.requires_value() {
        return Ok(PredicateNode::leaf(&column.name, operator, Operand::None));
    }

    let raw = filter
        .value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| FilterWarning::MissingValue {
            column: column.name.clone(),
        })?;

    let operand = match operator {
        FilterOperator::InSet | FilterOperator::NotInSet => {
            let values = raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| coerce_for(column, v))
                .collect::<Result<Vec<_>, _>>()?;
            if values.is_empty() {
                return Err(FilterWarning::MissingValue {
                    column: column.name.clone(),
                });
            }
            Operand::List(values)
        }
        FilterOperator::Contains => Operand::Single(Value::Text(raw.to_string())),
        _ => Operand::Single(coerce_for(column, raw)?),
    };

    Ok(PredicateNode::leaf(&column.name, operator, operand))
}

fn coerce_for(column: &ColumnDescriptor, raw: &str) -> Result<Value, FilterWarning> {
    coerce_value(raw, column.kind).ok_or_else(|| FilterWarning::InvalidValue {
        column: column.name.clone(),
        value: raw.to_string(),
        kind: column.kind,
    })
}

fn build_date_range(
    entity: &EntityDescriptor,
    range: &DateRangeDescriptor,
) -> Result<Option<PredicateNode>, FilterWarning> {
    let invalid = |reason: String| FilterWarning::InvalidDateRange {
        column: range.column.clone(),
        reason,
    };

    let column = entity
        .column(&range.column)
        .ok_or_else(|| invalid("unknown column".to_string()))?;
    if column.kind != ColumnKind::DateTime {
        return Err(invalid(format!("{} is not a date/time column", column.kind)));
    }

    let parse_bound = |bound: &Option<String>| match bound.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => parse_date_time(raw)
            .map(Some)
            .ok_or_else(|| invalid(format!("unrecognised date {raw:?}"))),
    };

    let start = parse_bound(&range.start)?;
    let end = parse_bound(&range.end)?;

    let bound = |operator, value| {
        PredicateNode::leaf(&column.name, operator, Operand::Single(Value::DateTime(value)))
    };

    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(invalid(format!(
            "start {start} is after end {end}"
        ))),
        (Some(start), Some(end)) => Ok(Some(
            bound(FilterOperator::GreaterOrEqual, start)
                .and(bound(FilterOperator::LessOrEqual, end)),
        )),
        (Some(start), None) => Ok(Some(bound(FilterOperator::GreaterOrEqual, start))),
        (None, Some(end)) => Ok(Some(bound(FilterOperator::LessOrEqual, end))),
        (None, None) => Ok(None),
    }
}
