//! Decoding the flat key/value encoding callers use for filters, date
//! ranges, paging and sorting.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use crate::query::pagination::PageRequest;
use crate::query::predicate::{Connective, DateRangeDescriptor, FilterDescriptor, FilterOperator};

const FILTER_COLUMN: &str = "filter_column_";
const FILTER_OPERATOR: &str = "filter_operator_";
const FILTER_VALUE: &str = "filter_value_";
const FILTER_LOGIC: &str = "filter_logic_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortRequest {
    pub column: String,
    pub descending: bool,
}

/// Everything a caller can ask of a browse query
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryRequest {
    pub filters: Vec<FilterDescriptor>,
    pub date_range: Option<DateRangeDescriptor>,
    pub page: PageRequest,
    pub sort: Option<SortRequest>,
}

fn non_empty<'a>(params: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(params: &HashMap<String, String>, key: &str) -> Option<T> {
    non_empty(params, key).and_then(|v| v.parse().ok())
}

impl QueryRequest {
    /// Anything missing or malformed falls back to its default; nothing here
    /// fails
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let date_range = non_empty(params, "date_column").map(|column| DateRangeDescriptor {
            column: column.to_string(),
            start: non_empty(params, "start_date").map(str::to_string),
            end: non_empty(params, "end_date").map(str::to_string),
        });

        let page = PageRequest {
            page: parsed(params, "page"),
            page_size: parsed(params, "page_size"),
            cursor: non_empty(params, "after").map(str::to_string),
            jump: parsed(params, "jump"),
        };

        let sort = non_empty(params, "sort").map(|column| SortRequest {
            column: column.to_string(),
            descending: non_empty(params, "order")
                .map(|o| o.eq_ignore_ascii_case("desc"))
                .unwrap_or(false),
        });

        Self {
            filters: parse_filters(params),
            date_range,
            page,
            sort,
        }
    }
}

/// Filters in ascending index order. Indices needn't be contiguous; entries
/// without a column are skipped, unknown operators are left unspecified.
pub fn parse_filters(params: &HashMap<String, String>) -> Vec<FilterDescriptor> {
    let indices: BTreeSet<usize> = params
        .keys()
        .filter_map(|key| key.strip_prefix(FILTER_COLUMN))
        .filter_map(|index| index.parse().ok())
        .collect();

    indices
        .into_iter()
        .filter_map(|index| {
            let column = non_empty(params, &format!("{FILTER_COLUMN}{index}"))?;

            let operator = non_empty(params, &format!("{FILTER_OPERATOR}{index}"))
                .and_then(|op| FilterOperator::from_str(op).ok());
            let connective = non_empty(params, &format!("{FILTER_LOGIC}{index}"))
                .and_then(|logic| Connective::from_str(logic).ok())
                .unwrap_or_default();

            Some(FilterDescriptor {
                column: column.to_string(),
                operator,
                value: params.get(&format!("{FILTER_VALUE}{index}")).cloned(),
                connective,
            })
        })
        .collect()
}
