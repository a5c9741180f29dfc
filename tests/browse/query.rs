use rowscope::catalog::CatalogError;
use rowscope::data_types::{Row, Value};
use rowscope::query::pagination::{PageRequest, PaginationStrategy};
use rowscope::query::params::{QueryRequest, SortRequest};
use rowscope::query::predicate::FilterWarning;
use rowscope::query::QueryError;

use crate::fixtures::{make_context, params, Setup, READINGS, SCHEMA};

fn ids(rows: &[Row]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.get("id") {
            Some(Value::Integer(id)) => *id,
            other => panic!("unexpected id {other:?}"),
        })
        .collect()
}

async fn query_params(pairs: &[(&str, &str)]) -> rowscope::context::PageResult {
    let context = make_context(Setup::default()).await;
    context
        .query(SCHEMA, "readings", &QueryRequest::from_params(&params(pairs)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_list_tables() {
    let context = make_context(Setup::default()).await;
    let tables = context.list_tables(SCHEMA).await.unwrap();

    let summary = tables
        .iter()
        .map(|t| (t.key.table_name.as_str(), t.row_estimate))
        .collect::<Vec<_>>();
    assert_eq!(summary, vec![("readings", READINGS as i64), ("tags", 3)]);
}

#[tokio::test]
async fn test_describe_entities() {
    let context = make_context(Setup::default()).await;

    let readings = context.get_entity(SCHEMA, "readings").await.unwrap();
    assert_eq!(readings.identity, vec!["id"]);
    assert!(!readings.identity_synthesized);
    assert_eq!(readings.columns.len(), 6);

    let tags = context.get_entity(SCHEMA, "tags").await.unwrap();
    assert_eq!(tags.identity, vec!["name"]);
    assert!(tags.identity_synthesized);
}

#[tokio::test]
async fn test_offset_last_page() {
    let result = query_params(&[("page", "3")]).await;

    assert_eq!(result.strategy, PaginationStrategy::Offset);
    assert_eq!(result.total_count, READINGS as u64);
    assert!(!result.total_is_estimate);
    assert_eq!(result.total_pages, 3);
    assert_eq!(ids(&result.rows), vec![21, 22, 23, 24, 25]);
    assert!(result.has_previous);
    assert!(!result.has_next);
    assert_eq!(result.window, vec![1, 2, 3]);

    let row = &result.rows[0];
    assert_eq!(row.get("amount"), Some(&Value::Float(31.5)));
    assert_eq!(row.get("active"), Some(&Value::Boolean(false)));
    assert_eq!(row.get("device"), Some(&Value::Text("probe-0".to_string())));
}

#[tokio::test]
async fn test_filters_fold_left() {
    let result = query_params(&[
        ("filter_column_0", "amount"),
        ("filter_operator_0", ">"),
        ("filter_value_0", "30"),
        ("filter_column_1", "device"),
        ("filter_operator_1", "="),
        ("filter_value_1", "probe-0"),
        ("filter_logic_1", "or"),
        ("page_size", "20"),
    ])
    .await;

    assert_eq!(result.total_count, 11);
    assert_eq!(
        ids(&result.rows),
        vec![3, 6, 9, 12, 15, 18, 21, 22, 23, 24, 25]
    );
    assert!(result.warnings.is_empty());
}

#[tokio::test]
async fn test_text_defaults_to_contains() {
    let result = query_params(&[("filter_column_0", "device"), ("filter_value_0", "PROBE-2")]).await;
    assert_eq!(ids(&result.rows), vec![2, 5, 8, 11, 14, 17, 20, 23]);
}

#[tokio::test]
async fn test_in_set_and_null_checks() {
    let result = query_params(&[
        ("filter_column_0", "id"),
        ("filter_operator_0", "in"),
        ("filter_value_0", "4, 9,16"),
        ("filter_column_1", "recorded_at"),
        ("filter_operator_1", "is_not_null"),
    ])
    .await;
    assert_eq!(ids(&result.rows), vec![4, 9, 16]);
}

#[tokio::test]
async fn test_date_range_start_only() {
    let result = query_params(&[("date_column", "recorded_at"), ("start_date", "2024-01-20")]).await;
    assert_eq!(ids(&result.rows), vec![20, 21, 22, 23, 24, 25]);
}

#[tokio::test]
async fn test_bad_filters_are_dropped_with_warnings() {
    let result = query_params(&[
        ("filter_column_0", "amount"),
        ("filter_operator_0", "="),
        ("filter_value_0", "lots"),
        ("filter_column_1", "colour"),
        ("filter_value_1", "red"),
        ("filter_column_2", "active"),
        ("filter_value_2", "yes"),
        ("date_column", "recorded_at"),
        ("start_date", "2024-02-01"),
        ("end_date", "2024-01-01"),
        ("page_size", "50"),
    ])
    .await;

    // Only the boolean filter survives
    assert_eq!(result.total_count, 12);
    assert!(ids(&result.rows).iter().all(|id| id % 2 == 0));
    assert_eq!(result.warnings.len(), 3);
    assert!(matches!(
        result.warnings[2],
        FilterWarning::InvalidDateRange { .. }
    ));
}

#[tokio::test]
async fn test_sort_with_identity_tiebreak() {
    let context = make_context(Setup::default()).await;
    let request = QueryRequest {
        sort: Some(SortRequest {
            column: "device".to_string(),
            descending: true,
        }),
        ..Default::default()
    };
    let result = context.query(SCHEMA, "readings", &request).await.unwrap();
    assert_eq!(ids(&result.rows)[..4], [2, 5, 8, 11]);
}

#[tokio::test]
async fn test_numeric_columns_order_numerically() {
    let result = query_params(&[("page_size", "12")]).await;
    assert_eq!(ids(&result.rows), (1..=12).collect::<Vec<_>>());

    let context = make_context(Setup::default()).await;
    let request = QueryRequest {
        sort: Some(SortRequest {
            column: "amount".to_string(),
            descending: true,
        }),
        ..Default::default()
    };
    let result = context.query(SCHEMA, "readings", &request).await.unwrap();
    assert_eq!(ids(&result.rows), vec![25, 24, 23, 22, 21, 20, 19, 18, 17, 16]);
}

#[tokio::test]
async fn test_keyset_walk() {
    let context = make_context(Setup {
        keyset_threshold: 10,
        ..Default::default()
    })
    .await;

    let mut seen = vec![];
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let request = QueryRequest {
            page: PageRequest {
                cursor: cursor.clone(),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = context.query(SCHEMA, "readings", &request).await.unwrap();
        assert_eq!(result.strategy, PaginationStrategy::Keyset);
        assert_eq!(result.has_previous, cursor.is_some());
        assert!(result.total_is_estimate);

        seen.extend(ids(&result.rows));
        pages += 1;
        if !result.has_next {
            assert_eq!(result.next_cursor, None);
            break;
        }
        cursor = result.next_cursor;
    }

    assert_eq!(pages, 3);
    assert_eq!(seen, (1..=READINGS as i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_missing_and_forbidden_tables() {
    let context = make_context(Setup::default()).await;

    let error = context
        .query(SCHEMA, "ghost", &QueryRequest::default())
        .await
        .unwrap_err();
    assert!(error.is_not_found());

    let error = context
        .query("temp", "readings", &QueryRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::Catalog(CatalogError::SchemaNotAllowed { .. })
    ));
}
