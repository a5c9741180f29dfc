use chrono::NaiveDate;
use rowscope::context::RowscopeContext;
use rowscope::data_types::{Operation, Value};
use rowscope::query::params::QueryRequest;
use rowscope::query::QueryError;
use rowscope::repository::interface::Error as RepositoryError;

use crate::fixtures::{make_context, params, Setup, READINGS, SCHEMA};

async fn find(
    context: &RowscopeContext,
    table: &str,
    pairs: &[(&str, &str)],
) -> rowscope::context::PageResult {
    context
        .query(SCHEMA, table, &QueryRequest::from_params(&params(pairs)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_insert_round_trip() {
    let context = make_context(Setup::default()).await;

    context
        .insert(
            SCHEMA,
            "readings",
            &params(&[
                ("device", "probe-9"),
                ("amount", "12.25"),
                ("active", "on"),
                ("recorded_at", "05.02.2024 08:30"),
                ("created_at", "1999-12-31"),
                ("colour", "blue"),
            ]),
        )
        .await
        .unwrap();

    let result = find(
        &context,
        "readings",
        &[
            ("filter_column_0", "device"),
            ("filter_operator_0", "eq"),
            ("filter_value_0", "probe-9"),
        ],
    )
    .await;
    assert_eq!(result.total_count, 1);

    let row = &result.rows[0];
    assert_eq!(row.get("id"), Some(&Value::Integer(READINGS as i64 + 1)));
    assert_eq!(row.get("amount"), Some(&Value::Float(12.25)));
    assert_eq!(row.get("active"), Some(&Value::Boolean(true)));
    assert_eq!(
        row.get("recorded_at"),
        Some(&Value::DateTime(
            NaiveDate::from_ymd_opt(2024, 2, 5)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap()
        ))
    );
    // Audit columns are left to the store
    assert_eq!(
        row.get("created_at"),
        Some(&Value::DateTime(
            NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        ))
    );
}

#[tokio::test]
async fn test_insert_errors() {
    let context = make_context(Setup::default()).await;

    let error = context
        .insert(SCHEMA, "readings", &params(&[("id", "abc"), ("device", "x")]))
        .await
        .unwrap_err();
    assert!(matches!(error, QueryError::Coercion { ref column, .. } if column == "id"));

    let error = context
        .insert(SCHEMA, "readings", &params(&[("id", "1"), ("device", "x")]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::Store {
            operation: Operation::Insert,
            source: RepositoryError::UniqueConstraintViolation(_),
            ..
        }
    ));

    let error = context
        .insert(SCHEMA, "readings", &params(&[("amount", "1")]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::Store {
            source: RepositoryError::NotNullViolation(_),
            ..
        }
    ));

    // Unparseable values on nullable columns become NULL
    context
        .insert(
            SCHEMA,
            "readings",
            &params(&[("device", "probe-x"), ("amount", "lots")]),
        )
        .await
        .unwrap();
    let result = find(
        &context,
        "readings",
        &[
            ("filter_column_0", "amount"),
            ("filter_operator_0", "is_null"),
        ],
    )
    .await;
    assert_eq!(result.total_count, 1);
}

#[tokio::test]
async fn test_update_then_concurrent_delete() {
    let context = make_context(Setup::default()).await;
    let identity = params(&[("id", "5")]);

    context
        .update(SCHEMA, "readings", &identity, &params(&[("amount", "99")]))
        .await
        .unwrap();
    let result = find(
        &context,
        "readings",
        &[("filter_column_0", "id"), ("filter_value_0", "5")],
    )
    .await;
    assert_eq!(result.rows[0].get("amount"), Some(&Value::Float(99.0)));

    context.delete(SCHEMA, "readings", &identity).await.unwrap();

    let error = context
        .update(SCHEMA, "readings", &identity, &params(&[("amount", "1")]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::ConcurrentModification {
            operation: Operation::Update,
            ..
        }
    ));

    let error = context
        .delete(SCHEMA, "readings", &identity)
        .await
        .unwrap_err();
    assert!(matches!(error, QueryError::ConcurrentModification { .. }));

    // Only audit columns sent: nothing to write, but the row is still gone
    let error = context
        .update(
            SCHEMA,
            "readings",
            &identity,
            &params(&[("created_at", "2024-01-01")]),
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
async fn test_ambiguous_fallback_identity_rolls_back() {
    let context = make_context(Setup::default()).await;

    let error = context
        .delete(SCHEMA, "tags", &params(&[("name", "dup")]))
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        QueryError::AmbiguousIdentity {
            operation: Operation::Delete,
            affected: 2,
            ..
        }
    ));
    assert_eq!(find(&context, "tags", &[]).await.total_count, 3);

    context
        .delete(SCHEMA, "tags", &params(&[("name", "solo")]))
        .await
        .unwrap();
    assert_eq!(find(&context, "tags", &[]).await.total_count, 2);
}

#[tokio::test]
async fn test_null_identity_and_default_values() {
    let context = make_context(Setup::default()).await;

    context
        .insert(SCHEMA, "tags", &params(&[("note", "orphan")]))
        .await
        .unwrap();
    context
        .update(
            SCHEMA,
            "tags",
            &params(&[("name", "")]),
            &params(&[("note", "adopted")]),
        )
        .await
        .unwrap();

    let result = find(
        &context,
        "tags",
        &[
            ("filter_column_0", "note"),
            ("filter_operator_0", "="),
            ("filter_value_0", "adopted"),
        ],
    )
    .await;
    assert_eq!(result.total_count, 1);
    assert_eq!(result.rows[0].get("name"), Some(&Value::Null));

    // Nothing to write at all
    context
        .insert(SCHEMA, "tags", &params(&[]))
        .await
        .unwrap();
    assert_eq!(find(&context, "tags", &[]).await.total_count, 5);
}
