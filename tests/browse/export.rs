use futures::{StreamExt, TryStreamExt};
use rowscope::query::params::QueryRequest;

use crate::fixtures::{make_context, params, Setup, READINGS, SCHEMA};

#[tokio::test]
async fn test_export_whole_table() {
    let context = make_context(Setup::default()).await;
    let export = context
        .stream_export(SCHEMA, "readings", &QueryRequest::default())
        .await
        .unwrap();

    assert!(export.filename.starts_with("main_readings_"));
    assert!(export.filename.ends_with(".csv"));

    let lines: Vec<String> = export.lines.try_collect().await.unwrap();
    assert_eq!(lines.len(), READINGS + 1);
    assert_eq!(
        lines[0],
        "id,device,amount,active,recorded_at,created_at\n"
    );
    assert_eq!(
        lines[1],
        "1,probe-1,1.5,false,2024-01-01 10:00:00,2000-01-01 00:00:00\n"
    );
    assert!(lines[READINGS].starts_with("25,"));
}

#[tokio::test]
async fn test_export_filtered() {
    let context = make_context(Setup::default()).await;
    let request = QueryRequest::from_params(&params(&[
        ("filter_column_0", "device"),
        ("filter_operator_0", "="),
        ("filter_value_0", "probe-1"),
        ("filter_column_1", "nope"),
        ("filter_value_1", "x"),
    ]));

    let export = context
        .stream_export(SCHEMA, "readings", &request)
        .await
        .unwrap();
    assert_eq!(export.warnings.len(), 1);

    let lines: Vec<String> = export.lines.try_collect().await.unwrap();
    let ids = lines[1..]
        .iter()
        .map(|line| line.split(',').next().unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["1", "4", "7", "10", "13", "16", "19", "22", "25"]);
}

#[tokio::test]
async fn test_export_without_declared_key() {
    let context = make_context(Setup {
        export_batch_size: 1,
        ..Default::default()
    })
    .await;

    let export = context
        .stream_export(SCHEMA, "tags", &QueryRequest::default())
        .await
        .unwrap();
    let lines: Vec<String> = export.lines.try_collect().await.unwrap();
    assert_eq!(lines.len(), 4);
    assert_eq!(lines[0], "name,note\n");
    assert_eq!(lines[3], "solo,\n");
}

#[tokio::test]
async fn test_export_stops_when_dropped() {
    let context = make_context(Setup::default()).await;
    let export = context
        .stream_export(SCHEMA, "readings", &QueryRequest::default())
        .await
        .unwrap();

    let first: Vec<String> = export
        .lines
        .take(3)
        .try_collect()
        .await
        .unwrap();
    assert_eq!(first.len(), 3);

    // The context is still usable afterwards
    let export = context
        .stream_export(SCHEMA, "tags", &QueryRequest::default())
        .await
        .unwrap();
    assert_eq!(export.lines.count().await, 4);
}
