use chrono::{Duration, Utc};
use serde_json::json;

use switchvault::db;
use switchvault::db::services::metric_service::{self, MetricQuery, NewSample};

#[tokio::test]
async fn stores_batches_and_queries_by_metric_and_range() {
    let db = db::connect_for_tests().await;
    let t0 = Utc::now() - Duration::minutes(10);
    let t1 = Utc::now();

    metric_service::insert_samples(
        &db,
        1,
        t0,
        vec![
            NewSample { metric: "cpu_load_percent".into(), value: json!(12) },
            NewSample { metric: "uptime_seconds".into(), value: json!(86400) },
        ],
    )
    .await
    .unwrap();
    metric_service::insert_samples(
        &db,
        1,
        t1,
        vec![NewSample { metric: "cpu_load_percent".into(), value: json!(47) }],
    )
    .await
    .unwrap();

    let cpu = metric_service::query_samples(
        &db,
        1,
        MetricQuery { metric: Some("cpu_load_percent".into()), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(cpu.len(), 2);
    // Newest first.
    assert_eq!(cpu[0].value, json!(47));
    assert_eq!(cpu[1].value, json!(12));

    let recent = metric_service::query_samples(
        &db,
        1,
        MetricQuery { from: Some(Utc::now() - Duration::minutes(1)), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(recent.len(), 1);
}

#[tokio::test]
async fn eviction_drops_only_the_oldest_samples() {
    let db = db::connect_for_tests().await;
    let base = Utc::now() - Duration::minutes(60);

    for i in 0..10 {
        metric_service::insert_samples(
            &db,
            1,
            base + Duration::minutes(i),
            vec![NewSample { metric: "cpu_load_percent".into(), value: json!(i) }],
        )
        .await
        .unwrap();
    }

    let evicted = metric_service::prune_samples(&db, 1, 4).await.unwrap();
    assert_eq!(evicted, 6);

    let survivors = metric_service::query_samples(&db, 1, MetricQuery::default()).await.unwrap();
    assert_eq!(survivors.len(), 4);
    // The newest four, still in descending order.
    let values: Vec<i64> = survivors.iter().map(|s| s.value.as_i64().unwrap()).collect();
    assert_eq!(values, vec![9, 8, 7, 6]);

    // Under the cap nothing happens.
    assert_eq!(metric_service::prune_samples(&db, 1, 100).await.unwrap(), 0);
}
