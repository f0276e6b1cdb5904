use chrono::{Duration, Utc};

use switchvault::db;
use switchvault::db::services::event_service::{self, EventFilter, EventKind, NewEvent};
use switchvault::workers::JobKind;

fn event(device_id: i32, kind: EventKind, detail: &str) -> NewEvent {
    NewEvent {
        device_id: Some(device_id),
        job_kind: Some(JobKind::Poll),
        kind,
        detail: detail.into(),
        duration_ms: Some(40),
    }
}

#[tokio::test]
async fn filters_by_device_kind_and_time() {
    let db = db::connect_for_tests().await;

    event_service::record_event(&db, event(1, EventKind::Success, "poll ok")).await.unwrap();
    event_service::record_event(&db, event(1, EventKind::PartialFailure, "vlan walk timed out"))
        .await
        .unwrap();
    event_service::record_event(&db, event(2, EventKind::Success, "poll ok")).await.unwrap();

    let device_one = event_service::query_events(
        &db,
        EventFilter { device_id: Some(1), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(device_one.len(), 2);

    let partial = event_service::query_events(
        &db,
        EventFilter { kind: Some("partial_failure".into()), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0].device_id, Some(1));

    let future_only = event_service::query_events(
        &db,
        EventFilter { from: Some(Utc::now() + Duration::hours(1)), ..Default::default() },
    )
    .await
    .unwrap();
    assert!(future_only.is_empty());

    let recent = event_service::query_events(
        &db,
        EventFilter {
            from: Some(Utc::now() - Duration::minutes(5)),
            to: Some(Utc::now() + Duration::minutes(5)),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(recent.len(), 3);
}

#[tokio::test]
async fn query_returns_newest_first_and_honors_limit() {
    let db = db::connect_for_tests().await;

    for i in 0..5 {
        event_service::record_event(&db, event(1, EventKind::Success, &format!("run {i}")))
            .await
            .unwrap();
    }

    let limited = event_service::query_events(
        &db,
        EventFilter { device_id: Some(1), limit: Some(2), ..Default::default() },
    )
    .await
    .unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].detail, "run 4");
    assert_eq!(limited[1].detail, "run 3");
}
