mod common;

use sheetq::{Api, Response};

fn api(h: &common::Harness) -> Api {
    Api::new(h.lock.clone(), h.queue.clone())
}

#[tokio::test]
async fn insert_row_request_enqueues_one_item() {
    let h = common::harness();
    let response = api(&h)
        .handle(
            r#"{
                "type": "insertRow",
                "id": "req-item-1",
                "data": {
                    "containerName": "ops",
                    "tableName": "rows",
                    "data": {"v": 1}
                }
            }"#,
        )
        .await;

    assert!(response.is_success());
    let json = response.to_json();
    assert!(json.contains("\"success\":true"));
    assert!(json.contains("\"requestId\":\"req_"));

    let items = h.queue.snapshot().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id.as_str(), "req-item-1");
    assert_eq!(items[0].destination.container_name.as_deref(), Some("ops"));
    // The lock is free again after the request.
    assert!(h.lock.holder().unwrap().is_none());
}

#[tokio::test]
async fn retried_request_with_same_id_does_not_double_enqueue() {
    let h = common::harness();
    let body = r#"{"type": "insertRow", "id": "retry-1", "data": {"data": {"v": 1}}}"#;
    let a = api(&h);

    assert!(a.handle(body).await.is_success());
    // The retry also reports success; the queue just ignores the duplicate.
    assert!(a.handle(body).await.is_success());
    assert_eq!(h.queue.size().unwrap(), 1);
}

#[tokio::test]
async fn array_data_fans_out_to_one_item_per_element() {
    let h = common::harness();
    let response = api(&h)
        .handle(
            r#"{
                "type": "insertRowMany",
                "data": [
                    {"data": {"v": 1}},
                    {"data": {"v": 2}},
                    {"data": {"v": 3}}
                ]
            }"#,
        )
        .await;

    assert!(response.is_success());
    assert_eq!(h.queue.size().unwrap(), 3);
}

#[tokio::test]
async fn unparsable_body_is_rejected_before_any_mutation() {
    let h = common::harness();
    let response = api(&h).handle("{definitely not json").await;

    match &response {
        Response::Failure { error, .. } => assert_eq!(error, "malformed_request"),
        Response::Success { .. } => panic!("expected failure"),
    }
    assert_eq!(h.queue.size().unwrap(), 0);
    assert!(h.lock.holder().unwrap().is_none());
}

#[tokio::test]
async fn unknown_operation_kind_is_rejected() {
    let h = common::harness();
    let response = api(&h)
        .handle(r#"{"type": "dropEverything", "data": {"data": {}}}"#)
        .await;

    match &response {
        Response::Failure { error, message, .. } => {
            assert_eq!(error, "invalid_request_type");
            assert!(message.contains("insertRow"));
        }
        Response::Success { .. } => panic!("expected failure"),
    }
    assert_eq!(h.queue.size().unwrap(), 0);
}

#[tokio::test]
async fn bad_timestamp_is_rejected_before_the_lock() {
    let h = common::harness();
    let response = api(&h)
        .handle(r#"{"type": "insertRow", "timestamp": "someday", "data": {"data": {}}}"#)
        .await;

    assert!(!response.is_success());
    assert_eq!(h.queue.size().unwrap(), 0);
}

#[tokio::test]
async fn busy_lock_surfaces_as_explicit_failure() {
    let h = common::harness();
    // Hold the lock for longer than the request's acquire window.
    h.lock.acquire("hog").await.unwrap();

    let response = api(&h)
        .handle(r#"{"type": "insertRow", "data": {"data": {"v": 1}}}"#)
        .await;

    match &response {
        Response::Failure { error, .. } => assert_eq!(error, "lock_timeout"),
        Response::Success { .. } => panic!("expected lock_timeout failure"),
    }
    // Rejected request mutated nothing.
    assert_eq!(h.queue.size().unwrap(), 0);
    assert_eq!(h.lock.holder().unwrap().unwrap().owner_id, "hog");
}

#[tokio::test]
async fn rfc3339_timestamps_order_the_queue() {
    let h = common::harness();
    let a = api(&h);
    a.handle(
        r#"{"type": "insertRow", "id": "late", "timestamp": "2024-06-02T00:00:00Z", "data": {"data": {}}}"#,
    )
    .await;
    a.handle(
        r#"{"type": "insertRow", "id": "early", "timestamp": "2024-06-01T00:00:00Z", "data": {"data": {}}}"#,
    )
    .await;

    assert_eq!(common::ids(&h.queue.snapshot().unwrap()), vec!["early", "late"]);
}
