//! Client behaviour against a mocked transport: envelope normalization,
//! cursor pagination, and rate-limit backoff.

use booking_analytics::client::{
    extract_items, ApiClient, ClientError, HttpResponse, MockHttpTransport,
};
use mockall::Sequence;
use serde_json::{json, Value};
use std::time::Duration;

fn ok_json(body: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.to_string(),
    }
}

fn rate_limited(retry_after: Option<&str>) -> HttpResponse {
    let mut headers = Vec::new();
    if let Some(value) = retry_after {
        headers.push(("Retry-After".to_string(), value.to_string()));
    }
    HttpResponse {
        status: 429,
        headers,
        body: String::new(),
    }
}

#[test]
fn extract_items_prefers_collection_then_data_then_resources() {
    let collection = json!({"collection": [{"a": 1}], "data": [{"b": 2}]});
    assert_eq!(extract_items(&collection), vec![json!({"a": 1})]);

    let data = json!({"data": [{"b": 2}], "resources": [{"c": 3}]});
    assert_eq!(extract_items(&data), vec![json!({"b": 2})]);

    let resources = json!({"resources": [{"c": 3}]});
    assert_eq!(extract_items(&resources), vec![json!({"c": 3})]);
}

#[test]
fn extract_items_synthesizes_pseudo_items_from_plain_mapping() {
    let response = json!({
        "alpha": {"x": 1},
        "beta": 2,
        "pagination": {"next_page": null},
        "meta": {"page": 1}
    });
    let items = extract_items(&response);
    assert_eq!(items.len(), 2);
    assert!(items.contains(&json!({"alpha": {"x": 1}})));
    assert!(items.contains(&json!({"beta": 2})));
}

#[test]
fn extract_items_passes_lists_through_unchanged() {
    let response = json!([{"a": 1}, {"b": 2}]);
    assert_eq!(extract_items(&response), vec![json!({"a": 1}), json!({"b": 2})]);
    assert!(extract_items(&json!("scalar")).is_empty());
}

#[tokio::test]
async fn paginate_follows_cursors_in_arrival_order_across_envelopes() {
    let mut transport = MockHttpTransport::new();
    let mut seq = Sequence::new();

    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|url, params| {
            url == "https://api.example.com/event_types" && params.len() == 1
        })
        .returning(|_, _| {
            Ok(ok_json(json!({
                "collection": [{"n": 1}, {"n": 2}],
                "pagination": {"next_page": "https://api.example.com/event_types?page=2"}
            })))
        });
    // Explicit params must be dropped when following the cursor URL.
    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|url, params| {
            url == "https://api.example.com/event_types?page=2" && params.is_empty()
        })
        .returning(|_, _| {
            Ok(ok_json(json!({
                "data": [{"n": 3}],
                "meta": {"pagination": {"next_page": "https://api.example.com/event_types?page=3"}}
            })))
        });
    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .withf(|url, params| {
            url == "https://api.example.com/event_types?page=3" && params.is_empty()
        })
        .returning(|_, _| Ok(ok_json(json!({"resources": [{"n": 4}]}))));

    let client = ApiClient::new(transport, None);
    let items = client
        .paginate(
            "https://api.example.com/event_types",
            &[("organization".to_string(), "org1".to_string())],
        )
        .await
        .expect("pagination should succeed");

    let ns: Vec<i64> = items.iter().filter_map(|i| i.get("n")?.as_i64()).collect();
    assert_eq!(ns, vec![1, 2, 3, 4], "arrival order, no drops, no duplicates");
}

#[tokio::test(start_paused = true)]
async fn rate_limited_request_waits_for_retry_after_then_succeeds() {
    let mut transport = MockHttpTransport::new();
    let mut seq = Sequence::new();

    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(rate_limited(Some("3"))));
    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(ok_json(json!({"resource": {"ok": true}}))));

    let client = ApiClient::new(transport, None);
    let started = tokio::time::Instant::now();
    let value = client
        .fetch_json("https://api.example.com/users/me", &[])
        .await
        .expect("retry after backoff should succeed");

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(value["resource"]["ok"], json!(true));
}

#[tokio::test(start_paused = true)]
async fn missing_retry_after_defaults_to_five_seconds() {
    let mut transport = MockHttpTransport::new();
    let mut seq = Sequence::new();

    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(rate_limited(None)));
    transport
        .expect_get()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(ok_json(json!({"collection": []}))));

    let client = ApiClient::new(transport, None);
    let started = tokio::time::Instant::now();
    client
        .fetch_json("https://api.example.com/event_types", &[])
        .await
        .expect("should succeed after default wait");
    assert!(started.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn backoff_cap_turns_persistent_rate_limiting_into_an_error() {
    let mut transport = MockHttpTransport::new();
    transport
        .expect_get()
        .returning(|_, _| Ok(rate_limited(Some("5"))));

    let client = ApiClient::new(transport, Some(Duration::from_secs(12)));
    let err = client
        .fetch_json("https://api.example.com/users/me", &[])
        .await
        .expect_err("cap must bound the retry loop");

    assert!(matches!(err, ClientError::BackoffExhausted { .. }));
}

#[tokio::test]
async fn non_success_status_is_terminal_with_truncated_body() {
    let mut transport = MockHttpTransport::new();
    transport.expect_get().times(1).returning(|_, _| {
        Ok(HttpResponse {
            status: 401,
            headers: vec![],
            body: "x".repeat(500),
        })
    });

    let client = ApiClient::new(transport, None);
    let err = client
        .fetch_json("https://api.example.com/users/me", &[])
        .await
        .expect_err("401 must not be retried");

    match err {
        ClientError::Status { status, url, body } => {
            assert_eq!(status, 401);
            assert_eq!(url, "https://api.example.com/users/me");
            assert_eq!(body.len(), 200);
        }
        other => panic!("expected status error, got {other:?}"),
    }
}
