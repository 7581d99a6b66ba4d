//! Facade lifecycle: background start, single-run guard, progress
//! polling and terminal state retrieval.

use booking_analytics::client::{HttpResponse, MockHttpTransport};
use booking_analytics::config::Config;
use booking_analytics::progress::RunState;
use booking_analytics::service::Service;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn test_config(data_dir: &Path) -> Config {
    Config {
        api_key: "test-token".to_string(),
        base_url: "https://api.example.com".to_string(),
        data_dir: data_dir.to_path_buf(),
        target_event_name: "Cleverly Introduction".to_string(),
        http_timeout_secs: 30,
        max_total_backoff_secs: None,
    }
}

fn ok_json(body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![],
        body: body.to_string(),
    }
}

async fn wait_until_idle(service: &Service) -> RunState {
    for _ in 0..100 {
        if !service.is_downloading() {
            return service.run_state();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("download did not reach a terminal state");
}

#[tokio::test]
async fn start_runs_in_background_and_finishes_with_a_summary() {
    let dir = tempdir().expect("tempdir");
    let mut transport = MockHttpTransport::new();
    transport
        .expect_get()
        .withf(|url, _| url.ends_with("/users/me"))
        .returning(|_, _| {
            Ok(ok_json(json!({"resource": {"current_organization": "org1"}})))
        });
    transport
        .expect_get()
        .withf(|url, _| url.ends_with("/organization_memberships"))
        .returning(|_, _| Ok(ok_json(json!({"collection": []}))));
    transport
        .expect_get()
        .withf(|url, _| url.ends_with("/event_types"))
        .returning(|_, _| Ok(ok_json(json!({"collection": []}))));
    transport
        .expect_get()
        .withf(|url, _| url.ends_with("/users"))
        .returning(|_, _| {
            Ok(HttpResponse {
                status: 404,
                headers: vec![],
                body: String::new(),
            })
        });

    let service = Service::new(test_config(dir.path()));
    let response = service.start_download_with(transport);
    assert_eq!(response.status, "started");

    match wait_until_idle(&service).await {
        RunState::Finished(summary) => {
            assert_eq!(summary.event_types, 0);
            assert_eq!(summary.scheduled_events, 0);
        }
        other => panic!("expected finished run, got {other:?}"),
    }

    assert!(dir.path().join("users_me.json").exists());
    assert!(dir.path().join("scheduled_events.json").exists());
    let progress = service.get_progress();
    assert_eq!(progress.current_step, progress.total_steps);
}

#[tokio::test]
async fn second_start_is_acknowledged_as_already_running() {
    let dir = tempdir().expect("tempdir");
    // Fails at step 1, but not before the second start request is made:
    // on a current-thread runtime the spawned task only runs once awaited.
    let mut transport = MockHttpTransport::new();
    transport.expect_get().returning(|_, _| {
        Ok(HttpResponse {
            status: 401,
            headers: vec![],
            body: "unauthorized".to_string(),
        })
    });

    let service = Service::new(test_config(dir.path()));
    let first = service.start_download_with(transport);
    assert_eq!(first.status, "started");

    let second = service.start_download_with(MockHttpTransport::new());
    assert_eq!(second.status, "already_running");

    match wait_until_idle(&service).await {
        RunState::Failed(message) => {
            assert!(message.contains("Authentication failed"), "got: {message}");
        }
        other => panic!("expected failed run, got {other:?}"),
    }

    // The slot is free again after a terminal state.
    let mut retry_transport = MockHttpTransport::new();
    retry_transport.expect_get().returning(|_, _| {
        Ok(HttpResponse {
            status: 401,
            headers: vec![],
            body: "unauthorized".to_string(),
        })
    });
    let third = service.start_download_with(retry_transport);
    assert_eq!(third.status, "started");
    wait_until_idle(&service).await;
}
