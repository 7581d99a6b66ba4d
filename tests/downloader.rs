//! Bulk downloader sequence against a mocked transport: persistence
//! layout, tagging, graceful per-resource degradation and the single-run
//! guard.

use booking_analytics::client::{ApiClient, HttpResponse, MockHttpTransport};
use booking_analytics::config::Config;
use booking_analytics::download::{BulkDownloader, DownloadError, TOTAL_STEPS};
use booking_analytics::progress::{DownloadCoordinator, ProgressReporter, StartOutcome};
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
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

fn ok_json(body: Value) -> HttpResponse {
    HttpResponse {
        status: 200,
        headers: vec![],
        body: body.to_string(),
    }
}

fn not_found() -> HttpResponse {
    HttpResponse {
        status: 404,
        headers: vec![],
        body: "{\"title\":\"Resource Not Found\"}".to_string(),
    }
}

fn read_array(path: &Path) -> Vec<Value> {
    let content = fs::read_to_string(path).expect("file should exist");
    serde_json::from_str::<Value>(&content)
        .expect("valid JSON")
        .as_array()
        .expect("array")
        .clone()
}

/// Full six-step run: one event type in the cohort, one outside it whose
/// scheduled-events fetch fails and is skipped, invitees per event.
#[tokio::test]
async fn full_run_persists_all_resources_and_degrades_gracefully() {
    let dir = tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let mut transport = MockHttpTransport::new();

    transport
        .expect_get()
        .withf(|url, _| url == "https://api.example.com/users/me")
        .returning(|_, _| {
            Ok(ok_json(json!({
                "resource": {"uri": "u1", "current_organization": "https://api.example.com/organizations/org1"}
            })))
        });
    transport
        .expect_get()
        .withf(|url, _| url == "https://api.example.com/organization_memberships")
        .returning(|_, _| Ok(ok_json(json!({"collection": [{"uri": "m1"}, {"uri": "m2"}]}))));
    transport
        .expect_get()
        .withf(|url, _| url == "https://api.example.com/event_types")
        .returning(|_, _| {
            Ok(ok_json(json!({"collection": [
                {"uri": "et1", "name": "Cleverly Introduction", "internal_note": "Plan A"},
                {"uri": "et2", "name": "Other Meeting"}
            ]})))
        });
    // Step 4 is optional: a 404 here must not abort the run.
    transport
        .expect_get()
        .withf(|url, _| url == "https://api.example.com/users")
        .returning(|_, _| Ok(not_found()));
    transport
        .expect_get()
        .withf(|url, params| {
            url == "https://api.example.com/scheduled_events"
                && params.iter().any(|(k, v)| k == "event_type" && v == "et1")
        })
        .returning(|_, _| {
            Ok(ok_json(json!({"collection": [
                {"uri": "https://api.example.com/scheduled_events/se1", "event_type": "et1", "status": "active"}
            ]})))
        });
    // One event type's scheduled events failing is logged and skipped.
    transport
        .expect_get()
        .withf(|url, params| {
            url == "https://api.example.com/scheduled_events"
                && params.iter().any(|(k, v)| k == "event_type" && v == "et2")
        })
        .returning(|_, _| {
            Ok(HttpResponse {
                status: 500,
                headers: vec![],
                body: "boom".to_string(),
            })
        });
    transport
        .expect_get()
        .withf(|url, _| url == "https://api.example.com/scheduled_events/se1/invitees")
        .returning(|_, _| {
            Ok(ok_json(json!({"collection": [
                {"uri": "i1", "email": "a@x.com", "status": "active"}
            ]})))
        });

    let progress = ProgressReporter::new(TOTAL_STEPS);
    let downloader = BulkDownloader::new(
        config.clone(),
        ApiClient::new(transport, None),
        progress.clone(),
    );
    let summary = downloader.run().await.expect("run should succeed");

    assert_eq!(summary.organization_memberships, 2);
    assert_eq!(summary.event_types, 2);
    assert_eq!(summary.matching_event_types, 1);
    assert_eq!(summary.scheduled_events, 1);
    assert_eq!(summary.invitees, 1);

    // Persisted layout.
    assert!(dir.path().join("users_me.json").exists());
    assert_eq!(read_array(&dir.path().join("organization_memberships.json")).len(), 2);
    assert_eq!(read_array(&dir.path().join("event_types.json")).len(), 2);
    assert!(!dir.path().join("users.json").exists());

    // Scheduled events are tagged with their owning event type.
    let scheduled = read_array(&dir.path().join("scheduled_events.json"));
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0]["_event_type_name"], json!("Cleverly Introduction"));
    assert_eq!(scheduled[0]["_event_type_uri"], json!("et1"));

    // Invitee file is named by the trailing URI path segment.
    assert_eq!(read_array(&dir.path().join("invitees").join("se1.json")).len(), 1);

    // No leftover temp files from atomic writes.
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());

    let snapshot = progress.snapshot();
    assert_eq!(snapshot.current_step, TOTAL_STEPS);
    assert_eq!(snapshot.percentage, 100);
}

#[tokio::test]
async fn organization_uri_fallback_paths_are_tried_in_order() {
    for me in [
        json!({"resource": {"current_organization": "org-a"}}),
        json!({"current_organization": "org-a"}),
        json!({"data": {"current_organization": "org-a"}}),
        json!({"organization": "org-a"}),
    ] {
        assert_eq!(
            booking_analytics::download::resolve_organization_uri(&me).as_deref(),
            Some("org-a")
        );
    }
    assert_eq!(
        booking_analytics::download::resolve_organization_uri(&json!({"resource": {}})),
        None
    );
}

#[tokio::test]
async fn unresolvable_organization_is_fatal() {
    let dir = tempdir().expect("tempdir");
    let config = test_config(dir.path());
    let mut transport = MockHttpTransport::new();
    transport
        .expect_get()
        .withf(|url, _| url == "https://api.example.com/users/me")
        .returning(|_, _| Ok(ok_json(json!({"resource": {"uri": "u1"}}))));

    let downloader = BulkDownloader::new(
        config,
        ApiClient::new(transport, None),
        ProgressReporter::new(TOTAL_STEPS),
    );
    let err = downloader.run().await.expect_err("must be fatal");
    assert!(matches!(err, DownloadError::MissingOrganization));
}

#[test]
fn coordinator_rejects_second_start_while_running() {
    let coordinator = DownloadCoordinator::new(TOTAL_STEPS);
    assert_eq!(coordinator.try_start(), StartOutcome::Started);
    assert_eq!(coordinator.try_start(), StartOutcome::AlreadyRunning);
    assert!(coordinator.is_running());

    coordinator.finish(Err("boom".to_string()));
    assert!(!coordinator.is_running());
    assert_eq!(coordinator.try_start(), StartOutcome::Started);
}
