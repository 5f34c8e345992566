use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use http_body_util::BodyExt;
use killswitch_core::audit::{check_fn, Finding};
use killswitch_core::audit_log::MemoryAuditLog;
use killswitch_core::config::{Config, IdentityConfig};
use killswitch_core::policy::AllowList;
use killswitch_core::store::MemoryStore;
use killswitch_core::KillSwitchService;
use killswitch_server::{build_router, AppState};
use tempfile::TempDir;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Router over an in-memory service where only principalA and principalB may
/// toggle `global`, plus two ad-hoc checks for the audit routes.
fn test_app() -> axum::Router {
    let policy = AllowList::new()
        .allow("global", "principalA")
        .allow("global", "principalB");
    let service = KillSwitchService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(policy),
        Arc::new(MemoryAuditLog::new()),
    )
    .with_check(check_fn("checkA", || Ok(Finding::pass("fine"))))
    .with_check(check_fn("checkB", || anyhow::bail!("exploded")));
    build_router(AppState::new(
        service,
        IdentityConfig::default(),
        "global".into(),
    ))
}

async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    principal: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = axum::http::Request::builder().method(method).uri(uri);
    if let Some(p) = principal {
        builder = builder.header("x-principal-id", p);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            axum::body::Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => axum::body::Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None, None).await
}

async fn toggle(app: axum::Router, key: &str, principal: &str) -> (StatusCode, serde_json::Value) {
    send(
        app,
        "POST",
        &format!("/switches/{key}/toggle"),
        Some(principal),
        None,
    )
    .await
}

// ---------------------------------------------------------------------------
// Switches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_unknown_switch_creates_inactive_record() {
    let (status, json) = get(test_app(), "/switches/global").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"], "global");
    assert_eq!(json["active"], false);
    assert_eq!(json["version"], 0);
    assert_eq!(json["lastActor"], "System");
}

#[tokio::test]
async fn invalid_key_is_400() {
    let (status, json) = get(test_app(), "/switches/bad%20key").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "InvalidKey");
}

#[tokio::test]
async fn global_scenario_over_http() {
    let app = test_app();

    let (status, json) = toggle(app.clone(), "global", "principalA").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["active"], true);
    assert_eq!(json["version"], 1);
    assert_eq!(json["lastActor"], "principalA");

    let (status, json) = toggle(app.clone(), "global", "principalB").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["active"], false);
    assert_eq!(json["version"], 2);
    assert_eq!(json["lastActor"], "principalB");

    let (status, json) = toggle(app.clone(), "global", "principalC").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["error"], "Unauthorized");

    let (_, json) = get(app, "/switches/global").await;
    assert_eq!(json["version"], 2);
}

#[tokio::test]
async fn toggle_without_principal_is_401() {
    let (status, json) = send(test_app(), "POST", "/switches/global/toggle", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error"], "Unauthorized");
}

#[tokio::test]
async fn put_sets_state_idempotently() {
    let app = test_app();
    let body = serde_json::json!({ "active": true });

    let (status, json) = send(
        app.clone(),
        "PUT",
        "/switches/global",
        Some("principalA"),
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["version"], 1);

    let (status, json) = send(
        app.clone(),
        "PUT",
        "/switches/global",
        Some("principalB"),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["version"], 1);
    assert_eq!(json["lastActor"], "principalA");

    let (_, log) = get(app, "/audit/log").await;
    assert_eq!(log.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn put_with_wrong_body_type_is_400_json() {
    let app = test_app();
    let (status, json) = send(
        app.clone(),
        "PUT",
        "/switches/global",
        Some("principalA"),
        Some(serde_json::json!({ "active": "yes" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "InvalidRequest");
    assert!(json["detail"].as_str().unwrap().contains("active"));

    let (_, record) = get(app, "/switches/global").await;
    assert_eq!(record["version"], 0);
}

#[tokio::test]
async fn put_without_body_is_400_json() {
    let (status, json) = send(test_app(), "PUT", "/switches/global", Some("principalA"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "InvalidRequest");
}

#[tokio::test]
async fn list_returns_records_by_key() {
    let app = test_app();
    get(app.clone(), "/switches/global").await;
    get(app.clone(), "/switches/alpha").await;
    let (status, json) = get(app, "/switches").await;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["alpha", "global"]);
}

// ---------------------------------------------------------------------------
// Status / health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_banner_follows_default_switch() {
    let app = test_app();
    let (status, json) = get(app.clone(), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["state"], "INACTIVE");
    assert_eq!(json["banner"], "NOMINAL OPERATION");

    toggle(app.clone(), "global", "principalA").await;
    let (_, json) = get(app, "/status").await;
    assert_eq!(json["state"], "ACTIVE");
    assert_eq!(json["banner"], "EMERGENCY SHUTDOWN ACTIVE (KILL-SWITCH)");
}

#[tokio::test]
async fn health_is_open_even_with_proxy_token() {
    let service = KillSwitchService::new(
        Arc::new(MemoryStore::new()),
        Arc::new(AllowList::new()),
        Arc::new(MemoryAuditLog::new()),
    );
    let identity = IdentityConfig {
        token: Some("proxy-secret".into()),
        ..IdentityConfig::default()
    };
    let app = build_router(AppState::new(service, identity, "global".into()));

    let (status, json) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["policy"], "allow_list");

    let (status, _) = get(app, "/switches/global").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audit_run_records_pass_and_fault() {
    let app = test_app();
    let (status, json) = send(
        app.clone(),
        "POST",
        "/audit/run",
        Some("auditor"),
        Some(serde_json::json!({ "checks": ["checkA", "checkB", "nope"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let checks = json["checks"].as_array().unwrap();
    assert_eq!(checks.len(), 3);
    assert_eq!(checks[0]["outcome"], "PASS");
    assert_eq!(checks[1]["outcome"], "FAIL");
    assert!(checks[1]["detail"].as_str().unwrap().contains("exploded"));
    assert_eq!(checks[2]["outcome"], "FAIL");
    assert!(json["completedAt"].is_string());

    let (status, latest) = get(app, "/audit/reports/latest").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(latest["runId"], json["runId"]);
}

#[tokio::test]
async fn audit_run_without_body_is_400_json() {
    let app = test_app();
    let (status, json) = send(app.clone(), "POST", "/audit/run", Some("auditor"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "InvalidRequest");

    let (status, _) = get(app, "/audit/reports/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_toggles_keep_ledger_consistent() {
    let app = test_app();
    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let app = app.clone();
            let who = if i % 2 == 0 { "principalA" } else { "principalB" };
            tokio::spawn(async move { toggle(app, "global", who).await.0 })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    let (_, log) = get(app.clone(), "/audit/log").await;
    let versions: Vec<u64> = log
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["version"].as_u64().unwrap())
        .collect();
    assert_eq!(versions, (1..=20).collect::<Vec<_>>());

    let (status, report) = send(
        app,
        "POST",
        "/audit/run",
        Some("auditor"),
        Some(serde_json::json!({ "checks": ["ledger_consistency"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checks"][0]["outcome"], "PASS");
}

#[tokio::test]
async fn latest_report_is_404_before_any_run() {
    let (status, json) = get(test_app(), "/audit/reports/latest").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "NotFound");
}

#[tokio::test]
async fn audit_log_chains_toggles() {
    let app = test_app();
    toggle(app.clone(), "global", "principalA").await;
    toggle(app.clone(), "global", "principalB").await;

    let (status, json) = get(app.clone(), "/audit/log").await;
    assert_eq!(status, StatusCode::OK);
    let entries = json.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["fromState"], "INACTIVE");
    assert_eq!(entries[0]["toState"], "ACTIVE");
    assert_eq!(entries[1]["prevHash"], entries[0]["hash"]);

    let (_, report) = send(
        app,
        "POST",
        "/audit/run",
        Some("auditor"),
        Some(serde_json::json!({ "checks": ["genesis_integrity", "ledger_consistency"] })),
    )
    .await;
    assert_eq!(report["checks"][0]["outcome"], "PASS");
    assert_eq!(report["checks"][1]["outcome"], "PASS");
}

// ---------------------------------------------------------------------------
// Watch (SSE)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn watch_streams_current_then_toggles() {
    let app = test_app();
    let req = axum::http::Request::builder()
        .uri("/switches/global/watch")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ct = response
        .headers()
        .get(axum::http::header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(ct.contains("text/event-stream"));

    let mut body = response.into_body();
    let first = tokio::time::timeout(Duration::from_secs(1), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(first.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: switch"));
    assert!(text.contains("\"version\":0"));

    toggle(app, "global", "principalA").await;
    let next = tokio::time::timeout(Duration::from_secs(1), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let text = String::from_utf8(next.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("\"version\":1"));
    assert!(text.contains("\"active\":true"));
}

// ---------------------------------------------------------------------------
// Config-backed wiring
// ---------------------------------------------------------------------------

#[tokio::test]
async fn durable_config_persists_across_restarts() {
    let dir = TempDir::new().unwrap();
    let config = Config::durable();

    {
        let app = build_router(AppState::from_config(&config, dir.path()).unwrap());
        let (status, json) = toggle(app, "global_kill_switch", "ops").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["version"], 1);
    }

    let app = build_router(AppState::from_config(&config, dir.path()).unwrap());
    let (_, json) = get(app.clone(), "/switches/global_kill_switch").await;
    assert_eq!(json["active"], true);
    assert_eq!(json["version"], 1);
    let (_, log) = get(app, "/audit/log").await;
    assert_eq!(log.as_array().unwrap().len(), 1);
}
