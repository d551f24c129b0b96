use axum::body::Body;
use axum::http::{Request, StatusCode};
use ralph_hub::{router, AppState, HubConfig};
use serde_json::{json, Value};
use std::path::Path;
use tower::ServiceExt;

const PLAN: &str = "**Phase 1: Setup**\n- [x] Install deps\n- [ ] Write config\n**Phase 2: Build**\n- [ ] Compile\n";

fn state_for(root: &Path) -> AppState {
    let mut config = HubConfig::for_root(root);
    let marker = root.join("no-such-runner.sh").to_string_lossy().into_owned();
    config.runner_script = marker.clone();
    config.stop_patterns = vec![marker];
    std::fs::create_dir_all(config.files.status.parent().expect("parent")).expect("mkdir");
    AppState::new(config)
}

async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = router(state.clone()).oneshot(request).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let (status, body) = send(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(state: &AppState, uri: &str, payload: Value) -> Value {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();
    let (status, body) = send(state, request).await;
    assert_eq!(status, StatusCode::OK);
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    let (status, body) = get_json(&state, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn status_defaults_when_document_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    let (status, body) = get_json(&state, "/api/ralph/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active"], false);
    assert_eq!(body["iteration"], 0);
    assert_eq!(body["phase"], "IDLE");
    assert_eq!(body["is_zombie"], false);
    assert_eq!(body["stats"]["tasks_total"], 0);
}

#[tokio::test]
async fn status_parses_front_matter() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    std::fs::write(
        &state.config.files.status,
        "---\nactive: false\niteration: 3\nmax_iterations: 10\ncompletion_promise: \"DONE\"\nstarted_at: \"2024-01-01\"\nagent: claude\n---\nBuild a CLI\n",
    )
    .unwrap();
    let (status, body) = get_json(&state, "/api/ralph/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["iteration"], 3);
    assert_eq!(body["max_iterations"], 10);
    assert_eq!(body["completion_promise"], "DONE");
    assert_eq!(body["agent"], "claude");
    assert_eq!(body["prompt"], "Build a CLI");
}

#[tokio::test]
async fn malformed_status_is_service_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    std::fs::write(&state.config.files.status, "just a prompt").unwrap();
    let (status, body) = get_json(&state, "/api/ralph/status").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "malformed_document");
    assert!(body["error"].as_str().unwrap().contains("delimiters"));
}

#[tokio::test]
async fn tasks_list_and_toggle_broadcasts() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    std::fs::write(&state.config.files.tasks, PLAN).unwrap();
    let mut sub = state.broadcaster.subscribe().unwrap();

    let (status, body) = get_json(&state, "/api/ralph/tasks").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
    assert_eq!(body[2], json!({"description": "Compile", "completed": false, "phase": "Build"}));

    let body = post_json(
        &state,
        "/api/ralph/tasks/toggle",
        json!({"description": "Compile", "completed": true}),
    )
    .await;
    assert_eq!(body, json!({"success": true}));
    let plan = std::fs::read_to_string(&state.config.files.tasks).unwrap();
    assert!(plan.contains("- [x] Compile"));

    let pushed: Value = serde_json::from_str(&sub.receiver.try_recv().unwrap()).unwrap();
    assert_eq!(pushed["type"], "tasks");
    assert_eq!(pushed["data"][2]["completed"], true);

    let body = post_json(
        &state,
        "/api/ralph/tasks/toggle",
        json!({"description": "Deploy", "completed": true}),
    )
    .await;
    assert_eq!(body, json!({"success": false}));
    assert!(sub.receiver.try_recv().is_err());
}

#[tokio::test]
async fn logs_read_and_clear() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());

    let (status, body) = send(
        &state,
        Request::builder().uri("/api/ralph/logs").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    std::fs::write(&state.config.files.log, "iteration 1\n").unwrap();
    let (_, body) = send(
        &state,
        Request::builder().uri("/api/ralph/logs").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(body, b"iteration 1\n");

    let mut sub = state.broadcaster.subscribe().unwrap();
    let (status, body) = send(
        &state,
        Request::builder()
            .method("DELETE")
            .uri("/api/ralph/logs")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_slice::<Value>(&body).unwrap(), json!({"success": true}));
    assert_eq!(std::fs::read_to_string(&state.config.files.log).unwrap(), "");
    let pushed: Value = serde_json::from_str(&sub.receiver.try_recv().unwrap()).unwrap();
    assert_eq!(pushed, json!({"type": "log-clear"}));
}

#[tokio::test]
async fn files_are_empty_outside_a_repository() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    let (status, body) = get_json(&state, "/api/ralph/files").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn start_validates_request() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());

    let body = post_json(&state, "/api/ralph/start", json!({"prompt": "", "agent": "gemini"})).await;
    assert_eq!(body, json!({"success": false, "error": "Prompt is required"}));

    let body = post_json(&state, "/api/ralph/start", json!({"prompt": "build", "agent": "gpt"})).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Invalid agent: gpt");
    assert!(!state.config.files.log.exists());
}

#[tokio::test]
async fn stop_marks_status_inactive() {
    let tmp = tempfile::tempdir().unwrap();
    let state = state_for(tmp.path());
    std::fs::write(
        &state.config.files.status,
        "---\nactive: true\niteration: 4\n---\nactive: true stays in the prompt\n",
    )
    .unwrap();

    let body = post_json(&state, "/api/ralph/stop", json!({})).await;
    assert_eq!(body, json!({"success": true}));
    assert_eq!(
        std::fs::read_to_string(&state.config.files.status).unwrap(),
        "---\nactive: false\niteration: 4\n---\nactive: true stays in the prompt\n"
    );
    let snapshot = state.broadcaster.snapshot().status.unwrap();
    assert!(!snapshot.active);
    assert!(!snapshot.is_zombie);
}
