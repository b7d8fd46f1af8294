// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health (root and /api prefix)
// - POST /fetch-readme + GET /fetch-readme/status/{id}
// - POST /chat (SSE framing, retry exhaustion -> 502, empty messages -> 400)
// - GET/POST/DELETE /messages

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serde_json::Value as Json;
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use readme_rubric_validator::api::{self, AppState};
use readme_rubric_validator::fetcher::{FetchResult, ReadmeSource};
use readme_rubric_validator::llm::{DynChatProvider, MockProvider, ModelInvoker};
use readme_rubric_validator::store::MemoryMessageStore;
use readme_rubric_validator::workflow::FetchOrchestrator;

const BODY_LIMIT: usize = 1024 * 1024;

/// Returns a fixed README for any URL containing `cf_ai_`, fails otherwise.
struct FixedReadme;

#[async_trait::async_trait]
impl ReadmeSource for FixedReadme {
    async fn fetch(&self, repository_url: &str) -> FetchResult {
        if repository_url.contains("cf_ai_") {
            FetchResult::Fetched {
                content: "# Demo\nUses Llama 3.3 on Workers AI.".into(),
                source_url: format!("{repository_url}/main/README.md"),
            }
        } else {
            FetchResult::Failed {
                error: "Failed to fetch README content (HTTP 404)".into(),
            }
        }
    }
}

fn state_with(provider: DynChatProvider) -> AppState {
    AppState {
        orchestrator: FetchOrchestrator::new(Arc::new(FixedReadme), Duration::from_secs(60)),
        invoker: ModelInvoker::new(provider, 3),
        store: Arc::new(MemoryMessageStore::new()),
        default_model: "@cf/meta/llama-3.3-70b-instruct-fp8-fast".into(),
    }
}

fn test_router() -> Router {
    api::router(state_with(Arc::new(MockProvider::new(["Hel", "lo"]))))
}

fn post_json(uri: &str, payload: Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

async fn body_text(resp: shuttle_axum::axum::response::Response) -> String {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    String::from_utf8(bytes).expect("utf8")
}

async fn body_json(resp: shuttle_axum::axum::response::Response) -> Json {
    serde_json::from_str(&body_text(resp).await).expect("parse json")
}

#[tokio::test]
async fn health_is_served_at_root_and_under_api() {
    let app = test_router();
    for uri in ["/health", "/api/health"] {
        let resp = app.clone().oneshot(get(uri)).await.expect("oneshot");
        assert_eq!(resp.status(), StatusCode::OK, "{uri}");
        assert_eq!(body_text(resp).await.trim(), "ok");
    }
}

#[tokio::test]
async fn fetch_without_url_is_400() {
    let app = test_router();
    let resp = app
        .clone()
        .oneshot(post_json("/fetch-readme", json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());

    let resp = app
        .oneshot(post_json("/fetch-readme", json!({ "repositoryUrl": "   " })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn fetch_workflow_completes_and_reports_result() {
    let app = test_router();
    let resp = app
        .clone()
        .oneshot(post_json(
            "/api/fetch-readme",
            json!({ "githubUrl": "https://github.com/someone/cf_ai_demo" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let started = body_json(resp).await;
    assert_eq!(started["status"], "started");
    let id = started["workflowId"].as_str().expect("workflowId").to_string();

    let mut last = Json::Null;
    for _ in 0..50 {
        let resp = app
            .clone()
            .oneshot(get(&format!("/fetch-readme/status/{id}")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        last = body_json(resp).await;
        if last["status"] != "running" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last["status"], "completed");
    assert_eq!(last["result"]["succeeded"], true);
    assert!(last["result"]["content"]
        .as_str()
        .unwrap()
        .contains("Llama 3.3"));
    assert!(last["result"]["sourceUrl"].is_string());
}

#[tokio::test]
async fn status_of_unknown_or_malformed_id() {
    let app = test_router();
    let resp = app
        .clone()
        .oneshot(get(&format!(
            "/fetch-readme/status/{}",
            uuid::Uuid::new_v4()
        )))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(get("/fetch-readme/status/not-a-uuid"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_streams_content_frames_then_done() {
    let app = test_router();
    let resp = app
        .oneshot(post_json(
            "/chat",
            json!({
                "messages": [{ "role": "user", "content": "GITHUB_URL: x" }],
                "config": { "model": "", "systemMessage": "ignored" }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let ct = resp
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(ct.starts_with("text/event-stream"), "content-type was {ct}");

    let text = body_text(resp).await;
    let data: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .collect();
    assert_eq!(
        data,
        vec![r#"{"content":"Hel"}"#, r#"{"content":"lo"}"#, "[DONE]"]
    );
}

#[tokio::test]
async fn chat_with_empty_messages_is_400() {
    let app = test_router();
    let resp = app
        .oneshot(post_json("/chat", json!({ "messages": [] })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn chat_retries_then_maps_exhaustion_to_502() {
    let flaky = Arc::new(MockProvider::new(["ok"]).failing_first(2));
    let app = api::router(state_with(flaky.clone()));
    let resp = app
        .oneshot(post_json(
            "/chat",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(flaky.calls(), 3, "two failures then one success");

    let broken = Arc::new(MockProvider::always_failing());
    let app = api::router(state_with(broken.clone()));
    let resp = app
        .oneshot(post_json(
            "/chat",
            json!({ "messages": [{ "role": "user", "content": "hi" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(broken.calls(), 3);
    let err = body_json(resp).await;
    assert!(err["error"].as_str().unwrap().contains("after 3 attempt"));
}

#[tokio::test]
async fn explicit_mode_overrides_message_count() {
    let mock = Arc::new(MockProvider::new(["x"]));
    let app = api::router(state_with(mock.clone()));
    let resp = app
        .oneshot(post_json(
            "/chat",
            json!({
                "messages": [{ "role": "user", "content": "what is D1?" }],
                "mode": "follow_up"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let _ = body_text(resp).await;

    let sent = mock.last_messages();
    assert_eq!(sent.len(), 2);
    assert!(sent[0].content.contains("follow-up questions"));
}

#[tokio::test]
async fn messages_replace_list_and_clear() {
    let app = test_router();

    let resp = app
        .clone()
        .oneshot(get("/messages/conv-1"))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await["messages"], json!([]));

    let resp = app
        .clone()
        .oneshot(post_json(
            "/messages",
            json!({
                "conversationId": "conv-1",
                "messages": [
                    { "role": "user", "content": "q" },
                    { "role": "assistant", "content": "a" }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["success"], true);

    // replace, not append
    let resp = app
        .clone()
        .oneshot(post_json(
            "/api/messages",
            json!({ "chatId": "conv-1", "messages": [{ "role": "user", "content": "only" }] }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let listed = body_json(app.clone().oneshot(get("/messages/conv-1")).await.unwrap()).await;
    let msgs = listed["messages"].as_array().unwrap();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0]["content"], "only");
    assert_eq!(msgs[0]["conversationId"], "conv-1");
    assert!(msgs[0]["createdAt"].is_string());

    let del = Request::builder()
        .method("DELETE")
        .uri("/messages/conv-1")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(del).await.unwrap();
    assert_eq!(body_json(resp).await["success"], true);

    let listed = body_json(app.oneshot(get("/messages/conv-1")).await.unwrap()).await;
    assert_eq!(listed["messages"], json!([]));
}

#[tokio::test]
async fn save_without_conversation_id_is_400() {
    let app = test_router();
    let resp = app
        .oneshot(post_json(
            "/messages",
            json!({ "conversationId": " ", "messages": [] }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}
