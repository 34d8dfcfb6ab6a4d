// Integration tests
//
// End-to-end runs of the gateway: client request -> loop engine ->
// upstream -> webhook tool -> upstream -> filtered response.
//
// Uses wiremock for both the upstream completions API and the tool
// endpoints, tower::ServiceExt::oneshot for in-process HTTP, and the same
// wiring as the binary (no mocks except HTTP targets).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use toolgate::config::{self, GatewayConfig, StringSource};
use toolgate::engine::{LoopDeps, LoopEngine};
use toolgate::proxy::{self, AppState};
use toolgate::rules::{parse_rule_file, RuleStore};
use toolgate::sink::TracingToolLog;
use toolgate::tools::{ToolRegistry, WebhookTool};
use toolgate::upstream::ReqwestCompletionClient;
use tower::ServiceExt;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const RULES_YAML: &str = r#"
structured_rules:
  - name: hide_tool_requests
    start_pattern: '<<<\[TOOL_REQUEST\]>>>'
    end_pattern: '<<<\[END_TOOL_REQUEST\]>>>'
    action: remove
simple_rules:
  - pattern: 'sk-[a-z0-9]+'
    replacement: '[key]'
    flags: g
"#;

const ECHO_TURN: &str = "Calling.<<<[TOOL_REQUEST]>>>tool_name: 「始」Echo「末」,text: 「始」hi「末」<<<[END_TOOL_REQUEST]>>>";

fn config_yaml(upstream: &str, tools: &str) -> String {
    format!(
        r#"toolgate: v1
environment: "test"
upstream:
  base_url: "{upstream}"
  timeout_ms: 5000
tools:
  Echo:
    url: "{tools}/tools/echo"
    timeout_ms: 2000
"#
    )
}

fn load(yaml: &str) -> GatewayConfig {
    let source = StringSource {
        content: yaml.to_string(),
    };
    config::load_config(&source).expect("test config should parse")
}

/// Same wiring as the binary, pointed at the mock servers.
fn build_app(config: &GatewayConfig) -> Router {
    let http = reqwest::Client::new();
    let mut registry = ToolRegistry::new();
    for tool in &config.tools {
        registry.register(tool.name.clone(), Arc::new(WebhookTool::new(http.clone(), tool)));
    }
    let rules = parse_rule_file(RULES_YAML).expect("rules should parse");

    let engine = LoopEngine::new(LoopDeps {
        client: Arc::new(ReqwestCompletionClient::new(http, &config.upstream)),
        dispatcher: Arc::new(registry),
        rules: Arc::new(RuleStore::new(rules)),
        tool_log: Arc::new(TracingToolLog),
        notes: None,
        config: config.loop_config,
    });
    proxy::build_router(AppState {
        engine,
        server_key: config.server.key.clone(),
    })
}

fn chat_request(stream: bool) -> Request<Body> {
    let body = json!({
        "model": "test-model",
        "stream": stream,
        "messages": [{"role": "user", "content": "please echo hi"}]
    });
    Request::builder()
        .method("POST")
        .uri("/v1/chat/completions")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-it",
        "object": "chat.completion",
        "model": "test-model",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
    })
}

fn sse(deltas: &[&str]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "data: {}\n\n",
        json!({"id": "chunk-it", "choices": [{"index": 0, "delta": {"role": "assistant"}}]})
    ));
    for delta in deltas {
        out.push_str(&format!(
            "data: {}\n\n",
            json!({"id": "chunk-it", "choices": [{"index": 0, "delta": {"content": delta}, "finish_reason": null}]})
        ));
    }
    out.push_str(&format!(
        "data: {}\n\n",
        json!({"id": "chunk-it", "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]})
    ));
    out.push_str("data: [DONE]\n\n");
    out
}

async fn read_body(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn sse_content(body: &str) -> String {
    body.split("\n\n")
        .filter_map(|e| e.trim().strip_prefix("data: "))
        .filter_map(|d| serde_json::from_str::<Value>(d).ok())
        .filter_map(|v| {
            v["choices"][0]["delta"]["content"]
                .as_str()
                .map(str::to_string)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Complete delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_loop_runs_tool_and_filters_output() {
    let upstream = MockServer::start().await;
    let tools = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tools/echo"))
        .and(body_json(json!({"text": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("echoed hi"))
        .expect(1)
        .mount(&tools)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Result from tool"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(completion("The tool said: echoed hi (sk-abc123)")),
        )
        .with_priority(1)
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(ECHO_TURN)))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = build_app(&load(&config_yaml(&upstream.uri(), &tools.uri())));
    let resp = app.oneshot(chat_request(false)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&read_body(resp).await).unwrap();
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "Calling.\nThe tool said: echoed hi ([key])"
    );
    assert_eq!(body["choices"][0]["finish_reason"], "stop");
    assert_eq!(body["usage"]["total_tokens"], 12);
}

#[tokio::test]
async fn failing_tool_is_reported_to_the_model() {
    let upstream = MockServer::start().await;
    let tools = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tools/echo"))
        .respond_with(ResponseTemplate::new(500).set_body_string("disk full"))
        .mount(&tools)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Error while executing tool Echo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion("Sorry, the tool failed.")))
        .with_priority(1)
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(completion(ECHO_TURN)))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = build_app(&load(&config_yaml(&upstream.uri(), &tools.uri())));
    let resp = app.oneshot(chat_request(false)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&read_body(resp).await).unwrap();
    assert_eq!(
        body["choices"][0]["message"]["content"],
        "Calling.\nSorry, the tool failed."
    );
}

#[tokio::test]
async fn upstream_error_status_is_relayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(503).set_body_string(r#"{"error":{"message":"overloaded"}}"#),
        )
        .mount(&upstream)
        .await;

    let app = build_app(&load(&config_yaml(&upstream.uri(), "http://127.0.0.1:9")));
    let resp = app.oneshot(chat_request(false)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(read_body(resp).await.contains("overloaded"));
}

// ---------------------------------------------------------------------------
// Incremental delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_loop_hides_tool_block_and_ends_once() {
    let upstream = MockServer::start().await;
    let tools = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tools/echo"))
        .and(body_json(json!({"text": "hi"})))
        .respond_with(ResponseTemplate::new(200).set_body_string("echoed hi"))
        .expect(1)
        .mount(&tools)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Result from tool"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(sse(&["Got ", "it."]), "text/event-stream"),
        )
        .with_priority(1)
        .expect(1)
        .mount(&upstream)
        .await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            sse(&[
                "Look",
                " up<<<[TOOL_",
                "REQUEST]>>>tool_name: 「始」Echo「末」,",
                "text: 「始」hi「末」<<<[END_TOOL_",
                "REQUEST]>>>",
            ]),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = build_app(&load(&config_yaml(&upstream.uri(), &tools.uri())));
    let resp = app.oneshot(chat_request(true)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = read_body(resp).await;
    assert_eq!(sse_content(&body), "Look upGot it.");
    assert!(!body.contains("TOOL_"));
    assert_eq!(body.matches("data: [DONE]").count(), 1);
    assert!(body.trim_end().ends_with("data: [DONE]"));
}

#[tokio::test]
async fn streaming_request_is_sent_with_stream_flag() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("\"stream\":true"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse(&["plain answer"]), "text/event-stream"),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let app = build_app(&load(&config_yaml(&upstream.uri(), "http://127.0.0.1:9")));
    let resp = app.oneshot(chat_request(true)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(sse_content(&read_body(resp).await), "plain answer");
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

#[tokio::test]
async fn models_endpoint_is_proxied() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"object": "list", "data": [{"id": "test-model"}]})),
        )
        .expect(1)
        .mount(&upstream)
        .await;

    let app = build_app(&load(&config_yaml(&upstream.uri(), "http://127.0.0.1:9")));
    let req = Request::builder()
        .method("GET")
        .uri("/v1/models")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&read_body(resp).await).unwrap();
    assert_eq!(body["data"][0]["id"], "test-model");
}
