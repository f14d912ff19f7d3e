//! Tests for `ToolExecutor` against a stub upstream

use super::*;
use crate::auth::{CredentialEnv, TokenCache};
use crate::session::{SessionTransport, with_session};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

#[derive(Debug, Clone)]
struct Captured {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: String,
}

type Log = Arc<Mutex<Vec<Captured>>>;

/// Stub indexer mounted under `/v0`, recording every request it receives
async fn spawn_upstream() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&log);
    let app = Router::new().fallback(
        move |method: Method, uri: Uri, headers: HeaderMap, body: String| {
            let seen = Arc::clone(&seen);
            async move {
                seen.lock().push(Captured {
                    method,
                    path: uri.path().to_string(),
                    query: uri.query().map(str::to_string),
                    headers,
                    body,
                });
                match uri.path() {
                    "/v0/addresses/bc1qxyz/balance" => Json(json!({"balance": 1000})).into_response(),
                    "/v0/mempool/fee_rates" => (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(json!({"error": "rate limited"})),
                    )
                        .into_response(),
                    "/v0/rpc/general/info" => StatusCode::NO_CONTENT.into_response(),
                    "/v0/rpc/transaction/batch" => Json(json!([{"txid": "aa"}])).into_response(),
                    "/v0/rpc/transaction/submit" => "txid-123".into_response(),
                    _ => (StatusCode::INTERNAL_SERVER_ERROR, "x".repeat(300)).into_response(),
                }
            }
        },
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/v0"), log)
}

fn executor(base_url: &str, env: &[(&str, &str)]) -> ToolExecutor {
    let registry = Arc::new(ToolRegistry::load(None).unwrap());
    let resolver = CredentialResolver::new(
        registry.schemes().clone(),
        CredentialEnv::from_pairs(env.iter().copied()),
        Arc::new(TokenCache::new(Client::new())),
    );
    ToolExecutor::new(registry, resolver, Client::new(), base_url)
}

// ── Success path ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn balance_lookup_returns_pretty_json() {
    let (base, log) = spawn_upstream().await;
    let exec = executor(&base, &[]);

    let result = exec
        .execute("satoshi_balance_by_address", &json!({"address": "bc1qxyz"}))
        .await;

    assert!(!result.is_error);
    assert_eq!(
        result.text_content(),
        "API Response (Status: 200):\n{\n  \"balance\": 1000\n}"
    );
    let seen = log.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, Method::GET);
    assert_eq!(seen[0].path, "/v0/addresses/bc1qxyz/balance");
    assert_eq!(seen[0].query, None);
    assert_eq!(seen[0].headers["accept"], "application/json");
}

#[tokio::test]
async fn empty_success_body_is_described() {
    let (base, _) = spawn_upstream().await;
    let result = executor(&base, &[])
        .execute("getrpcgeneralinfo", &json!({}))
        .await;
    assert_eq!(
        result.text_content(),
        "API Response (Status: 204):\n(Status: 204 - No body content)"
    );
}

#[tokio::test]
async fn plain_text_body_passes_through() {
    let (base, log) = spawn_upstream().await;
    let result = executor(&base, &[])
        .execute("postrpctransactionsubmit", &json!({"requestBody": "0200000001ab"}))
        .await;
    assert_eq!(result.text_content(), "API Response (Status: 200):\ntxid-123");
    let seen = log.lock();
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].headers["content-type"], "application/json");
    assert_eq!(seen[0].body, "\"0200000001ab\"");
}

#[tokio::test]
async fn json_body_and_query_are_forwarded() {
    let (base, log) = spawn_upstream().await;
    let result = executor(&base, &[])
        .execute(
            "postrpctransactionbatch",
            &json!({"requestBody": {"tx_ids": ["aa", "bb"]}, "verbose": true}),
        )
        .await;
    assert!(!result.is_error, "{}", result.text_content());
    let seen = log.lock();
    assert_eq!(seen[0].query.as_deref(), Some("verbose=true"));
    let body: Value = serde_json::from_str(&seen[0].body).unwrap();
    assert_eq!(body, json!({"tx_ids": ["aa", "bb"]}));
}

// ── Per-call failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_tool_makes_no_call() {
    let (base, log) = spawn_upstream().await;
    let result = executor(&base, &[]).execute("no_such_tool", &json!({})).await;
    assert!(result.is_error);
    assert_eq!(result.text_content(), "Error: Unknown tool requested: no_such_tool");
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn missing_required_argument_makes_no_call() {
    let (base, log) = spawn_upstream().await;
    let result = executor(&base, &[])
        .execute("rune_utxos_by_address", &json!({"address": "bc1qxyz"}))
        .await;
    assert!(result.is_error);
    let text = result.text_content();
    assert!(
        text.starts_with("Invalid arguments for tool 'rune_utxos_by_address':"),
        "{text}"
    );
    assert!(text.contains("rune (invalid_type): Required"), "{text}");
    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn upstream_error_status_includes_compact_body() {
    let (base, _) = spawn_upstream().await;
    let result = executor(&base, &[]).execute("fee_rates", &json!({})).await;
    assert!(result.is_error);
    assert_eq!(
        result.text_content(),
        "API Error: Status 429 (Too Many Requests). Response: {\"error\":\"rate limited\"}"
    );
}

#[tokio::test]
async fn long_error_body_is_truncated() {
    let (base, _) = spawn_upstream().await;
    let result = executor(&base, &[])
        .execute("satoshi_balance_by_address", &json!({"address": "other"}))
        .await;
    let expected = format!(
        "API Error: Status 500 (Internal Server Error). Response: {}...",
        "x".repeat(200)
    );
    assert_eq!(result.text_content(), expected);
}

#[tokio::test]
async fn connection_refused_is_a_network_error() {
    let result = executor("http://127.0.0.1:1/v0", &[])
        .execute("fee_rates", &json!({}))
        .await;
    assert!(result.is_error);
    assert_eq!(
        result.text_content(),
        "API Network Error: No response received from server. (Code: ECONNREFUSED)"
    );
}

#[tokio::test]
async fn malformed_base_url_is_a_setup_error() {
    let result = executor("not a url", &[])
        .execute("fee_rates", &json!({}))
        .await;
    assert!(result.is_error);
    assert!(
        result.text_content().starts_with("API Request Setup Error: "),
        "{}",
        result.text_content()
    );
}

// ── Credentials ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn environment_key_is_sent_without_session() {
    let (base, log) = spawn_upstream().await;
    executor(&base, &[("API_KEY_API_KEY", "env-key")])
        .execute("fee_rates", &json!({}))
        .await;
    assert_eq!(log.lock()[0].headers["api-key"], "env-key");
}

#[tokio::test]
async fn session_bearer_overrides_environment_key() {
    // GIVEN: an env API key and a session carrying bearer "abc"
    let (base, log) = spawn_upstream().await;
    let sessions = Arc::new(SessionManager::new(std::time::Duration::from_secs(60)));
    let id = sessions.create(SessionTransport::default(), Some("abc"));
    let exec = executor(&base, &[("API_KEY_API_KEY", "env-key")]).with_sessions(Arc::clone(&sessions));

    // WHEN: a tool runs inside that session's scope
    with_session(id, exec.execute("fee_rates", &json!({}))).await;

    // THEN: the upstream sees the session credential
    assert_eq!(log.lock()[0].headers["api-key"], "abc");
}

#[tokio::test]
async fn concurrent_sessions_keep_their_own_credentials() {
    let (base, log) = spawn_upstream().await;
    let sessions = Arc::new(SessionManager::new(std::time::Duration::from_secs(60)));
    let a = sessions.create(SessionTransport::default(), Some("tok-a"));
    let b = sessions.create(SessionTransport::default(), Some("tok-b"));
    let exec = executor(&base, &[]).with_sessions(Arc::clone(&sessions));

    let (args_a, args_b) = (json!({"address": "addr-a"}), json!({"address": "addr-b"}));
    let call_a = with_session(a, exec.execute("satoshi_balance_by_address", &args_a));
    let call_b = with_session(b, exec.execute("satoshi_balance_by_address", &args_b));
    futures::future::join(call_a, call_b).await;

    let seen = log.lock();
    assert_eq!(seen.len(), 2);
    for request in seen.iter() {
        let expected = if request.path.contains("addr-a") { "tok-a" } else { "tok-b" };
        assert_eq!(request.headers["api-key"], expected, "{}", request.path);
    }
}

#[tokio::test]
async fn session_scope_without_manager_uses_environment() {
    let (base, log) = spawn_upstream().await;
    let exec = executor(&base, &[("API_KEY_API_KEY", "env-key")]);
    with_session("orphan".to_string(), exec.execute("fee_rates", &json!({}))).await;
    assert_eq!(log.lock()[0].headers["api-key"], "env-key");
}

// ── Formatting helpers ────────────────────────────────────────────────────────

#[test]
fn truncation_respects_char_boundaries() {
    let text = "₿".repeat(201);
    let out = truncate(&text, 200);
    assert_eq!(out.chars().count(), 203);
    assert!(out.ends_with("₿..."));
    assert_eq!(truncate("short", 200), "short");
}

#[test]
fn error_without_body() {
    assert_eq!(
        error_text(StatusCode::UNAUTHORIZED, ""),
        "API Error: Status 401 (Unauthorized). No response body received."
    );
}

#[test]
fn unknown_status_has_placeholder_reason() {
    let status = StatusCode::from_u16(599).unwrap();
    assert!(error_text(status, "oops").starts_with("API Error: Status 599 (Status text not available)."));
}

#[test]
fn non_json_content_type_keeps_object_text_verbatim() {
    assert_eq!(
        success_text(StatusCode::OK, false, "{\"a\":1}"),
        "{\"a\":1}"
    );
    assert_eq!(success_text(StatusCode::OK, true, "null"), "(Status: 200 - No body content)");
    assert_eq!(success_text(StatusCode::OK, true, "\"quoted\""), "quoted");
}
