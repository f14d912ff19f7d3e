//! End-to-end tests: an MCP client talking to the server, which talks to a stub indexer

use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::IntoResponse;
use bitcoin_indexer_mcp::config::Config;
use bitcoin_indexer_mcp::gateway::{SESSION_HEADER, build_state, create_router};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

/// (path, api-key header) of every call the stub indexer received
type Calls = Arc<Mutex<Vec<(String, Option<String>)>>>;

async fn spawn_indexer() -> (String, Calls) {
    let calls: Calls = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&calls);
    let app = Router::new().fallback(move |uri: Uri, headers: HeaderMap| {
        let seen = Arc::clone(&seen);
        async move {
            let key = headers
                .get("api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            seen.lock().push((uri.path().to_string(), key));
            match uri.path() {
                "/v0/mempool/fee_rates" => {
                    axum::Json(json!({"data": [{"block_height": 850000, "sats_per_vb": {"median": 12.5}}]}))
                        .into_response()
                }
                path if path.starts_with("/v0/addresses/") => {
                    axum::Json(json!({"data": "1000", "indexer_info": {"chain_tip": {"block_height": 850000}}}))
                        .into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}/v0"), calls)
}

async fn spawn_server(upstream: &str, static_dir: &std::path::Path) -> String {
    let mut config = Config::default();
    config.upstream.base_url = Some(upstream.to_string());
    config.server.static_dir = static_dir.to_path_buf();
    let app = create_router(Arc::new(build_state(&config).unwrap()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}")
}

struct Client {
    http: reqwest::Client,
    base: String,
    session: Option<String>,
    bearer: Option<String>,
}

impl Client {
    fn new(base: &str, bearer: Option<&str>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.to_string(),
            session: None,
            bearer: bearer.map(str::to_string),
        }
    }

    async fn post(&mut self, body: &Value) -> reqwest::Response {
        let mut request = self.http.post(format!("{}/mcp", self.base)).json(body);
        if let Some(ref id) = self.session {
            request = request.header(SESSION_HEADER, id);
        }
        if let Some(ref token) = self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.unwrap();
        if let Some(id) = response.headers().get(SESSION_HEADER) {
            self.session = Some(id.to_str().unwrap().to_string());
        }
        response
    }

    async fn initialize(&mut self) -> Value {
        let response = self
            .post(&json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": {"name": "integration", "version": "1.0"}
                }
            }))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }

    async fn call(&mut self, id: u64, name: &str, arguments: Value) -> Value {
        let response = self
            .post(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": {"name": name, "arguments": arguments}
            }))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.unwrap();
        body["result"].clone()
    }
}

#[tokio::test]
async fn full_session_lifecycle() {
    let (upstream, calls) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    let base = spawn_server(&upstream, www.path()).await;
    let mut client = Client::new(&base, Some("abc"));

    // initialize opens a session and negotiates the client's version
    let init = client.initialize().await;
    assert_eq!(init["result"]["protocolVersion"], "2025-03-26");
    assert_eq!(init["result"]["serverInfo"]["name"], "bitcoin---blockchain-indexer-api");
    assert!(client.session.is_some());

    // the initialized notification gets no body
    let note = client
        .post(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await;
    assert_eq!(note.status(), StatusCode::ACCEPTED);

    // tools/list advertises the whole table
    let list: Value = client
        .post(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await
        .json()
        .await
        .unwrap();
    let tools = list["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 67);
    assert!(tools.iter().all(|t| t["inputSchema"].is_object()));

    // a call carries the session bearer as the api key
    let result = client
        .call(2, "satoshi_balance_by_address", json!({"address": "bc1qabc"}))
        .await;
    assert_eq!(result["isError"], false);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("API Response (Status: 200):\n{"), "{text}");
    assert_eq!(
        calls.lock().last().cloned(),
        Some((
            "/v0/addresses/bc1qabc/balance".to_string(),
            Some("abc".to_string())
        ))
    );

    // DELETE closes the session; the id is dead afterwards
    let id = client.session.clone().unwrap();
    let deleted = reqwest::Client::new()
        .delete(format!("{base}/mcp"))
        .header(SESSION_HEADER, &id)
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let stale = client
        .post(&json!({"jsonrpc": "2.0", "id": 3, "method": "ping"}))
        .await;
    assert_eq!(stale.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refreshed_bearer_is_used_for_later_calls() {
    // GIVEN: a session opened with bearer "abc"
    let (upstream, calls) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    let base = spawn_server(&upstream, www.path()).await;
    let mut client = Client::new(&base, Some("abc"));
    client.initialize().await;

    // WHEN: the next request on that session carries bearer "xyz"
    client.bearer = Some("xyz".to_string());
    client.call(1, "fee_rates", json!({})).await;

    // THEN: the upstream saw the new credential
    assert_eq!(calls.lock()[0].1.as_deref(), Some("xyz"));
}

#[tokio::test]
async fn concurrent_sessions_do_not_share_credentials() {
    let (upstream, calls) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    let base = spawn_server(&upstream, www.path()).await;

    let mut alice = Client::new(&base, Some("key-alice"));
    let mut bob = Client::new(&base, Some("key-bob"));
    alice.initialize().await;
    bob.initialize().await;
    assert_ne!(alice.session, bob.session);

    let args_a = json!({"address": "alice"});
    let args_b = json!({"address": "bob"});
    futures::future::join(
        alice.call(1, "satoshi_balance_by_address", args_a),
        bob.call(1, "satoshi_balance_by_address", args_b),
    )
    .await;

    let seen = calls.lock().clone();
    assert_eq!(seen.len(), 2);
    for (path, key) in seen {
        let expected = if path.contains("alice") { "key-alice" } else { "key-bob" };
        assert_eq!(key.as_deref(), Some(expected), "{path}");
    }
}

#[tokio::test]
async fn invalid_arguments_never_reach_upstream() {
    let (upstream, calls) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    let base = spawn_server(&upstream, www.path()).await;
    let mut client = Client::new(&base, None);
    client.initialize().await;

    let result = client
        .call(1, "rune_utxos_by_address", json!({"address": "bc1qabc"}))
        .await;

    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Invalid arguments for tool 'rune_utxos_by_address':"), "{text}");
    assert!(calls.lock().is_empty());
}

#[tokio::test]
async fn batch_requests_get_batch_replies() {
    let (upstream, _) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    let base = spawn_server(&upstream, www.path()).await;
    let mut client = Client::new(&base, None);
    client.initialize().await;

    let replies: Value = client
        .post(&json!([
            {"jsonrpc": "2.0", "id": "a", "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/progress"},
            {"jsonrpc": "2.0", "id": "b", "method": "no/such/method"}
        ]))
        .await
        .json()
        .await
        .unwrap();

    let replies = replies.as_array().unwrap();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["id"], "a");
    assert_eq!(replies[0]["result"], json!({}));
    assert_eq!(replies[1]["error"]["code"], -32601);
}

#[tokio::test]
async fn requests_outside_a_session_are_rejected() {
    let (upstream, _) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    let base = spawn_server(&upstream, www.path()).await;
    let mut client = Client::new(&base, None);

    let response = client
        .post(&json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}))
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(SESSION_HEADER).is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Bad Request: invalid session ID or method.");
}

#[tokio::test]
async fn static_assets_and_health() {
    let (upstream, _) = spawn_indexer().await;
    let www = tempfile::tempdir().unwrap();
    std::fs::write(www.path().join("index.html"), "<h1>indexer</h1>").unwrap();
    let base = spawn_server(&upstream, www.path()).await;
    let http = reqwest::Client::new();

    let index = http.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.headers()["content-type"], "text/html");
    assert_eq!(index.text().await.unwrap(), "<h1>indexer</h1>");

    let health: Value = http
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "OK");
    assert_eq!(health["sessions"], 0);
}
