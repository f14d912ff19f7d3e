//! HTTP router and handlers
//!
//! `POST /mcp` carries protocol traffic. A message without a session id must
//! be an `initialize`, which opens a session; every later message names its
//! session in the `mcp-session-id` header and is dispatched inside that
//! session's task-local scope.

use std::any::Any;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::mcp::{McpHandler, is_initialize_request, session_transport};
use crate::error::rpc_codes;
use crate::session::{SessionManager, with_session};

/// Header carrying the session id in both directions
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    /// MCP dispatch
    pub handler: Arc<McpHandler>,
    /// Live sessions
    pub sessions: Arc<SessionManager>,
    /// Root served for GET and HEAD outside `/mcp` and `/health`
    pub static_dir: PathBuf,
    /// Largest accepted request body, in bytes
    pub max_body_size: usize,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    let body_limit = state.max_body_size;
    Router::new()
        .route(
            "/mcp",
            post(mcp_post_handler)
                .get(mcp_get_handler)
                .delete(mcp_delete_handler),
        )
        .route("/health", get(health_handler))
        .fallback_service(ServeDir::new(&state.static_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /mcp handler
async fn mcp_post_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Unparseable request body");
            return internal_error();
        }
    };

    let bearer = bearer_token(&headers);
    let session_id = match headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if state.sessions.touch(id, bearer) => id.to_string(),
        Some(id) => {
            debug!(session_id = %id, "Unknown or expired session");
            return bad_request();
        }
        None if is_initialize_request(&payload) => state
            .sessions
            .create(session_transport(&payload), bearer),
        None => {
            debug!("Request without session that is not an initialize");
            return bad_request();
        }
    };

    let handler = Arc::clone(&state.handler);
    let reply = with_session(session_id.clone(), async move {
        handler.handle_payload(&payload).await
    })
    .await;

    let response = match reply {
        Some(body) => Json(body).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    };
    with_session_header(response, &session_id)
}

/// GET /mcp handler; protocol traffic is POST-only
async fn mcp_get_handler() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "Method Not Allowed",
    )
        .into_response()
}

/// DELETE /mcp handler - session termination
async fn mcp_delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> StatusCode {
    match headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
        Some(id) if state.sessions.close(id) => {
            info!(session_id = %id, "Session terminated by client");
            StatusCode::NO_CONTENT
        }
        Some(id) => {
            debug!(session_id = %id, "Session not found for DELETE");
            StatusCode::NOT_FOUND
        }
        None => StatusCode::BAD_REQUEST,
    }
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let info = state.handler.server_info();
    Json(json!({
        "status": "OK",
        "server": info.name,
        "version": info.version,
        "sessions": state.sessions.count(),
    }))
}

/// Token from `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// Transport-level rejection; the id is fresh because no request id is trusted here
fn protocol_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({
            "jsonrpc": "2.0",
            "error": {"code": rpc_codes::SERVER_ERROR_START, "message": message},
            "id": Uuid::new_v4().to_string(),
        })),
    )
        .into_response()
}

fn bad_request() -> Response {
    protocol_error(
        StatusCode::BAD_REQUEST,
        "Bad Request: invalid session ID or method.",
    )
}

fn internal_error() -> Response {
    protocol_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
}

#[allow(clippy::needless_pass_by_value)]
fn panic_response(_panic: Box<dyn Any + Send + 'static>) -> Response {
    error!("Request handler panicked");
    internal_error()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialEnv, CredentialResolver, TokenCache};
    use crate::tool::{ToolExecutor, ToolRegistry};
    use axum::body::Body;
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(static_dir: PathBuf) -> Arc<AppState> {
        let registry = Arc::new(ToolRegistry::load(None).unwrap());
        let sessions = Arc::new(SessionManager::new(Duration::from_secs(60)));
        let resolver = CredentialResolver::new(
            registry.schemes().clone(),
            CredentialEnv::default(),
            Arc::new(TokenCache::new(reqwest::Client::new())),
        );
        let executor = ToolExecutor::new(
            registry,
            resolver,
            reqwest::Client::new(),
            "http://127.0.0.1:1/v0",
        )
        .with_sessions(Arc::clone(&sessions));
        Arc::new(AppState {
            handler: Arc::new(McpHandler::new(Arc::new(executor))),
            sessions,
            static_dir,
            max_body_size: 1024 * 1024,
        })
    }

    fn post_mcp(body: &Value, session: Option<&str>, bearer: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/mcp").header("content-type", "application/json");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn initialize() -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "t", "version": "1"}
            }
        })
    }

    // ── session lifecycle ───────────────────────────────────────────────────

    #[tokio::test]
    async fn initialize_opens_session_and_returns_header() {
        let state = state(PathBuf::from("public"));
        let app = create_router(Arc::clone(&state));

        let response = app
            .oneshot(post_mcp(&initialize(), None, Some("abc")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert_eq!(state.sessions.credential(&id).as_deref(), Some("abc"));
        let body = json_body(response).await;
        assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
    }

    #[tokio::test]
    async fn malformed_initialize_opens_no_session() {
        let state = state(PathBuf::from("public"));
        let app = create_router(Arc::clone(&state));
        let mut without_params = initialize();
        without_params.as_object_mut().unwrap().remove("params");
        let mut without_id = initialize();
        without_id.as_object_mut().unwrap().remove("id");
        let mut wrong_version = initialize();
        wrong_version["jsonrpc"] = json!("1.0");

        for body in [
            json!({"method": "initialize"}),
            without_params,
            without_id,
            wrong_version,
        ] {
            let response = app
                .clone()
                .oneshot(post_mcp(&body, None, Some("abc")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{body}");
            assert!(response.headers().get(SESSION_HEADER).is_none(), "{body}");
            let reply = json_body(response).await;
            assert_eq!(reply["error"]["code"], -32000);
        }
        assert_eq!(state.sessions.count(), 0);
    }

    #[tokio::test]
    async fn known_session_is_routed_and_bearer_refreshed() {
        let state = state(PathBuf::from("public"));
        let id = state.sessions.create(Default::default(), Some("old"));
        let app = create_router(Arc::clone(&state));

        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        let response = app.oneshot(post_mcp(&list, Some(&id), Some("new"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[SESSION_HEADER], id.as_str());
        assert_eq!(state.sessions.credential(&id).as_deref(), Some("new"));
        let body = json_body(response).await;
        assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 67);
    }

    #[tokio::test]
    async fn missing_session_and_not_initialize_is_rejected() {
        let app = create_router(state(PathBuf::from("public")));
        let list = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        let response = app.oneshot(post_mcp(&list, None, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32000);
        assert_eq!(body["error"]["message"], "Bad Request: invalid session ID or method.");
        assert!(Uuid::parse_str(body["id"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn unknown_session_is_rejected_even_for_initialize() {
        let state = state(PathBuf::from("public"));
        let app = create_router(Arc::clone(&state));
        let response = app
            .oneshot(post_mcp(&initialize(), Some("stale-id"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.sessions.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_gets_protocol_error() {
        // GIVEN: a session left idle past the timeout and swept
        let state = state(PathBuf::from("public"));
        let id = state.sessions.create(Default::default(), None);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(state.sessions.sweep(), 1);

        // WHEN: the client reuses the old id
        let ping = json!({"jsonrpc": "2.0", "id": 3, "method": "ping"});
        let response = create_router(state)
            .oneshot(post_mcp(&ping, Some(&id), None))
            .await
            .unwrap();

        // THEN: the router refuses it
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn notification_is_accepted_without_body() {
        let state = state(PathBuf::from("public"));
        let id = state.sessions.create(Default::default(), None);
        let note = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = create_router(state)
            .oneshot(post_mcp(&note, Some(&id), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    #[tokio::test]
    async fn invalid_json_is_internal_error() {
        let request = Request::post("/mcp").body(Body::from("{not json")).unwrap();
        let response = create_router(state(PathBuf::from("public")))
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error"]["message"], "Internal server error.");
    }

    #[tokio::test]
    async fn delete_closes_session() {
        let state = state(PathBuf::from("public"));
        let id = state.sessions.create(Default::default(), None);
        let delete = |id: Option<&str>| {
            let mut builder = Request::delete("/mcp");
            if let Some(id) = id {
                builder = builder.header(SESSION_HEADER, id);
            }
            builder.body(Body::empty()).unwrap()
        };

        let app = create_router(Arc::clone(&state));
        let first = app.clone().oneshot(delete(Some(&id))).await.unwrap();
        assert_eq!(first.status(), StatusCode::NO_CONTENT);
        let second = app.clone().oneshot(delete(Some(&id))).await.unwrap();
        assert_eq!(second.status(), StatusCode::NOT_FOUND);
        let anonymous = app.oneshot(delete(None)).await.unwrap();
        assert_eq!(anonymous.status(), StatusCode::BAD_REQUEST);
    }

    // ── other routes ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn get_mcp_is_method_not_allowed() {
        let response = create_router(state(PathBuf::from("public")))
            .oneshot(Request::get("/mcp").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[header::ALLOW], "POST");
    }

    #[tokio::test]
    async fn health_reports_session_count() {
        let state = state(PathBuf::from("public"));
        state.sessions.create(Default::default(), None);
        let response = create_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(
            body,
            json!({
                "status": "OK",
                "server": "bitcoin---blockchain-indexer-api",
                "version": "v0.2.0",
                "sessions": 1
            })
        );
    }

    #[tokio::test]
    async fn static_fallback_serves_and_guards() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("www");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join("index.html"), "<h1>indexer</h1>").unwrap();
        std::fs::write(root.join("style.css"), "body{}").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "outside").unwrap();
        let app = create_router(state(root));
        let get = |path: &str| Request::get(path).body(Body::empty()).unwrap();

        let ok = app.clone().oneshot(get("/style.css")).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.headers()[header::CONTENT_TYPE], "text/css");

        let index = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(index.status(), StatusCode::OK);
        assert_eq!(index.headers()[header::CONTENT_TYPE], "text/html");

        let missing = app.clone().oneshot(get("/missing.js")).await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let escaped = app.clone().oneshot(get("/../secret.txt")).await.unwrap();
        assert_eq!(escaped.status(), StatusCode::NOT_FOUND);

        let posted = app
            .oneshot(Request::post("/style.css").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(posted.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn bearer_token_requires_scheme_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(bearer_token(&headers), Some("tok"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
