//! MCP method dispatch
//!
//! Maps JSON-RPC messages to the tool executor. Transport concerns
//! (sessions, HTTP status codes) live in the router; this module only sees
//! already-routed payloads.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::rpc_codes;
use crate::protocol::{
    Info, InitializeResult, JsonRpcResponse, RequestId, ServerCapabilities, ToolsCallParams,
    ToolsCapability, ToolsListResult, negotiate_version,
};
use crate::session::SessionTransport;
use crate::tool::ToolExecutor;

/// Dispatches MCP requests for one server
#[derive(Debug)]
pub struct McpHandler {
    executor: Arc<ToolExecutor>,
    server_info: Info,
}

impl McpHandler {
    /// Create a handler advertising the registry's server identity
    #[must_use]
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        let identity = executor.registry().server();
        let server_info = Info {
            name: identity.name.clone(),
            version: identity.version.clone(),
            title: None,
        };
        Self {
            executor,
            server_info,
        }
    }

    /// Identity reported in `serverInfo`
    #[must_use]
    pub fn server_info(&self) -> &Info {
        &self.server_info
    }

    /// Executor behind `tools/call`
    #[must_use]
    pub fn executor(&self) -> &Arc<ToolExecutor> {
        &self.executor
    }

    /// Number of tools served
    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.executor.registry().len()
    }

    /// Upstream base URL tool calls are sent to
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.executor.base_url()
    }

    /// Handle a single message or a batch.
    ///
    /// Returns `None` when nothing needs to be sent back (notifications and
    /// client responses only).
    pub async fn handle_payload(&self, payload: &Value) -> Option<Value> {
        match payload {
            Value::Array(batch) => {
                let replies: Vec<Value> = join_all(batch.iter().map(|m| self.handle_message(m)))
                    .await
                    .into_iter()
                    .flatten()
                    .filter_map(|r| serde_json::to_value(r).ok())
                    .collect();
                (!replies.is_empty()).then_some(Value::Array(replies))
            }
            single => self
                .handle_message(single)
                .await
                .and_then(|r| serde_json::to_value(r).ok()),
        }
    }

    /// Handle one JSON-RPC message
    pub async fn handle_message(&self, message: &Value) -> Option<JsonRpcResponse> {
        // responses from the client need no reply
        if message.get("method").is_none()
            && (message.get("result").is_some() || message.get("error").is_some())
        {
            return None;
        }

        let (id, method, params) = match parse_request(message) {
            Ok(parsed) => parsed,
            Err(response) => return Some(response),
        };

        if is_notification_method(&method) {
            debug!(method = %method, "Notification received");
            return None;
        }
        // parse_request guarantees an id for everything else
        let id = id?;

        debug!(method = %method, id = %id, "Dispatching request");
        Some(match method.as_str() {
            "initialize" => self.handle_initialize(id, params.as_ref()),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => self.handle_tools_list(id),
            "tools/call" => self.handle_tools_call(id, params).await,
            other => {
                warn!(method = %other, "Method not found");
                JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )
            }
        })
    }

    /// Answer `initialize` with the negotiated version and tool capability
    pub fn handle_initialize(&self, id: RequestId, params: Option<&Value>) -> JsonRpcResponse {
        let client_version = extract_client_version(params);
        let negotiated = negotiate_version(client_version);
        debug!(client = client_version, negotiated, "Protocol version negotiation");

        let result = InitializeResult {
            protocol_version: negotiated.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: self.server_info.clone(),
        };
        success(id, &result)
    }

    /// Answer `tools/list` with every registered tool
    pub fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.executor.registry().list(),
            next_cursor: None,
        };
        success(id, &result)
    }

    /// Run `tools/call` through the executor
    pub async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let call = match params.map(serde_json::from_value::<ToolsCallParams>).transpose() {
            Ok(Some(call)) => call,
            Ok(None) => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    "Missing tools/call params",
                );
            }
            Err(e) => {
                return JsonRpcResponse::error(
                    Some(id),
                    rpc_codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {e}"),
                );
            }
        };
        let result = self.executor.execute(&call.name, &call.arguments).await;
        success(id, &result)
    }
}

fn success<T: Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(
            Some(id),
            rpc_codes::INTERNAL_ERROR,
            format!("Failed to serialize result: {e}"),
        ),
    }
}

/// Whether the payload (or any batch element) is an `initialize` request
#[must_use]
pub fn is_initialize_request(payload: &Value) -> bool {
    initialize_params(payload).is_some()
}

/// Params of a well-formed `initialize` request in the payload, if any.
///
/// The message needs a `2.0` envelope, a string or integer id, and params
/// carrying `protocolVersion`, `capabilities` and a named, versioned
/// `clientInfo`. Anything less does not open a session.
fn initialize_params(payload: &Value) -> Option<&Value> {
    match payload {
        Value::Array(batch) => batch.iter().find_map(well_formed_initialize),
        single => well_formed_initialize(single),
    }
}

fn well_formed_initialize(message: &Value) -> Option<&Value> {
    if message.get("jsonrpc").and_then(Value::as_str) != Some("2.0")
        || message.get("method").and_then(Value::as_str) != Some("initialize")
    {
        return None;
    }
    message.get("id").and_then(extract_request_id)?;

    let params = message.get("params").filter(|p| p.is_object())?;
    params.get("protocolVersion").and_then(Value::as_str)?;
    params.get("capabilities").filter(|c| c.is_object())?;
    let client = params.get("clientInfo").filter(|c| c.is_object())?;
    client.get("name").and_then(Value::as_str)?;
    client.get("version").and_then(Value::as_str)?;
    Some(params)
}

/// Transport state recorded for a session opened by `payload`
#[must_use]
pub fn session_transport(payload: &Value) -> SessionTransport {
    let params = initialize_params(payload);
    SessionTransport {
        protocol_version: negotiate_version(params.and_then(|p| {
            p.get("protocolVersion").and_then(Value::as_str)
        }))
        .to_string(),
        client_info: params
            .and_then(|p| p.get("clientInfo"))
            .and_then(|c| serde_json::from_value(c.clone()).ok()),
    }
}

fn extract_client_version(params: Option<&Value>) -> Option<&str> {
    params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
}

/// Extract a `RequestId` from a JSON value.
///
/// Supports string and integer ids; anything else is `None`.
fn extract_request_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::String(s) => Some(RequestId::String(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_u64().and_then(|u| i64::try_from(u).ok()))
            .map(RequestId::Number),
        _ => None,
    }
}

fn is_notification_method(method: &str) -> bool {
    method.starts_with("notifications/")
}

/// Split a JSON-RPC request into `(id, method, params)`; `id` is `None` for
/// notifications.
#[allow(clippy::result_large_err)]
fn parse_request(
    value: &Value,
) -> Result<(Option<RequestId>, String, Option<Value>), JsonRpcResponse> {
    let id = value.get("id").and_then(extract_request_id);

    if value.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcResponse::error(
            id,
            rpc_codes::INVALID_REQUEST,
            "Invalid JSON-RPC version",
        ));
    }

    let method = value
        .get("method")
        .and_then(Value::as_str)
        .ok_or_else(|| JsonRpcResponse::error(id.clone(), rpc_codes::INVALID_REQUEST, "Missing method"))?;

    if !is_notification_method(method) && id.is_none() {
        return Err(JsonRpcResponse::error(
            None,
            rpc_codes::INVALID_REQUEST,
            "Missing id",
        ));
    }

    Ok((id, method.to_string(), value.get("params").cloned()))
}
