//! Tool executor
//!
//! Orchestrates one tool invocation: lookup, validation, credential
//! resolution, request construction, the upstream call and normalization of
//! the outcome. Every failure is rendered into the returned
//! [`ToolsCallResult`]; nothing escapes as an error.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::registry::ToolRegistry;
use super::request::build_request;
use crate::auth::CredentialResolver;
use crate::protocol::ToolsCallResult;
use crate::session::{SessionManager, current_session};

/// Characters of an upstream error body kept in the result
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Executes tools against the upstream API
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    resolver: CredentialResolver,
    client: Client,
    base_url: String,
    sessions: Option<Arc<SessionManager>>,
}

impl ToolExecutor {
    /// Create an executor calling `base_url`
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        resolver: CredentialResolver,
        client: Client,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            resolver,
            client,
            base_url: base_url.into(),
            sessions: None,
        }
    }

    /// Read per-session credentials from `sessions`
    #[must_use]
    pub fn with_sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Registry this executor serves
    #[must_use]
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Upstream root URL
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute `name` on behalf of the session in the current task scope
    pub async fn execute(&self, name: &str, raw_args: &Value) -> ToolsCallResult {
        let credential = current_session().and_then(|id| {
            self.sessions
                .as_ref()
                .and_then(|sessions| sessions.credential(&id))
        });
        self.execute_with_credential(name, raw_args, credential.as_deref())
            .await
    }

    /// Execute `name` with an explicit session credential
    pub async fn execute_with_credential(
        &self,
        name: &str,
        raw_args: &Value,
        session_credential: Option<&str>,
    ) -> ToolsCallResult {
        let Some(tool) = self.registry.lookup(name) else {
            warn!(tool = %name, "Unknown tool requested");
            return ToolsCallResult::error(format!("Error: Unknown tool requested: {name}"));
        };

        let args = match tool.validator.validate(raw_args) {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %name, issues = e.issues.len(), "Argument validation failed");
                return ToolsCallResult::error(e.render(name));
            }
        };

        let credentials = self
            .resolver
            .resolve(&tool.definition, session_credential)
            .await;

        let request = match build_request(&tool.definition, &args, &self.base_url, &credentials) {
            Ok(request) => request,
            Err(e) => {
                warn!(tool = %name, error = %e, "Request construction failed");
                return ToolsCallResult::error(e.to_string());
            }
        };

        info!(tool = %name, method = %request.method, url = %request.url, "Calling upstream");
        let response = match request.into_builder(&self.client).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(tool = %name, error = %e, "Upstream call failed");
                return ToolsCallResult::error(describe_send_error(&e));
            }
        };
        render_response(name, response).await
    }
}

async fn render_response(tool: &str, response: Response) -> ToolsCallResult {
    let status = response.status();
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.to_lowercase().contains("application/json"));

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(tool = %tool, error = %e, "Upstream body unreadable");
            return ToolsCallResult::error(describe_send_error(&e));
        }
    };

    debug!(tool = %tool, status = status.as_u16(), bytes = body.len(), "Upstream responded");
    if status.is_success() {
        ToolsCallResult::text(format!(
            "API Response (Status: {}):\n{}",
            status.as_u16(),
            success_text(status, is_json, &body)
        ))
    } else {
        ToolsCallResult::error(error_text(status, &body))
    }
}

fn success_text(status: StatusCode, is_json: bool, body: &str) -> String {
    let empty = || format!("(Status: {} - No body content)", status.as_u16());
    if body.is_empty() {
        return empty();
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) if is_json => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| body.to_string())
        }
        Ok(Value::Null) => empty(),
        Ok(Value::String(s)) => s,
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value.to_string(),
        _ => body.to_string(),
    }
}

fn error_text(status: StatusCode, body: &str) -> String {
    let reason = status
        .canonical_reason()
        .unwrap_or("Status text not available");
    let head = format!("API Error: Status {} ({reason}). ", status.as_u16());

    let snippet = match serde_json::from_str::<Value>(body) {
        Ok(Value::Null) => None,
        Ok(Value::String(s)) => Some(s),
        Ok(value) => Some(value.to_string()),
        Err(_) => Some(body.to_string()).filter(|b| !b.is_empty()),
    };
    match snippet {
        Some(snippet) => format!(
            "{head}Response: {}",
            truncate(&snippet, MAX_ERROR_BODY_CHARS)
        ),
        None => format!("{head}No response body received."),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

fn describe_send_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        return format!("API Request Setup Error: {e}");
    }
    let code = if e.is_timeout() {
        "ETIMEDOUT"
    } else if e.is_connect() {
        "ECONNREFUSED"
    } else {
        "ERR_NETWORK"
    };
    format!("API Network Error: No response received from server. (Code: {code})")
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
