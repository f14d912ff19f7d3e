//! Outbound request construction
//!
//! Turns a tool definition plus validated arguments into a fully resolved
//! HTTP request. Pure: no I/O, so every rule here is unit-testable.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use super::definition::{ParameterLocation, ToolDefinition};
use super::schema::ValidatedArguments;
use crate::auth::CredentialAssignment;

/// Argument carrying the request body
pub const REQUEST_BODY_ARG: &str = "requestBody";

/// Per-call request construction failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestBuildError {
    /// A `{placeholder}` survived substitution
    #[error("Failed to resolve path parameters: {0}")]
    UnresolvedPath(String),
}

/// Body of an outbound request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Serialized as JSON
    Json(Value),
    /// Sent verbatim
    Text(String),
}

/// A fully resolved upstream request
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: reqwest::Method,
    /// Base URL joined with the substituted path
    pub url: String,
    /// Headers, names lower-cased
    pub headers: BTreeMap<String, String>,
    /// Query pairs in insertion order; repeated keys allowed
    pub query: Vec<(String, String)>,
    /// Optional body
    pub body: Option<RequestBody>,
}

impl OutboundRequest {
    /// Turn this request into a `reqwest` builder on `client`
    pub fn into_builder(self, client: &reqwest::Client) -> reqwest::RequestBuilder {
        let mut builder = client.request(self.method, &self.url);
        if !self.query.is_empty() {
            builder = builder.query(&self.query);
        }
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        match self.body {
            Some(RequestBody::Json(value)) => builder.body(value.to_string()),
            Some(RequestBody::Text(text)) => builder.body(text),
            None => builder,
        }
    }
}

/// Build the outbound request for one call.
///
/// Null or absent arguments are skipped for every location.
///
/// # Errors
///
/// Returns [`RequestBuildError::UnresolvedPath`] when a path placeholder has
/// no value.
pub fn build_request(
    definition: &ToolDefinition,
    args: &ValidatedArguments,
    base_url: &str,
    credentials: &[CredentialAssignment],
) -> Result<OutboundRequest, RequestBuildError> {
    let present = |name: &str| args.get(name).filter(|v| !v.is_null());

    let mut path = definition.path.clone();
    for param in definition.parameters_in(ParameterLocation::Path) {
        if let Some(value) = present(&param.name) {
            path = path.replace(
                &format!("{{{}}}", param.name),
                &encode_path_segment(&scalar_text(value)),
            );
        }
    }
    if path.contains('{') {
        return Err(RequestBuildError::UnresolvedPath(path));
    }

    let mut query = Vec::new();
    for param in definition.parameters_in(ParameterLocation::Query) {
        match present(&param.name) {
            Some(Value::Array(items)) => query.extend(
                items
                    .iter()
                    .filter(|v| !v.is_null())
                    .map(|v| (param.name.clone(), scalar_text(v))),
            ),
            Some(value) => query.push((param.name.clone(), scalar_text(value))),
            None => {}
        }
    }

    let mut headers = BTreeMap::new();
    headers.insert("accept".to_string(), "application/json".to_string());
    for param in definition.parameters_in(ParameterLocation::Header) {
        if let Some(value) = present(&param.name) {
            headers.insert(param.name.to_lowercase(), scalar_text(value));
        }
    }

    let body = match (&definition.content_type, args.get(REQUEST_BODY_ARG)) {
        (Some(content_type), Some(value)) => {
            headers.insert("content-type".to_string(), content_type.clone());
            Some(if content_type.contains("json") {
                RequestBody::Json(value.clone())
            } else {
                RequestBody::Text(scalar_text(value))
            })
        }
        _ => None,
    };

    let mut request = OutboundRequest {
        method: definition.method.as_method(),
        url: format!("{}{path}", base_url.trim_end_matches('/')),
        headers,
        query,
        body,
    };
    for assignment in credentials {
        apply_credential(&mut request, assignment);
    }
    Ok(request)
}

fn apply_credential(request: &mut OutboundRequest, assignment: &CredentialAssignment) {
    match assignment {
        CredentialAssignment::Header { name, value } => {
            request.headers.insert(name.to_lowercase(), value.clone());
        }
        CredentialAssignment::Query { name, value } => {
            request.query.retain(|(key, _)| key != name);
            request.query.push((name.clone(), value.clone()));
        }
        CredentialAssignment::Cookie { name, value } => {
            let cookie = match request.headers.get("cookie") {
                Some(existing) => format!("{name}={value}; {existing}"),
                None => format!("{name}={value}"),
            };
            request.headers.insert("cookie".to_string(), cookie);
        }
    }
}

/// Strings verbatim; everything else as its JSON text
fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Percent-encode a single path segment
fn encode_path_segment(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
