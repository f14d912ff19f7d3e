//! Tool table types
//!
//! These types map directly to the packaged YAML tool table. Every upstream
//! endpoint becomes one [`ToolDefinition`]; the table is loaded once and never
//! mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// The whole tool table: server identity, upstream root, schemes and tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTable {
    /// Identity advertised in `serverInfo` and `/health`
    pub server: ServerIdentity,
    /// Default upstream root URL, overridable by configuration
    pub base_url: String,
    /// Security schemes referenced by tool requirements
    #[serde(default)]
    pub security_schemes: BTreeMap<String, SecurityScheme>,
    /// Tool definitions, in advertised order
    pub tools: Vec<ToolDefinition>,
}

/// Name and version of this server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerIdentity {
    /// Server name
    pub name: String,
    /// Server version
    pub version: String,
}

/// A single tool: one upstream endpoint plus the schema of its arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// HTTP method of the upstream call
    pub method: HttpMethod,

    /// Path template with `{param}` placeholders, relative to the base URL
    pub path: String,

    /// Where each argument goes in the outbound request
    #[serde(default)]
    pub parameters: Vec<ExecutionParameter>,

    /// Request body content type; a `requestBody` argument is sent only when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// Security alternatives, OR'd; the schemes inside one alternative are AND'd
    #[serde(default)]
    pub security: Vec<SecurityRequirement>,

    /// JSON Schema of the arguments object
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
}

fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    /// Placeholder names that appear in the path template, in order
    #[must_use]
    pub fn path_placeholders(&self) -> Vec<&str> {
        self.path
            .split('{')
            .skip(1)
            .filter_map(|chunk| chunk.split_once('}').map(|(name, _)| name))
            .collect()
    }

    /// Parameters bound to the given location
    pub fn parameters_in(
        &self,
        location: ParameterLocation,
    ) -> impl Iterator<Item = &ExecutionParameter> {
        self.parameters
            .iter()
            .filter(move |p| p.location == location)
    }
}

/// HTTP method of an upstream call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    /// GET
    #[serde(alias = "get")]
    Get,
    /// POST
    #[serde(alias = "post")]
    Post,
    /// PUT
    #[serde(alias = "put")]
    Put,
    /// DELETE
    #[serde(alias = "delete")]
    Delete,
    /// PATCH
    #[serde(alias = "patch")]
    Patch,
}

impl HttpMethod {
    /// The equivalent `reqwest` method
    #[must_use]
    pub fn as_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_method().as_str())
    }
}

/// Binding of one argument to a request location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionParameter {
    /// Argument name (also the placeholder / query key / header name)
    pub name: String,
    /// Request location
    #[serde(rename = "in")]
    pub location: ParameterLocation,
}

/// Request location of an execution parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    /// Substituted into the path template
    Path,
    /// Added to the query string
    Query,
    /// Sent as a request header
    Header,
}

/// One security alternative: scheme name -> required scopes
pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

/// A declared security scheme
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityScheme {
    /// API key sent in a header, query parameter or cookie
    ApiKey {
        /// Where the key goes
        #[serde(rename = "in")]
        location: ApiKeyLocation,
        /// Header / query / cookie name
        name: String,
        /// Description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// HTTP authentication (`bearer` or `basic`)
    Http {
        /// Scheme name, compared case-insensitively
        scheme: String,
        /// Description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// OAuth2 with token endpoints
    #[serde(rename = "oauth2")]
    OAuth2 {
        /// Supported flows
        #[serde(default)]
        flows: OAuthFlows,
        /// Description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// OpenID Connect with a pre-provisioned token
    OpenIdConnect {
        /// Discovery URL
        #[serde(default, skip_serializing_if = "Option::is_none")]
        open_id_connect_url: Option<String>,
        /// Description
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

/// Location of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyLocation {
    /// Request header
    Header,
    /// Query parameter
    Query,
    /// Cookie
    Cookie,
}

/// OAuth2 flows that can yield a token without user interaction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OAuthFlows {
    /// Client credentials flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_credentials: Option<OAuthFlow>,
    /// Resource owner password flow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<OAuthFlow>,
}

impl OAuthFlows {
    /// Token URL of the first supported flow (client credentials, then password)
    #[must_use]
    pub fn token_url(&self) -> Option<&str> {
        self.client_credentials
            .as_ref()
            .or(self.password.as_ref())
            .map(|flow| flow.token_url.as_str())
    }
}

/// A single OAuth2 flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthFlow {
    /// Token endpoint
    pub token_url: String,
    /// Available scopes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub scopes: BTreeMap<String, String>,
}
