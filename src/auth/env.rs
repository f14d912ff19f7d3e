//! Environment-sourced credentials
//!
//! Credentials for a security scheme live in environment variables named
//! after the scheme (`API_KEY_<SCHEME>`, `BEARER_TOKEN_<SCHEME>`, ...). The
//! resolver reads them through a [`CredentialEnv`] snapshot rather than
//! `std::env` so tests never have to mutate process state.

use std::collections::HashMap;

/// Variable prefixes, one per credential kind
pub mod prefix {
    /// API key value
    pub const API_KEY: &str = "API_KEY";
    /// HTTP bearer token
    pub const BEARER_TOKEN: &str = "BEARER_TOKEN";
    /// HTTP basic username
    pub const BASIC_USERNAME: &str = "BASIC_USERNAME";
    /// HTTP basic password
    pub const BASIC_PASSWORD: &str = "BASIC_PASSWORD";
    /// Pre-provisioned OAuth2 access token
    pub const OAUTH_TOKEN: &str = "OAUTH_TOKEN";
    /// OAuth2 client id
    pub const OAUTH_CLIENT_ID: &str = "OAUTH_CLIENT_ID";
    /// OAuth2 client secret
    pub const OAUTH_CLIENT_SECRET: &str = "OAUTH_CLIENT_SECRET";
    /// Space-separated OAuth2 scopes
    pub const OAUTH_SCOPES: &str = "OAUTH_SCOPES";
    /// OpenID Connect token
    pub const OPENID_TOKEN: &str = "OPENID_TOKEN";
}

/// Upper-case a scheme name, replacing every non-alphanumeric character with `_`
#[must_use]
pub fn sanitize_scheme_name(scheme: &str) -> String {
    scheme
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Variable name for `prefix` and `scheme`, e.g. `API_KEY_API_KEY` for `api-key`
#[must_use]
pub fn variable_name(prefix: &str, scheme: &str) -> String {
    format!("{prefix}_{}", sanitize_scheme_name(scheme))
}

/// Snapshot of the variables credentials are read from
#[derive(Debug, Clone, Default)]
pub struct CredentialEnv {
    vars: HashMap<String, String>,
}

impl CredentialEnv {
    /// Capture the current process environment
    #[must_use]
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build from explicit pairs
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Non-empty value of a variable
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Non-empty value of `<prefix>_<SCHEME>`
    #[must_use]
    pub fn scheme_value(&self, prefix: &str, scheme: &str) -> Option<&str> {
        self.get(&variable_name(prefix, scheme))
    }
}
