//! Upstream credential resolution
//!
//! A per-session bearer credential, when present, overrides everything else.
//! Otherwise the tool's declared security alternatives are tried in order
//! against environment-sourced credentials.

mod env;
mod resolver;
mod token_cache;

pub use env::{CredentialEnv, prefix, sanitize_scheme_name, variable_name};
pub use resolver::CredentialResolver;
pub use token_cache::{TokenCache, TokenRequest};

/// Where a resolved credential goes on the outbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialAssignment {
    /// Set a header (name lower-cased when applied)
    Header {
        /// Header name
        name: String,
        /// Header value
        value: String,
    },
    /// Set a query parameter, replacing any argument of the same name
    Query {
        /// Parameter name
        name: String,
        /// Parameter value
        value: String,
    },
    /// Prepend a `name=value` pair to the cookie header
    Cookie {
        /// Cookie name
        name: String,
        /// Cookie value
        value: String,
    },
}

impl CredentialAssignment {
    /// Header assignment
    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Header {
            name: name.into(),
            value: value.into(),
        }
    }
}
