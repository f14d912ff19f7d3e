//! Bitcoin indexer MCP server
//!
//! Exposes every endpoint of a Bitcoin blockchain indexer REST API as a
//! Model Context Protocol tool, served over session-based Streamable HTTP.
//!
//! # Features
//!
//! - **Data-only tool table**: endpoints are declared in a packaged YAML table
//!   and compiled into validators once at startup
//! - **Per-session credentials**: a client's bearer token travels with its
//!   session and is attached to every upstream call made on its behalf
//! - **Uniform results**: upstream successes and failures alike come back as
//!   text tool results, never as transport errors
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05, 2025-03-26 and 2025-06-18.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod session;
pub mod tool;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level` when set.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    }
    .map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
