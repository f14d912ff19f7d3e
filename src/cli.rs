//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// MCP server for the Bitcoin indexer REST API
#[derive(Parser, Debug)]
#[command(name = "bitcoin-indexer-mcp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "BITCOIN_INDEXER_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server (default)
    Serve,

    /// Inspect or run tools without starting the server
    #[command(subcommand)]
    Tools(ToolsCommand),
}

/// Tool subcommands
#[derive(Subcommand, Debug)]
pub enum ToolsCommand {
    /// List every tool with its method and path
    List,

    /// Call one tool against the upstream and print the result
    Call {
        /// Tool name
        #[arg(required = true)]
        name: String,

        /// JSON object of tool arguments
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Bearer token used in place of environment credentials
        #[arg(long, env = "BITCOIN_INDEXER_MCP_BEARER", hide_env_values = true)]
        bearer: Option<String>,
    },
}
