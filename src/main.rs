//! Bitcoin indexer MCP server
//!
//! Serves the indexer REST API as MCP tools over Streamable HTTP.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use serde_json::Value;
use tracing::{error, info};

use bitcoin_indexer_mcp::{
    cli::{Cli, Command, ToolsCommand},
    config::{self, Config},
    gateway::{McpServer, build_state},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Flags read env fallbacks (`LOG_LEVEL`, `LOG_FORMAT`), so default env files load first
    config::load_env_files(&Config::default().env_files);
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Tools(ref cmd)) => match run_tools_command(&cli, cmd).await {
            Ok(code) => code,
            Err(e) => {
                eprintln!("Error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration and apply command-line overrides
fn load_config(cli: &Cli) -> bitcoin_indexer_mcp::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    Ok(config)
}

/// Run tool inspection commands
async fn run_tools_command(cli: &Cli, cmd: &ToolsCommand) -> anyhow::Result<ExitCode> {
    let config = load_config(cli).context("Failed to load configuration")?;
    let state = build_state(&config).context("Failed to load tools")?;
    let executor = state.handler.executor();

    match cmd {
        ToolsCommand::List => {
            for tool in executor.registry().iter() {
                let def = &tool.definition;
                println!("{:<48} {:<6} {}", def.name, def.method, def.path);
            }
            println!("\n{} tool(s), upstream {}", executor.registry().len(), executor.base_url());
            Ok(ExitCode::SUCCESS)
        }
        ToolsCommand::Call { name, args, bearer } => {
            let args: Value = serde_json::from_str(args).context("Invalid JSON arguments")?;
            let result = executor
                .execute_with_credential(name, &args, bearer.as_deref())
                .await;
            println!("{}", result.text_content());
            Ok(if result.is_error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

/// Run the HTTP server until shutdown
async fn run_server(cli: &Cli) -> ExitCode {
    let config = match load_config(cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting Bitcoin indexer MCP server"
    );

    let server = match McpServer::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
