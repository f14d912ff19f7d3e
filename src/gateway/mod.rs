//! MCP transport: session router, method dispatch and the HTTP server

mod mcp;
mod router;
mod server;

pub use mcp::{McpHandler, is_initialize_request, session_transport};
pub use router::{AppState, SESSION_HEADER, create_router};
pub use server::{McpServer, build_state};
