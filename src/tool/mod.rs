//! Tools backed by the indexer REST API
//!
//! # Pipeline
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐   ┌──────────────┐
//! │  Registry  │──▶│  Validator   │──▶│   Request   │──▶│   Upstream   │
//! │  (lookup)  │   │  (compiled)  │   │   Builder   │   │   (reqwest)  │
//! └────────────┘   └──────────────┘   └─────────────┘   └──────────────┘
//!                                            ▲
//!                                   ┌────────┴────────┐
//!                                   │   Credential    │
//!                                   │    Resolver     │
//!                                   └─────────────────┘
//! ```
//!
//! The table is loaded once at startup (see [`ToolRegistry::load`]) and
//! shared read-only by every session.

mod definition;
mod executor;
mod registry;
mod request;
mod schema;

pub use definition::*;
pub use executor::ToolExecutor;
pub use registry::{BUILTIN_TOOLS, RegisteredTool, ToolRegistry};
pub use request::{OutboundRequest, REQUEST_BODY_ARG, RequestBody, RequestBuildError, build_request};
pub use schema::{
    CompiledSchema, IssueCode, ValidatedArguments, ValidationError, ValidationIssue,
};
