//! Session state
//!
//! One [`Session`] per client connection, held in a concurrent table by the
//! [`SessionManager`]. The session serving the current request is installed
//! as task-local context (see [`with_session`]) so credential lookups never
//! cross sessions.

mod context;
mod manager;

pub use context::{SESSION_ID, current_session, with_session};
pub use manager::{Session, SessionManager, SessionTransport};
