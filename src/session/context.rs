//! Task-local session scope.
//!
//! Every request that arrives on a session is dispatched inside
//! [`with_session`], so code deep in the call stack (the tool executor) can
//! find the session it serves with [`current_session`] without threading the
//! id through every signature. Concurrent requests on different sessions each
//! see only their own id.

tokio::task_local! {
    /// Id of the session the current task serves.
    pub static SESSION_ID: String;
}

/// The session id installed for the current task, if any
#[must_use]
pub fn current_session() -> Option<String> {
    SESSION_ID.try_with(Clone::clone).ok()
}

/// Run `future` with `session_id` installed as the current session
pub async fn with_session<F, T>(session_id: String, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    SESSION_ID.scope(session_id, future).await
}
