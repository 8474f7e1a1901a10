pub mod attendance;
pub mod backup;
pub mod changes;
pub mod classes;
pub mod core;
pub mod guardians;
pub mod notifications;
pub mod periods;
pub mod reports;
pub mod rooms;
pub mod scan_sessions;
pub mod schedules;
pub mod setup;
pub mod students;
pub mod teachers;
pub mod transport;

use crate::feed::ChangeFeed;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;

/// Runs `f` against the open workspace and wraps its result in a response.
pub(crate) fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &mut ChangeFeed, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let AppState { db, feed, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, feed, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}
