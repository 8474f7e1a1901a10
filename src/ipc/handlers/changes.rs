use crate::feed::ChangeFeed;
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::params::{get_required_str, get_str_array};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::debug;

fn subscribe(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let tables = get_str_array(&req.params, "tables")?;
    if tables.is_empty() {
        return Err(HandlerErr::bad_params("tables must not be empty"));
    }
    let unknown: Vec<&String> = tables
        .iter()
        .filter(|t| !ChangeFeed::is_known_table(t))
        .collect();
    if !unknown.is_empty() {
        return Err(HandlerErr::bad_params("unknown table").with_details(json!({ "tables": unknown })));
    }
    let id = state.feed.subscribe(tables.iter().cloned());
    debug!(subscription_id = %id, tables = ?tables, "change subscription opened");
    Ok(json!({ "subscriptionId": id, "tables": tables }))
}

fn poll(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(&req.params, "subscriptionId")?;
    let drained = state
        .feed
        .drain(&id)
        .ok_or_else(|| HandlerErr::not_found("subscription not found"))?;
    Ok(json!({ "events": drained.events, "dropped": drained.dropped }))
}

fn unsubscribe(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(&req.params, "subscriptionId")?;
    if !state.feed.unsubscribe(&id) {
        return Err(HandlerErr::not_found("subscription not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "changes.subscribe" => subscribe(state, req),
        "changes.poll" => poll(state, req),
        "changes.unsubscribe" => unsubscribe(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
