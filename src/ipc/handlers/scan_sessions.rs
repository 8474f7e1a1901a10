use crate::feed::ChangeOp;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::attendance::{load_context, target_param};
use crate::ipc::handlers::notifications::notify_guardians;
use crate::ipc::handlers::setup::notify_guardians_enabled;
use crate::ipc::params::{get_instant, get_required_str};
use crate::ipc::types::{AppState, Request};
use crate::scan::{ScanSession, Verdict};
use crate::store::SqliteStore;
use serde_json::json;
use tracing::{info, warn};

fn session_id(req: &Request) -> Result<String, HandlerErr> {
    get_required_str(&req.params, "sessionId")
}

fn unknown_session() -> HandlerErr {
    HandlerErr::not_found("scan session not found")
}

fn handle_session_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let opened = (|| {
        let recorded_by = get_required_str(&req.params, "recordedBy")?;
        let target = target_param(&req.params)?;
        let ctx = load_context(conn, &target)?;
        Ok::<_, HandlerErr>((ScanSession::new(target, recorded_by), ctx))
    })();
    let (session, ctx) = match opened {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let (id, evicted) = state.scans.open(session);
    if let Some(old) = evicted {
        warn!(session_id = %old, "idle scan session evicted");
    }
    info!(session_id = %id, kind = ctx.attendance_type().as_str(), "scan session opened");
    ok(&req.id, json!({ "sessionId": id, "context": ctx.to_json() }))
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState {
        db, feed, scans, ..
    } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let parsed = (|| {
        Ok::<_, HandlerErr>((
            session_id(req)?,
            get_required_str(&req.params, "token")?,
            get_instant(&req.params, "at")?,
        ))
    })();
    let (sid, token, at) = match parsed {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(session) = scans.get_mut(&sid) else {
        return unknown_session().response(&req.id);
    };

    // The target may have been edited or deleted since the session opened.
    let ctx = match load_context(conn, &session.target) {
        Ok(c) => c,
        Err(e) => {
            warn!(session_id = %sid, code = e.code, "scan session target unavailable");
            return e.response(&req.id);
        }
    };
    let outcome = match session.submit(&SqliteStore::new(conn), &ctx, &token, at) {
        Ok(o) => o,
        Err(e) => {
            warn!(session_id = %sid, error = %format!("{e:#}"), "scan could not be recorded");
            return err(
                &req.id,
                "db_insert_failed",
                format!("{e:#}"),
                Some(json!({ "table": "attendance_records", "log": session.log.to_json() })),
            );
        }
    };
    info!(
        session_id = %sid,
        success = outcome.entry.success,
        message = %outcome.entry.message,
        "scan processed"
    );

    if let Some(record) = &outcome.record {
        feed.publish("attendance_records", ChangeOp::Insert, &record.id);
        if let Verdict::Valid {
            student_id,
            display_name,
        } = &outcome.verdict
        {
            let notify = match notify_guardians_enabled(conn) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "could not read attendance settings");
                    false
                }
            };
            if notify {
                if let Err(e) =
                    notify_guardians(conn, feed, student_id, display_name, &ctx)
                {
                    warn!(code = e.code, error = %e.message, "guardian notification failed");
                }
            }
        }
    }

    ok(
        &req.id,
        json!({
            "outcome": outcome.to_json(),
            "log": session.log.to_json()
        }),
    )
}

fn handle_session_log(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sid = match session_id(req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match state.scans.get(&sid) {
        Some(session) => ok(
            &req.id,
            json!({
                "sessionId": sid,
                "target": session.target.to_json(),
                "recordedBy": session.recorded_by,
                "log": session.log.to_json()
            }),
        ),
        None => unknown_session().response(&req.id),
    }
}

fn handle_session_close(state: &mut AppState, req: &Request) -> serde_json::Value {
    let sid = match session_id(req) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    match state.scans.close(&sid) {
        Some(session) => {
            info!(session_id = %sid, scans = session.log.len(), "scan session closed");
            ok(&req.id, json!({ "ok": true }))
        }
        None => unknown_session().response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scan.sessionOpen" => Some(handle_session_open(state, req)),
        "scan.submit" => Some(handle_submit(state, req)),
        "scan.sessionLog" => Some(handle_session_log(state, req)),
        "scan.sessionClose" => Some(handle_session_close(state, req)),
        _ => None,
    }
}
