use crate::feed::{ChangeFeed, ChangeOp};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::with_db;
use crate::ipc::params::{
    get_optional_i64, get_optional_str, get_patch, get_required_str, now_rfc3339,
};
use crate::ipc::types::{AppState, Request};
use crate::model::RecordStatus;
use crate::schedule::parse_hhmm;
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

/// Deactivates any current assignment of the student and inserts the new
/// one. Callers own the surrounding transaction.
pub fn assign_bus(
    conn: &Connection,
    student_id: &str,
    route_id: &str,
    stop_id: Option<&str>,
) -> Result<String, HandlerErr> {
    let Some(route) = store::load_bus_route(conn, route_id).map_err(HandlerErr::query)? else {
        return Err(HandlerErr::not_found("bus route not found"));
    };
    if route.status != RecordStatus::Active {
        return Err(HandlerErr::bad_params("bus route is inactive"));
    }
    if let Some(stop_id) = stop_id {
        let on_route = conn
            .query_row(
                "SELECT 1 FROM bus_stops WHERE id = ? AND route_id = ?",
                (stop_id, route_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(HandlerErr::query)?
            .is_some();
        if !on_route {
            return Err(HandlerErr::not_found("bus stop not found on this route"));
        }
    }
    conn.execute(
        "UPDATE bus_assignments SET status = 'inactive'
         WHERE student_id = ? AND status = 'active'",
        [student_id],
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "bus_assignments", e))?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO bus_assignments(id, student_id, route_id, stop_id, status, assigned_at)
         VALUES(?, ?, ?, ?, 'active', ?)",
        (&id, student_id, route_id, stop_id, now_rfc3339()),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "bus_assignments", e))?;
    Ok(id)
}

fn routes_list(conn: &Connection) -> Result<Value, HandlerErr> {
    let routes = store::list_bus_routes(conn).map_err(HandlerErr::query)?;
    let mut out = Vec::with_capacity(routes.len());
    for r in routes {
        let riders: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM bus_assignments WHERE route_id = ? AND status = 'active'",
                [&r.id],
                |row| row.get(0),
            )
            .map_err(HandlerErr::query)?;
        let mut v = json!(r);
        v["riderCount"] = riders.into();
        out.push(v);
    }
    Ok(json!({ "busRoutes": out }))
}

fn routes_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let driver_name = get_optional_str(params, "driverName")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO bus_routes(id, name, driver_name, status) VALUES(?, ?, ?, 'active')",
        (&id, &name, &driver_name),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "bus_routes", e))?;
    feed.publish("bus_routes", ChangeOp::Insert, &id);
    Ok(json!({ "busRouteId": id, "name": name }))
}

fn routes_update(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let route_id = get_required_str(params, "busRouteId")?;
    let patch = get_patch(params)?;
    let Some(mut route) = store::load_bus_route(conn, &route_id).map_err(HandlerErr::query)?
    else {
        return Err(HandlerErr::not_found("bus route not found"));
    };
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                route.name = v
                    .as_str()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params("name must be a non-empty string"))?;
            }
            "driverName" => {
                route.driver_name = match v {
                    Value::Null => None,
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    _ => return Err(HandlerErr::bad_params("driverName must be string or null")),
                };
            }
            "status" => {
                route.status = v
                    .as_str()
                    .and_then(RecordStatus::parse)
                    .ok_or_else(|| HandlerErr::bad_params("status must be one of: active, inactive"))?;
            }
            _ => return Err(HandlerErr::bad_params(format!("unknown bus route field: {}", k))),
        }
    }
    conn.execute(
        "UPDATE bus_routes SET name = ?, driver_name = ?, status = ? WHERE id = ?",
        (&route.name, &route.driver_name, route.status.as_str(), &route_id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "bus_routes", e))?;
    feed.publish("bus_routes", ChangeOp::Update, &route_id);
    Ok(json!({ "busRoute": route }))
}

fn stops_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let route_id = get_required_str(params, "busRouteId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, name, stop_order, pickup_time FROM bus_stops
             WHERE route_id = ? ORDER BY stop_order, name",
        )
        .map_err(HandlerErr::query)?;
    let stops = stmt
        .query_map([&route_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "stopOrder": r.get::<_, i64>(2)?,
                "pickupTime": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "stops": stops }))
}

fn stops_create(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let route_id = get_required_str(params, "busRouteId")?;
    let name = get_required_str(params, "name")?;
    let pickup_time = get_optional_str(params, "pickupTime")?;
    if let Some(t) = &pickup_time {
        if parse_hhmm(t).is_none() {
            return Err(HandlerErr::bad_params("pickupTime must be HH:MM"));
        }
    }
    if !store::row_exists(conn, "bus_routes", &route_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("bus route not found"));
    }
    let stop_order = match get_optional_i64(params, "stopOrder")? {
        Some(n) => n,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(stop_order), 0) + 1 FROM bus_stops WHERE route_id = ?",
                [&route_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::query)?,
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO bus_stops(id, route_id, name, stop_order, pickup_time) VALUES(?, ?, ?, ?, ?)",
        (&id, &route_id, &name, stop_order, &pickup_time),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "bus_stops", e))?;
    feed.publish("bus_stops", ChangeOp::Insert, &id);
    Ok(json!({ "busStopId": id, "stopOrder": stop_order }))
}

fn assignments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let route_id = get_optional_str(params, "busRouteId")?;
    let mut stmt = conn
        .prepare(
            "SELECT ba.id, ba.student_id, s.first_name, s.last_name, ba.route_id, ba.stop_id, bs.name
             FROM bus_assignments ba
             JOIN students s ON s.id = ba.student_id
             LEFT JOIN bus_stops bs ON bs.id = ba.stop_id
             WHERE ba.status = 'active' AND (?1 IS NULL OR ba.route_id = ?1)
             ORDER BY s.last_name, s.first_name",
        )
        .map_err(HandlerErr::query)?;
    let rows = stmt
        .query_map([&route_id], |r| {
            let first: String = r.get(2)?;
            let last: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "displayName": format!("{} {}", first, last),
                "busRouteId": r.get::<_, String>(4)?,
                "busStopId": r.get::<_, Option<String>>(5)?,
                "stopName": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "assignments": rows }))
}

fn assignments_set(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let route_id = get_required_str(params, "busRouteId")?;
    let stop_id = get_optional_str(params, "busStopId")?;
    if !store::row_exists(conn, "students", &student_id).map_err(HandlerErr::query)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let id = assign_bus(&tx, &student_id, &route_id, stop_id.as_deref())?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    feed.publish("bus_assignments", ChangeOp::Insert, &id);
    Ok(json!({ "assignmentId": id }))
}

fn assignments_remove(
    conn: &Connection,
    feed: &mut ChangeFeed,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let active: Vec<String> = {
        let mut stmt = conn
            .prepare("SELECT id FROM bus_assignments WHERE student_id = ? AND status = 'active'")
            .map_err(HandlerErr::query)?;
        let ids = stmt
            .query_map([&student_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::query)?;
        ids
    };
    conn.execute(
        "UPDATE bus_assignments SET status = 'inactive' WHERE student_id = ? AND status = 'active'",
        [&student_id],
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "bus_assignments", e))?;
    for id in &active {
        feed.publish("bus_assignments", ChangeOp::Update, id);
    }
    Ok(json!({ "removed": active.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "bus.routes.list" => Some(with_db(state, req, |c, _, _| routes_list(c))),
        "bus.routes.create" => Some(with_db(state, req, routes_create)),
        "bus.routes.update" => Some(with_db(state, req, routes_update)),
        "bus.stops.list" => Some(with_db(state, req, |c, _, p| stops_list(c, p))),
        "bus.stops.create" => Some(with_db(state, req, stops_create)),
        "bus.assignments.list" => Some(with_db(state, req, |c, _, p| assignments_list(c, p))),
        "bus.assignments.set" => Some(with_db(state, req, assignments_set)),
        "bus.assignments.remove" => Some(with_db(state, req, assignments_remove)),
        _ => None,
    }
}
