mod backup;
mod config;
mod db;
mod feed;
mod ipc;
mod model;
mod rooms_csv;
mod scan;
mod schedule;
mod store;

use std::io::{self, BufRead, Write};
use tracing::{error, info, warn};

fn main() {
    let cfg = config::Config::from_env();
    config::init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let mut state = ipc::AppState::new();
    if let Some(path) = &cfg.workspace {
        if let Err(e) = ipc::open_workspace(&mut state, path) {
            warn!(workspace = %path.display(), error = %format!("{e:#}"), "start-up workspace not opened");
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                warn!(error = %e, "malformed request line");
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed, shutting down");
}
