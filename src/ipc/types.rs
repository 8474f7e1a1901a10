use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::feed::ChangeFeed;
use crate::scan::ScanSessions;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub feed: ChangeFeed,
    pub scans: ScanSessions,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            workspace: None,
            db: None,
            feed: ChangeFeed::default(),
            scans: ScanSessions::default(),
        }
    }

    /// Subscriptions and scan sessions belong to the open workspace.
    pub fn reset_session_state(&mut self) {
        self.feed.clear();
        self.scans.clear();
    }
}
