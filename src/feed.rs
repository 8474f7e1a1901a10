//! Table change notifications with an explicit subscribe/poll/unsubscribe
//! lifecycle. Views subscribe when they open and unsubscribe when they close.

use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

pub const QUEUE_CAPACITY: usize = 256;
/// Live subscriptions kept at once; subscribing past this drops the one
/// polled least recently.
pub const MAX_SUBSCRIPTIONS: usize = 64;

pub const TABLES: &[&str] = &[
    "students",
    "teachers",
    "classes",
    "class_schedules",
    "periods",
    "rooms",
    "bus_routes",
    "bus_stops",
    "bus_assignments",
    "attendance_records",
    "guardians",
    "class_enrollments",
    "notifications",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub seq: u64,
    pub table: String,
    pub op: ChangeOp,
    pub row_id: String,
}

#[derive(Debug)]
struct Subscription {
    tables: HashSet<String>,
    queue: VecDeque<ChangeEvent>,
    dropped: u64,
    last_used: u64,
}

#[derive(Debug, Default)]
pub struct ChangeFeed {
    next_seq: u64,
    clock: u64,
    subs: HashMap<String, Subscription>,
}

#[derive(Debug)]
pub struct Drained {
    pub events: Vec<ChangeEvent>,
    pub dropped: u64,
}

impl ChangeFeed {
    pub fn is_known_table(table: &str) -> bool {
        TABLES.contains(&table)
    }

    pub fn subscribe<I, S>(&mut self, tables: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.subs.len() >= MAX_SUBSCRIPTIONS {
            if let Some(stale) = self
                .subs
                .iter()
                .min_by_key(|(_, s)| s.last_used)
                .map(|(id, _)| id.clone())
            {
                self.subs.remove(&stale);
                warn!(subscription_id = %stale, "idle change subscription evicted");
            }
        }
        self.clock += 1;
        let id = Uuid::new_v4().to_string();
        self.subs.insert(
            id.clone(),
            Subscription {
                tables: tables.into_iter().map(Into::into).collect(),
                queue: VecDeque::new(),
                dropped: 0,
                last_used: self.clock,
            },
        );
        id
    }

    pub fn unsubscribe(&mut self, id: &str) -> bool {
        self.subs.remove(id).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.subs.len()
    }

    pub fn publish(&mut self, table: &str, op: ChangeOp, row_id: &str) {
        self.next_seq += 1;
        let event = ChangeEvent {
            seq: self.next_seq,
            table: table.to_string(),
            op,
            row_id: row_id.to_string(),
        };
        for sub in self.subs.values_mut() {
            if !sub.tables.contains(table) {
                continue;
            }
            if sub.queue.len() >= QUEUE_CAPACITY {
                sub.queue.pop_front();
                sub.dropped += 1;
            }
            sub.queue.push_back(event.clone());
        }
    }

    /// Takes everything queued for `id`, oldest first. `None` for an
    /// unknown subscription.
    pub fn drain(&mut self, id: &str) -> Option<Drained> {
        self.clock += 1;
        let sub = self.subs.get_mut(id)?;
        sub.last_used = self.clock;
        let events = sub.queue.drain(..).collect();
        let dropped = std::mem::take(&mut sub.dropped);
        Some(Drained { events, dropped })
    }

    pub fn clear(&mut self) {
        self.subs.clear();
    }
}
