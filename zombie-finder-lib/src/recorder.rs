use metrics::gauge;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::event::{ElementType, RoutingEvent};

/// Raw descriptor of an event observed during a quarantine window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRecord {
    pub timestamp: i64,
    pub element_type: ElementType,
    pub peer_address: String,
    pub peer_asn: String,
}

impl From<&RoutingEvent> for EventRecord {
    fn from(event: &RoutingEvent) -> Self {
        EventRecord {
            timestamp: event.timestamp,
            element_type: event.element_type,
            peer_address: event.peer_address.clone(),
            peer_asn: event.peer_asn.clone(),
        }
    }
}

impl fmt::Display for EventRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.timestamp, self.element_type, self.peer_address, self.peer_asn
        )
    }
}

/// Comma-joined `timestamp|type|peer|asn` rendering of a record log.
pub fn join_records(records: &[EventRecord]) -> String {
    records
        .iter()
        .map(|record| record.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Record logs of every watched prefix.
///
/// A prefix is watched once per tracked expiry, so logs are keyed by
/// `(prefix, expiry)`; a prefix listed twice gets two bounded logs.
#[derive(Debug, Default)]
pub struct EventRecorder {
    watched: HashMap<String, BTreeMap<i64, Vec<EventRecord>>>,
    watched_entries: usize,
}

impl EventRecorder {
    pub fn new() -> EventRecorder {
        EventRecorder::default()
    }

    /// Start watching `prefix` for the window that ends at `expiry`.
    pub fn watch(&mut self, prefix: &str, expiry: i64) {
        let windows = self.watched.entry(prefix.to_string()).or_default();
        if windows.insert(expiry, Vec::new()).is_none() {
            self.watched_entries += 1;
        }
        debug!("{}: watching until {}", prefix, expiry);
        gauge!("zombie_finder_watched_entries").set(self.watched_entries as f64);
    }

    #[cfg(test)]
    pub fn is_watched(&self, prefix: &str) -> bool {
        self.watched.contains_key(prefix)
    }

    #[cfg(test)]
    pub fn watched_entries(&self) -> usize {
        self.watched_entries
    }

    /// Append the event to every open window of its prefix that ends after it.
    /// Returns whether anything was recorded.
    pub fn record(&mut self, event: &RoutingEvent) -> bool {
        let Some(windows) = self.watched.get_mut(&event.prefix) else {
            return false;
        };
        let record = EventRecord::from(event);
        let mut recorded = false;
        for (_, log) in windows.range_mut(event.timestamp.saturating_add(1)..) {
            log.push(record.clone());
            recorded = true;
        }
        recorded
    }

    /// Stop watching the window of `prefix` ending at `expiry`, returning its
    /// log. `None` means the window was never opened.
    pub fn unwatch(&mut self, prefix: &str, expiry: i64) -> Option<Vec<EventRecord>> {
        let windows = self.watched.get_mut(prefix)?;
        let log = windows.remove(&expiry)?;
        if windows.is_empty() {
            self.watched.remove(prefix);
        }
        self.watched_entries -= 1;
        gauge!("zombie_finder_watched_entries").set(self.watched_entries as f64);
        Some(log)
    }
}
