use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

use crate::event::{ElementType, RoutingEvent};
use crate::tracked::ZombieEntry;

/// Per-peer paths of a prefix, keyed by peer address.
pub type PeerPaths = BTreeMap<String, PeerPathState>;

/// Last-known state of a prefix as announced by one peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerPathState {
    pub status: ElementType,
    /// Every distinct ASN seen for this peer address, space-separated, in first-seen order.
    #[serde(rename = "peerAsn")]
    pub peer_asn: String,
    #[serde(rename = "asPath")]
    pub as_path: String,
    #[serde(rename = "ts")]
    pub last_update: i64,
    #[serde(skip)]
    seen_asns: HashSet<String>,
}

impl Default for PeerPathState {
    fn default() -> Self {
        // The status is overwritten by the event that creates the record.
        PeerPathState {
            status: ElementType::Other,
            peer_asn: String::new(),
            as_path: String::new(),
            last_update: 0,
            seen_asns: HashSet::new(),
        }
    }
}

impl PeerPathState {
    pub fn apply(&mut self, event: &RoutingEvent) {
        self.status = event.element_type;
        self.last_update = event.timestamp;
        self.as_path = match event.element_type {
            ElementType::Withdraw => String::new(),
            _ => event.as_path.clone().unwrap_or_default(),
        };

        if self.seen_asns.insert(event.peer_asn.clone()) {
            if !self.peer_asn.is_empty() {
                self.peer_asn.push(' ');
            }
            self.peer_asn.push_str(&event.peer_asn);
        }
    }
}

#[derive(Debug, Default)]
struct LivePrefix {
    /// Expiries of this prefix not yet snapshotted.
    pending: usize,
    peers: PeerPaths,
}

/// Live per-(prefix, peer) path state for every prefix still awaiting expiry.
#[derive(Debug, Default)]
pub struct PathStateTable {
    live: HashMap<String, LivePrefix>,
}

impl PathStateTable {
    pub fn new<'a>(entries: impl IntoIterator<Item = &'a ZombieEntry>) -> PathStateTable {
        let mut live: HashMap<String, LivePrefix> = HashMap::new();
        for entry in entries {
            live.entry(entry.prefix.clone()).or_default().pending += 1;
        }
        PathStateTable { live }
    }

    #[cfg(test)]
    pub fn is_live(&self, prefix: &str) -> bool {
        self.live.contains_key(prefix)
    }

    pub fn live_prefixes(&self) -> usize {
        self.live.len()
    }

    #[cfg(test)]
    pub fn peers(&self, prefix: &str) -> Option<&PeerPaths> {
        self.live.get(prefix).map(|live| &live.peers)
    }

    /// Get-or-create the record of `peer` under a live `prefix`.
    fn peer_mut(&mut self, prefix: &str, peer: &str) -> Option<&mut PeerPathState> {
        let live = self.live.get_mut(prefix)?;
        Some(live.peers.entry(peer.to_string()).or_default())
    }

    /// Apply a qualifying event. Returns false when the prefix is not live
    /// or the element kind is not tracked.
    pub fn update(&mut self, event: &RoutingEvent) -> bool {
        if !event.element_type.is_tracked() {
            return false;
        }
        match self.peer_mut(&event.prefix, &event.peer_address) {
            Some(state) => {
                state.apply(event);
                trace!(
                    "{} - {}: {} at {}",
                    event.prefix, event.peer_address, state.status, state.last_update
                );
                true
            }
            None => false,
        }
    }

    /// Owned copy of the prefix's peer state. The prefix is retired once its
    /// last pending expiry has been snapshotted.
    pub fn snapshot(&mut self, prefix: &str) -> PeerPaths {
        let Some(live) = self.live.get_mut(prefix) else {
            return PeerPaths::new();
        };

        let copy = live.peers.clone();
        live.pending = live.pending.saturating_sub(1);
        if live.pending == 0 {
            self.live.remove(prefix);
            debug!("{}: retired from path state table", prefix);
        }
        gauge!("zombie_finder_live_prefixes").set(self.live.len() as f64);
        copy
    }
}
