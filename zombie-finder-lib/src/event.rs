use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a routing element as delivered by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    #[serde(rename = "RIB")]
    Rib,
    Announce,
    Withdraw,
    /// Peer state changes and anything else the engine does not track.
    Other,
}

impl ElementType {
    /// Whether the dispatcher acts on elements of this kind.
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Rib | Self::Announce | Self::Withdraw)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rib => "RIB",
            Self::Announce => "Announce",
            Self::Withdraw => "Withdraw",
            Self::Other => "Other",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single routing element, already filtered and ordered by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEvent {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub element_type: ElementType,
    pub prefix: String,
    pub peer_address: String,
    pub peer_asn: String,
    /// Present for RIB and Announce elements.
    pub as_path: Option<String>,
}

impl RoutingEvent {
    pub fn new(
        timestamp: i64,
        element_type: ElementType,
        prefix: impl Into<String>,
        peer_address: impl Into<String>,
        peer_asn: impl Into<String>,
    ) -> Self {
        RoutingEvent {
            timestamp,
            element_type,
            prefix: prefix.into(),
            peer_address: peer_address.into(),
            peer_asn: peer_asn.into(),
            as_path: None,
        }
    }

    pub fn with_as_path(mut self, as_path: impl Into<String>) -> Self {
        self.as_path = Some(as_path.into());
        self
    }
}
