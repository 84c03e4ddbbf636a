use anyhow::Result;
use bgpkit_parser::error::ParserError;
use bgpkit_parser::models::{BgpElem, ElemType};
use bgpkit_parser::{BgpkitParser, Elementor};
use std::collections::HashSet;
use std::fmt;
use std::io::Read;
use tracing::{debug, warn};

use crate::event::{ElementType, RoutingEvent};

/// Which kind of MRT archive an input holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpKind {
    Rib,
    Updates,
}

/// An MRT dump, local path or URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MrtInput {
    pub location: String,
    pub kind: DumpKind,
}

impl MrtInput {
    pub fn rib(location: impl Into<String>) -> MrtInput {
        MrtInput {
            location: location.into(),
            kind: DumpKind::Rib,
        }
    }

    pub fn updates(location: impl Into<String>) -> MrtInput {
        MrtInput {
            location: location.into(),
            kind: DumpKind::Updates,
        }
    }
}

impl fmt::Display for MrtInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DumpKind::Rib => write!(f, "rib:{}", self.location),
            DumpKind::Updates => write!(f, "updates:{}", self.location),
        }
    }
}

/// Exact-match prefix set and inclusive time interval.
#[derive(Debug, Clone)]
pub struct EventFilter {
    prefixes: HashSet<String>,
    start: i64,
    end: i64,
}

impl EventFilter {
    pub fn new(prefixes: impl IntoIterator<Item = String>, start: i64, end: i64) -> EventFilter {
        EventFilter {
            prefixes: prefixes.into_iter().collect(),
            start,
            end,
        }
    }

    pub fn accepts_prefix(&self, prefix: &str) -> bool {
        self.prefixes.contains(prefix)
    }

    pub fn accepts_time(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}

pub fn element_type(elem_type: &ElemType, kind: DumpKind) -> ElementType {
    match (kind, elem_type) {
        (DumpKind::Rib, _) => ElementType::Rib,
        (DumpKind::Updates, ElemType::ANNOUNCE) => ElementType::Announce,
        (DumpKind::Updates, _) => ElementType::Withdraw,
    }
}

/// Convert a parsed element, or `None` when the filter rejects it.
pub fn event_from_elem(
    elem: &BgpElem,
    kind: DumpKind,
    filter: &EventFilter,
) -> Option<RoutingEvent> {
    let timestamp = elem.timestamp as i64;
    if !filter.accepts_time(timestamp) {
        return None;
    }
    let prefix = elem.prefix.to_string();
    if !filter.accepts_prefix(&prefix) {
        return None;
    }

    let element_type = element_type(&elem.elem_type, kind);
    let as_path = match element_type {
        ElementType::Withdraw => None,
        _ => elem.as_path.as_ref().map(|path| path.to_string()),
    };

    Some(RoutingEvent {
        timestamp,
        element_type,
        prefix,
        peer_address: elem.peer_ip.to_string(),
        peer_asn: elem.peer_asn.to_string(),
        as_path,
    })
}

/// Elements of one MRT input, read record by record.
///
/// Unsupported or truncated BGP messages inside an intact record are skipped.
/// Any other read failure ends the stream with an `Err`.
pub struct MrtElems<R> {
    input: String,
    parser: BgpkitParser<R>,
    elementor: Elementor,
    pending: std::vec::IntoIter<BgpElem>,
    done: bool,
}

impl<R: Read> Iterator for MrtElems<R> {
    type Item = Result<BgpElem>;

    fn next(&mut self) -> Option<Result<BgpElem>> {
        loop {
            if let Some(elem) = self.pending.next() {
                return Some(Ok(elem));
            }
            if self.done {
                return None;
            }

            match self.parser.next_record() {
                Ok(record) => {
                    self.pending = self.elementor.record_to_elems(record).into_iter();
                }
                Err(err) => match err.error {
                    ParserError::EofExpected => {
                        debug!("{}: end of input", self.input);
                        self.done = true;
                    }
                    ParserError::TruncatedMsg(msg) | ParserError::Unsupported(msg) => {
                        warn!("{}: skipping record: {}", self.input, msg);
                    }
                    error => {
                        self.done = true;
                        return Some(Err(anyhow::anyhow!(
                            "failed to read MRT input {}: {}",
                            self.input,
                            error
                        )));
                    }
                },
            }
        }
    }
}

/// Open an MRT input for element-wise reading.
pub fn open_elems(input: &MrtInput) -> Result<impl Iterator<Item = Result<BgpElem>> + use<>> {
    let parser = match BgpkitParser::new(input.location.as_str()) {
        Ok(parser) => parser,
        Err(err) => anyhow::bail!("failed to open MRT input {}: {}", input, err),
    };
    debug!("opened MRT input {}", input);

    Ok(MrtElems {
        input: input.to_string(),
        parser,
        elementor: Elementor::new(),
        pending: Vec::new().into_iter(),
        done: false,
    })
}

/// Convert elements to events, dropping those the filter rejects.
/// Read errors are passed through.
pub fn filter_events<I: Iterator<Item = Result<BgpElem>>>(
    elems: I,
    kind: DumpKind,
    filter: EventFilter,
) -> impl Iterator<Item = Result<RoutingEvent>> {
    elems.filter_map(move |elem| match elem {
        Ok(elem) => event_from_elem(&elem, kind, &filter).map(Ok),
        Err(err) => Some(Err(err)),
    })
}
