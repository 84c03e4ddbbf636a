use anyhow::Result;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::event::RoutingEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Head {
    timestamp: i64,
    source: usize,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: earliest timestamp first, then lowest source index.
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// K-way merge of individually time-ordered event streams into one
/// non-decreasing stream. On equal timestamps earlier sources win.
///
/// The first error from any source is yielded once and ends the merge.
pub struct OrderedMerge<I: Iterator<Item = Result<RoutingEvent>>> {
    sources: Vec<I>,
    heads: Vec<Option<RoutingEvent>>,
    heap: BinaryHeap<Head>,
    error: Option<anyhow::Error>,
}

impl<I: Iterator<Item = Result<RoutingEvent>>> OrderedMerge<I> {
    pub fn new(sources: Vec<I>) -> OrderedMerge<I> {
        let mut merge = OrderedMerge {
            heads: (0..sources.len()).map(|_| None).collect(),
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            error: None,
        };
        for source in 0..merge.sources.len() {
            merge.advance(source);
        }
        merge
    }

    /// Pull the next event of `source` into its head slot.
    fn advance(&mut self, source: usize) {
        if self.error.is_some() {
            return;
        }
        match self.sources[source].next() {
            Some(Ok(event)) => {
                self.heap.push(Head {
                    timestamp: event.timestamp,
                    source,
                });
                self.heads[source] = Some(event);
            }
            Some(Err(err)) => self.error = Some(err),
            None => {}
        }
    }
}

impl<I: Iterator<Item = Result<RoutingEvent>>> Iterator for OrderedMerge<I> {
    type Item = Result<RoutingEvent>;

    fn next(&mut self) -> Option<Result<RoutingEvent>> {
        if let Some(err) = self.error.take() {
            self.heap.clear();
            self.heads.iter_mut().for_each(|head| *head = None);
            return Some(Err(err));
        }

        let Head { source, .. } = self.heap.pop()?;
        let event = self.heads[source].take()?;
        self.advance(source);
        Some(Ok(event))
    }
}
