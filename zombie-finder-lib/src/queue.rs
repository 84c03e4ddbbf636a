use std::collections::VecDeque;

use crate::tracked::{QuarantineEntry, ZombieEntry};

/// Something consumed in timestamp order by the dispatcher.
pub trait Timed {
    fn timestamp(&self) -> i64;
}

impl Timed for ZombieEntry {
    fn timestamp(&self) -> i64 {
        self.expiry
    }
}

impl Timed for QuarantineEntry {
    fn timestamp(&self) -> i64 {
        self.activation
    }
}

/// Ascending, consume-once queue of timed entries.
///
/// Entries are sorted once at construction and popped from the front only
/// when their timestamp is strictly older than the current event clock.
#[derive(Debug)]
pub struct TimedQueue<T: Timed + Ord> {
    entries: VecDeque<T>,
}

impl<T: Timed + Ord> TimedQueue<T> {
    pub fn new(mut entries: Vec<T>) -> Self {
        entries.sort();
        TimedQueue {
            entries: entries.into(),
        }
    }

    #[cfg(test)]
    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    /// Pop the front entry if its timestamp is `< now`.
    pub fn pop_before(&mut self, now: i64) -> Option<T> {
        match self.entries.front() {
            Some(entry) if entry.timestamp() < now => self.entries.pop_front(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub type ZombieQueue = TimedQueue<ZombieEntry>;
pub type QuarantineQueue = TimedQueue<QuarantineEntry>;
