//! Reader selection for read/write split connections.

use crate::config::ReaderPolicy;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Picks a reader position for each read call.
///
/// Round-robin state is a single atomic counter per physical connection, so
/// concurrent callers never observe a torn or doubled increment.
#[derive(Debug)]
pub struct ReaderSelector {
    policy: ReaderPolicy,
    counter: AtomicUsize,
}

impl ReaderSelector {
    pub fn new(policy: ReaderPolicy) -> Self {
        Self {
            policy,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> ReaderPolicy {
        self.policy
    }

    /// Position of the reader to use among `reader_count` readers.
    ///
    /// Returns `None` when there are no readers, meaning reads go to the writer.
    pub fn select(&self, reader_count: usize) -> Option<usize> {
        if reader_count == 0 {
            return None;
        }
        if reader_count == 1 {
            return Some(0);
        }
        let position = match self.policy {
            ReaderPolicy::Random => rand::thread_rng().gen_range(0..reader_count),
            ReaderPolicy::RoundRobin => {
                self.counter.fetch_add(1, Ordering::Relaxed) % reader_count
            }
        };
        Some(position)
    }
}
