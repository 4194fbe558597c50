//! Tracking of inbound multi-part exchanges.

use super::header::MessageHeader;
use crate::types::MessageId;
use std::collections::HashMap;

/// Progress of one correlated exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartProgress {
    /// More parts are expected.
    Continuing { parts: usize },
    /// The final part arrived.
    Complete { parts: usize },
}

/// Counts parts per correlation id until the final part arrives.
#[derive(Debug, Default)]
pub struct MultiPartTracker {
    open: HashMap<MessageId, usize>,
}

impl MultiPartTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an inbound message. Messages that start an exchange or are not
    /// flagged multi-part complete immediately.
    pub fn observe(&mut self, header: &MessageHeader) -> PartProgress {
        if header.correlation_id.is_none() || !header.is_multi_part() {
            let parts = self.open.remove(&header.correlation_id).map_or(1, |p| p + 1);
            return PartProgress::Complete { parts };
        }

        let parts = self.open.entry(header.correlation_id).or_insert(0);
        *parts += 1;
        let count = *parts;

        if header.is_final_part() {
            self.open.remove(&header.correlation_id);
            PartProgress::Complete { parts: count }
        } else {
            PartProgress::Continuing { parts: count }
        }
    }

    /// Number of exchanges still waiting for a final part.
    pub fn open_exchanges(&self) -> usize {
        self.open.len()
    }

    pub fn clear(&mut self) {
        self.open.clear();
    }
}
