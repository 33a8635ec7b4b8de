//! Per-sender ordered delivery over unreliable broadcast.

use std::collections::{BTreeMap, HashMap, VecDeque};

use maexle_membership::PeerId;

use crate::{Envelope, Message};

/// Outcome of accepting one sequenced message.
#[derive(Debug, Default, PartialEq)]
pub struct Delivery {
    /// Payloads now deliverable to the upper layer, in order.
    pub delivered: Vec<Message>,
    /// Sequence numbers to NACK (a newly observed gap).
    pub missing: Vec<u64>,
}

#[derive(Debug, Default)]
struct SequenceState {
    /// Highest sequence number delivered so far; sequences start at 1.
    last_delivered: u64,
    holdback: BTreeMap<u64, Message>,
}

/// Receive-side sequencing: strictly increasing, gapless, exactly-once
/// delivery per sender.
///
/// Arrivals ahead of the expected sequence are held back and the gap is
/// reported for NACKing; duplicates and past sequences are dropped.
#[derive(Debug, Default)]
pub struct Sequencer {
    senders: HashMap<PeerId, SequenceState>,
}

impl Sequencer {
    /// Create an empty sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept one sequenced message from `sender`.
    pub fn accept(&mut self, sender: PeerId, seq: u64, message: Message) -> Delivery {
        let state = self.senders.entry(sender).or_default();
        let expected = state.last_delivered + 1;
        let mut delivery = Delivery::default();

        if seq < expected {
            // Duplicate or already superseded; exactly-once means drop.
            return delivery;
        }

        if seq > expected {
            // Hold back and request everything in the newly visible gap
            // that we have not already buffered.
            for missing in expected..seq {
                if !state.holdback.contains_key(&missing) {
                    delivery.missing.push(missing);
                }
            }
            state.holdback.insert(seq, message);
            return delivery;
        }

        // In order: deliver, then drain the holdback while contiguous.
        state.last_delivered = seq;
        delivery.delivered.push(message);
        while let Some(message) = state.holdback.remove(&(state.last_delivered + 1)) {
            state.last_delivered += 1;
            delivery.delivered.push(message);
        }
        delivery
    }

    /// Drop all state for a removed sender, including held-back messages.
    pub fn forget(&mut self, sender: &PeerId) {
        self.senders.remove(sender);
    }

    /// Sequence numbers currently held back for a sender (test/debug aid).
    pub fn held_back(&self, sender: &PeerId) -> usize {
        self.senders
            .get(sender)
            .map(|s| s.holdback.len())
            .unwrap_or(0)
    }
}

/// Send-side history: stamps outgoing reliable envelopes and retains the
/// most recent ones for retransmission.
#[derive(Debug)]
pub struct SendHistory {
    next_seq: u64,
    capacity: usize,
    entries: VecDeque<Envelope>,
}

impl SendHistory {
    /// Create a history retaining at most `capacity` envelopes; the
    /// oldest entry is evicted on overflow.
    pub fn new(capacity: usize) -> Self {
        Self {
            next_seq: 0,
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Stamp an envelope with the next sequence number and retain a copy.
    pub fn stamp(&mut self, envelope: &mut Envelope) -> u64 {
        self.next_seq += 1;
        envelope.seq = Some(self.next_seq);
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope.clone());
        self.next_seq
    }

    /// Look up a retained envelope to answer a NACK.
    pub fn lookup(&self, seq: u64) -> Option<&Envelope> {
        self.entries.iter().find(|e| e.seq == Some(seq))
    }
}
