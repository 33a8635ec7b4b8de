//! Wire messages and reliable delivery for the Maexle ring.
//!
//! Two channels, two framings:
//! - the shared **broadcast channel** carries [`Envelope`]s - one JSON
//!   object per datagram, tagged by message `type`, stamped with a group
//!   tag and (for the reliable class) a per-sender sequence number;
//! - the point-to-point **ring link** carries [`LinkFrame`]s - one JSON
//!   object per line, a token down, an ack straight back.
//!
//! The [`Sequencer`] turns the unreliable broadcast into per-sender
//! ordered delivery: gaps are held back and NACKed, duplicates dropped,
//! and a [`SendHistory`] on the sending side answers retransmission
//! requests from a bounded buffer. Best effort only - a sender that dies
//! with open gaps leaves a hole, which round-id fencing upstream renders
//! harmless.

mod message;
mod sequencer;

pub use message::{AckStatus, Envelope, LinkFrame, Message, Token};
pub use sequencer::{Delivery, SendHistory, Sequencer};

/// Group tag derived from the shared secret.
///
/// Envelopes carrying a different tag are invisible: namespace isolation
/// between games on the same LAN, not a security boundary.
pub fn group_tag(secret: &str) -> String {
    hex::encode(blake3::hash(secret.as_bytes()).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_tag_is_stable_and_distinct() {
        assert_eq!(group_tag("tavern"), group_tag("tavern"));
        assert_ne!(group_tag("tavern"), group_tag("cellar"));
        assert_eq!(group_tag("tavern").len(), 64);
    }
}
