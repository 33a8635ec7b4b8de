//! Message types for both channels.

use std::collections::HashMap;
use std::net::SocketAddr;

use maexle_engine::{Commitment, Outcome};
use maexle_membership::PeerId;
use serde::{Deserialize, Serialize};

/// Broadcast payloads, discriminated by `type` on the wire.
///
/// Unknown types deserialize to an error at the dispatch point and are
/// dropped there as a no-op, never a fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Discovery advertisement. `known_peers` gossips second-hand ids so
    /// a late listener converges without hearing everyone directly.
    Hello { known_peers: Vec<PeerId> },

    /// Liveness beacon while a game runs; doubles as the sync source for
    /// spectators and late joiners.
    Heartbeat {
        round_id: u64,
        alive_players: Vec<PeerId>,
        scores: HashMap<PeerId, u8>,
    },

    /// Chang-Roberts candidacy circulating the ring.
    Election { candidate_id: PeerId },

    /// Election result, circulated once to install the leader.
    Coordinator { leader_id: PeerId },

    /// The leader fixes the seating order and starts the game.
    GameStart {
        players: Vec<PeerId>,
        max_strikes: u8,
        starting_player: PeerId,
    },

    /// A player's public claim for the current round.
    Announce { value: Outcome, round_id: u64 },

    /// Round resolution: who lost, what was really rolled, the strike
    /// cost.
    RoundOver {
        loser: PeerId,
        real_value: Outcome,
        points: u8,
        round_id: u64,
    },

    /// A peer was declared dead (crash or timeout).
    PlayerLeft { dropout: PeerId },

    /// Retransmission request for one missing sequence number.
    Nack { req_seq: u64, target: PeerId },
}

impl Message {
    /// Whether this payload travels with a sequence number. Heartbeats,
    /// discovery chatter and NACKs tolerate staleness; everything that
    /// mutates game state does not.
    pub fn is_reliable(&self) -> bool {
        !matches!(
            self,
            Message::Hello { .. }
                | Message::Heartbeat { .. }
                | Message::Nack { .. }
                | Message::PlayerLeft { .. }
        )
    }
}

/// One broadcast datagram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Group tag; mismatches are invisible.
    pub group: String,
    /// Originating peer.
    pub sender: PeerId,
    /// The sender's ring-link listener, when it has one to advertise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<SocketAddr>,
    /// Per-sender sequence number; `None` for the unreliable class.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(flatten)]
    pub payload: Message,
}

impl Envelope {
    /// Encode for the wire.
    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Decode a received datagram.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// The claim-bearing token passed around the ring.
///
/// Ownership transfers fully on receipt; exactly one token is live per
/// round, and a `round_id` mismatch at the receiver invalidates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub round_id: u64,
    pub announced: Outcome,
    pub commitment: Commitment,
    pub sender: PeerId,
    /// How many hands this round's token has passed through.
    #[serde(default)]
    pub turn_count: u32,
}

/// Ack verdict on the ring link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckStatus {
    Ok,
    Rejected,
}

/// Ring-link frames: one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LinkFrame {
    /// The turn token, handed to the successor.
    Token(Token),
    /// Synchronous response; the sender does not proceed without it.
    Ack {
        status: AckStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl LinkFrame {
    /// Encode as one newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one received line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim_end())
    }

    /// A positive ack.
    pub fn ack() -> Self {
        LinkFrame::Ack {
            status: AckStatus::Ok,
            reason: None,
        }
    }

    /// A structured rejection.
    pub fn reject(reason: impl Into<String>) -> Self {
        LinkFrame::Ack {
            status: AckStatus::Rejected,
            reason: Some(reason.into()),
        }
    }
}
