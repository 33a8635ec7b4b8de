//! The node's single ordered event queue.
//!
//! Every worker - the broadcast listener, the ring-link handlers, the
//! liveness monitor, and the presenter - feeds this queue; the driver
//! consumes it sequentially, which is the serialization point for all
//! round-state mutation.

use maexle_engine::Outcome;
use maexle_membership::PeerId;
use maexle_wire::{Message, Token};
use tokio::sync::mpsc;

/// Anything the driver reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// A delivered broadcast payload (sequenced traffic arrives here in
    /// per-sender order).
    Message { sender: PeerId, message: Message },

    /// The turn token, accepted and acked by the ring listener.
    Token(Token),

    /// It is this node's turn to roll and claim.
    StartTurn {
        first_round: bool,
        minimum: Option<Outcome>,
    },

    /// The presenter chose a claim value.
    Announcement { value: u8 },

    /// The presenter chose trust (`challenge == false`) or challenge.
    /// `round_id` fences decisions that outlived their round.
    Decision { challenge: bool, round_id: u64 },

    /// The liveness monitor declared a peer dead locally.
    Dropout { dropout: PeerId },

    /// The leader's presenter asked to start the game.
    StartGame,

    /// The liveness monitor gave up on the local uplink.
    Isolated,
}

/// Sending half of the event queue.
pub type EventSender = mpsc::UnboundedSender<NodeEvent>;

/// Receiving half, owned by the driver.
pub type EventReceiver = mpsc::UnboundedReceiver<NodeEvent>;

/// Create the queue.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
