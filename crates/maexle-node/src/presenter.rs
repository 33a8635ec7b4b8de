//! Presentation hooks.
//!
//! The core never talks to a terminal. It reports through [`Presenter`]
//! and receives the player's choices back as events; prompts are reports
//! the presentation layer is expected to answer eventually
//! ([`GameReport::YourTurn`], [`GameReport::DecisionNeeded`]).

use maexle_engine::{ClaimError, Outcome};
use maexle_membership::PeerId;

/// One scoreboard row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreRow {
    pub player: PeerId,
    pub strikes: u8,
    pub max_strikes: u8,
    pub alive: bool,
}

/// Everything the core wants a human (or a bot) to see or answer.
#[derive(Debug, Clone, PartialEq)]
pub enum GameReport {
    /// Lobby status: who currently leads, whether that is us.
    Lobby {
        leader: Option<PeerId>,
        is_self: bool,
        peers: usize,
    },

    /// The seating is fixed and the game is on.
    GameStarted {
        players: Vec<PeerId>,
        starting: PeerId,
        max_strikes: u8,
    },

    /// Prompt: roll is done, pick a claim strictly above `minimum`.
    YourTurn {
        hidden: Outcome,
        minimum: Option<Outcome>,
        first_round: bool,
    },

    /// The chosen claim was illegal; the prompt stands.
    ClaimRejected { error: ClaimError },

    /// Prompt: trust or challenge the incoming claim.
    DecisionNeeded {
        sender: PeerId,
        claim: Outcome,
        round_id: u64,
    },

    /// Another player announced publicly.
    Announced { sender: PeerId, value: Outcome },

    /// A pending decision became moot (sender died, round moved on).
    TurnVoided { reason: String },

    /// A round resolved.
    RoundResult {
        loser: PeerId,
        real_value: Outcome,
        points: u8,
    },

    /// Current standings.
    Scoreboard { rows: Vec<ScoreRow> },

    /// A peer disconnected or timed out.
    PlayerDropped { dropout: PeerId },

    /// A player reached max strikes.
    PlayerEliminated { player: PeerId, is_self: bool },

    /// Waiting for another player to open the next round.
    WaitingFor { player: PeerId },

    /// The game ended with a winner.
    Winner { winner: PeerId, is_self: bool },

    /// This node is watching, not playing.
    Spectating,
}

/// The presentation seam.
pub trait Presenter: Send + Sync {
    /// Deliver one report. Must not block the caller.
    fn report(&self, report: GameReport);
}

/// Presenter that drops everything; used by tests.
#[derive(Debug, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn report(&self, _report: GameReport) {}
}
