//! The round/turn state machine.
//!
//! One authoritative [`RoundMachine`] per node, driven exclusively by the
//! event queue - no other worker mutates round state. The machine is
//! pure with respect to the network: every handler returns the
//! [`Effect`]s the driver must carry out, which keeps the whole protocol
//! exercisable in tests without a socket in sight.
//!
//! # Round-id fencing
//!
//! Every state-bearing input (token, decision, announce, round-over)
//! carries the round it belongs to. A mismatch against the local
//! `round_id` means the input predates a crash-recovery bump or a
//! concluded round; it is rejected without touching state. This is what
//! makes cross-sender reordering harmless.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use maexle_engine::{GameEngine, Outcome, Penalties};
use maexle_membership::PeerId;
use maexle_ring::next_starter;
use maexle_wire::{Message, Token};
use tracing::{debug, info, warn};

use crate::presenter::{GameReport, Presenter, ScoreRow};

/// Read-only snapshot for workers outside the driver: the heartbeat
/// emitter and the ring-link acceptor.
#[derive(Debug, Clone, Default)]
pub struct GameView {
    pub round_id: u64,
    pub alive: Vec<PeerId>,
    pub scores: HashMap<PeerId, u8>,
    pub game_running: bool,
    pub spectator: bool,
}

/// Whether this node owes the table a move.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    /// No pending decision.
    Idle,
    /// We hold the turn: a hidden roll exists, a claim is owed.
    AwaitingAnnouncement {
        first_round: bool,
        minimum: Option<Outcome>,
        hidden: Outcome,
    },
    /// An incoming claim awaits trust-or-challenge.
    AwaitingDecision { token: Token },
}

/// Side effects the driver must perform after a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Reliable (sequenced) broadcast.
    Broadcast(Message),
    /// Hand the token to the ring successor (with ack, retry, repair).
    SendToken(Token),
    /// Recompute the successor and reconnect the ring link if it moved.
    RepairRing,
    /// Tear down the outbound ring link (we left the ring).
    CloseRing,
    /// Re-enter `AwaitingAnnouncement` after a short breather.
    ScheduleTurn {
        first_round: bool,
        minimum: Option<Outcome>,
    },
    /// Drop stale queued events from a now-dead round.
    FlushEvents,
    /// The game ended; `None` means nobody was left to win.
    GameOver { winner: Option<PeerId> },
}

/// The per-node replica of game progress.
pub struct RoundMachine {
    self_id: PeerId,
    engine: Arc<dyn GameEngine>,
    presenter: Arc<dyn Presenter>,
    penalties: Penalties,
    max_strikes: u8,
    strike_out_dropouts: bool,

    /// Seating order fixed at game start; dropouts keep their seat so
    /// every node computes successors over the same list.
    seating: Vec<PeerId>,
    alive: HashSet<PeerId>,
    scores: HashMap<PeerId, u8>,
    round_id: u64,
    active: Option<PeerId>,
    turn: TurnState,
    turns_this_round: u32,
    spectator: bool,
    game_over: bool,
}

impl RoundMachine {
    /// Create an idle machine (pre-game).
    pub fn new(
        self_id: PeerId,
        engine: Arc<dyn GameEngine>,
        presenter: Arc<dyn Presenter>,
        penalties: Penalties,
        max_strikes: u8,
        strike_out_dropouts: bool,
    ) -> Self {
        Self {
            self_id,
            engine,
            presenter,
            penalties,
            max_strikes,
            strike_out_dropouts,
            seating: Vec::new(),
            alive: HashSet::new(),
            scores: HashMap::new(),
            round_id: 1,
            active: None,
            turn: TurnState::Idle,
            turns_this_round: 0,
            spectator: false,
            game_over: false,
        }
    }

    /// Create a machine that only observes (joined a running game, or
    /// eliminated elsewhere).
    pub fn spectator(
        self_id: PeerId,
        engine: Arc<dyn GameEngine>,
        presenter: Arc<dyn Presenter>,
        penalties: Penalties,
        max_strikes: u8,
        strike_out_dropouts: bool,
    ) -> Self {
        let mut machine = Self::new(
            self_id,
            engine,
            presenter,
            penalties,
            max_strikes,
            strike_out_dropouts,
        );
        machine.spectator = true;
        machine.presenter.report(GameReport::Spectating);
        machine
    }

    // --- accessors -------------------------------------------------------

    pub fn round_id(&self) -> u64 {
        self.round_id
    }

    pub fn is_spectator(&self) -> bool {
        self.spectator
    }

    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    pub fn alive_count(&self) -> usize {
        self.alive.len()
    }

    /// Whose move the table is waiting on, as far as this node knows.
    pub fn active_player(&self) -> Option<PeerId> {
        self.active
    }

    pub fn turn(&self) -> &TurnState {
        &self.turn
    }

    /// The ring successor this node should link to right now.
    pub fn successor(&self) -> Option<PeerId> {
        if self.spectator || self.game_over {
            return None;
        }
        maexle_ring::successor_of(&self.seating, &self.self_id, &self.alive)
    }

    /// Snapshot for the heartbeat emitter and the link acceptor.
    pub fn view(&self) -> GameView {
        GameView {
            round_id: self.round_id,
            alive: self
                .seating
                .iter()
                .filter(|id| self.alive.contains(*id))
                .copied()
                .collect(),
            scores: self.scores.clone(),
            game_running: !self.seating.is_empty() && !self.game_over,
            spectator: self.spectator,
        }
    }

    // --- lifecycle -------------------------------------------------------

    /// Install the seating fixed by the leader and open round 1.
    pub fn start_game(
        &mut self,
        players: Vec<PeerId>,
        max_strikes: u8,
        starting: PeerId,
    ) -> Vec<Effect> {
        self.max_strikes = max_strikes;
        self.alive = players.iter().copied().collect();
        self.scores = players.iter().map(|id| (*id, 0)).collect();
        self.seating = players;
        self.active = Some(starting);
        self.round_id = 1;
        self.turns_this_round = 0;
        self.turn = TurnState::Idle;

        info!(starting = %starting, players = self.seating.len(), "game started");
        self.presenter.report(GameReport::GameStarted {
            players: self.seating.clone(),
            starting,
            max_strikes,
        });
        self.report_scoreboard();

        let mut effects = vec![Effect::RepairRing];
        if starting == self.self_id && !self.spectator {
            effects.push(Effect::ScheduleTurn {
                first_round: true,
                minimum: None,
            });
        }
        effects
    }

    // --- taking a turn ---------------------------------------------------

    /// Roll and ask the presenter for a claim.
    pub fn start_turn(&mut self, first_round: bool, minimum: Option<Outcome>) -> Vec<Effect> {
        if self.spectator || self.game_over {
            return Vec::new();
        }

        let hidden = self.engine.roll();
        self.active = Some(self.self_id);
        self.turn = TurnState::AwaitingAnnouncement {
            first_round,
            minimum,
            hidden,
        };
        debug!(%hidden, ?minimum, "turn started");
        self.presenter.report(GameReport::YourTurn {
            hidden,
            minimum,
            first_round,
        });
        Vec::new()
    }

    /// The presenter picked a claim value.
    pub fn announcement(&mut self, value: u8) -> Vec<Effect> {
        let (minimum, hidden) = match &self.turn {
            TurnState::AwaitingAnnouncement {
                minimum, hidden, ..
            } => (*minimum, *hidden),
            _ => {
                debug!(value, "announcement outside a turn, ignored");
                return Vec::new();
            }
        };

        let claim = match self.engine.validate_claim(value, minimum) {
            Ok(claim) => claim,
            Err(error) => {
                // Prompt stands; the presenter gets the reason and the
                // original question again.
                self.presenter.report(GameReport::ClaimRejected { error });
                if let TurnState::AwaitingAnnouncement {
                    first_round,
                    minimum,
                    hidden,
                } = &self.turn
                {
                    self.presenter.report(GameReport::YourTurn {
                        hidden: *hidden,
                        minimum: *minimum,
                        first_round: *first_round,
                    });
                }
                return Vec::new();
            }
        };

        self.turn = TurnState::Idle;
        self.turns_this_round += 1;

        let token = Token {
            round_id: self.round_id,
            announced: claim,
            commitment: self.engine.seal(hidden, claim),
            sender: self.self_id,
            turn_count: self.turns_this_round,
        };

        info!(%claim, round = self.round_id, "claim announced");
        vec![
            Effect::Broadcast(Message::Announce {
                value: claim,
                round_id: self.round_id,
            }),
            Effect::SendToken(token),
        ]
    }

    // --- receiving the token --------------------------------------------

    /// The ring listener accepted a token for us.
    pub fn token(&mut self, token: Token) -> Vec<Effect> {
        if self.spectator || self.game_over {
            return Vec::new();
        }
        // The link already validated; revalidate because state may have
        // moved while the event sat in the queue.
        if token.sender == self.self_id {
            warn!("loopback token ignored");
            return Vec::new();
        }
        if token.round_id != self.round_id {
            debug!(
                token_round = token.round_id,
                local_round = self.round_id,
                "stale token rejected"
            );
            return Vec::new();
        }
        if !self.alive.contains(&token.sender) {
            debug!(sender = %token.sender, "token from dead sender rejected");
            return Vec::new();
        }

        self.active = Some(self.self_id);
        self.presenter.report(GameReport::DecisionNeeded {
            sender: token.sender,
            claim: token.announced,
            round_id: token.round_id,
        });
        self.turn = TurnState::AwaitingDecision { token };
        Vec::new()
    }

    /// The presenter decided: trust or challenge.
    pub fn decision(&mut self, challenge: bool, round_id: u64) -> Vec<Effect> {
        let token = match &self.turn {
            TurnState::AwaitingDecision { token } if token.round_id == round_id => token.clone(),
            TurnState::AwaitingDecision { .. } => {
                debug!(round_id, "decision for a different round, ignored");
                return Vec::new();
            }
            _ => {
                debug!("decision without a pending claim, ignored");
                return Vec::new();
            }
        };

        // Re-check before resolving: the sender may have died or the
        // round may have been voided while the human was thinking.
        if round_id != self.round_id {
            self.turn = TurnState::Idle;
            self.presenter.report(GameReport::TurnVoided {
                reason: "round moved on while deciding".to_string(),
            });
            return Vec::new();
        }
        if !self.alive.contains(&token.sender) {
            self.turn = TurnState::Idle;
            self.presenter.report(GameReport::TurnVoided {
                reason: format!("{} left while deciding", token.sender),
            });
            return Vec::new();
        }

        self.turn = TurnState::Idle;

        if !challenge && !token.announced.is_maexchen() {
            // Trust: the claim stands as the new minimum and the turn is
            // ours to continue.
            self.turns_this_round = token.turn_count;
            return self.start_turn(false, Some(token.announced));
        }

        let real = token.commitment.hidden;
        let sealed_ok = self.engine.verify(&token.commitment);
        let points = if token.announced.is_maexchen() {
            self.penalties.maexchen
        } else {
            self.penalties.normal
        };

        let (loser, points) = if !challenge {
            // Yielding to Mäxchen: no reveal argument, the yielder pays
            // the normal price.
            (self.self_id, self.penalties.normal)
        } else if !sealed_ok {
            // Tampered commitment: the announcer is the liar no matter
            // what the revealed value says.
            warn!(sender = %token.sender, "commitment failed verification");
            (token.sender, points)
        } else if real == token.announced {
            // Truthful claim; the challenge failed.
            (self.self_id, points)
        } else {
            (token.sender, points)
        };

        let round_over = Message::RoundOver {
            loser,
            real_value: real,
            points,
            round_id: self.round_id,
        };

        let mut effects = vec![Effect::Broadcast(round_over)];
        effects.extend(self.apply_round_over(loser, real, points));
        effects
    }

    // --- broadcast inputs ------------------------------------------------

    /// Another player's public claim.
    pub fn announce_broadcast(&mut self, sender: PeerId, value: Outcome, round_id: u64) {
        if round_id != self.round_id || !self.alive.contains(&sender) {
            return;
        }
        self.active = Some(sender);
        if sender != self.self_id {
            self.presenter
                .report(GameReport::Announced { sender, value });
        }
    }

    /// A round resolution from the deciding node.
    pub fn round_over(
        &mut self,
        loser: PeerId,
        real_value: Outcome,
        points: u8,
        round_id: u64,
    ) -> Vec<Effect> {
        if round_id != self.round_id {
            debug!(
                msg_round = round_id,
                local_round = self.round_id,
                "stale round-over rejected"
            );
            return Vec::new();
        }
        self.apply_round_over(loser, real_value, points)
    }

    fn apply_round_over(&mut self, loser: PeerId, real_value: Outcome, points: u8) -> Vec<Effect> {
        self.turn = TurnState::Idle;
        *self.scores.entry(loser).or_insert(0) += points;
        self.round_id += 1;
        self.turns_this_round = 0;

        self.presenter.report(GameReport::RoundResult {
            loser,
            real_value,
            points,
        });

        let mut effects = Vec::new();

        if self.scores.get(&loser).copied().unwrap_or(0) >= self.max_strikes {
            self.alive.remove(&loser);
            info!(player = %loser, "eliminated");
            self.presenter.report(GameReport::PlayerEliminated {
                player: loser,
                is_self: loser == self.self_id,
            });

            if loser == self.self_id {
                // Out of the game: keep watching, leave the ring.
                self.spectator = true;
                effects.push(Effect::CloseRing);
                self.presenter.report(GameReport::Spectating);
            } else {
                // Idempotent even when the eliminated seat was not our
                // successor.
                effects.push(Effect::RepairRing);
            }
        }

        self.report_scoreboard();

        if let Some(end) = self.check_win() {
            effects.push(end);
            return effects;
        }

        // Loser opens the next round; if the loser is out, the next
        // alive seat after it does.
        let starter = match next_starter(&self.seating, &loser, &self.alive) {
            Some(starter) => starter,
            None => return effects,
        };
        self.active = Some(starter);

        if starter == self.self_id && !self.spectator {
            effects.push(Effect::ScheduleTurn {
                first_round: true,
                minimum: None,
            });
        } else {
            self.presenter
                .report(GameReport::WaitingFor { player: starter });
        }
        effects
    }

    /// A peer was declared gone (timeout or crash). Idempotent: the
    /// PlayerLeft broadcast is repeated for delivery confidence and may
    /// also race the local detection.
    pub fn player_left(&mut self, dropout: PeerId) -> Vec<Effect> {
        if !self.seating.contains(&dropout) || !self.alive.contains(&dropout) {
            return Vec::new();
        }

        self.alive.remove(&dropout);
        if self.strike_out_dropouts {
            self.scores.insert(dropout, self.max_strikes);
        }

        // A crash voids the round in flight: everyone bumps so the
        // future is agreed on and any wandering token dies on arrival.
        self.round_id += 1;
        self.turns_this_round = 0;

        info!(player = %dropout, round = self.round_id, "player left, round voided");
        self.presenter
            .report(GameReport::PlayerDropped { dropout });

        let mut effects = vec![Effect::RepairRing];

        // A pending prompt about the departed peer is moot.
        if let TurnState::AwaitingDecision { token } = &self.turn {
            if token.sender == dropout || token.round_id != self.round_id {
                self.turn = TurnState::Idle;
                self.presenter.report(GameReport::TurnVoided {
                    reason: format!("{dropout} disconnected"),
                });
            }
        }

        self.report_scoreboard();

        if let Some(end) = self.check_win() {
            effects.push(end);
            return effects;
        }

        // The seat after the dropout restarts the round.
        let starter = match next_starter(&self.seating, &dropout, &self.alive) {
            Some(starter) => starter,
            None => return effects,
        };
        self.active = Some(starter);

        if starter == self.self_id && !self.spectator {
            effects.push(Effect::FlushEvents);
            effects.push(Effect::ScheduleTurn {
                first_round: true,
                minimum: None,
            });
        } else {
            self.presenter
                .report(GameReport::WaitingFor { player: starter });
        }
        effects
    }

    /// Sync from a heartbeat: spectators and late joiners adopt the
    /// network's view; players only merge strike counts upward.
    pub fn heartbeat(
        &mut self,
        round_id: u64,
        alive_players: &[PeerId],
        scores: &HashMap<PeerId, u8>,
    ) {
        for (player, &strikes) in scores {
            let known = self.scores.entry(*player).or_insert(0);
            if self.spectator || strikes > *known {
                *known = strikes;
            }
        }

        if self.spectator || self.seating.is_empty() {
            if round_id > self.round_id {
                self.round_id = round_id;
            }
            self.alive = alive_players.iter().copied().collect();
            if self.seating.is_empty() {
                self.seating = alive_players.to_vec();
            }
        }
    }

    fn check_win(&mut self) -> Option<Effect> {
        if self.alive.len() > 1 {
            return None;
        }
        self.game_over = true;
        let winner = self.alive.iter().next().copied();
        if let Some(winner) = winner {
            info!(%winner, "game over");
            self.presenter.report(GameReport::Winner {
                winner,
                is_self: winner == self.self_id,
            });
        }
        Some(Effect::GameOver { winner })
    }

    fn report_scoreboard(&self) {
        let rows = self
            .seating
            .iter()
            .map(|id| ScoreRow {
                player: *id,
                strikes: self.scores.get(id).copied().unwrap_or(0),
                max_strikes: self.max_strikes,
                alive: self.alive.contains(id),
            })
            .collect();
        self.presenter.report(GameReport::Scoreboard { rows });
    }
}
