//! Terminal presentation layer.
//!
//! Everything human-facing lives here: rendering reports and turning
//! typed lines into events. What a line *means* depends on the last
//! prompt the core issued, so the presenter tracks that and nothing
//! else - game state stays in the core.

use std::sync::{Arc, Mutex};

use maexle_engine::Outcome;
use tracing::debug;

use crate::event::{EventSender, NodeEvent};
use crate::presenter::{GameReport, Presenter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prompt {
    /// Nothing expected; ENTER starts the game when we lead the lobby.
    Lobby,
    /// A two-digit claim is expected.
    Announcement,
    /// y (trust) / n (challenge) for the given round.
    Decision { round_id: u64 },
    /// Game over or spectating: input is ignored.
    None,
}

/// Presenter that prints to stdout and reads choices from stdin.
pub struct TerminalPresenter {
    prompt: Mutex<Prompt>,
}

impl TerminalPresenter {
    /// Create the presenter.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prompt: Mutex::new(Prompt::Lobby),
        })
    }

    /// Spawn the stdin reader thread feeding `events`.
    ///
    /// A plain thread rather than a task: blocking stdin reads have no
    /// place on the runtime, and the thread dies with the process.
    pub fn spawn_stdin(self: &Arc<Self>, events: EventSender) {
        let presenter = Arc::clone(self);
        std::thread::spawn(move || {
            let stdin = std::io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                if std::io::BufRead::read_line(&mut stdin.lock(), &mut line).is_err() {
                    break;
                }
                if presenter.handle_line(line.trim(), &events).is_err() {
                    break;
                }
            }
        });
    }

    fn handle_line(&self, line: &str, events: &EventSender) -> Result<(), ()> {
        let prompt = *self.prompt.lock().unwrap();
        let event = match prompt {
            Prompt::Lobby if line.is_empty() => NodeEvent::StartGame,
            Prompt::Announcement => match line.parse::<u8>() {
                Ok(value) => NodeEvent::Announcement { value },
                Err(_) => {
                    println!("   [!] enter a two-digit claim (e.g. 31, 42, 66, 21)");
                    return Ok(());
                }
            },
            Prompt::Decision { round_id } => match line {
                "y" | "Y" => NodeEvent::Decision {
                    challenge: false,
                    round_id,
                },
                "n" | "N" => NodeEvent::Decision {
                    challenge: true,
                    round_id,
                },
                _ => {
                    println!("   [!] y = trust, n = challenge");
                    return Ok(());
                }
            },
            _ => {
                debug!(line, "input outside a prompt, ignored");
                return Ok(());
            }
        };
        events.send(event).map_err(|_| ())
    }

    fn set_prompt(&self, prompt: Prompt) {
        *self.prompt.lock().unwrap() = prompt;
    }

    fn fmt_minimum(minimum: Option<Outcome>) -> String {
        match minimum {
            Some(min) => format!("> {min}"),
            None => "anything".to_string(),
        }
    }
}

impl Presenter for TerminalPresenter {
    fn report(&self, report: GameReport) {
        match report {
            GameReport::Lobby {
                leader,
                is_self,
                peers,
            } => {
                if is_self {
                    println!("[lobby] {peers} peer(s) found - YOU lead. Press ENTER to start.");
                    self.set_prompt(Prompt::Lobby);
                } else {
                    match leader {
                        Some(leader) => {
                            println!("[lobby] {peers} peer(s) found - waiting for leader {leader}")
                        }
                        None => println!("[lobby] {peers} peer(s) found - electing..."),
                    }
                    self.set_prompt(Prompt::None);
                }
            }
            GameReport::GameStarted {
                players,
                starting,
                max_strikes,
            } => {
                println!("\n{}", "*".repeat(40));
                println!(
                    "  GAME START - {} players, {} strikes to lose",
                    players.len(),
                    max_strikes
                );
                println!("  first up: {starting}");
                println!("{}", "*".repeat(40));
                self.set_prompt(Prompt::None);
            }
            GameReport::YourTurn {
                hidden, minimum, ..
            } => {
                println!("\n--- YOUR TURN ---");
                println!("   [hidden roll] {hidden}");
                println!(">> announce ({}):", Self::fmt_minimum(minimum));
                self.set_prompt(Prompt::Announcement);
            }
            GameReport::ClaimRejected { error } => {
                println!("   [!] {error}");
            }
            GameReport::DecisionNeeded {
                sender,
                claim,
                round_id,
            } => {
                if claim.is_maexchen() {
                    println!("\n[!!!] {sender} announced MÄXCHEN ({claim})!");
                } else {
                    println!("\n[incoming] {sender} claims {claim}");
                }
                println!(">> trust (y) or challenge (n)?");
                self.set_prompt(Prompt::Decision { round_id });
            }
            GameReport::Announced { sender, value } => {
                println!(" [info] {sender} announced {value}");
            }
            GameReport::TurnVoided { reason } => {
                println!("\n[!] turn void: {reason}");
                self.set_prompt(Prompt::None);
            }
            GameReport::RoundResult {
                loser,
                real_value,
                points,
            } => {
                println!(
                    "\n[round over] real roll was {real_value} - {loser} takes {points} strike(s)"
                );
                self.set_prompt(Prompt::None);
            }
            GameReport::Scoreboard { rows } => {
                println!("\n--- SCOREBOARD ---");
                for row in rows {
                    println!(
                        " {}: {}/{} [{}]",
                        row.player,
                        row.strikes,
                        row.max_strikes,
                        if row.alive { "ALIVE" } else { "OUT" }
                    );
                }
                println!("------------------");
            }
            GameReport::PlayerDropped { dropout } => {
                println!("\n[!] {dropout} disconnected");
            }
            GameReport::PlayerEliminated { player, is_self } => {
                if is_self {
                    println!("\n[!] YOU are out.");
                } else {
                    println!("\n[!] {player} is out.");
                }
            }
            GameReport::WaitingFor { player } => {
                println!("[.] waiting for {player}...");
                self.set_prompt(Prompt::None);
            }
            GameReport::Winner { winner, is_self } => {
                if is_self {
                    println!("\n[GAME OVER] YOU WIN!");
                } else {
                    println!("\n[GAME OVER] winner: {winner}");
                }
                self.set_prompt(Prompt::None);
            }
            GameReport::Spectating => {
                println!("\n[.] spectator mode - watching the table");
                self.set_prompt(Prompt::None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use maexle_membership::PeerId;

    #[test]
    fn lines_map_to_events_by_prompt() {
        let presenter = TerminalPresenter::new();
        let (tx, mut rx) = event::channel();

        // Lobby: ENTER starts.
        presenter.handle_line("", &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), NodeEvent::StartGame);

        // Announcement prompt: digits become a claim.
        presenter.report(GameReport::YourTurn {
            hidden: Outcome::MAEXCHEN,
            minimum: None,
            first_round: true,
        });
        presenter.handle_line("55", &tx).unwrap();
        assert_eq!(rx.try_recv().unwrap(), NodeEvent::Announcement { value: 55 });

        // Garbage re-prompts without an event.
        presenter.handle_line("what", &tx).unwrap();
        assert!(rx.try_recv().is_err());

        // Decision prompt: y/n carry the fencing round id.
        presenter.report(GameReport::DecisionNeeded {
            sender: PeerId::from_bytes([2; 16]),
            claim: Outcome::MAEXCHEN,
            round_id: 7,
        });
        presenter.handle_line("n", &tx).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            NodeEvent::Decision {
                challenge: true,
                round_id: 7
            }
        );
    }

    #[test]
    fn input_outside_prompts_is_ignored() {
        let presenter = TerminalPresenter::new();
        let (tx, mut rx) = event::channel();

        presenter.report(GameReport::Spectating);
        presenter.handle_line("55", &tx).unwrap();
        presenter.handle_line("", &tx).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
