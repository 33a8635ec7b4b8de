//! Maexle node - a peer-to-peer bluffing-dice player.
//!
//! One process per player on a shared LAN. Nodes find each other over
//! UDP broadcast, elect a lobby leader, seat themselves into a logical
//! ring, and pass a sealed turn token around it over TCP while
//! heartbeat-based failure detection and round-id fencing keep every
//! replica of the game state consistent through crashes and reordered
//! delivery.
//!
//! # Architecture
//!
//! - **Config**: env-var configuration ([`NodeConfig`])
//! - **Broadcast**: the shared UDP channel plus reliable sequencing
//! - **Link**: the single outbound ring connection
//! - **Liveness**: heartbeat emission and failure detection
//! - **Round**: the event-driven round/turn state machine
//! - **Node**: lifecycle orchestration (discovery → lobby → game)
//! - **Presenter/Terminal**: the human seam
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use maexle_engine::DiceEngine;
//! use maexle_node::{Node, NodeConfig, TerminalPresenter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = NodeConfig::from_env();
//!     let engine = Arc::new(DiceEngine::new(config.secret.clone()));
//!     let presenter = TerminalPresenter::new();
//!     let node = Node::new(config, engine, presenter.clone());
//!     presenter.spawn_stdin(node.events());
//!     node.run().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod event;
pub mod link;
pub mod liveness;
pub mod node;
pub mod presenter;
pub mod round;
pub mod terminal;

pub use config::{ElectionStrategy, NodeConfig};
pub use error::{Error, Result};
pub use event::{EventSender, NodeEvent};
pub use node::{GameEnd, Node};
pub use presenter::{GameReport, Presenter, ScoreRow};
pub use round::{Effect, GameView, RoundMachine, TurnState};
pub use terminal::TerminalPresenter;
