//! Maexle node binary.
//!
//! A peer-to-peer bluffing-dice node for the local network.

use std::sync::Arc;

use maexle_engine::DiceEngine;
use maexle_node::{GameEnd, Node, NodeConfig, TerminalPresenter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maexle_node=info,maexle=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = NodeConfig::from_env();
    tracing::info!("Starting Maexle node");

    let engine = Arc::new(DiceEngine::new(config.secret.clone()));
    let presenter = TerminalPresenter::new();

    let node = Node::new(config, engine, presenter.clone());
    presenter.spawn_stdin(node.events());

    match node.run().await {
        Ok(GameEnd::Winner(winner)) => {
            tracing::info!(%winner, "game finished");
            Ok(())
        }
        Ok(GameEnd::Abandoned) => {
            tracing::info!("table emptied, shutting down");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "node terminated");
            Err(e.into())
        }
    }
}
