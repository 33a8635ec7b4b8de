//! Node configuration.

use std::time::Duration;

use maexle_engine::Penalties;

/// Which election strategy the lobby runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElectionStrategy {
    /// Highest id in the closed discovery snapshot wins. No messages.
    #[default]
    Deterministic,
    /// Chang-Roberts candidacy circulation over the ring order.
    Ring,
}

/// Configuration for a Maexle node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Shared group secret: derives the group tag and keys commitments.
    pub secret: String,

    /// UDP broadcast port (discovery, election, heartbeats, chatter).
    pub broadcast_port: u16,

    /// TCP port for the inbound ring link.
    pub ring_port: u16,

    /// How long to advertise before the membership snapshot closes.
    pub discovery_window: Duration,

    /// Heartbeat emission interval while a game runs.
    pub heartbeat_interval: Duration,

    /// Silence after which a peer becomes a dead candidate.
    pub heartbeat_timeout: Duration,

    /// Total-isolation grace before the node terminates itself.
    pub isolation_grace: Duration,

    /// Strikes at which a player is eliminated.
    pub max_strikes: u8,

    /// Strike costs per round outcome.
    pub penalties: Penalties,

    /// Reliable-broadcast retransmission buffer depth.
    pub history_size: usize,

    /// Force a dropout's strikes to the maximum (any disconnect is a
    /// loss). Off leaves the last known score pending a future rejoin.
    pub strike_out_dropouts: bool,

    /// Lobby election strategy.
    pub election: ElectionStrategy,

    /// Ring-link connect timeout per attempt.
    pub connect_timeout: Duration,

    /// Ring-link ack timeout per token handoff.
    pub ack_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            secret: "maexle".to_string(),
            broadcast_port: 50000,
            ring_port: 50001,
            discovery_window: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
            isolation_grace: Duration::from_secs(15),
            max_strikes: 3,
            penalties: Penalties::default(),
            history_size: 50,
            strike_out_dropouts: true,
            election: ElectionStrategy::Deterministic,
            connect_timeout: Duration::from_secs(3),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secret =
            std::env::var("MAEXLE_SECRET").unwrap_or_else(|_| defaults.secret.clone());

        let broadcast_port = std::env::var("MAEXLE_BROADCAST_PORT")
            .map(|s| s.parse().expect("Invalid MAEXLE_BROADCAST_PORT"))
            .unwrap_or(defaults.broadcast_port);

        let ring_port = std::env::var("MAEXLE_RING_PORT")
            .map(|s| s.parse().expect("Invalid MAEXLE_RING_PORT"))
            .unwrap_or(defaults.ring_port);

        let discovery_window = std::env::var("MAEXLE_DISCOVERY_SECS")
            .map(|s| Duration::from_secs(s.parse().expect("Invalid MAEXLE_DISCOVERY_SECS")))
            .unwrap_or(defaults.discovery_window);

        let max_strikes = std::env::var("MAEXLE_MAX_STRIKES")
            .map(|s| s.parse().expect("Invalid MAEXLE_MAX_STRIKES"))
            .unwrap_or(defaults.max_strikes);

        let strike_out_dropouts = std::env::var("MAEXLE_STRIKE_OUT_DROPOUTS")
            .map(|s| s != "0" && !s.eq_ignore_ascii_case("false"))
            .unwrap_or(defaults.strike_out_dropouts);

        let election = match std::env::var("MAEXLE_ELECTION").as_deref() {
            Ok("ring") => ElectionStrategy::Ring,
            _ => ElectionStrategy::Deterministic,
        };

        Self {
            secret,
            broadcast_port,
            ring_port,
            discovery_window,
            max_strikes,
            strike_out_dropouts,
            election,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = NodeConfig::default();
        assert!(cfg.heartbeat_timeout > cfg.heartbeat_interval);
        assert!(cfg.isolation_grace > cfg.heartbeat_timeout);
        assert!(cfg.max_strikes > 0);
        assert_eq!(cfg.election, ElectionStrategy::Deterministic);
    }
}
