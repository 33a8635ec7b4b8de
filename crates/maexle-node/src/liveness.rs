//! Heartbeat emission and failure detection.
//!
//! Two duties on two tasks: beacon our view of the game once a second,
//! and scan every other alive player's last-seen timestamp for silence.
//! A silent peer becomes a dead candidate and is announced via a
//! repeated `PlayerLeft` broadcast *and* handled locally right away -
//! delivery of our own announcement is never waited on.
//!
//! The special case that keeps a flaky uplink from wiping out the table:
//! when EVERY other peer goes silent at once, the problem is almost
//! certainly local. The monitor then refuses to declare anyone dead and,
//! after a longer grace period of total isolation, reports the fatal
//! condition instead.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use maexle_membership::{MembershipTable, PeerId};
use maexle_wire::Message;

use crate::broadcast::BroadcastChannel;
use crate::event::{EventSender, NodeEvent};
use crate::round::GameView;

/// Spawn the heartbeat emitter.
pub fn spawn_heartbeat(
    channel: Arc<BroadcastChannel>,
    view: Arc<RwLock<GameView>>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let beat = {
                let view = view.read().await;
                if !view.game_running {
                    continue;
                }
                Message::Heartbeat {
                    round_id: view.round_id,
                    alive_players: view.alive.clone(),
                    scores: view.scores.clone(),
                }
            };
            if let Err(e) = channel.send_unreliable(beat).await {
                debug!(error = %e, "heartbeat send failed");
            }
        }
    })
}

/// Configuration for the monitor task.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// How often to scan the last-seen timestamps.
    pub scan_interval: Duration,
    /// Silence after which one peer is a dead candidate.
    pub heartbeat_timeout: Duration,
    /// Total silence after which WE are the dead one.
    pub isolation_grace: Duration,
}

/// Spawn the failure detector.
pub fn spawn_monitor(
    self_id: PeerId,
    membership: Arc<MembershipTable>,
    channel: Arc<BroadcastChannel>,
    view: Arc<RwLock<GameView>>,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
    config: MonitorConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.scan_interval);
        let mut isolated_since: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            if *shutdown.borrow() {
                break;
            }

            let (game_running, others): (bool, Vec<PeerId>) = {
                let view = view.read().await;
                (
                    view.game_running,
                    view.alive.iter().filter(|id| **id != self_id).copied().collect(),
                )
            };
            if !game_running || others.is_empty() {
                isolated_since = None;
                continue;
            }

            let now = Instant::now();
            let dead: Vec<PeerId> = others
                .iter()
                .filter(|id| {
                    membership
                        .last_seen(id)
                        // A peer we never heard from at all is given the
                        // benefit of the doubt until it shows up once.
                        .map(|seen| now.duration_since(seen) > config.heartbeat_timeout)
                        .unwrap_or(false)
                })
                .copied()
                .collect();

            if dead.len() == others.len() {
                // Everyone silent at once: suspect our own uplink, not a
                // mass die-off.
                let since = *isolated_since.get_or_insert(now);
                let silent_for = now.duration_since(since);
                warn!(?silent_for, "all peers silent - local connectivity suspect");
                if silent_for > config.isolation_grace {
                    let _ = events.send(NodeEvent::Isolated);
                    break;
                }
                continue;
            }
            isolated_since = None;

            for dropout in dead {
                info!(peer = %dropout, "heartbeat timeout, declaring dead");
                // Announce with repetition for delivery confidence, then
                // handle locally without waiting on our own broadcast.
                if let Err(e) = channel
                    .send_repeated(Message::PlayerLeft { dropout }, 3)
                    .await
                {
                    debug!(error = %e, "player-left broadcast failed");
                }
                if events.send(NodeEvent::Dropout { dropout }).is_err() {
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn id(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn channel() -> Arc<BroadcastChannel> {
        let advertised: SocketAddr = "127.0.0.1:50001".parse().unwrap();
        Arc::new(
            BroadcastChannel::bind(
                54998,
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                "group".into(),
                id(1),
                advertised,
                8,
            )
            .unwrap(),
        )
    }

    fn game_view() -> Arc<RwLock<GameView>> {
        Arc::new(RwLock::new(GameView {
            round_id: 1,
            alive: vec![id(1), id(2), id(3)],
            scores: Default::default(),
            game_running: true,
            spectator: false,
        }))
    }

    // Short real durations: last-seen timestamps are std Instants, which
    // the tokio test clock cannot fast-forward.
    #[tokio::test]
    async fn silent_peer_is_declared_dead() {
        let membership = Arc::new(MembershipTable::new());
        membership.upsert(id(2), None);
        membership.upsert(id(3), None);

        let (tx, mut rx) = event::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_monitor(
            id(1),
            membership.clone(),
            channel(),
            game_view(),
            tx,
            shutdown_rx,
            MonitorConfig {
                scan_interval: Duration::from_millis(50),
                heartbeat_timeout: Duration::from_millis(300),
                isolation_grace: Duration::from_secs(30),
            },
        );

        // Keep id(3) fresh while id(2) goes silent past the timeout.
        let toucher = tokio::spawn({
            let membership = membership.clone();
            async move {
                for _ in 0..40 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    membership.touch(&id(3));
                }
            }
        });

        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("monitor should report within the window")
            .unwrap();
        assert_eq!(event, NodeEvent::Dropout { dropout: id(2) });

        let _ = shutdown_tx.send(true);
        toucher.abort();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn total_silence_reports_isolation_not_mass_death() {
        let membership = Arc::new(MembershipTable::new());
        membership.upsert(id(2), None);
        membership.upsert(id(3), None);

        let (tx, mut rx) = event::channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_monitor(
            id(1),
            membership,
            channel(),
            game_view(),
            tx,
            shutdown_rx,
            MonitorConfig {
                scan_interval: Duration::from_millis(50),
                heartbeat_timeout: Duration::from_millis(200),
                isolation_grace: Duration::from_millis(500),
            },
        );

        // Nobody is ever touched again: both peers go silent together.
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .expect("monitor should conclude isolation")
            .unwrap();

        // No dropouts along the way, straight to isolation.
        assert_eq!(event, NodeEvent::Isolated);
        let _ = handle.await;
    }
}
