//! Node lifecycle: discovery → election → lobby → game loop → end.
//!
//! Workers (all tokio tasks):
//! - the broadcast listener (group filter, membership upkeep, sequencing,
//!   NACK emission),
//! - the ring-link acceptor plus one handler per inbound connection,
//! - the heartbeat emitter and the liveness monitor,
//! - the driver, which consumes the single event queue and owns every
//!   round-state mutation.
//!
//! Shared state is deliberately thin: the membership table (interior
//! lock), the [`GameView`] snapshot the driver publishes for the other
//! workers, and the sequencer shared between the listener and the driver
//! (so a dead sender's holdback can be dropped).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use maexle_engine::GameEngine;
use maexle_membership::{MembershipTable, PeerId};
use maexle_ring::election::{deterministic_leader, ElectionAction, ElectionMachine, ElectionMsg};
use maexle_ring::{canonical_order, predecessor_of};
use maexle_wire::{group_tag, Envelope, LinkFrame, Message, Sequencer, Token};

use crate::broadcast::{broadcast_target, detect_local_ip, BroadcastChannel};
use crate::config::{ElectionStrategy, NodeConfig};
use crate::error::{Error, Result};
use crate::event::{self, EventReceiver, EventSender, NodeEvent};
use crate::link::{Handoff, RingLink};
use crate::liveness::{spawn_heartbeat, spawn_monitor, MonitorConfig};
use crate::presenter::{GameReport, Presenter};
use crate::round::{Effect, GameView, RoundMachine};

const UDP_BUF_SIZE: usize = 4096;

/// How a finished node left the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameEnd {
    /// Someone took the pot (possibly us).
    Winner(PeerId),
    /// The table emptied with nobody left standing.
    Abandoned,
}

/// A Maexle node instance.
pub struct Node {
    config: NodeConfig,
    id: PeerId,
    engine: Arc<dyn GameEngine>,
    presenter: Arc<dyn Presenter>,
    membership: Arc<MembershipTable>,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Node {
    /// Create a node with a fresh identity.
    pub fn new(
        config: NodeConfig,
        engine: Arc<dyn GameEngine>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let id = PeerId::generate();
        info!(%id, "node identity assigned");

        let (events_tx, events_rx) = event::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            id,
            engine,
            presenter,
            membership: Arc::new(MembershipTable::new()),
            events_tx,
            events_rx: Some(events_rx),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// This node's identity.
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Handle for feeding presenter choices into the event queue.
    pub fn events(&self) -> EventSender {
        self.events_tx.clone()
    }

    /// Run the node to completion.
    pub async fn run(mut self) -> Result<GameEnd> {
        let local_ip = detect_local_ip();
        let advertised = SocketAddr::new(local_ip, self.config.ring_port);
        info!(ip = %local_ip, ring = %advertised, "node starting");

        let channel = Arc::new(BroadcastChannel::bind(
            self.config.broadcast_port,
            broadcast_target(local_ip),
            group_tag(&self.config.secret),
            self.id,
            advertised,
            self.config.history_size,
        )?);

        let view = Arc::new(RwLock::new(GameView::default()));
        let sequencer = Arc::new(StdMutex::new(Sequencer::new()));

        spawn_udp_listener(
            channel.clone(),
            self.membership.clone(),
            sequencer.clone(),
            self.events_tx.clone(),
            self.id,
            self.shutdown_rx.clone(),
        );

        let ring_listener =
            TcpListener::bind(SocketAddr::new("0.0.0.0".parse().unwrap(), self.config.ring_port))
                .await?;
        spawn_ring_acceptor(
            ring_listener,
            view.clone(),
            self.events_tx.clone(),
            self.id,
            self.shutdown_rx.clone(),
        );

        let mut events_rx = self.events_rx.take().ok_or(Error::ChannelClosed)?;

        // Phase 1: discovery. Advertise until the window closes or a
        // running game is overheard.
        let game_detected = self.phase_discovery(&channel, &mut events_rx).await?;
        info!(peers = self.membership.len(), "discovery closed");

        // Phase 2: lobby and election (players only).
        let lobby_outcome = if game_detected {
            LobbyOutcome::Spectate
        } else {
            self.phase_lobby(&channel, &mut events_rx).await?
        };

        let machine = match lobby_outcome {
            LobbyOutcome::Spectate => {
                info!("found a running game, joining as spectator");
                RoundMachine::spectator(
                    self.id,
                    self.engine.clone(),
                    self.presenter.clone(),
                    self.config.penalties,
                    self.config.max_strikes,
                    self.config.strike_out_dropouts,
                )
            }
            LobbyOutcome::Start(start) => {
                let mut machine = RoundMachine::new(
                    self.id,
                    self.engine.clone(),
                    self.presenter.clone(),
                    self.config.penalties,
                    self.config.max_strikes,
                    self.config.strike_out_dropouts,
                );
                let effects = machine.start_game(start.players, start.max_strikes, start.starting);
                // Effects are interpreted once the game loop owns the
                // ring link; re-queue the scheduled turn, the repair is
                // implicit in the loop's first delivery.
                for effect in effects {
                    if let Effect::ScheduleTurn {
                        first_round,
                        minimum,
                    } = effect
                    {
                        let _ = self.events_tx.send(NodeEvent::StartTurn {
                            first_round,
                            minimum,
                        });
                    }
                }
                machine
            }
        };

        *view.write().await = machine.view();

        // Phase 3: heartbeats and failure detection.
        spawn_heartbeat(
            channel.clone(),
            view.clone(),
            self.shutdown_rx.clone(),
            self.config.heartbeat_interval,
        );
        spawn_monitor(
            self.id,
            self.membership.clone(),
            channel.clone(),
            view.clone(),
            self.events_tx.clone(),
            self.shutdown_rx.clone(),
            MonitorConfig {
                scan_interval: Duration::from_secs(1),
                heartbeat_timeout: self.config.heartbeat_timeout,
                isolation_grace: self.config.isolation_grace,
            },
        );

        // Phase 4: the game loop.
        let ring = RingLink::new(self.config.connect_timeout, self.config.ack_timeout);
        let driver = GameLoop {
            machine,
            ring,
            channel,
            membership: self.membership.clone(),
            sequencer,
            events_tx: self.events_tx.clone(),
            events_rx,
            view,
            shutdown_rx: self.shutdown_rx.clone(),
            isolation_grace: self.config.isolation_grace,
        };
        let outcome = driver.run().await;

        let _ = self.shutdown_tx.send(true);
        outcome
    }

    async fn phase_discovery(
        &self,
        channel: &BroadcastChannel,
        events_rx: &mut EventReceiver,
    ) -> Result<bool> {
        info!(window = ?self.config.discovery_window, "discovery phase");
        let deadline = tokio::time::Instant::now() + self.config.discovery_window;
        let mut ticker = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
                _ = ticker.tick() => {
                    channel
                        .send_unreliable(Message::Hello {
                            known_peers: self.membership.snapshot(),
                        })
                        .await?;
                }
                event = events_rx.recv() => {
                    match event.ok_or(Error::ChannelClosed)? {
                        NodeEvent::Message {
                            message: Message::Heartbeat { .. },
                            ..
                        } => return Ok(true),
                        // Everything else is premature; discovery only
                        // listens for evidence of a running game.
                        _ => {}
                    }
                }
            }
        }
    }

    async fn phase_lobby(
        &self,
        channel: &BroadcastChannel,
        events_rx: &mut EventReceiver,
    ) -> Result<LobbyOutcome> {
        info!("lobby phase");
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        let mut election = ElectionMachine::new(self.id);
        let mut known_leader: Option<PeerId> = None;

        if self.config.election == ElectionStrategy::Ring {
            let actions = election.start();
            self.send_election_actions(channel, actions, &mut known_leader)
                .await?;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    channel
                        .send_unreliable(Message::Hello {
                            known_peers: self.membership.snapshot(),
                        })
                        .await?;

                    let leader = match self.config.election {
                        ElectionStrategy::Deterministic => {
                            let mut ids = self.membership.snapshot();
                            ids.push(self.id);
                            deterministic_leader(ids.iter())
                        }
                        ElectionStrategy::Ring => {
                            // Restart a candidacy that fizzled (lost
                            // messages) or whose winner vanished.
                            if let Some(leader) = election.leader() {
                                if leader != self.id && !self.membership.contains(&leader) {
                                    election.reset();
                                }
                            }
                            if election.leader().is_none() && !election.is_participating() {
                                let actions = election.start();
                                self.send_election_actions(channel, actions, &mut known_leader)
                                    .await?;
                            }
                            election.leader()
                        }
                    };

                    if leader != known_leader {
                        if leader == Some(self.id) {
                            info!("this node leads the lobby");
                        } else if let Some(leader) = leader {
                            info!(%leader, "lobby leader changed");
                        }
                        known_leader = leader;
                    }
                    self.presenter.report(GameReport::Lobby {
                        leader: known_leader,
                        is_self: known_leader == Some(self.id),
                        peers: self.membership.len(),
                    });
                }
                event = events_rx.recv() => {
                    let event = event.ok_or(Error::ChannelClosed)?;
                    match event {
                        NodeEvent::StartGame => {
                            if known_leader != Some(self.id) {
                                debug!("start requested but we do not lead; ignored");
                                continue;
                            }
                            let mut players = self.membership.snapshot();
                            players.push(self.id);
                            let players = canonical_order(players);
                            if players.len() < 2 {
                                warn!("need at least 2 players to start");
                                continue;
                            }
                            channel
                                .send_reliable(Message::GameStart {
                                    players: players.clone(),
                                    max_strikes: self.config.max_strikes,
                                    starting_player: self.id,
                                })
                                .await?;
                            return Ok(LobbyOutcome::Start(GameStartInfo {
                                players,
                                max_strikes: self.config.max_strikes,
                                starting: self.id,
                            }));
                        }
                        NodeEvent::Message { message: Message::GameStart { players, max_strikes, starting_player }, .. } => {
                            return Ok(LobbyOutcome::Start(GameStartInfo {
                                players,
                                max_strikes,
                                starting: starting_player,
                            }));
                        }
                        NodeEvent::Message { message: Message::Heartbeat { .. }, .. } => {
                            // A game started without us (our discovery
                            // traffic never reached the leader in time).
                            return Ok(LobbyOutcome::Spectate);
                        }
                        NodeEvent::Message { sender, message: Message::Election { candidate_id } } => {
                            self.handle_election_msg(
                                channel,
                                &mut election,
                                &mut known_leader,
                                sender,
                                ElectionMsg::Election(candidate_id),
                            )
                            .await?;
                        }
                        NodeEvent::Message { sender, message: Message::Coordinator { leader_id } } => {
                            self.handle_election_msg(
                                channel,
                                &mut election,
                                &mut known_leader,
                                sender,
                                ElectionMsg::Coordinator(leader_id),
                            )
                            .await?;
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Feed a broadcast election message into the machine - but only
    /// when it came from our ring predecessor, which is what turns the
    /// shared medium into a ring.
    async fn handle_election_msg(
        &self,
        channel: &BroadcastChannel,
        election: &mut ElectionMachine,
        known_leader: &mut Option<PeerId>,
        sender: PeerId,
        msg: ElectionMsg,
    ) -> Result<()> {
        if self.config.election != ElectionStrategy::Ring {
            return Ok(());
        }
        let mut order = self.membership.snapshot();
        order.push(self.id);
        let order = canonical_order(order);
        let alive: HashSet<PeerId> = order.iter().copied().collect();
        if predecessor_of(&order, &self.id, &alive) != Some(sender) {
            // Not addressed to us in ring terms.
            return Ok(());
        }

        let actions = election.on_message(msg);
        self.send_election_actions(channel, actions, known_leader)
            .await
    }

    async fn send_election_actions(
        &self,
        channel: &BroadcastChannel,
        actions: Vec<ElectionAction>,
        known_leader: &mut Option<PeerId>,
    ) -> Result<()> {
        for action in actions {
            match action {
                ElectionAction::Send(ElectionMsg::Election(candidate_id)) => {
                    channel
                        .send_reliable(Message::Election { candidate_id })
                        .await?;
                }
                ElectionAction::Send(ElectionMsg::Coordinator(leader_id)) => {
                    channel
                        .send_reliable(Message::Coordinator { leader_id })
                        .await?;
                }
                ElectionAction::Elected(leader) => {
                    info!(%leader, "election concluded");
                    *known_leader = Some(leader);
                }
            }
        }
        Ok(())
    }
}

struct GameStartInfo {
    players: Vec<PeerId>,
    max_strikes: u8,
    starting: PeerId,
}

enum LobbyOutcome {
    Start(GameStartInfo),
    Spectate,
}

// --- broadcast listener --------------------------------------------------

fn spawn_udp_listener(
    channel: Arc<BroadcastChannel>,
    membership: Arc<MembershipTable>,
    sequencer: Arc<StdMutex<Sequencer>>,
    events: EventSender,
    self_id: PeerId,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; UDP_BUF_SIZE];
        loop {
            let (len, src) = tokio::select! {
                r = channel.recv(&mut buf) => match r {
                    Ok(r) => r,
                    Err(e) => {
                        error!(error = %e, "broadcast receive failed");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            };

            let envelope = match Envelope::from_slice(&buf[..len]) {
                Ok(env) => env,
                Err(e) => {
                    // Unknown types and malformed frames are a no-op.
                    debug!(%src, error = %e, "undecodable datagram dropped");
                    continue;
                }
            };

            if envelope.group != channel.group() || envelope.sender == self_id {
                continue;
            }
            if membership.is_tombstoned(&envelope.sender) {
                debug!(sender = %envelope.sender, "traffic from tombstoned peer dropped");
                continue;
            }
            membership.upsert(envelope.sender, envelope.addr);

            let sender = envelope.sender;
            match (envelope.seq, envelope.payload) {
                (_, Message::Hello { known_peers }) => {
                    // Gossip: learn ids second-hand, addresses arrive
                    // with the peer's own traffic.
                    for peer in known_peers {
                        if peer != self_id {
                            membership.upsert(peer, None);
                        }
                    }
                }
                (_, Message::Nack { req_seq, target }) => {
                    if target == self_id {
                        if let Err(e) = channel.retransmit(req_seq).await {
                            debug!(error = %e, "retransmit failed");
                        }
                    }
                }
                (None, message) => {
                    // Unreliable class: straight through.
                    if events.send(NodeEvent::Message { sender, message }).is_err() {
                        break;
                    }
                }
                (Some(seq), message) => {
                    let delivery = {
                        let mut sequencer = sequencer.lock().unwrap();
                        sequencer.accept(sender, seq, message)
                    };
                    for req_seq in delivery.missing {
                        let _ = channel
                            .send_unreliable(Message::Nack {
                                req_seq,
                                target: sender,
                            })
                            .await;
                    }
                    for message in delivery.delivered {
                        if events.send(NodeEvent::Message { sender, message }).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    });
}

// --- ring-link acceptor --------------------------------------------------

fn spawn_ring_acceptor(
    listener: TcpListener,
    view: Arc<RwLock<GameView>>,
    events: EventSender,
    self_id: PeerId,
    shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut shutdown_outer = shutdown.clone();
        loop {
            let (stream, addr) = tokio::select! {
                r = listener.accept() => match r {
                    Ok(r) => r,
                    Err(e) => {
                        error!(error = %e, "ring accept failed");
                        continue;
                    }
                },
                _ = shutdown_outer.changed() => break,
            };
            debug!(%addr, "inbound ring connection");

            let view = view.clone();
            let events = events.clone();
            let mut shutdown = shutdown.clone();
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                loop {
                    line.clear();
                    let read = tokio::select! {
                        r = reader.read_line(&mut line) => r,
                        _ = shutdown.changed() => break,
                    };
                    match read {
                        Ok(0) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!(%addr, error = %e, "ring read failed");
                            break;
                        }
                    }

                    let token = match LinkFrame::from_line(&line) {
                        Ok(LinkFrame::Token(token)) => token,
                        Ok(_) => continue,
                        Err(e) => {
                            debug!(%addr, error = %e, "bad ring frame");
                            continue;
                        }
                    };

                    let response = {
                        let view = view.read().await;
                        validate_token(&token, &view, self_id)
                    };
                    let forward = matches!(
                        response,
                        LinkFrame::Ack {
                            status: maexle_wire::AckStatus::Ok,
                            ..
                        }
                    );

                    // Ack before processing: the sender's turn ends the
                    // moment we own the token.
                    match response.to_line() {
                        Ok(line) => {
                            if write_half.write_all(line.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "ack encode failed");
                            break;
                        }
                    }

                    if forward {
                        let spectating = view.read().await.spectator;
                        if !spectating && events.send(NodeEvent::Token(token)).is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
}

/// Structured token validation shared by the acceptor.
fn validate_token(token: &Token, view: &GameView, self_id: PeerId) -> LinkFrame {
    if token.sender == self_id {
        return LinkFrame::reject("Loopback");
    }
    if !view.alive.contains(&token.sender) {
        return LinkFrame::reject("Sender Dead");
    }
    if token.round_id != view.round_id {
        return LinkFrame::reject(format!(
            "Round Mismatch (Msg:{} != Me:{})",
            token.round_id, view.round_id
        ));
    }
    LinkFrame::ack()
}

// --- the driver ----------------------------------------------------------

struct GameLoop {
    machine: RoundMachine,
    ring: RingLink,
    channel: Arc<BroadcastChannel>,
    membership: Arc<MembershipTable>,
    sequencer: Arc<StdMutex<Sequencer>>,
    events_tx: EventSender,
    events_rx: EventReceiver,
    view: Arc<RwLock<GameView>>,
    shutdown_rx: watch::Receiver<bool>,
    isolation_grace: Duration,
}

impl GameLoop {
    async fn run(mut self) -> Result<GameEnd> {
        self.repair_ring().await;
        self.publish_view().await;

        loop {
            let event = tokio::select! {
                event = self.events_rx.recv() => event.ok_or(Error::ChannelClosed)?,
                _ = self.shutdown_rx.changed() => return Ok(GameEnd::Abandoned),
            };

            self.handle_event(event).await?;
            self.publish_view().await;

            if self.machine.is_game_over() {
                let winner = self
                    .machine
                    .view()
                    .alive
                    .first()
                    .copied();
                return Ok(match winner {
                    Some(winner) => GameEnd::Winner(winner),
                    None => GameEnd::Abandoned,
                });
            }
        }
    }

    async fn handle_event(&mut self, event: NodeEvent) -> Result<()> {
        let effects = match event {
            NodeEvent::Message { sender, message } => match message {
                Message::Announce { value, round_id } => {
                    self.machine.announce_broadcast(sender, value, round_id);
                    Vec::new()
                }
                Message::RoundOver {
                    loser,
                    real_value,
                    points,
                    round_id,
                } => self.machine.round_over(loser, real_value, points, round_id),
                Message::PlayerLeft { dropout } => self.player_left(dropout),
                Message::Heartbeat {
                    round_id,
                    alive_players,
                    scores,
                } => {
                    self.machine.heartbeat(round_id, &alive_players, &scores);
                    Vec::new()
                }
                // Lobby-phase traffic arriving late; harmless.
                _ => Vec::new(),
            },
            NodeEvent::Token(token) => self.machine.token(token),
            NodeEvent::StartTurn {
                first_round,
                minimum,
            } => self.machine.start_turn(first_round, minimum),
            NodeEvent::Announcement { value } => self.machine.announcement(value),
            NodeEvent::Decision {
                challenge,
                round_id,
            } => self.machine.decision(challenge, round_id),
            NodeEvent::Dropout { dropout } => self.player_left(dropout),
            NodeEvent::StartGame => Vec::new(),
            NodeEvent::Isolated => {
                return Err(Error::Isolated(self.isolation_grace));
            }
        };

        self.apply(effects).await
    }

    fn player_left(&mut self, dropout: PeerId) -> Vec<Effect> {
        let effects = self.machine.player_left(dropout);
        if !effects.is_empty() {
            self.membership.mark_dead(&dropout);
            self.sequencer.lock().unwrap().forget(&dropout);
        }
        effects
    }

    async fn apply(&mut self, effects: Vec<Effect>) -> Result<()> {
        for effect in effects {
            match effect {
                Effect::SendToken(token) => self.deliver_token(token).await?,
                other => self.apply_basic(other).await?,
            }
        }
        Ok(())
    }

    /// Everything except token delivery (which needs its own retry loop
    /// and may itself need to apply these).
    async fn apply_basic(&mut self, effect: Effect) -> Result<()> {
        match effect {
            Effect::Broadcast(message) => self.channel.send_reliable(message).await?,
            Effect::RepairRing => self.repair_ring().await,
            Effect::CloseRing => {
                let _ = self.ring.reroute(None).await;
            }
            Effect::ScheduleTurn {
                first_round,
                minimum,
            } => {
                // A breather before re-prompting, off the driver's back.
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    let _ = events.send(NodeEvent::StartTurn {
                        first_round,
                        minimum,
                    });
                });
            }
            Effect::FlushEvents => self.flush_stale_events(),
            Effect::GameOver { .. } => {
                // Terminal state already set in the machine; run() exits
                // on the next check.
            }
            Effect::SendToken(_) => {
                // Only apply() routes token delivery; a handler emitting
                // one from the inline drain path would be a logic error.
                warn!("token delivery requested from a nested context, dropped");
            }
        }
        Ok(())
    }

    /// Drop queued events that belong to the just-voided round, keeping
    /// departure notices (they are never stale).
    fn flush_stale_events(&mut self) {
        let mut keep = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            match &event {
                NodeEvent::Dropout { .. } | NodeEvent::Isolated => keep.push(event),
                NodeEvent::Message { message, .. } => match message {
                    Message::PlayerLeft { .. } | Message::Heartbeat { .. } => keep.push(event),
                    _ => debug!("flushed stale event"),
                },
                _ => debug!("flushed stale event"),
            }
        }
        for event in keep {
            let _ = self.events_tx.send(event);
        }
    }

    async fn repair_ring(&mut self) {
        let target = match self.machine.successor() {
            Some(successor) => match self.membership.addr_of(&successor) {
                Some(addr) => Some((successor, addr)),
                None => {
                    warn!(%successor, "successor has no known address yet");
                    None
                }
            },
            None => None,
        };
        if let Err(e) = self.ring.reroute(target).await {
            // Not fatal: the send path retries and the liveness monitor
            // will eventually declare the successor dead.
            warn!(error = %e, "ring repair failed, will retry");
        }
    }

    /// Hand the token to the successor, repairing and retrying until it
    /// lands, the round moves on, or the table empties. The repair cycle
    /// is deliberately unbounded - forward progress requires it - but
    /// each attempt is individually bounded by the connect/ack timeouts.
    async fn deliver_token(&mut self, token: Token) -> Result<()> {
        loop {
            if *self.shutdown_rx.borrow() || self.machine.is_game_over() {
                return Ok(());
            }
            if self.machine.alive_count() < 2 {
                return Ok(());
            }
            if self.machine.round_id() != token.round_id {
                debug!("round moved on, token delivery abandoned");
                return Ok(());
            }

            self.repair_ring().await;
            if self.ring.is_connected() {
                match self.ring.send_token(&token).await {
                    Ok(Handoff::Accepted) => {
                        debug!(round = token.round_id, "token accepted by successor");
                        return Ok(());
                    }
                    Ok(Handoff::Rejected(reason)) => {
                        // The successor knows something we may not yet
                        // (round bumped, we are considered dead). Let
                        // queued events catch us up before retrying.
                        warn!(%reason, "token rejected, re-syncing");
                    }
                    Err(e) => {
                        warn!(error = %e, "token handoff failed, repairing ring");
                        self.ring.close();
                    }
                }
            }

            self.drain_urgent_events().await?;
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }

    /// While blocked on delivery, departure notices must still land -
    /// the successor we are retrying may be the one who died.
    async fn drain_urgent_events(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            pending.push(event);
        }
        for event in pending {
            match event {
                NodeEvent::Dropout { dropout }
                | NodeEvent::Message {
                    message: Message::PlayerLeft { dropout },
                    ..
                } => {
                    let effects = self.player_left(dropout);
                    for effect in effects {
                        self.apply_basic(effect).await?;
                    }
                }
                NodeEvent::Message {
                    message:
                        Message::RoundOver {
                            loser,
                            real_value,
                            points,
                            round_id,
                        },
                    ..
                } => {
                    let effects = self.machine.round_over(loser, real_value, points, round_id);
                    for effect in effects {
                        self.apply_basic(effect).await?;
                    }
                }
                NodeEvent::Isolated => return Err(Error::Isolated(self.isolation_grace)),
                // Anything else can wait its turn in order.
                other => {
                    let _ = self.events_tx.send(other);
                }
            }
        }
        Ok(())
    }

    async fn publish_view(&self) {
        *self.view.write().await = self.machine.view();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn view(round_id: u64, alive: &[u8]) -> GameView {
        GameView {
            round_id,
            alive: alive.iter().map(|&s| id(s)).collect(),
            scores: Default::default(),
            game_running: true,
            spectator: false,
        }
    }

    fn token(sender: PeerId, round_id: u64) -> Token {
        use maexle_engine::{DiceEngine, GameEngine, Outcome};
        let engine = DiceEngine::new("tavern");
        let hidden = Outcome::from_value(42).unwrap();
        Token {
            round_id,
            announced: Outcome::from_value(55).unwrap(),
            commitment: engine.seal(hidden, Outcome::from_value(55).unwrap()),
            sender,
            turn_count: 1,
        }
    }

    #[test]
    fn token_validation_accepts_live_matching_token() {
        let frame = validate_token(&token(id(2), 3), &view(3, &[1, 2, 3]), id(1));
        assert_eq!(frame, LinkFrame::ack());
    }

    #[test]
    fn token_validation_rejects_loopback() {
        let frame = validate_token(&token(id(1), 3), &view(3, &[1, 2]), id(1));
        assert_eq!(frame, LinkFrame::reject("Loopback"));
    }

    #[test]
    fn token_validation_rejects_dead_sender() {
        let frame = validate_token(&token(id(9), 3), &view(3, &[1, 2]), id(1));
        assert_eq!(frame, LinkFrame::reject("Sender Dead"));
    }

    #[test]
    fn token_validation_rejects_round_mismatch() {
        let frame = validate_token(&token(id(2), 7), &view(3, &[1, 2]), id(1));
        match frame {
            LinkFrame::Ack {
                status: maexle_wire::AckStatus::Rejected,
                reason: Some(reason),
            } => assert!(reason.contains("Round Mismatch")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
