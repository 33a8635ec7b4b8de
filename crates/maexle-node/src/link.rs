//! The outbound ring link.
//!
//! At most one live outbound TCP connection - to the current successor.
//! When the computed successor changes the old link is closed first
//! (idempotent, errors ignored) and a new one is opened with a bounded
//! connect timeout. Token handoff is synchronous: one frame down, one
//! ack back before the sender proceeds.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use maexle_membership::PeerId;
use maexle_wire::{AckStatus, LinkFrame, Token};

use crate::error::{Error, Result};

struct LinkConn {
    peer: PeerId,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Verdict of one token handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    /// The successor accepted the token.
    Accepted,
    /// The successor refused it (stale round, dead sender, loopback).
    Rejected(String),
}

/// Manager for the single outbound successor connection.
pub struct RingLink {
    conn: Option<LinkConn>,
    successor: Option<PeerId>,
    connect_timeout: Duration,
    ack_timeout: Duration,
}

impl RingLink {
    /// Create an unconnected link.
    pub fn new(connect_timeout: Duration, ack_timeout: Duration) -> Self {
        Self {
            conn: None,
            successor: None,
            connect_timeout,
            ack_timeout,
        }
    }

    /// The peer this link currently points at.
    pub fn successor(&self) -> Option<PeerId> {
        self.successor
    }

    /// Whether an open connection exists.
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Drop the connection (keeps the successor target).
    pub fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(peer = %conn.peer, "closing ring link");
        }
    }

    /// Point the link at `target` and connect if needed.
    ///
    /// A changed (or cleared) target closes the old connection first;
    /// an unchanged, already-connected target is a no-op. Connect
    /// failures are returned, not retried here - the caller owns the
    /// repair cadence.
    pub async fn reroute(&mut self, target: Option<(PeerId, SocketAddr)>) -> Result<()> {
        let (peer, addr) = match target {
            Some(target) => target,
            None => {
                self.close();
                self.successor = None;
                return Ok(());
            }
        };

        if self.successor != Some(peer) {
            self.close();
            self.successor = Some(peer);
        }
        if self.conn.is_some() {
            return Ok(());
        }

        info!(%peer, %addr, "connecting ring link");
        let stream = timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::LinkDown(format!("connect to {addr} timed out")))?
            .map_err(|e| Error::LinkDown(format!("connect to {addr}: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        self.conn = Some(LinkConn {
            peer,
            reader: BufReader::new(read_half),
            writer: write_half,
        });
        info!(%peer, "ring link up");
        Ok(())
    }

    /// Hand the token to the successor and wait for the synchronous ack.
    ///
    /// Any transport failure closes the connection and surfaces as
    /// [`Error::LinkDown`]; the caller repairs and retries.
    pub async fn send_token(&mut self, token: &Token) -> Result<Handoff> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| Error::LinkDown("no ring connection".to_string()))?;

        let line = LinkFrame::Token(token.clone()).to_line()?;
        if let Err(e) = conn.writer.write_all(line.as_bytes()).await {
            self.close();
            return Err(Error::LinkDown(format!("token write: {e}")));
        }
        debug!(peer = %conn.peer, round = token.round_id, "token passed, awaiting ack");

        let mut response = String::new();
        let read = timeout(self.ack_timeout, conn.reader.read_line(&mut response)).await;
        match read {
            Ok(Ok(0)) => {
                self.close();
                Err(Error::LinkDown("successor closed the link".to_string()))
            }
            Ok(Ok(_)) => match LinkFrame::from_line(&response)? {
                LinkFrame::Ack {
                    status: AckStatus::Ok,
                    ..
                } => Ok(Handoff::Accepted),
                LinkFrame::Ack {
                    status: AckStatus::Rejected,
                    reason,
                } => {
                    let reason = reason.unwrap_or_else(|| "unspecified".to_string());
                    warn!(%reason, "successor rejected the token");
                    Ok(Handoff::Rejected(reason))
                }
                LinkFrame::Token(_) => {
                    self.close();
                    Err(Error::LinkDown("expected ack, got token".to_string()))
                }
            },
            Ok(Err(e)) => {
                self.close();
                Err(Error::LinkDown(format!("ack read: {e}")))
            }
            Err(_) => {
                self.close();
                Err(Error::LinkDown("ack timed out".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maexle_engine::{DiceEngine, GameEngine, Outcome};
    use tokio::net::TcpListener;

    fn id(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn token(sender: PeerId) -> Token {
        let engine = DiceEngine::new("tavern");
        let hidden = Outcome::from_value(42).unwrap();
        Token {
            round_id: 1,
            announced: Outcome::from_value(55).unwrap(),
            commitment: engine.seal(hidden, Outcome::from_value(55).unwrap()),
            sender,
            turn_count: 1,
        }
    }

    async fn accept_and_ack(listener: TcpListener, frame: LinkFrame) -> Token {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let received = match LinkFrame::from_line(&line).unwrap() {
            LinkFrame::Token(t) => t,
            other => panic!("expected token, got {other:?}"),
        };

        write_half
            .write_all(frame.to_line().unwrap().as_bytes())
            .await
            .unwrap();
        received
    }

    #[tokio::test]
    async fn token_handoff_accepted() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(accept_and_ack(listener, LinkFrame::ack()));

        let mut link = RingLink::new(Duration::from_secs(1), Duration::from_secs(1));
        link.reroute(Some((id(2), addr))).await.unwrap();
        assert!(link.is_connected());

        let sent = token(id(1));
        let handoff = link.send_token(&sent).await.unwrap();
        assert_eq!(handoff, Handoff::Accepted);
        assert_eq!(server.await.unwrap(), sent);
    }

    #[tokio::test]
    async fn token_handoff_rejected_with_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(accept_and_ack(listener, LinkFrame::reject("Round Mismatch")));

        let mut link = RingLink::new(Duration::from_secs(1), Duration::from_secs(1));
        link.reroute(Some((id(2), addr))).await.unwrap();

        let handoff = link.send_token(&token(id(1))).await.unwrap();
        assert_eq!(handoff, Handoff::Rejected("Round Mismatch".to_string()));
    }

    #[tokio::test]
    async fn reroute_to_same_target_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut link = RingLink::new(Duration::from_secs(1), Duration::from_secs(1));
        link.reroute(Some((id(2), addr))).await.unwrap();
        assert!(link.is_connected());

        link.reroute(Some((id(2), addr))).await.unwrap();
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn reroute_to_new_target_replaces_connection() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let first_addr = first.local_addr().unwrap();
        let second_addr = second.local_addr().unwrap();

        let mut link = RingLink::new(Duration::from_secs(1), Duration::from_secs(1));
        link.reroute(Some((id(2), first_addr))).await.unwrap();
        assert_eq!(link.successor(), Some(id(2)));

        link.reroute(Some((id(3), second_addr))).await.unwrap();
        assert_eq!(link.successor(), Some(id(3)));
        assert!(link.is_connected());
    }

    #[tokio::test]
    async fn reroute_to_none_clears_the_link() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mut link = RingLink::new(Duration::from_secs(1), Duration::from_secs(1));
        link.reroute(Some((id(2), addr))).await.unwrap();
        link.reroute(None).await.unwrap();
        assert!(!link.is_connected());
        assert_eq!(link.successor(), None);
    }

    #[tokio::test]
    async fn connect_failure_is_link_down_not_panic() {
        let mut link = RingLink::new(Duration::from_millis(200), Duration::from_secs(1));
        // TEST-NET-1 address: connect will fail or time out.
        let dead: SocketAddr = "192.0.2.1:1".parse().unwrap();
        let err = link.reroute(Some((id(2), dead))).await.unwrap_err();
        assert!(matches!(err, Error::LinkDown(_)));
        assert!(!link.is_connected());
    }

    #[tokio::test]
    async fn send_without_connection_is_link_down() {
        let mut link = RingLink::new(Duration::from_secs(1), Duration::from_secs(1));
        let err = link.send_token(&token(id(1))).await.unwrap_err();
        assert!(matches!(err, Error::LinkDown(_)));
    }
}
