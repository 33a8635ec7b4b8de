//! The shared UDP broadcast channel.
//!
//! One socket carries everything that is not the token: discovery,
//! election, heartbeats, announcements and round results. Reliable-class
//! payloads get stamped from the [`SendHistory`]; everything else is
//! fire-and-forget.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

use maexle_membership::PeerId;
use maexle_wire::{Envelope, Message, SendHistory};

use crate::error::Result;

/// Sending/receiving handle for the broadcast channel.
pub struct BroadcastChannel {
    socket: UdpSocket,
    target: SocketAddr,
    group: String,
    self_id: PeerId,
    /// Ring-link listener advertised in every envelope.
    advertised: SocketAddr,
    history: Mutex<SendHistory>,
}

impl BroadcastChannel {
    /// Bind the broadcast socket with address reuse and SO_BROADCAST.
    pub fn bind(
        port: u16,
        target_ip: IpAddr,
        group: String,
        self_id: PeerId,
        advertised: SocketAddr,
        history_size: usize,
    ) -> Result<Self> {
        let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

        // socket2 for the options tokio does not expose before binding.
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_broadcast(true)?;
        socket.bind(&bind_addr.into())?;
        socket.set_nonblocking(true)?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)?;

        tracing::info!(%bind_addr, target = %target_ip, "broadcast channel bound");

        Ok(Self {
            socket,
            target: SocketAddr::new(target_ip, port),
            group,
            self_id,
            advertised,
            history: Mutex::new(SendHistory::new(history_size)),
        })
    }

    /// The group tag this channel stamps and filters on.
    pub fn group(&self) -> &str {
        &self.group
    }

    fn envelope(&self, payload: Message) -> Envelope {
        Envelope {
            group: self.group.clone(),
            sender: self.self_id,
            addr: Some(self.advertised),
            seq: None,
            payload,
        }
    }

    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let bytes = envelope.to_bytes()?;
        self.socket.send_to(&bytes, self.target).await?;
        Ok(())
    }

    /// Fire-and-forget broadcast; staleness is the receiver's problem.
    pub async fn send_unreliable(&self, payload: Message) -> Result<()> {
        self.send(&self.envelope(payload)).await
    }

    /// Sequenced broadcast, retained for retransmission.
    pub async fn send_reliable(&self, payload: Message) -> Result<()> {
        let mut envelope = self.envelope(payload);
        {
            let mut history = self.history.lock().unwrap();
            history.stamp(&mut envelope);
        }
        self.send(&envelope).await
    }

    /// Unreliable broadcast repeated with short gaps, for messages that
    /// must land but tolerate duplicates (the receiver is idempotent).
    pub async fn send_repeated(&self, payload: Message, times: u32) -> Result<()> {
        let envelope = self.envelope(payload);
        for i in 0..times {
            self.send(&envelope).await?;
            if i + 1 < times {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
        Ok(())
    }

    /// Answer a NACK from the retained history. Returns `false` when the
    /// requested sequence has already been evicted.
    pub async fn retransmit(&self, seq: u64) -> Result<bool> {
        let found = {
            let history = self.history.lock().unwrap();
            history.lookup(seq).cloned()
        };
        match found {
            Some(envelope) => {
                debug!(seq, "retransmitting from history");
                self.send(&envelope).await?;
                Ok(true)
            }
            None => {
                debug!(seq, "NACKed sequence no longer in history");
                Ok(false)
            }
        }
    }

    /// Receive one datagram.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let (len, addr) = self.socket.recv_from(buf).await?;
        Ok((len, addr))
    }
}

/// Best-effort local address detection: route a UDP "connection" at a
/// public address and read back the chosen source. Nothing is sent.
pub fn detect_local_ip() -> IpAddr {
    let probe = |target: &str| -> Option<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(target).ok()?;
        Some(socket.local_addr().ok()?.ip())
    };

    probe("8.8.8.8:80")
        .or_else(|| probe("10.255.255.255:1"))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Directed /24 broadcast for the detected address; loopback falls back
/// to the limited broadcast address.
pub fn broadcast_target(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) if !v4.is_loopback() => {
            let [a, b, c, _] = v4.octets();
            IpAddr::V4(Ipv4Addr::new(a, b, c, 255))
        }
        _ => IpAddr::V4(Ipv4Addr::BROADCAST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_target_masks_last_octet() {
        let ip: IpAddr = "192.168.1.42".parse().unwrap();
        assert_eq!(broadcast_target(ip), "192.168.1.255".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn loopback_uses_limited_broadcast() {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(broadcast_target(ip), IpAddr::V4(Ipv4Addr::BROADCAST));
    }

    #[tokio::test]
    async fn reliable_sends_are_sequenced_and_retransmittable() {
        let id = PeerId::from_bytes([1; 16]);
        let advertised: SocketAddr = "127.0.0.1:50001".parse().unwrap();

        // The datagrams go to a loopback target nobody listens on; the
        // test only exercises stamping and history.
        let channel = BroadcastChannel::bind(
            54999,
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            "group".into(),
            id,
            advertised,
            8,
        )
        .unwrap();

        for _ in 0..3 {
            channel
                .send_reliable(Message::PlayerLeft { dropout: id })
                .await
                .unwrap();
        }

        assert!(channel.retransmit(2).await.unwrap());
        assert!(!channel.retransmit(99).await.unwrap());
    }
}
