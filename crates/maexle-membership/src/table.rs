//! The shared membership table.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::Instant;

use crate::PeerId;

/// What the table knows about one peer.
#[derive(Debug, Clone)]
pub struct MembershipRecord {
    /// The peer's identity.
    pub id: PeerId,
    /// Advertised ring-link address. `None` until the peer's own traffic
    /// carries one (ids can be learned second-hand via gossip).
    pub addr: Option<SocketAddr>,
    /// Last authenticated inbound message from this peer.
    pub last_seen: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<PeerId, MembershipRecord>,
    tombstones: HashSet<PeerId>,
}

/// Thread-safe record of known peers with tombstoned removal.
///
/// Safe to share across the discovery listener, the heartbeat listener,
/// and the liveness monitor; every operation takes `&self`.
#[derive(Debug, Default)]
pub struct MembershipTable {
    inner: RwLock<Inner>,
}

impl MembershipTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a peer sighting.
    ///
    /// Creates the record on first contact, refreshes `last_seen`, and
    /// adopts `addr` when one is supplied (an address always wins over
    /// `None`, and a changed address replaces the old one). Returns `false`
    /// for tombstoned identities, which stay dead.
    pub fn upsert(&self, id: PeerId, addr: Option<SocketAddr>) -> bool {
        let mut inner = self.inner.write().unwrap();
        if inner.tombstones.contains(&id) {
            return false;
        }

        let now = Instant::now();
        let record = inner.records.entry(id).or_insert(MembershipRecord {
            id,
            addr: None,
            last_seen: now,
        });
        record.last_seen = now;
        if addr.is_some() {
            record.addr = addr;
        }
        true
    }

    /// Refresh `last_seen` for a known peer.
    pub fn touch(&self, id: &PeerId) {
        let mut inner = self.inner.write().unwrap();
        if let Some(record) = inner.records.get_mut(id) {
            record.last_seen = Instant::now();
        }
    }

    /// Declare a peer dead: remove its record and tombstone the identity.
    ///
    /// Returns `true` if the peer was active. Idempotent.
    pub fn mark_dead(&self, id: &PeerId) -> bool {
        let mut inner = self.inner.write().unwrap();
        let was_active = inner.records.remove(id).is_some();
        inner.tombstones.insert(*id);
        was_active
    }

    /// Whether this identity has been declared dead.
    pub fn is_tombstoned(&self, id: &PeerId) -> bool {
        self.inner.read().unwrap().tombstones.contains(id)
    }

    /// Whether this peer is currently active.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.inner.read().unwrap().records.contains_key(id)
    }

    /// Advertised address of an active peer.
    pub fn addr_of(&self, id: &PeerId) -> Option<SocketAddr> {
        self.inner.read().unwrap().records.get(id).and_then(|r| r.addr)
    }

    /// Last-seen timestamp of an active peer.
    pub fn last_seen(&self, id: &PeerId) -> Option<Instant> {
        self.inner.read().unwrap().records.get(id).map(|r| r.last_seen)
    }

    /// Active peer ids in canonical order.
    ///
    /// This is THE ordering shared by election and ring formation: two
    /// nodes with the same membership always produce the same list.
    pub fn snapshot(&self) -> Vec<PeerId> {
        let inner = self.inner.read().unwrap();
        let mut ids: Vec<PeerId> = inner.records.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of active peers.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().records.len()
    }

    /// Whether no active peers are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn id(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[test]
    fn upsert_creates_and_refreshes() {
        let table = MembershipTable::new();
        assert!(table.upsert(id(1), None));
        assert!(table.contains(&id(1)));
        assert_eq!(table.addr_of(&id(1)), None);

        // A later sighting with an address fills it in.
        assert!(table.upsert(id(1), Some(addr(50001))));
        assert_eq!(table.addr_of(&id(1)), Some(addr(50001)));

        // And a sighting without one does not erase it.
        assert!(table.upsert(id(1), None));
        assert_eq!(table.addr_of(&id(1)), Some(addr(50001)));
    }

    #[test]
    fn changed_address_replaces_old() {
        let table = MembershipTable::new();
        table.upsert(id(1), Some(addr(50001)));
        table.upsert(id(1), Some(addr(50002)));
        assert_eq!(table.addr_of(&id(1)), Some(addr(50002)));
    }

    #[test]
    fn tombstone_blocks_resurrection() {
        let table = MembershipTable::new();
        table.upsert(id(1), Some(addr(50001)));

        assert!(table.mark_dead(&id(1)));
        assert!(!table.contains(&id(1)));
        assert!(table.is_tombstoned(&id(1)));

        // Stale discovery traffic cannot bring it back.
        assert!(!table.upsert(id(1), Some(addr(50001))));
        assert!(!table.contains(&id(1)));
    }

    #[test]
    fn mark_dead_is_idempotent() {
        let table = MembershipTable::new();
        table.upsert(id(1), None);
        assert!(table.mark_dead(&id(1)));
        assert!(!table.mark_dead(&id(1)));
    }

    #[test]
    fn snapshot_is_sorted_and_active_only() {
        let table = MembershipTable::new();
        table.upsert(id(3), None);
        table.upsert(id(1), None);
        table.upsert(id(2), None);
        table.mark_dead(&id(2));

        assert_eq!(table.snapshot(), vec![id(1), id(3)]);
    }

    #[test]
    fn touch_only_refreshes_known_peers() {
        let table = MembershipTable::new();
        table.touch(&id(9));
        assert!(!table.contains(&id(9)));

        table.upsert(id(9), None);
        let before = table.last_seen(&id(9)).unwrap();
        table.touch(&id(9));
        assert!(table.last_seen(&id(9)).unwrap() >= before);
    }
}
