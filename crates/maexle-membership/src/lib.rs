//! Peer identities and the membership table.
//!
//! The membership table is the factual record of "who is out there":
//! identity, advertised address, last-seen timestamp. It is shared by the
//! discovery listener, the heartbeat listener, and the liveness monitor,
//! so all operations take `&self` behind an interior lock.
//!
//! # The ordering linchpin
//!
//! Election and ring formation both consume [`MembershipTable::snapshot`],
//! which orders peers by the byte order of their [`PeerId`]. That single
//! comparator is the invariant the whole topology rests on: given the same
//! membership, every node derives the same leader and the same successor.
//!
//! # Tombstones
//!
//! A peer declared dead is moved to a tombstone set rather than forgotten.
//! Stale discovery traffic cannot resurrect a tombstoned identity within
//! the same game instance.

mod id;
mod table;

pub use id::PeerId;
pub use table::{MembershipRecord, MembershipTable};
