//! Ring topology and leader election.
//!
//! The ring is not a data structure anywhere - it is a pure function of
//! the canonical seating order and the current alive set, recomputed on
//! every membership change. Each node derives only its own successor; the
//! invariant that makes this safe is that every node computes over the
//! same sorted snapshot (see `maexle-membership`).
//!
//! Two election strategies:
//! - [`election::deterministic_leader`]: highest id in the snapshot wins,
//!   zero messages, requires discovery to have closed first.
//! - [`election::ElectionMachine`]: Chang-Roberts token circulation for
//!   ring-based election, message-driven and transport-agnostic.

pub mod election;
mod successor;

pub use successor::{canonical_order, next_starter, predecessor_of, successor_of};
