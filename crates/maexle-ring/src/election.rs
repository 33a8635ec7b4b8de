//! Leader election.
//!
//! Deterministic election needs no messages: once discovery closes, every
//! node computes the maximum id over the same snapshot and arrives at the
//! same leader. Ring-based election (Chang-Roberts) circulates candidacies
//! instead and tolerates nodes joining the decision at different times;
//! the machine here is transport-agnostic - the caller routes emitted
//! messages to the ring successor and feeds received ones back in.

use maexle_membership::PeerId;

/// Highest identity in the snapshot wins. Identical on every node for an
/// identical snapshot - which is why discovery must close before anyone
/// commits to this result.
pub fn deterministic_leader<'a>(ids: impl IntoIterator<Item = &'a PeerId>) -> Option<PeerId> {
    ids.into_iter().max().copied()
}

/// A circulating election message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionMsg {
    /// A candidacy working its way around the ring.
    Election(PeerId),
    /// The result, circulated once to install the leader everywhere.
    Coordinator(PeerId),
}

/// What the caller must do after feeding the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectionAction {
    /// Forward this message to the ring successor.
    Send(ElectionMsg),
    /// The election concluded locally with this leader.
    Elected(PeerId),
}

/// Chang-Roberts election state for one node.
///
/// Unique identities make ties impossible: exactly one candidacy survives
/// a full traversal, and the survivor's `Coordinator` pass installs it
/// everywhere. Completes in at most two traversals absent failures; on a
/// mid-election failure the caller calls [`reset`](Self::reset) and
/// starts again.
#[derive(Debug)]
pub struct ElectionMachine {
    self_id: PeerId,
    participating: bool,
    leader: Option<PeerId>,
}

impl ElectionMachine {
    /// Create an idle machine.
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            participating: false,
            leader: None,
        }
    }

    /// The installed leader, if any election has concluded.
    pub fn leader(&self) -> Option<PeerId> {
        self.leader
    }

    /// Whether a candidacy of ours is still in flight.
    pub fn is_participating(&self) -> bool {
        self.participating
    }

    /// Begin a candidacy. No-op (returns nothing) when already
    /// participating.
    pub fn start(&mut self) -> Vec<ElectionAction> {
        if self.participating {
            return Vec::new();
        }
        self.participating = true;
        self.leader = None;
        vec![ElectionAction::Send(ElectionMsg::Election(self.self_id))]
    }

    /// Clear all election state, e.g. after a ring failure voided an
    /// election in progress.
    pub fn reset(&mut self) {
        self.participating = false;
        self.leader = None;
    }

    /// Feed a message received from the ring predecessor.
    pub fn on_message(&mut self, msg: ElectionMsg) -> Vec<ElectionAction> {
        match msg {
            ElectionMsg::Election(candidate) => self.on_election(candidate),
            ElectionMsg::Coordinator(leader) => self.on_coordinator(leader),
        }
    }

    fn on_election(&mut self, candidate: PeerId) -> Vec<ElectionAction> {
        if candidate > self.self_id {
            // Stronger candidacy: forward it unchanged.
            self.participating = true;
            vec![ElectionAction::Send(ElectionMsg::Election(candidate))]
        } else if candidate < self.self_id {
            // Weaker candidacy: absorb it. Take over with our own unless
            // one of ours is already circulating.
            if self.participating {
                Vec::new()
            } else {
                self.start()
            }
        } else {
            // Our own candidacy survived a full traversal: we are leader.
            self.participating = false;
            self.leader = Some(self.self_id);
            vec![
                ElectionAction::Send(ElectionMsg::Coordinator(self.self_id)),
                ElectionAction::Elected(self.self_id),
            ]
        }
    }

    fn on_coordinator(&mut self, leader: PeerId) -> Vec<ElectionAction> {
        if leader == self.self_id {
            // Our announcement came full circle; everyone has it.
            return Vec::new();
        }
        self.participating = false;
        self.leader = Some(leader);
        vec![
            ElectionAction::Send(ElectionMsg::Coordinator(leader)),
            ElectionAction::Elected(leader),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    #[test]
    fn deterministic_leader_is_max() {
        let ids = [id(3), id(7), id(1)];
        assert_eq!(deterministic_leader(ids.iter()), Some(id(7)));

        let empty: Vec<PeerId> = Vec::new();
        assert_eq!(deterministic_leader(empty.iter()), None);
    }

    /// Run a full election over an in-memory ring: messages emitted by
    /// seat `i` are delivered to seat `(i + 1) % n`.
    fn run_ring(seeds: &[u8], initiators: &[usize]) -> (Vec<ElectionMachine>, usize) {
        let mut machines: Vec<ElectionMachine> =
            seeds.iter().map(|&s| ElectionMachine::new(id(s))).collect();
        let n = machines.len();

        // (destination seat, message)
        let mut in_flight: Vec<(usize, ElectionMsg)> = Vec::new();
        for &seat in initiators {
            for action in machines[seat].start() {
                if let ElectionAction::Send(msg) = action {
                    in_flight.push(((seat + 1) % n, msg));
                }
            }
        }

        let mut hops = 0;
        while let Some((seat, msg)) = in_flight.pop() {
            hops += 1;
            assert!(hops < 10 * n, "election failed to terminate");
            for action in machines[seat].on_message(msg) {
                if let ElectionAction::Send(out) = action {
                    in_flight.push(((seat + 1) % n, out));
                }
            }
        }

        (machines, hops)
    }

    #[test]
    fn single_initiator_elects_max() {
        let seeds = [4u8, 9, 2, 7, 5];
        let (machines, _) = run_ring(&seeds, &[0]);
        for machine in &machines {
            assert_eq!(machine.leader(), Some(id(9)));
            assert!(!machine.is_participating());
        }
    }

    #[test]
    fn all_initiators_still_elect_exactly_one() {
        let seeds = [4u8, 9, 2, 7, 5];
        let (machines, _) = run_ring(&seeds, &[0, 1, 2, 3, 4]);
        for machine in &machines {
            assert_eq!(machine.leader(), Some(id(9)));
        }
    }

    #[test]
    fn terminates_within_two_traversals() {
        let seeds = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let n = seeds.len();
        // Worst case for Chang-Roberts: the max's candidacy starts right
        // after the max's seat and must travel nearly two full rings
        // (election pass + coordinator pass).
        let (machines, hops) = run_ring(&seeds, &[0]);
        assert!(hops <= 3 * n, "took {hops} hops for n={n}");
        for machine in &machines {
            assert_eq!(machine.leader(), Some(id(8)));
        }
    }

    #[test]
    fn weaker_candidacy_is_absorbed() {
        let mut machine = ElectionMachine::new(id(5));
        let actions = machine.on_message(ElectionMsg::Election(id(2)));
        // Takes over with its own candidacy.
        assert_eq!(
            actions,
            vec![ElectionAction::Send(ElectionMsg::Election(id(5)))]
        );

        // A second weaker candidacy while participating is dropped.
        assert!(machine.on_message(ElectionMsg::Election(id(3))).is_empty());
    }

    #[test]
    fn own_candidacy_returning_declares_leader() {
        let mut machine = ElectionMachine::new(id(5));
        machine.start();
        let actions = machine.on_message(ElectionMsg::Election(id(5)));
        assert!(actions.contains(&ElectionAction::Elected(id(5))));
        assert_eq!(machine.leader(), Some(id(5)));
    }

    #[test]
    fn coordinator_installs_and_forwards_once() {
        let mut machine = ElectionMachine::new(id(3));
        let actions = machine.on_message(ElectionMsg::Coordinator(id(9)));
        assert_eq!(
            actions,
            vec![
                ElectionAction::Send(ElectionMsg::Coordinator(id(9))),
                ElectionAction::Elected(id(9)),
            ]
        );

        // The leader swallows its own returning announcement.
        let mut leader = ElectionMachine::new(id(9));
        leader.start();
        leader.on_message(ElectionMsg::Election(id(9)));
        assert!(leader.on_message(ElectionMsg::Coordinator(id(9))).is_empty());
    }

    #[test]
    fn reset_allows_reelection() {
        let mut machine = ElectionMachine::new(id(5));
        machine.start();
        machine.on_message(ElectionMsg::Election(id(5)));
        assert_eq!(machine.leader(), Some(id(5)));

        machine.reset();
        assert_eq!(machine.leader(), None);
        assert!(!machine.is_participating());
        assert!(!machine.start().is_empty());
    }
}
