//! Successor computation over the seating order.

use std::collections::HashSet;

use maexle_membership::PeerId;

/// Sort ids into the canonical seating order (byte order, deduplicated).
pub fn canonical_order(ids: impl IntoIterator<Item = PeerId>) -> Vec<PeerId> {
    let mut order: Vec<PeerId> = ids.into_iter().collect();
    order.sort();
    order.dedup();
    order
}

/// The next alive peer after `node` in the circular seating order.
///
/// Walks forward from `node`'s seat, skipping anyone not in `alive`,
/// wrapping at the end. `None` when `node` is not seated or no *other*
/// alive peer exists (a ring of one has no successor - game-over
/// territory for the caller).
pub fn successor_of(order: &[PeerId], node: &PeerId, alive: &HashSet<PeerId>) -> Option<PeerId> {
    walk_from(order, node, alive, 1)
}

/// The previous alive peer before `node` - the peer whose successor is
/// `node`. Used to treat broadcast election traffic as ring traffic.
pub fn predecessor_of(order: &[PeerId], node: &PeerId, alive: &HashSet<PeerId>) -> Option<PeerId> {
    let idx = order.iter().position(|id| id == node)?;
    for step in 1..order.len() {
        let candidate = &order[(idx + order.len() - step) % order.len()];
        if candidate != node && alive.contains(candidate) {
            return Some(*candidate);
        }
    }
    None
}

/// Who starts the next round after `from` lost (or dropped out): `from`
/// itself when still alive, otherwise the first alive peer after it.
pub fn next_starter(order: &[PeerId], from: &PeerId, alive: &HashSet<PeerId>) -> Option<PeerId> {
    let idx = order.iter().position(|id| id == from)?;
    for step in 0..order.len() {
        let candidate = &order[(idx + step) % order.len()];
        if alive.contains(candidate) {
            return Some(*candidate);
        }
    }
    None
}

fn walk_from(
    order: &[PeerId],
    node: &PeerId,
    alive: &HashSet<PeerId>,
    first_step: usize,
) -> Option<PeerId> {
    let idx = order.iter().position(|id| id == node)?;
    for step in first_step..order.len() {
        let candidate = &order[(idx + step) % order.len()];
        if candidate != node && alive.contains(candidate) {
            return Some(*candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(seed: u8) -> PeerId {
        PeerId::from_bytes([seed; 16])
    }

    fn alive(seeds: &[u8]) -> HashSet<PeerId> {
        seeds.iter().map(|&s| id(s)).collect()
    }

    #[test]
    fn canonical_order_sorts_and_dedups() {
        let order = canonical_order([id(3), id(1), id(3), id(2)]);
        assert_eq!(order, vec![id(1), id(2), id(3)]);
    }

    #[test]
    fn successor_wraps_circularly() {
        let order = vec![id(1), id(2), id(3)];
        let all = alive(&[1, 2, 3]);

        assert_eq!(successor_of(&order, &id(1), &all), Some(id(2)));
        assert_eq!(successor_of(&order, &id(3), &all), Some(id(1)));
    }

    #[test]
    fn successor_skips_dead_seats() {
        let order = vec![id(1), id(2), id(3), id(4)];
        let living = alive(&[1, 3]);

        assert_eq!(successor_of(&order, &id(1), &living), Some(id(3)));
        assert_eq!(successor_of(&order, &id(3), &living), Some(id(1)));
    }

    #[test]
    fn ring_of_one_has_no_successor() {
        let order = vec![id(1), id(2)];
        assert_eq!(successor_of(&order, &id(1), &alive(&[1])), None);
    }

    #[test]
    fn unseated_node_has_no_successor() {
        let order = vec![id(1), id(2)];
        assert_eq!(successor_of(&order, &id(9), &alive(&[1, 2])), None);
    }

    #[test]
    fn predecessor_inverts_successor() {
        let order = vec![id(1), id(2), id(3), id(4)];
        let living = alive(&[1, 2, 4]);

        for node in [id(1), id(2), id(4)] {
            let succ = successor_of(&order, &node, &living).unwrap();
            assert_eq!(predecessor_of(&order, &succ, &living), Some(node));
        }
    }

    #[test]
    fn starter_is_loser_when_alive() {
        let order = vec![id(1), id(2), id(3)];
        assert_eq!(next_starter(&order, &id(2), &alive(&[1, 2, 3])), Some(id(2)));
    }

    #[test]
    fn starter_falls_through_to_successor_of_dead_loser() {
        let order = vec![id(1), id(2), id(3)];
        assert_eq!(next_starter(&order, &id(2), &alive(&[1, 3])), Some(id(3)));
        // And wraps.
        assert_eq!(next_starter(&order, &id(3), &alive(&[1])), Some(id(1)));
    }

    proptest! {
        /// Successors over the alive set form one cycle covering every
        /// alive peer - the property that makes independently computed
        /// links agree on a single ring.
        #[test]
        fn successors_form_a_single_cycle(seeds in prop::collection::btree_set(0u8..64, 2..20)) {
            let order = canonical_order(seeds.iter().map(|&s| id(s)));
            let living: HashSet<PeerId> = order.iter().copied().collect();

            let start = order[0];
            let mut seen = vec![start];
            let mut cursor = start;
            loop {
                cursor = successor_of(&order, &cursor, &living).unwrap();
                if cursor == start {
                    break;
                }
                prop_assert!(!seen.contains(&cursor), "revisited {cursor} before closing");
                seen.push(cursor);
            }
            prop_assert_eq!(seen.len(), order.len());
        }

        /// Dead seats never appear as anyone's successor.
        #[test]
        fn dead_seats_are_skipped(
            seeds in prop::collection::btree_set(0u8..64, 3..20),
            dead_picks in prop::collection::vec(any::<prop::sample::Index>(), 1..3),
        ) {
            let order = canonical_order(seeds.iter().map(|&s| id(s)));
            let mut living: HashSet<PeerId> = order.iter().copied().collect();
            for pick in &dead_picks {
                let victim = order[pick.index(order.len())];
                living.remove(&victim);
            }
            prop_assume!(living.len() >= 2);

            for node in &living {
                let succ = successor_of(&order, node, &living).unwrap();
                prop_assert!(living.contains(&succ));
                prop_assert_ne!(succ, *node);
            }
        }
    }
}
