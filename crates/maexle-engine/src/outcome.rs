//! The Mäxle claim ladder.
//!
//! Two dice are read high-then-low (`5` and `3` is `53`, never `35`).
//! Mixed values rank lowest, doubles above them, and `21` (Mäxchen) beats
//! everything.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Every legal outcome, lowest to highest.
pub const LADDER: [u8; 21] = [
    31, 32, //
    41, 42, 43, //
    51, 52, 53, 54, //
    61, 62, 63, 64, 65, //
    11, 22, 33, 44, 55, 66, //
    21, // Mäxchen
];

/// A normalized two-dice outcome.
///
/// Ordering follows the ladder, not numeric value: `11` beats `65`, and
/// [`Outcome::MAEXCHEN`] beats `66`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Outcome(u8);

impl Outcome {
    /// The top of the ladder: a 2 and a 1.
    pub const MAEXCHEN: Outcome = Outcome(21);

    /// Normalize a raw two-die roll into its outcome.
    pub fn from_dice(d1: u8, d2: u8) -> Self {
        let (high, low) = if d1 >= d2 { (d1, d2) } else { (d2, d1) };
        Outcome(high * 10 + low)
    }

    /// Parse a claimed value; `None` if it is not on the ladder.
    pub fn from_value(value: u8) -> Option<Self> {
        LADDER.contains(&value).then_some(Outcome(value))
    }

    /// The two-digit wire representation.
    pub fn value(self) -> u8 {
        self.0
    }

    /// Position on the ladder, 0 (lowest) to 20 (Mäxchen).
    pub fn rank(self) -> usize {
        LADDER
            .iter()
            .position(|&v| v == self.0)
            .expect("constructed outcomes are always on the ladder")
    }

    /// Whether this is the top-ranked outcome.
    pub fn is_maexchen(self) -> bool {
        self == Self::MAEXCHEN
    }

    /// Strictly-higher comparison under the ladder order.
    pub fn beats(self, other: Outcome) -> bool {
        self.rank() > other.rank()
    }
}

impl Ord for Outcome {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl PartialOrd for Outcome {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Outcome> for u8 {
    fn from(outcome: Outcome) -> u8 {
        outcome.0
    }
}

impl TryFrom<u8> for Outcome {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Outcome::from_value(value).ok_or_else(|| format!("{value} is not on the claim ladder"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dice_normalize_high_low() {
        assert_eq!(Outcome::from_dice(3, 5).value(), 53);
        assert_eq!(Outcome::from_dice(5, 3).value(), 53);
        assert_eq!(Outcome::from_dice(4, 4).value(), 44);
    }

    #[test]
    fn two_one_is_maexchen() {
        assert_eq!(Outcome::from_dice(1, 2), Outcome::MAEXCHEN);
        assert_eq!(Outcome::from_dice(2, 1), Outcome::MAEXCHEN);
        assert!(Outcome::from_dice(2, 1).is_maexchen());
    }

    #[test]
    fn ladder_has_unique_entries() {
        for i in 0..LADDER.len() {
            for j in (i + 1)..LADDER.len() {
                assert_ne!(LADDER[i], LADDER[j]);
            }
        }
    }

    #[test]
    fn illegal_values_rejected() {
        assert!(Outcome::from_value(35).is_none());
        assert!(Outcome::from_value(12).is_none());
        assert!(Outcome::from_value(70).is_none());
        assert!(Outcome::from_value(0).is_none());
    }

    #[test]
    fn ladder_order() {
        let o = |v| Outcome::from_value(v).unwrap();

        // Mixed values compare numerically among themselves.
        assert!(o(32).beats(o(31)));
        assert!(o(65).beats(o(54)));

        // Doubles beat every mixed value.
        assert!(o(11).beats(o(65)));
        assert!(o(66).beats(o(11)));

        // Mäxchen beats everything.
        assert!(Outcome::MAEXCHEN.beats(o(66)));
        assert!(!o(31).beats(Outcome::MAEXCHEN));
    }

    #[test]
    fn every_roll_is_legal() {
        for d1 in 1..=6u8 {
            for d2 in 1..=6u8 {
                let outcome = Outcome::from_dice(d1, d2);
                assert!(Outcome::from_value(outcome.value()).is_some());
            }
        }
    }
}
