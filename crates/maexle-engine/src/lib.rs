//! Dice domain and sealed commitments for the Maexle ring.
//!
//! The coordination layer treats the game as a black box behind the
//! [`GameEngine`] capability: roll an outcome, validate a claim against a
//! minimum, and seal/verify a hidden value. [`DiceEngine`] is the concrete
//! implementation for Mäxle (two dice, the 21-step claim ladder, Mäxchen on
//! top).
//!
//! # Commitments
//!
//! A turn's real roll travels sealed inside the token: a keyed hash over
//! `(hidden value, shared secret, fresh nonce)`. The hidden value rides in
//! the clear *inside the commitment only* - it is never broadcast
//! separately. Verification recomputes the hash; a mismatch means the
//! embedding peer tampered and loses regardless of the revealed value.
//! This is namespace-grade sealing, not cryptography against a determined
//! adversary.

mod commitment;
mod outcome;

pub use commitment::{Commitment, DiceEngine, GameEngine, Penalties};
pub use outcome::{Outcome, LADDER};

use thiserror::Error;

/// Result type for claim validation.
pub type ClaimResult = std::result::Result<Outcome, ClaimError>;

/// Why a claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClaimError {
    /// Not a value on the claim ladder (e.g. `35`, `70`).
    #[error("{0} is not a valid dice combination")]
    InvalidClaim(u8),

    /// Legal value, but it does not strictly beat the standing minimum.
    #[error("claim {claim} does not beat {minimum}")]
    NotHigher { claim: Outcome, minimum: Outcome },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_round_trip() {
        let engine = DiceEngine::new("tavern");
        let hidden = engine.roll();
        let announced = Outcome::MAEXCHEN;
        let sealed = engine.seal(hidden, announced);
        assert!(engine.verify(&sealed));
        assert_eq!(sealed.hidden, hidden);
    }

    #[test]
    fn claim_errors_render() {
        let e = ClaimError::InvalidClaim(35);
        assert!(e.to_string().contains("35"));

        let e = ClaimError::NotHigher {
            claim: Outcome::from_value(31).unwrap(),
            minimum: Outcome::from_value(55).unwrap(),
        };
        assert!(e.to_string().contains("31"));
    }
}
