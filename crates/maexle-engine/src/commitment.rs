//! Sealed commitments and the [`GameEngine`] capability.

use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::{ClaimError, ClaimResult, Outcome};

/// A keyed-hash seal over a hidden roll.
///
/// The hidden value is carried in the clear inside the commitment; the hash
/// binds it to the group secret and a fresh nonce so the holder cannot swap
/// it after the fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    /// Hex-encoded blake3 over `(hidden, secret, nonce)`.
    pub hash: String,
    /// Hex-encoded 8-byte nonce.
    pub nonce: String,
    /// The sealed roll.
    pub hidden: Outcome,
}

/// Strike costs, configurable per table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Penalties {
    /// A normal lost round.
    pub normal: u8,
    /// Losing against (or silently folding to) Mäxchen.
    pub maexchen: u8,
}

impl Default for Penalties {
    fn default() -> Self {
        Self {
            normal: 1,
            maexchen: 2,
        }
    }
}

/// The game rules as consumed by the coordination layer.
///
/// Three operations: produce an outcome, validate a claim against a standing
/// minimum, and seal/verify a hidden value. Everything else about the game
/// lives behind this seam.
pub trait GameEngine: Send + Sync {
    /// Roll a fresh outcome.
    fn roll(&self) -> Outcome;

    /// Validate a raw claimed value against the standing minimum.
    ///
    /// `None` is the neutral minimum at the start of a round and accepts
    /// any legal claim.
    fn validate_claim(&self, claim: u8, minimum: Option<Outcome>) -> ClaimResult;

    /// Seal a hidden roll behind a fresh nonce.
    fn seal(&self, hidden: Outcome, announced: Outcome) -> Commitment;

    /// Recompute the seal and compare. `false` means tampering.
    fn verify(&self, commitment: &Commitment) -> bool;
}

/// Two-dice Mäxle engine keyed on the shared group secret.
#[derive(Debug, Clone)]
pub struct DiceEngine {
    secret: String,
}

impl DiceEngine {
    /// Create an engine for a group secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn seal_hash(&self, hidden: Outcome, nonce: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[hidden.value()]);
        hasher.update(self.secret.as_bytes());
        hasher.update(nonce.as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

impl GameEngine for DiceEngine {
    fn roll(&self) -> Outcome {
        let mut rng = rand::thread_rng();
        let d1 = rng.gen_range(1..=6);
        let d2 = rng.gen_range(1..=6);
        Outcome::from_dice(d1, d2)
    }

    fn validate_claim(&self, claim: u8, minimum: Option<Outcome>) -> ClaimResult {
        let claim = Outcome::from_value(claim).ok_or(ClaimError::InvalidClaim(claim))?;
        match minimum {
            Some(minimum) if !claim.beats(minimum) => Err(ClaimError::NotHigher { claim, minimum }),
            _ => Ok(claim),
        }
    }

    fn seal(&self, hidden: Outcome, _announced: Outcome) -> Commitment {
        let mut nonce_bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = hex::encode(nonce_bytes);

        Commitment {
            hash: self.seal_hash(hidden, &nonce),
            nonce,
            hidden,
        }
    }

    fn verify(&self, commitment: &Commitment) -> bool {
        self.seal_hash(commitment.hidden, &commitment.nonce) == commitment.hash
    }
}
