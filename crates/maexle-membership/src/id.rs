//! Node identity tokens.

use std::fmt;

use rand::RngCore;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Unique peer identifier: a random 128-bit token assigned once at startup.
///
/// Immutable for the life of the process. The derived byte order is the
/// canonical total order used for election tie-breaking and ring seating;
/// on the wire and in logs it renders as a hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub [u8; 16]);

impl PeerId {
    /// Draw a fresh random identity.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Full hex rendering (32 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the wire rendering.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let bytes: [u8; 16] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..8])
    }
}

// Hex-string serde so ids are readable on the wire and usable as JSON map
// keys (scores are keyed by peer).
impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = PeerId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a 32-char hex peer id")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<PeerId, E> {
                PeerId::from_hex(value)
                    .ok_or_else(|| E::custom(format!("invalid peer id: {value}")))
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn hex_round_trip() {
        let id = PeerId::generate();
        assert_eq!(PeerId::from_hex(&id.to_hex()), Some(id));
        assert_eq!(PeerId::from_hex("zz"), None);
        assert_eq!(PeerId::from_hex("abcd"), None);
    }

    #[test]
    fn display_is_short() {
        let id = PeerId::from_bytes([0xab; 16]);
        assert_eq!(format!("{id}"), "abababab");
    }

    #[test]
    fn byte_order_is_total() {
        let low = PeerId::from_bytes([0u8; 16]);
        let high = PeerId::from_bytes([0xff; 16]);
        assert!(low < high);
        assert_eq!(low.cmp(&low), std::cmp::Ordering::Equal);
    }

    #[test]
    fn serde_as_hex_string() {
        let id = PeerId::from_bytes([0x11; 16]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));

        let back: PeerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn serde_works_as_map_key() {
        use std::collections::HashMap;

        let mut scores = HashMap::new();
        scores.insert(PeerId::from_bytes([0x22; 16]), 3u8);

        let json = serde_json::to_string(&scores).unwrap();
        let back: HashMap<PeerId, u8> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, scores);
    }
}
