//! Ring positions in the 63-bit key space.
//!
//! Node identifiers and record keys are drawn from the same space, so both are
//! plain [`Token`]s. The aliases exist only to make signatures read better.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::error::{Error, Result};

/// Number of bits in the key space.
pub const KEY_SPACE_BITS: u32 = 63;

/// Largest value in the key space, also the mask applied on wraparound.
pub const KEY_SPACE_MASK: u64 = (1u64 << KEY_SPACE_BITS) - 1;

/// A position on the ring: an integer in `[0, 2^63)`.
///
/// Ordering is the plain numeric order; circular comparisons go through
/// [`crate::ring::inside`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct Token(u64);

/// Identifier of a peer on the ring.
pub type NodeId = Token;

/// Key of a stored record.
pub type RecordKey = Token;

impl Token {
    /// Start of the ring.
    pub const MIN: Token = Token(0);
    /// End of the ring.
    pub const MAX: Token = Token(KEY_SPACE_MASK);

    /// Creates a token, rejecting values outside the key space.
    pub fn new(value: u64) -> Result<Self> {
        if value > KEY_SPACE_MASK {
            return Err(Error::InvalidToken(value));
        }
        Ok(Token(value))
    }

    /// Creates a token reducing `value` modulo `2^63`.
    #[inline]
    pub const fn wrapping(value: u64) -> Self {
        Token(value & KEY_SPACE_MASK)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Clockwise distance from `self` to `other`.
    #[inline]
    pub const fn distance_to(self, other: Token) -> u64 {
        other.0.wrapping_sub(self.0) & KEY_SPACE_MASK
    }

    /// Position `delta` steps clockwise from `self`.
    #[inline]
    pub const fn offset(self, delta: u64) -> Token {
        Token::wrapping(self.0.wrapping_add(delta & KEY_SPACE_MASK))
    }

    /// Start of finger slot `slot`: `(self + 2^slot) mod 2^63`.
    ///
    /// # Panics
    ///
    /// Panics if `slot >= 63`.
    #[inline]
    pub fn finger_start(self, slot: usize) -> Token {
        assert!(slot < KEY_SPACE_BITS as usize, "finger slot {slot} out of range");
        self.offset(1u64 << slot)
    }

    /// Hashes arbitrary bytes onto the ring.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = SipHasher13::new();
        data.hash(&mut hasher);
        Token::wrapping(hasher.finish())
    }

    /// Hashes a string key onto the ring.
    pub fn from_key(key: &str) -> Self {
        Self::from_bytes(key.as_bytes())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for Token {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self> {
        Token::new(value)
    }
}

impl From<Token> for u64 {
    fn from(token: Token) -> u64 {
        token.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_out_of_range() {
        assert!(Token::new(KEY_SPACE_MASK).is_ok());
        assert!(matches!(
            Token::new(KEY_SPACE_MASK + 1),
            Err(Error::InvalidToken(v)) if v == KEY_SPACE_MASK + 1
        ));
    }

    #[test]
    fn test_distance_wraps() {
        assert_eq!(Token(100).distance_to(Token(200)), 100);
        assert_eq!(Token::MAX.distance_to(Token(0)), 1);
        assert_eq!(Token(200).distance_to(Token(100)), KEY_SPACE_MASK - 99);
        assert_eq!(Token(5).distance_to(Token(5)), 0);
    }

    #[test]
    fn test_finger_start() {
        let id = Token(10);
        assert_eq!(id.finger_start(0), Token(11));
        assert_eq!(id.finger_start(3), Token(18));
        // 2^62 + 2^62 wraps to zero.
        assert_eq!(Token(1 << 62).finger_start(62), Token(0));
        assert_eq!(Token::MAX.finger_start(0), Token(0));
    }

    #[test]
    fn test_hashing_stays_in_key_space() {
        for key in ["a", "node-1", "record-42", ""] {
            assert!(Token::from_key(key).value() <= KEY_SPACE_MASK);
        }
        assert_eq!(Token::from_key("node-1"), Token::from_key("node-1"));
        assert_ne!(Token::from_key("node-1"), Token::from_key("node-2"));
    }
}
