//! Global sequence numbers and their transport encoding.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A global, gap-free logical sequence number.
///
/// Sequence numbers are assigned by the syncer in append order and are
/// derived from the pool layout rather than stored independently:
/// `seq = pool_index * capacity + index_on_pool` (capacity 0 means a
/// single unbounded pool, where `seq = index_on_pool`).
///
/// On the wire a sequence ID is a compact base-36 string; callers treat
/// it as opaque.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SeqId(pub u64);

impl SeqId {
    /// Creates a sequence ID from its raw value.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Encodes this sequence ID as its transport string.
    #[must_use]
    pub fn encode(self) -> String {
        let mut n = self.0;
        if n == 0 {
            return "0".to_string();
        }

        // u64::MAX in base 36 is 13 digits.
        let mut buf = [0u8; 13];
        let mut i = buf.len();
        while n > 0 {
            i -= 1;
            buf[i] = BASE36_DIGITS[(n % 36) as usize];
            n /= 36;
        }

        String::from_utf8(buf[i..].to_vec()).unwrap_or_default()
    }

    /// Decodes a transport string back into a sequence ID.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSeqId`] if the string is empty,
    /// contains a non-base-36 character, or overflows.
    pub fn parse(s: &str) -> CoreResult<Self> {
        if s.is_empty() {
            return Err(CoreError::InvalidSeqId(s.to_string()));
        }

        let mut n: u64 = 0;
        for c in s.bytes() {
            let digit = match c {
                b'0'..=b'9' => u64::from(c - b'0'),
                b'a'..=b'z' => u64::from(c - b'a') + 10,
                b'A'..=b'Z' => u64::from(c - b'A') + 10,
                _ => return Err(CoreError::InvalidSeqId(s.to_string())),
            };

            n = n
                .checked_mul(36)
                .and_then(|v| v.checked_add(digit))
                .ok_or_else(|| CoreError::InvalidSeqId(s.to_string()))?;
        }

        Ok(Self(n))
    }

    /// Splits a sequence number into `(pool_index, index_on_pool)` for
    /// the given pool capacity.
    #[must_use]
    pub const fn split(self, capacity: u64) -> (u64, u64) {
        if capacity == 0 {
            (0, self.0)
        } else {
            (self.0 / capacity, self.0 % capacity)
        }
    }

    /// Joins `(pool_index, index_on_pool)` back into a sequence number.
    #[must_use]
    pub const fn join(pool_index: u64, index_on_pool: u64, capacity: u64) -> Self {
        if capacity == 0 {
            Self(index_on_pool)
        } else {
            Self(pool_index * capacity + index_on_pool)
        }
    }
}

impl fmt::Display for SeqId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for SeqId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
