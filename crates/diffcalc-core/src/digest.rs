//! Content-hash identifiers for images.

use std::fmt;

use crate::error::{Error, Result};

/// Number of bytes in a decoded digest.
///
/// The reference deployment uses an MD5-sized content hash. Any byte slice
/// of a different width is an internal invariant violation, not a recoverable
/// error: callers are expected to validate digests at the process boundary.
pub const DIGEST_LEN: usize = 16;

/// An opaque, content-addressed identifier for one image.
///
/// Digests are immutable and globally unique per byte-identical image. The
/// binary form (`[u8; DIGEST_LEN]`) is the persistence key; [`Digest::to_hex`]
/// produces the lowercase hex form used at external interfaces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    /// Builds a digest directly from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    /// Parses a lowercase (or mixed-case) hex string into a digest.
    ///
    /// Returns [`Error::InvalidDigest`] if the string isn't exactly
    /// `DIGEST_LEN * 2` hex characters.
    pub fn from_hex(s: &str) -> Result<Self> {
        let decoded = hex::decode(s).map_err(|e| Error::InvalidDigest(e.to_string()))?;
        let bytes: [u8; DIGEST_LEN] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| Error::InvalidDigest(format!("expected {DIGEST_LEN} bytes, got {}", v.len())))?;
        Ok(Self(bytes))
    }

    /// The raw bytes backing this digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding, the form used at all external interfaces.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Canonical ordering of an unordered pair, used as the dedup-cache key
    /// and to decide a stable "first" element when sampling a compute subset.
    #[must_use]
    pub fn canonical_pair(a: Digest, b: Digest) -> (Digest, Digest) {
        if a <= b {
            (a, b)
        } else {
            (b, a)
        }
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let d = Digest::from_bytes([0xAB; DIGEST_LEN]);
        let hex = d.to_hex();
        assert_eq!(hex, "ab".repeat(DIGEST_LEN));
        assert_eq!(Digest::from_hex(&hex).unwrap(), d);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(Digest::from_hex("ab").is_err());
    }

    #[test]
    fn rejects_non_hex() {
        assert!(Digest::from_hex(&"zz".repeat(DIGEST_LEN)).is_err());
    }

    #[test]
    fn canonical_pair_is_order_independent() {
        let a = Digest::from_bytes([1; DIGEST_LEN]);
        let b = Digest::from_bytes([2; DIGEST_LEN]);
        assert_eq!(Digest::canonical_pair(a, b), Digest::canonical_pair(b, a));
    }
}
