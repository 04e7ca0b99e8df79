//! Redis-backed [`diffcalc_core::DedupCache`] (§3, §4.4, §6).
//!
//! Keys are the canonical, order-independent pair of hex digests so that
//! `record(a, b)` and `record(b, a)` land on the same entry. Entries carry a
//! TTL: the cache is advisory and evictable by design (§9), so losing entries
//! only means extra recomputation, never an incorrect skip.
//!
//! # Example
//!
//! ```rust,ignore
//! use diffcalc_redis::RedisDedupCache;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = RedisDedupCache::new("redis://localhost:6379").await?;
//!     Ok(())
//! }
//! ```

mod error;

pub use error::Error;

use async_trait::async_trait;
use diffcalc_core::{DedupCache, Digest, Result as CoreResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, warn};

const DEFAULT_KEY_PREFIX: &str = "diffcalc";
const DEFAULT_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

/// A `DedupCache` backed by a Redis connection.
pub struct RedisDedupCache {
    connection_manager: ConnectionManager,
    key_prefix: String,
    ttl_seconds: u64,
}

impl RedisDedupCache {
    /// Connects with the default key prefix and TTL.
    pub async fn new(connection_string: &str) -> Result<Self, Error> {
        Self::with_key_prefix(connection_string, DEFAULT_KEY_PREFIX).await
    }

    /// Connects with a custom key prefix and the default TTL.
    pub async fn with_key_prefix(connection_string: &str, key_prefix: &str) -> Result<Self, Error> {
        let client = redis::Client::open(connection_string).map_err(|e| Error::Connection(e.to_string()))?;
        let connection_manager = ConnectionManager::new(client).await.map_err(|e| Error::Connection(e.to_string()))?;
        debug!(prefix = key_prefix, "connected dedup cache to redis");
        Ok(Self { connection_manager, key_prefix: key_prefix.to_string(), ttl_seconds: DEFAULT_TTL_SECONDS })
    }

    /// Overrides the default entry TTL.
    #[must_use]
    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    fn pair_key(&self, left: Digest, right: Digest) -> String {
        pair_key(&self.key_prefix, left, right)
    }
}

fn pair_key(prefix: &str, left: Digest, right: Digest) -> String {
    let (a, b) = Digest::canonical_pair(left, right);
    format!("{prefix}:dedup:{}:{}", a.to_hex(), b.to_hex())
}

#[async_trait]
impl DedupCache for RedisDedupCache {
    async fn filter(&self, left: Digest, candidates: &[Digest]) -> CoreResult<Vec<Digest>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = candidates.iter().map(|&right| self.pair_key(left, right)).collect();

        let mut conn = self.connection_manager.clone();
        let mut pipe = redis::pipe();
        for key in &keys {
            pipe.get(key);
        }
        let present: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| diffcalc_core::Error::from(Error::from(e)))?;

        Ok(candidates
            .iter()
            .zip(present)
            .filter_map(|(&candidate, entry)| if entry.is_none() { Some(candidate) } else { None })
            .collect())
    }

    async fn record(&self, left: Digest, right: Digest) -> CoreResult<()> {
        let key = self.pair_key(left, right);
        let mut conn = self.connection_manager.clone();
        let result: redis::RedisResult<()> = conn.set_ex(&key, 1u8, self.ttl_seconds).await;
        if let Err(err) = result {
            warn!(error = %err, key, "failed to record dedup cache entry");
            return Err(diffcalc_core::Error::from(Error::from(err)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = Digest::from_bytes([1; diffcalc_core::DIGEST_LEN]);
        let b = Digest::from_bytes([2; diffcalc_core::DIGEST_LEN]);
        assert_eq!(pair_key("diffcalc", a, b), pair_key("diffcalc", b, a));
    }

    #[test]
    fn pair_key_includes_prefix() {
        let a = Digest::from_bytes([1; diffcalc_core::DIGEST_LEN]);
        let b = Digest::from_bytes([2; diffcalc_core::DIGEST_LEN]);
        assert!(pair_key("myapp", a, b).starts_with("myapp:dedup:"));
    }
}
