//! Storage trait definitions for scanrelay
//!
//! `ScanStore` is the single collaborator the routing core talks to for
//! cross-event state:
//! - dedup: "last seen" payload per unique scan identity
//! - aggregation buckets: queues of rendered items awaiting batch delivery
//! - invocation accounting per output binding
//! - retention: size and age eviction driven by the maintenance timer
//!
//! Every method is a single logical operation. Implementations must make each
//! call atomic with respect to concurrent callers on the same key.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A rendered content map queued in an aggregation bucket.
pub type BucketItem = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// PayloadDigest
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a raw scan payload.
///
/// Two payloads with the same digest are considered the same occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PayloadDigest(String);

impl PayloadDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        PayloadDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for PayloadDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Dedup
// ---------------------------------------------------------------------------

/// Answer of [`ScanStore::lookup_and_record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupOutcome {
    /// Payload recorded for the same identity before this call, if any.
    pub previous: Option<Vec<u8>>,
    /// `true` when the identity was never seen or its payload changed.
    pub is_new: bool,
}

impl LookupOutcome {
    /// First sighting of an identity.
    pub fn first_seen() -> Self {
        Self {
            previous: None,
            is_new: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Retention
// ---------------------------------------------------------------------------

/// Size and age limits enforced by the maintenance timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionLimits {
    /// Upper bound on the total bytes of recorded payloads. `None` = unlimited.
    pub max_size_bytes: Option<u64>,
    /// Records older than this are evicted. `None` = keep forever.
    pub max_age: Option<Duration>,
}

impl RetentionLimits {
    /// Whether any limit is configured at all.
    pub fn is_enabled(&self) -> bool {
        self.max_size_bytes.is_some() || self.max_age.is_some()
    }
}

// ---------------------------------------------------------------------------
// ScanStore
// ---------------------------------------------------------------------------

/// Dedup and aggregation store.
///
/// Guarantees:
/// - `lookup_and_record` atomically reads the prior payload for an identity
///   and records the current one.
/// - `append_to_bucket` atomically appends and, when the threshold is reached,
///   drains: no item is ever returned twice or lost between concurrent calls.
/// - Retention enforcement never touches aggregation buckets.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Look up the previous payload recorded under `unique_id` and record
    /// `payload` as the latest one.
    ///
    /// An identity whose payload digest is unchanged is reported as not new and
    /// its record is left untouched.
    async fn lookup_and_record(&self, unique_id: &str, payload: &[u8])
        -> StorageResult<LookupOutcome>;

    /// Append `item` to the bucket under `key`.
    ///
    /// - An empty `item` is not appended.
    /// - With `force_append` the item is queued and nothing is returned.
    /// - Otherwise, when the bucket holds at least `threshold` items after the
    ///   append, the whole bucket is drained and returned; below the threshold
    ///   an empty vector is returned.
    async fn append_to_bucket(
        &self,
        key: &str,
        item: BucketItem,
        threshold: usize,
        force_append: bool,
    ) -> StorageResult<Vec<BucketItem>>;

    /// Drain and return everything queued under `key`.
    async fn drain_bucket(&self, key: &str) -> StorageResult<Vec<BucketItem>> {
        self.append_to_bucket(key, BucketItem::new(), 0, false).await
    }

    /// Account one delivered message for `binding`.
    async fn record_invocation(&self, binding: &str) -> StorageResult<()>;

    /// Number of messages accounted for `binding`.
    async fn invocation_count(&self, binding: &str) -> StorageResult<u64>;

    /// Evict oldest dedup records until the total size fits `limit`.
    /// Returns the number of evicted records.
    async fn enforce_size_limit(&self, limit: u64) -> StorageResult<usize>;

    /// Evict dedup records older than `max_age`. Returns the number evicted.
    async fn enforce_age_limit(&self, max_age: Duration) -> StorageResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_hex() {
        let a = PayloadDigest::from_bytes(b"{\"image\":\"alpine\"}");
        let b = PayloadDigest::from_bytes(b"{\"image\":\"alpine\"}");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
        assert_ne!(a, PayloadDigest::from_bytes(b"{}"));
    }

    #[test]
    fn retention_enabled_when_any_limit_set() {
        assert!(!RetentionLimits::default().is_enabled());
        let limits = RetentionLimits {
            max_size_bytes: Some(1024),
            max_age: None,
        };
        assert!(limits.is_enabled());
    }
}
