//! In-memory `ScanStore` backend
//!
//! All state lives behind one `std::sync::Mutex` per concern, so every trait
//! call is atomic. Locks are never held across an `.await`.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Clone)]
struct ScanEntry {
    payload: Vec<u8>,
    digest: PayloadDigest,
    recorded_at: DateTime<Utc>,
}

/// In-memory store backed by `HashMap`s for records, buckets and counters.
#[derive(Debug, Default)]
pub struct MemoryScanStore {
    records: Mutex<HashMap<String, ScanEntry>>,
    buckets: Mutex<HashMap<String, Vec<BucketItem>>>,
    invocations: Mutex<HashMap<String, u64>>,
}

impl MemoryScanStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dedup records currently held.
    pub fn record_count(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of items pending under `key`, without draining.
    pub fn pending(&self, key: &str) -> usize {
        self.buckets
            .lock()
            .map(|b| b.get(key).map(Vec::len).unwrap_or(0))
            .unwrap_or(0)
    }

    /// Total payload bytes held by dedup records.
    pub fn total_size(&self) -> u64 {
        self.records
            .lock()
            .map(|r| r.values().map(|e| e.payload.len() as u64).sum())
            .unwrap_or(0)
    }

    #[cfg(test)]
    fn backdate(&self, unique_id: &str, by: chrono::Duration) {
        let mut records = self.records.lock().unwrap();
        if let Some(entry) = records.get_mut(unique_id) {
            entry.recorded_at -= by;
        }
    }
}

#[async_trait]
impl ScanStore for MemoryScanStore {
    async fn lookup_and_record(
        &self,
        unique_id: &str,
        payload: &[u8],
    ) -> StorageResult<LookupOutcome> {
        let digest = PayloadDigest::from_bytes(payload);
        let mut records = self.records.lock()?;

        if let Some(existing) = records.get(unique_id) {
            if existing.digest == digest {
                debug!(unique_id = %unique_id, digest = %digest.short(), "payload unchanged");
                return Ok(LookupOutcome {
                    previous: Some(existing.payload.clone()),
                    is_new: false,
                });
            }
        }

        let previous = records
            .insert(
                unique_id.to_string(),
                ScanEntry {
                    payload: payload.to_vec(),
                    digest,
                    recorded_at: Utc::now(),
                },
            )
            .map(|e| e.payload);

        Ok(LookupOutcome {
            previous,
            is_new: true,
        })
    }

    async fn append_to_bucket(
        &self,
        key: &str,
        item: BucketItem,
        threshold: usize,
        force_append: bool,
    ) -> StorageResult<Vec<BucketItem>> {
        if key.is_empty() {
            return Err(StorageError::InvalidBucketKey {
                key: key.to_string(),
            });
        }
        let mut buckets = self.buckets.lock()?;
        let queue = buckets.entry(key.to_string()).or_default();

        if !item.is_empty() {
            queue.push(item);
        }

        if force_append || queue.len() < threshold {
            return Ok(Vec::new());
        }

        let drained = std::mem::take(queue);
        buckets.remove(key);
        Ok(drained)
    }

    async fn record_invocation(&self, binding: &str) -> StorageResult<()> {
        let mut invocations = self.invocations.lock()?;
        *invocations.entry(binding.to_string()).or_insert(0) += 1;
        Ok(())
    }

    async fn invocation_count(&self, binding: &str) -> StorageResult<u64> {
        let invocations = self.invocations.lock()?;
        Ok(invocations.get(binding).copied().unwrap_or(0))
    }

    async fn enforce_size_limit(&self, limit: u64) -> StorageResult<usize> {
        let mut records = self.records.lock()?;
        let mut total: u64 = records.values().map(|e| e.payload.len() as u64).sum();
        if total <= limit {
            return Ok(0);
        }

        let mut by_age: Vec<(String, DateTime<Utc>, u64)> = records
            .iter()
            .map(|(k, e)| (k.clone(), e.recorded_at, e.payload.len() as u64))
            .collect();
        by_age.sort_by_key(|(_, at, _)| *at);

        let mut evicted = 0;
        for (key, _, size) in by_age {
            if total <= limit {
                break;
            }
            records.remove(&key);
            total -= size;
            evicted += 1;
        }
        Ok(evicted)
    }

    async fn enforce_age_limit(&self, max_age: Duration) -> StorageResult<usize> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| StorageError::Unavailable(format!("age limit out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;
        let mut records = self.records.lock()?;
        let before = records.len();
        records.retain(|_, e| e.recorded_at >= cutoff);
        Ok(before - records.len())
    }
}
