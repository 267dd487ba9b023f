//! Disk-backed store-and-forward queue for the edge uplink.
//!
//! Backed by `sled` rather than one-file-per-record: a single embedded
//! database gives crash-safe durability plus ordered iteration without
//! managing a directory of JSON files by hand. Keys are big-endian
//! `u64` sequence numbers, so sled's natural key ordering is also
//! insertion order — the oldest record always sorts first.

mod record;

pub use record::{QueueRecord, QueuedEntry};

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Eviction kicks in once either cap is exceeded, dropping the oldest
/// records first.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub max_records: usize,
    pub max_bytes: u64,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            max_records: 100_000,
            max_bytes: 50 * 1024 * 1024,
        }
    }
}

/// A crash-safe FIFO of pending uploads, with dual count/byte caps.
///
/// All size-changing operations (`enqueue`, eviction) go through a
/// single `Mutex` so the two caps are always checked against a
/// consistent view — sled itself allows concurrent readers/writers, but
/// "is the queue over its cap" is a compound check that needs to be
/// serialized.
pub struct DurableQueue {
    db: sled::Db,
    next_id: AtomicU64,
    limits: QueueLimits,
    manage_lock: Mutex<()>,
}

impl DurableQueue {
    pub fn open<P: AsRef<Path>>(path: P, limits: QueueLimits) -> Result<Self, QueueError> {
        let db = sled::open(path)?;
        let next_id = db
            .iter()
            .keys()
            .next_back()
            .transpose()?
            .map(|k| decode_key(&k) + 1)
            .unwrap_or(0);
        Ok(Self {
            db,
            next_id: AtomicU64::new(next_id),
            limits,
            manage_lock: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub fn open_temp(limits: QueueLimits) -> Result<Self, QueueError> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            db,
            next_id: AtomicU64::new(0),
            limits,
            manage_lock: Mutex::new(()),
        })
    }

    /// Appends a record and returns its sequence id. If either cap is
    /// now exceeded, evicts the oldest records down to a safe margin:
    /// at least 100 records or 10% of the current count, whichever is
    /// larger, matching the uploader's preference for a handful of big
    /// eviction sweeps over constant one-at-a-time trimming.
    pub fn enqueue(&self, record: QueueRecord) -> Result<u64, QueueError> {
        let _guard = self.manage_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let value = serde_json::to_vec(&record)?;
        self.db.insert(encode_key(id), value)?;
        self.evict_if_over_cap()?;
        Ok(id)
    }

    fn evict_if_over_cap(&self) -> Result<(), QueueError> {
        let count = self.db.len();
        let bytes = self.db.size_on_disk().unwrap_or(0);
        if count <= self.limits.max_records && bytes <= self.limits.max_bytes {
            return Ok(());
        }
        let to_drop = (count / 10).max(100).min(count);
        let mut dropped = 0;
        for entry in self.db.iter() {
            if dropped >= to_drop {
                break;
            }
            let (key, _) = entry?;
            self.db.remove(key)?;
            dropped += 1;
        }
        Ok(())
    }

    /// Peeks the oldest `limit` records without removing them. Callers
    /// ack successful uploads via [`Self::remove`].
    pub fn dequeue_batch(&self, limit: usize) -> Result<Vec<QueuedEntry>, QueueError> {
        let mut out = Vec::with_capacity(limit);
        for entry in self.db.iter().take(limit) {
            let (key, value) = entry?;
            let id = decode_key(&key);
            let record: QueueRecord = serde_json::from_slice(&value)?;
            out.push(QueuedEntry { id, record });
        }
        Ok(out)
    }

    /// Removes acknowledged records. Idempotent: removing an id that's
    /// already gone is not an error.
    pub fn remove(&self, ids: &[u64]) -> Result<(), QueueError> {
        for &id in ids {
            self.db.remove(encode_key(id))?;
        }
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.db.len()
    }

    pub fn pending_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }

    /// Runs sled's background compaction. Safe to call periodically
    /// from the uploader's tick loop.
    pub fn compact(&self) -> Result<(), QueueError> {
        self.db.flush()?;
        Ok(())
    }
}

fn encode_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn decode_key(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PositionSample;

    fn sample_record(ts_ms: i64) -> QueueRecord {
        QueueRecord::Position {
            vehicle_id: "veh-1".to_string(),
            sample: PositionSample {
                ts_ms,
                lat: 40.0,
                lon: -86.0,
                speed_mps: 10.0,
                heading_deg: 0.0,
                altitude_m: 200.0,
                hdop: 1.0,
                satellites: 8,
            },
            is_simulated: false,
        }
    }

    #[test]
    fn enqueue_and_dequeue_preserves_order() {
        let q = DurableQueue::open_temp(QueueLimits::default()).unwrap();
        q.enqueue(sample_record(1000)).unwrap();
        q.enqueue(sample_record(2000)).unwrap();
        q.enqueue(sample_record(3000)).unwrap();

        let batch = q.dequeue_batch(10).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].record.ts_ms(), 1000);
        assert_eq!(batch[2].record.ts_ms(), 3000);
    }

    #[test]
    fn dequeue_does_not_remove() {
        let q = DurableQueue::open_temp(QueueLimits::default()).unwrap();
        q.enqueue(sample_record(1000)).unwrap();
        let _ = q.dequeue_batch(10).unwrap();
        assert_eq!(q.pending_count(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let q = DurableQueue::open_temp(QueueLimits::default()).unwrap();
        let id = q.enqueue(sample_record(1000)).unwrap();
        q.remove(&[id]).unwrap();
        q.remove(&[id]).unwrap();
        assert_eq!(q.pending_count(), 0);
    }

    #[test]
    fn evicts_oldest_when_over_count_cap() {
        let limits = QueueLimits {
            max_records: 10,
            max_bytes: u64::MAX,
        };
        let q = DurableQueue::open_temp(limits).unwrap();
        for i in 0..15 {
            q.enqueue(sample_record(1000 + i)).unwrap();
        }
        assert!(q.pending_count() <= 10);
        let batch = q.dequeue_batch(1).unwrap();
        // Oldest entries should have been evicted first.
        assert!(batch[0].record.ts_ms() > 1000);
    }
}
