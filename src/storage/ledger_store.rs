//! LedgerStore: the document store of ledger records.
//!
//! Documents are JSON `LedgerRecord`s keyed by `ledger_key(index)`, so any
//! range scan over keys is a scan over indices. Every document carries a
//! revision token `"<n>-<digest>"`; writes supplying a stale token fail.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::record::{ledger_key, parse_ledger_key, LedgerIndex, LedgerRecord};
use crate::storage::traits::{KvStore, WriteBatch};
use crate::utils::errors::StoreError;
use crate::utils::metrics::{LEDGERS_SAVED, LEDGERS_SKIPPED, METRICS};

/// Outcome of one `upsert_batch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertSummary {
    pub saved_count: usize,
    /// Lowest index in the batch, written or not.
    pub earliest_index: Option<LedgerIndex>,
    pub latest_index: Option<LedgerIndex>,
}

/// A stored document as read, before any decoding failure is acted on.
pub type StoredDoc = (String, Result<LedgerRecord, String>);

pub struct LedgerStore {
    kv: Arc<dyn KvStore>,
    // check-then-write must not interleave between batches
    write_lock: Mutex<()>,
}

fn revision_number(rev: &str) -> u64 {
    rev.split('-').next().and_then(|n| n.parse().ok()).unwrap_or(0)
}

fn next_revision(previous: Option<&str>, record: &LedgerRecord) -> Result<String, StoreError> {
    let n = previous.map(revision_number).unwrap_or(0) + 1;
    let body = serde_json::to_vec(&record.without_bookkeeping())?;
    let digest = blake3::hash(&body).to_hex();
    Ok(format!("{}-{}", n, &digest.as_str()[..16]))
}

fn decode_doc(key: &[u8], value: &[u8]) -> Result<(String, LedgerRecord), StoreError> {
    let key = String::from_utf8_lossy(key).into_owned();
    let record: LedgerRecord = serde_json::from_slice(value)?;
    Ok((key, record))
}

impl LedgerStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv, write_lock: Mutex::new(()) }
    }

    pub fn backend(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Store `records` in one bulk write.
    ///
    /// Records deep-equal to their stored copy are skipped. For the rest the
    /// stored revision is attached and bumped. If any record supplies a
    /// revision that differs from the stored one, nothing is written.
    pub async fn upsert_batch(&self, records: Vec<LedgerRecord>) -> Result<UpsertSummary, StoreError> {
        if records.is_empty() {
            return Ok(UpsertSummary::default());
        }
        // last occurrence of an index wins
        let incoming: BTreeMap<LedgerIndex, LedgerRecord> = records.into_iter().map(|r| (r.index, r)).collect();
        let (low, high) = match (incoming.keys().next(), incoming.keys().next_back()) {
            (Some(l), Some(h)) => (*l, *h),
            _ => return Ok(UpsertSummary::default()),
        };

        let _guard = self.write_lock.lock().await;

        let mut stored: BTreeMap<LedgerIndex, LedgerRecord> = BTreeMap::new();
        for (k, v) in self.kv.scan_range(ledger_key(low).as_bytes(), ledger_key(high).as_bytes()).await?.items {
            match decode_doc(&k, &v) {
                Ok((key, record)) => {
                    if let Some(index) = parse_ledger_key(&key) {
                        stored.insert(index, record);
                    }
                }
                // an unreadable document is overwritten like a missing one
                Err(e) => warn!(key = %String::from_utf8_lossy(&k), error = %e, "replacing undecodable document"),
            }
        }

        let mut batch = WriteBatch::new();
        let mut skipped = 0usize;
        for (index, mut record) in incoming {
            let key = ledger_key(index);
            let existing = stored.get(&index);
            if let Some(current) = existing {
                if current.content_eq(&record) {
                    skipped += 1;
                    continue;
                }
                if record.revision.is_some() && record.revision != current.revision {
                    return Err(StoreError::Conflict {
                        key,
                        stored: current.revision.clone(),
                        supplied: record.revision.clone(),
                    });
                }
            }
            record.revision = Some(next_revision(existing.and_then(|c| c.revision.as_deref()), &record)?);
            batch.put(key.into_bytes(), serde_json::to_vec(&record)?);
        }

        let saved_count = batch.len();
        if saved_count > 0 {
            self.kv.write_batch(batch).await?;
        }
        METRICS.add_counter(LEDGERS_SAVED, saved_count as u64);
        METRICS.add_counter(LEDGERS_SKIPPED, skipped as u64);
        debug!(low, high, saved_count, skipped, "upsert batch");
        if saved_count > 0 {
            info!(low, high, saved_count, "saved ledgers");
        }
        Ok(UpsertSummary { saved_count, earliest_index: Some(low), latest_index: Some(high) })
    }

    pub async fn exists(&self, index: LedgerIndex) -> Result<bool, StoreError> {
        Ok(self.kv.exists(ledger_key(index).as_bytes()).await?)
    }

    pub async fn get(&self, index: LedgerIndex) -> Result<Option<LedgerRecord>, StoreError> {
        let key = ledger_key(index);
        match self.kv.get(key.as_bytes()).await? {
            Some(v) => {
                let record: LedgerRecord = serde_json::from_slice(&v)?;
                if record.index != index {
                    return Err(StoreError::KeyMismatch { key, index: record.index });
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Stored records in `start..=end`, ascending. Missing indices are absent.
    pub async fn get_range(&self, start: LedgerIndex, end: LedgerIndex) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self.get_range_keyed(start, end).await?.into_iter().map(|(_, r)| r).collect())
    }

    /// Like `get_range` but keeps the raw stored key next to each record.
    pub async fn get_range_keyed(
        &self,
        start: LedgerIndex,
        end: LedgerIndex,
    ) -> Result<Vec<(String, LedgerRecord)>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let items = self.kv.scan_range(ledger_key(start).as_bytes(), ledger_key(end).as_bytes()).await?.items;
        items.iter().map(|(k, v)| decode_doc(k, v)).collect()
    }

    /// Raw documents in `start..=end`, each decoded on its own so one bad
    /// document does not hide its neighbours.
    pub async fn get_range_docs(&self, start: LedgerIndex, end: LedgerIndex) -> Result<Vec<StoredDoc>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        let items = self.kv.scan_range(ledger_key(start).as_bytes(), ledger_key(end).as_bytes()).await?.items;
        Ok(items
            .into_iter()
            .map(|(k, v)| {
                let key = String::from_utf8_lossy(&k).into_owned();
                let record = serde_json::from_slice::<LedgerRecord>(&v).map_err(|e| e.to_string());
                (key, record)
            })
            .collect())
    }

    pub async fn latest_index(&self) -> Result<Option<LedgerIndex>, StoreError> {
        Ok(self
            .kv
            .last_entry()
            .await?
            .and_then(|(k, _)| parse_ledger_key(&String::from_utf8_lossy(&k))))
    }

    pub async fn earliest_index(&self) -> Result<Option<LedgerIndex>, StoreError> {
        Ok(self
            .kv
            .first_entry()
            .await?
            .and_then(|(k, _)| parse_ledger_key(&String::from_utf8_lossy(&k))))
    }
}
