//! ChainAuditor: re-verifies the stored chain from a start index upward.
//! Read-only; the last good index it reports is where a historical
//! backfill should restart.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::ledger::record::{parse_ledger_key, LedgerIndex, LedgerRecord};
use crate::ledger::validator::validate;
use crate::storage::ledger_store::{LedgerStore, StoredDoc};
use crate::utils::errors::{StoreError, ValidationError};
use crate::utils::metrics::{AUDIT_CHECKED, METRICS};

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub batch_size: u32,
    /// Wait before re-reading a range with missing ledgers.
    pub gap_retry_delay: Duration,
    pub genesis_index: LedgerIndex,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { batch_size: 1000, gap_retry_delay: Duration::from_secs(2), genesis_index: 1 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditFailure {
    Missing(LedgerIndex),
    KeyMismatch { key: String, index: LedgerIndex },
    ParentMismatch { index: LedgerIndex, expected: String, found: String },
    /// Stored bytes at this index are not a ledger document.
    Undecodable { index: LedgerIndex, reason: String },
    Invalid(ValidationError),
}

impl AuditFailure {
    pub fn index(&self) -> LedgerIndex {
        match self {
            AuditFailure::Missing(i) => *i,
            AuditFailure::KeyMismatch { index, .. } => *index,
            AuditFailure::ParentMismatch { index, .. } => *index,
            AuditFailure::Undecodable { index, .. } => *index,
            AuditFailure::Invalid(e) => match e {
                ValidationError::TransactionSetMismatch { index, .. }
                | ValidationError::TransactionIdMismatch { index, .. }
                | ValidationError::HeaderMismatch { index, .. }
                | ValidationError::UnexpectedHash { index, .. }
                | ValidationError::MalformedHex { index, .. } => *index,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Completed { last_index: Option<LedgerIndex>, checked: u64 },
    /// `last_good` is `None` when the very first ledger failed.
    BrokenAt { last_good: Option<LedgerIndex>, failure: AuditFailure },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    Progress { through: LedgerIndex, checked: u64 },
    GapRetry { from: LedgerIndex, to: LedgerIndex },
    Finished(AuditOutcome),
}

pub struct ChainAuditor {
    store: Arc<LedgerStore>,
    cfg: AuditConfig,
    events: Option<mpsc::UnboundedSender<AuditEvent>>,
}

impl ChainAuditor {
    pub fn new(store: Arc<LedgerStore>, cfg: AuditConfig) -> Self {
        Self { store, cfg, events: None }
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<AuditEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    fn emit(&self, ev: AuditEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(ev);
        }
    }

    fn finish(&self, outcome: AuditOutcome) -> AuditOutcome {
        match &outcome {
            AuditOutcome::Completed { last_index, checked } => {
                info!(last_index = ?last_index, checked, "audit completed")
            }
            AuditOutcome::BrokenAt { last_good, failure } => {
                error!(last_good = ?last_good, failure = ?failure, "audit found a broken chain")
            }
        }
        self.emit(AuditEvent::Finished(outcome.clone()));
        outcome
    }

    async fn read_batch(&self, from: LedgerIndex, to: LedgerIndex) -> Result<Vec<StoredDoc>, StoreError> {
        let rows = self.store.get_range_docs(from, to).await?;
        if rows.len() as u64 == (to - from) as u64 + 1 {
            return Ok(rows);
        }
        warn!(from, to, found = rows.len(), "gap in stored range, retrying once");
        self.emit(AuditEvent::GapRetry { from, to });
        tokio::time::sleep(self.cfg.gap_retry_delay).await;
        self.store.get_range_docs(from, to).await
    }

    fn check_one(
        expected_index: LedgerIndex,
        key: &str,
        record: &LedgerRecord,
        prev: Option<&LedgerRecord>,
    ) -> Result<(), AuditFailure> {
        if parse_ledger_key(key) != Some(record.index) || record.index != expected_index {
            return Err(AuditFailure::KeyMismatch { key: key.to_string(), index: record.index });
        }
        if let Some(prev) = prev {
            if !record.follows(prev) {
                return Err(AuditFailure::ParentMismatch {
                    index: record.index,
                    expected: prev.hash.clone(),
                    found: record.parent_hash.clone(),
                });
            }
        }
        validate(record).map_err(AuditFailure::Invalid)
    }

    /// Verify stored ledgers `start..=end`. `end` defaults to the highest
    /// stored index. The first ledger is linked against its stored
    /// predecessor when one exists.
    pub async fn audit_from(&self, start: LedgerIndex, end: Option<LedgerIndex>) -> Result<AuditOutcome, StoreError> {
        let start = start.max(self.cfg.genesis_index);
        let end = match end {
            Some(e) => Some(e),
            None => self.store.latest_index().await?,
        };
        let end = match end {
            Some(e) if e >= start => e,
            _ => return Ok(self.finish(AuditOutcome::Completed { last_index: None, checked: 0 })),
        };
        info!(start, end, "audit started");

        // an unreadable predecessor leaves the first ledger unlinked
        let mut prev: Option<LedgerRecord> = if start > self.cfg.genesis_index {
            match self.store.get_range_docs(start - 1, start - 1).await?.pop() {
                Some((_, Ok(record))) if record.index == start - 1 => Some(record),
                _ => None,
            }
        } else {
            None
        };
        let mut last_good: Option<LedgerIndex> = None;
        let mut checked: u64 = 0;
        let batch = self.cfg.batch_size.max(1);
        let mut from = start;

        loop {
            let to = from.saturating_add(batch - 1).min(end);
            let rows = self.read_batch(from, to).await?;
            let mut rows = rows.into_iter().peekable();

            for expected in from..=to {
                let row = match rows.peek() {
                    Some((key, _)) if parse_ledger_key(key) == Some(expected) => rows.next(),
                    // a key that is not of this store's shape is reported as such
                    Some((key, _)) if parse_ledger_key(key).is_none() => rows.next(),
                    _ => None,
                };
                let Some((key, decoded)) = row else {
                    METRICS.add_counter(AUDIT_CHECKED, checked);
                    return Ok(self.finish(AuditOutcome::BrokenAt { last_good, failure: AuditFailure::Missing(expected) }));
                };
                let record = match decoded {
                    Ok(record) => record,
                    Err(reason) => {
                        METRICS.add_counter(AUDIT_CHECKED, checked);
                        let failure = AuditFailure::Undecodable { index: expected, reason };
                        return Ok(self.finish(AuditOutcome::BrokenAt { last_good, failure }));
                    }
                };
                if let Err(failure) = Self::check_one(expected, &key, &record, prev.as_ref()) {
                    METRICS.add_counter(AUDIT_CHECKED, checked);
                    return Ok(self.finish(AuditOutcome::BrokenAt { last_good, failure }));
                }
                checked += 1;
                last_good = Some(record.index);
                prev = Some(record);
            }

            info!(through = to, checked, "audit progress");
            self.emit(AuditEvent::Progress { through: to, checked });
            if to >= end {
                break;
            }
            from = to + 1;
        }

        METRICS.add_counter(AUDIT_CHECKED, checked);
        Ok(self.finish(AuditOutcome::Completed { last_index: Some(end), checked }))
    }
}
