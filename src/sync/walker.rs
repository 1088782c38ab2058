//! ChainWalker: walks the remote chain backward from a start ledger by
//! following `parent_hash`, flushing fixed-size batches to the store and
//! checking each flushed stretch against its stored neighbours.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::ledger::record::{LedgerIndex, LedgerRecord, MarkerId};
use crate::ledger::validator::validate_expected;
use crate::network::source::{LedgerSelector, RemoteLedgerSource};
use crate::storage::ledger_store::LedgerStore;
use crate::storage::notify::IndexNotifier;
use crate::sync::state::{ChainState, MarkerWriter};
use crate::utils::errors::{Result, SyncError};
use crate::utils::metrics::{CHAIN_BREAKS, METRICS, VALIDATION_FAILURES};
use crate::utils::retry::{retry, RetryPolicy};
use crate::utils::serde_helpers::is_hash256;

#[derive(Debug, Clone)]
pub struct WalkerConfig {
    pub batch_size: usize,
    /// How far below a broken boundary the walk re-fetches.
    pub lookback: u32,
    /// Lowest ledger that may ever be walked.
    pub genesis_index: LedgerIndex,
    /// Fetch + validate attempts per ledger before the walk gives up.
    pub fetch_attempts: u32,
    /// Ledgers requested concurrently when prefetching by index. 1 disables.
    pub fetch_concurrency: usize,
    pub max_repair_rounds: u32,
    pub retry_base: Duration,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            lookback: 10,
            genesis_index: 1,
            fetch_attempts: 5,
            fetch_concurrency: 1,
            max_repair_rounds: 5,
            retry_base: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkMode {
    /// Bounded import: a break above the walked range is an error.
    Historical,
    /// Data is still arriving: breaks are repaired from the network head.
    Live,
}

#[derive(Debug, Clone)]
pub struct WalkRequest {
    pub start: LedgerSelector,
    /// Walk down to this index. Defaults to the `validated` marker, or genesis.
    pub min_index: Option<LedgerIndex>,
    pub mode: WalkMode,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalkReport {
    pub saved: usize,
    pub fetched: usize,
    pub highest: Option<LedgerIndex>,
    pub lowest: Option<LedgerIndex>,
    pub repairs: u32,
    /// The walk ended linked to genesis, `first` or `validated`.
    pub anchored: bool,
}

/// Where the next fetch goes.
#[derive(Debug, Clone)]
struct Cursor {
    selector: LedgerSelector,
    expected: Option<String>,
    index: Option<LedgerIndex>,
}

impl Cursor {
    fn parent_of(record: &LedgerRecord) -> Self {
        let index = record.index.checked_sub(1);
        if is_hash256(&record.parent_hash) {
            Cursor {
                selector: LedgerSelector::Hash(record.parent_hash.clone()),
                expected: Some(record.parent_hash.clone()),
                index,
            }
        } else {
            warn!(index = record.index, parent = %record.parent_hash, "malformed parent hash, falling back to index");
            Cursor { selector: LedgerSelector::Index(index.unwrap_or(0)), expected: None, index }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Boundary {
    Linked,
    /// Nothing stored on the other side.
    Absent,
    /// Stored neighbour disagrees; carries the hash it points at or has.
    Broken(String),
}

struct Flushed {
    low: LedgerRecord,
    high: LedgerRecord,
    earlier: Boundary,
    later: Boundary,
}

pub struct ChainWalker {
    source: Arc<RemoteLedgerSource>,
    store: Arc<LedgerStore>,
    notifier: Arc<dyn IndexNotifier>,
    cfg: WalkerConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl ChainWalker {
    pub fn new(
        source: Arc<RemoteLedgerSource>,
        store: Arc<LedgerStore>,
        notifier: Arc<dyn IndexNotifier>,
        cfg: WalkerConfig,
    ) -> Self {
        Self { source, store, notifier, cfg, shutdown: None }
    }

    /// Stop between batches once `shutdown` flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.cfg
    }

    /// Fetch one ledger and check its hashes, re-fetching on any failure.
    pub async fn fetch_validated(&self, selector: &LedgerSelector, expected: Option<&str>) -> Result<LedgerRecord> {
        let policy = RetryPolicy::exponential(self.cfg.retry_base, Duration::from_secs(10), self.cfg.fetch_attempts.max(1));
        retry(
            &policy,
            move |attempt| async move {
                let record = self.source.fetch(selector).await?;
                if let Err(e) = validate_expected(&record, expected) {
                    METRICS.inc_counter(VALIDATION_FAILURES);
                    warn!(
                        index = record.index,
                        hash = %record.hash,
                        peer = ?record.retrieved_from,
                        attempt,
                        error = %e,
                        "ledger failed validation"
                    );
                    return Err(SyncError::from(e));
                }
                Ok(record)
            },
            |e, _| matches!(e, SyncError::Fetch(_) | SyncError::Validation(_)),
        )
        .await
    }

    fn check_cancelled(&self, at: LedgerIndex) -> Result<()> {
        if let Some(rx) = &self.shutdown {
            if *rx.borrow() {
                info!(index = at, "walk cancelled");
                return Err(SyncError::Cancelled(at));
            }
        }
        Ok(())
    }

    async fn resolve_start(&self, start: &LedgerSelector, floor: LedgerIndex, mode: WalkMode) -> Result<LedgerRecord> {
        if let (LedgerSelector::Index(i), WalkMode::Historical) = (start, mode) {
            let (head, _) = self.source.closed_head().await?;
            if *i > head || *i < floor {
                return Err(SyncError::OutOfRange { requested: *i, low: floor, high: head });
            }
        }
        let expected = match start {
            LedgerSelector::Hash(h) => Some(h.as_str()),
            _ => None,
        };
        let record = self.fetch_validated(start, expected).await?;
        if record.index < floor {
            return Err(SyncError::OutOfRange { requested: record.index, low: floor, high: record.index });
        }
        Ok(record)
    }

    /// Up to `room` linked ledgers starting at `cursor`, newest first.
    async fn fetch_run(&self, cursor: &Cursor, floor: LedgerIndex, room: usize) -> Result<Vec<LedgerRecord>> {
        if self.cfg.fetch_concurrency > 1 && room > 1 {
            if let Some(top) = cursor.index {
                let low = top.saturating_sub(room as u32 - 1).max(floor);
                let results = self.source.fetch_many((low..=top).rev().collect(), self.cfg.fetch_concurrency).await;
                let mut run: Vec<LedgerRecord> = Vec::with_capacity(results.len());
                for (index, res) in (low..=top).rev().zip(results) {
                    let record = match res {
                        Ok(record) => record,
                        Err(e) => {
                            warn!(index, peer = ?e.peer(), error = %e, "prefetch failed, cutting run short");
                            break;
                        }
                    };
                    let expected = match run.last() {
                        Some(prev) => Some(prev.parent_hash.as_str()),
                        None => cursor.expected.as_deref(),
                    };
                    if let Err(e) = validate_expected(&record, expected) {
                        METRICS.inc_counter(VALIDATION_FAILURES);
                        warn!(
                            index = record.index,
                            hash = %record.hash,
                            peer = ?record.retrieved_from,
                            error = %e,
                            "prefetched ledger failed validation"
                        );
                        break;
                    }
                    run.push(record);
                }
                if !run.is_empty() {
                    debug!(top, got = run.len(), "prefetched run");
                    return Ok(run);
                }
            }
        }
        let record = self.fetch_validated(&cursor.selector, cursor.expected.as_deref()).await?;
        Ok(vec![record])
    }

    async fn boundaries(&self, low: &LedgerRecord, high: &LedgerRecord) -> Result<(Boundary, Boundary)> {
        let earlier = if low.index <= self.cfg.genesis_index {
            Boundary::Absent
        } else {
            match self.store.get(low.index - 1).await? {
                Some(pred) if low.follows(&pred) => Boundary::Linked,
                Some(pred) => Boundary::Broken(pred.hash),
                None => Boundary::Absent,
            }
        };
        let later = match high.index.checked_add(1) {
            Some(next) => match self.store.get(next).await? {
                Some(succ) if succ.follows(high) => Boundary::Linked,
                Some(succ) => Boundary::Broken(succ.parent_hash),
                None => Boundary::Absent,
            },
            None => Boundary::Absent,
        };
        Ok((earlier, later))
    }

    /// Store a newest-first batch and check it against stored neighbours.
    async fn flush(&self, mut batch: Vec<LedgerRecord>, report: &mut WalkReport) -> Result<Option<Flushed>> {
        batch.reverse();
        let (low, high) = match (batch.first(), batch.last()) {
            (Some(l), Some(h)) => (l.clone(), h.clone()),
            _ => return Ok(None),
        };
        let summary = self.store.upsert_batch(batch).await?;
        if summary.saved_count > 0 {
            self.notifier.ping(&summary);
        }
        report.saved += summary.saved_count;
        report.lowest = Some(report.lowest.map_or(low.index, |l| l.min(low.index)));
        report.highest = Some(report.highest.map_or(high.index, |h| h.max(high.index)));

        let (earlier, later) = self.boundaries(&low, &high).await?;
        debug!(low = low.index, high = high.index, saved = summary.saved_count, ?earlier, ?later, "flushed batch");
        Ok(Some(Flushed { low, high, earlier, later }))
    }

    fn bump_repairs(&self, report: &mut WalkReport, index: LedgerIndex) -> Result<()> {
        report.repairs += 1;
        METRICS.inc_counter(CHAIN_BREAKS);
        if report.repairs > self.cfg.max_repair_rounds {
            return Err(SyncError::RepairExhausted { index, rounds: report.repairs - 1 });
        }
        Ok(())
    }

    fn lowered_floor(&self, index: LedgerIndex) -> LedgerIndex {
        index.saturating_sub(self.cfg.lookback.max(1)).max(self.cfg.genesis_index)
    }

    /// Walk from `req.start` down to the floor, repairing breaks on the way.
    ///
    /// `first`/`last` are widened after every batch whose boundaries hold.
    /// `validated` moves to the top of the walk only if the walk ends linked
    /// to genesis, the `first` marker, or the old `validated` marker.
    pub async fn walk(&self, req: WalkRequest, writer: &mut MarkerWriter) -> Result<WalkReport> {
        let initial: ChainState = writer.state();
        let genesis = self.cfg.genesis_index;
        let mut floor = req.min_index.unwrap_or_else(|| initial.validated_index().unwrap_or(genesis));
        if floor < genesis {
            return Err(SyncError::BelowGenesis { requested: floor, genesis });
        }

        let mut top = self.resolve_start(&req.start, floor, req.mode).await?;
        info!(start = top.index, floor, mode = ?req.mode, "walk started");

        let mut report = WalkReport { fetched: 1, ..Default::default() };
        let mut reached = top.index <= floor;
        let mut cursor = Cursor::parent_of(&top);
        let mut pending = vec![top.clone()];
        let batch_size = self.cfg.batch_size.max(1);

        loop {
            while !reached && pending.len() < batch_size {
                let run = self.fetch_run(&cursor, floor, batch_size - pending.len()).await?;
                for record in run {
                    report.fetched += 1;
                    reached = record.index <= floor;
                    cursor = Cursor::parent_of(&record);
                    pending.push(record);
                    if reached {
                        break;
                    }
                }
            }

            let Some(flushed) = self.flush(std::mem::take(&mut pending), &mut report).await? else {
                break;
            };

            if let Boundary::Broken(found) = &flushed.later {
                let at = flushed.high.index + 1;
                warn!(index = at, expected = %flushed.high.hash, found = %found, "chain break above flushed batch");
                match req.mode {
                    WalkMode::Historical => {
                        METRICS.inc_counter(CHAIN_BREAKS);
                        return Err(SyncError::ChainBreak {
                            index: at,
                            expected: flushed.high.hash.clone(),
                            found: found.clone(),
                        });
                    }
                    WalkMode::Live => {
                        self.bump_repairs(&mut report, at)?;
                        floor = floor.min(self.lowered_floor(flushed.high.index));
                        top = self.fetch_validated(&LedgerSelector::Closed, None).await?;
                        report.fetched += 1;
                        info!(head = top.index, floor, "restarting walk from network head");
                        reached = top.index <= floor;
                        cursor = Cursor::parent_of(&top);
                        pending.push(top.clone());
                        continue;
                    }
                }
            }

            if let Boundary::Broken(found) = &flushed.earlier {
                warn!(
                    index = flushed.low.index,
                    parent = %flushed.low.parent_hash,
                    stored = %found,
                    "chain break below flushed batch"
                );
                if reached {
                    self.bump_repairs(&mut report, flushed.low.index)?;
                    let lowered = self.lowered_floor(flushed.low.index);
                    info!(from = floor, to = lowered, "extending walk over disputed range");
                    floor = lowered;
                    reached = flushed.low.index <= floor;
                }
            }

            writer.extend(&flushed.low, &flushed.high).await?;

            if reached {
                report.anchored = flushed.low.index <= genesis
                    || (initial.validated_index().map_or(false, |v| flushed.low.index <= v)
                        && flushed.earlier == Boundary::Linked)
                    || (initial.first_index().map_or(true, |f| flushed.low.index <= f)
                        && !matches!(flushed.earlier, Boundary::Broken(_)));
                break;
            }
            self.check_cancelled(flushed.low.index)?;
        }

        if report.anchored && initial.validated_index().map_or(true, |v| top.index >= v) {
            writer.set_validated(top.marker(MarkerId::Validated)).await?;
        }
        info!(
            saved = report.saved,
            highest = ?report.highest,
            lowest = ?report.lowest,
            repairs = report.repairs,
            anchored = report.anchored,
            "walk finished"
        );
        Ok(report)
    }
}
