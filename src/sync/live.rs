//! LiveImporter: follows the network head one closed ledger at a time.
//!
//! Idle -> Tracking on seed. A ledger that does not link to `last`, or that
//! arrives while `validated` still trails `last`, switches to Backfilling
//! while the walker fills everything above `validated`, then back to
//! Tracking. Ledgers are appended strictly in index order.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::ledger::record::{LedgerIndex, LedgerRecord, MarkerId};
use crate::network::feed::LedgerClosed;
use crate::network::source::LedgerSelector;
use crate::storage::ledger_store::LedgerStore;
use crate::storage::notify::IndexNotifier;
use crate::sync::state::{ChainState, MarkerWriter, SharedChainState};
use crate::sync::walker::{ChainWalker, WalkMode, WalkRequest};
use crate::utils::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    Idle,
    Tracking,
    Backfilling,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// Pause before retrying the same ledger.
    pub retry_delay: Duration,
    /// Backfill floor distance below `validated`.
    pub lookback: u32,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self { retry_delay: Duration::from_millis(500), lookback: 10 }
    }
}

pub struct LiveImporter {
    walker: Arc<ChainWalker>,
    store: Arc<LedgerStore>,
    notifier: Arc<dyn IndexNotifier>,
    chain: SharedChainState,
    cfg: LiveConfig,
    state_tx: watch::Sender<LiveState>,
}

/// How a retried step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Done,
    Stopped,
}

impl LiveImporter {
    pub fn new(
        walker: Arc<ChainWalker>,
        store: Arc<LedgerStore>,
        notifier: Arc<dyn IndexNotifier>,
        chain: SharedChainState,
        cfg: LiveConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(LiveState::Idle);
        Self { walker, store, notifier, chain, cfg, state_tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<LiveState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> LiveState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, s: LiveState) {
        self.state_tx.send_replace(s);
    }

    /// Seed, then consume closed-ledger events until the feed ends or
    /// shutdown is signalled.
    pub async fn run(&self, events: mpsc::Receiver<LedgerClosed>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if let Step::Stopped = self.seed(&mut shutdown).await? {
            return Ok(());
        }
        self.track(events, shutdown).await
    }

    /// Fetch the head and make it `last`, backfilling from a previous run's
    /// `last` marker when there is one.
    pub async fn seed(&self, shutdown: &mut watch::Receiver<bool>) -> Result<Step> {
        self.until_done(shutdown, "seed", || self.seed_once()).await
    }

    async fn seed_once(&self) -> Result<()> {
        let head = self.walker.fetch_validated(&LedgerSelector::Closed, None).await?;
        let mut writer = self.chain.acquire_writer().await;
        let state = writer.state();
        match state.last {
            None => {
                info!(index = head.index, hash = %head.hash, "seeding from network head");
                self.append(&mut writer, head).await?;
            }
            Some(ref last) if head.index > last.index || !caught_up(&state) => {
                info!(from = last.index, to = head.index, validated = ?state.validated_index(), "catching up since last run");
                self.backfill(&mut writer, &head).await?;
            }
            Some(last) => {
                info!(head = head.index, last = last.index, "store already at network head");
            }
        }
        self.set_state(LiveState::Tracking);
        Ok(())
    }

    /// Consume events. Returns when the feed closes or on shutdown.
    pub async fn track(&self, mut events: mpsc::Receiver<LedgerClosed>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.set_state(LiveState::Tracking);
        loop {
            let event = tokio::select! {
                ev = events.recv() => ev,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };
            let Some(event) = event else { break };
            if self.is_stale(&event) {
                continue;
            }
            let index = event.index;
            if let Step::Stopped = self.until_done(&mut shutdown, "import", move || self.import_one(index)).await? {
                break;
            }
        }
        self.set_state(LiveState::Idle);
        info!("live import stopped");
        Ok(())
    }

    fn is_stale(&self, event: &LedgerClosed) -> bool {
        let snap = self.chain.snapshot();
        match snap.last {
            Some(last) if event.index < last.index => true,
            Some(last) if event.index == last.index => {
                event.hash.as_deref().map_or(true, |h| h.eq_ignore_ascii_case(&last.hash))
            }
            _ => false,
        }
    }

    /// Run `op` until it succeeds, sleeping `retry_delay` between failures.
    /// Only configuration errors escape.
    async fn until_done<F, Fut>(&self, shutdown: &mut watch::Receiver<bool>, what: &str, mut op: F) -> Result<Step>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(Step::Stopped);
            }
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(Step::Done),
                Err(e) if e.is_config_error() => {
                    error!(error = %e, "{what} failed with a configuration error");
                    return Err(e);
                }
                Err(e) => {
                    warn!(error = %e, attempt, "{what} failed, retrying");
                    // a failed backfill leaves us tracking again
                    self.set_state(LiveState::Tracking);
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.cfg.retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(Step::Stopped);
                    }
                }
            }
        }
    }

    async fn import_one(&self, index: LedgerIndex) -> Result<()> {
        let record = self.walker.fetch_validated(&LedgerSelector::Index(index), None).await?;
        let mut writer = self.chain.acquire_writer().await;
        let state = writer.state();
        match &state.last {
            Some(last) if caught_up(&state) && record.follows_marker(last) => self.append(&mut writer, record).await,
            Some(last) => {
                warn!(
                    index = record.index,
                    parent = %record.parent_hash,
                    last = last.index,
                    last_hash = %last.hash,
                    validated = ?state.validated_index(),
                    "ledger does not extend a validated chain, backfilling"
                );
                self.backfill(&mut writer, &record).await
            }
            None => self.append(&mut writer, record).await,
        }
    }

    /// Store a single ledger that links to a validated `last` (or seeds an
    /// empty chain) and make it both `last` and `validated`.
    async fn append(&self, writer: &mut MarkerWriter, record: LedgerRecord) -> Result<()> {
        let summary = self.store.upsert_batch(vec![record.clone()]).await?;
        if summary.saved_count > 0 {
            self.notifier.ping(&summary);
        }
        writer.extend(&record, &record).await?;
        writer.set_validated(record.marker(MarkerId::Validated)).await?;
        info!(index = record.index, hash = %record.hash, "tracked ledger");
        Ok(())
    }

    /// Walk from `top` down to `lookback` below the lowest trusted marker.
    /// The floor comes from `validated` (or `first`), never from `last`, so a
    /// retry after a partial backfill still covers the whole gap.
    async fn backfill(&self, writer: &mut MarkerWriter, top: &LedgerRecord) -> Result<()> {
        self.set_state(LiveState::Backfilling);
        let state = writer.state();
        let genesis = self.walker.config().genesis_index;
        let anchor = state.validated_index().or(state.first_index()).unwrap_or(genesis);
        let floor = anchor.saturating_sub(self.cfg.lookback).max(genesis).min(top.index);
        let req = WalkRequest {
            start: LedgerSelector::Hash(top.hash.clone()),
            min_index: Some(floor),
            mode: WalkMode::Live,
        };
        let report = self.walker.walk(req, writer).await?;
        info!(
            saved = report.saved,
            highest = ?report.highest,
            lowest = ?report.lowest,
            repairs = report.repairs,
            "backfill complete"
        );
        self.set_state(LiveState::Tracking);
        Ok(())
    }
}

/// `validated` sits on `last`: nothing below `last` is still unverified.
fn caught_up(state: &ChainState) -> bool {
    match (&state.last, &state.validated) {
        (Some(l), Some(v)) => l.index == v.index && l.hash.eq_ignore_ascii_case(&v.hash),
        _ => false,
    }
}

impl std::fmt::Debug for LiveImporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveImporter").field("state", &self.state()).finish()
    }
}
