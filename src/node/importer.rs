//! Importer orchestration: open storage, connect peers, and run the
//! historical walk, the live tracker and the auditor.

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use crate::ledger::record::LedgerIndex;
use crate::network::feed::spawn_polling_feed;
use crate::network::peer::{JsonRpcPeer, PeerClient};
use crate::network::source::{LedgerSelector, RemoteLedgerSource};
use crate::node::config::ImporterConfig;
use crate::node::service_handle::ServiceHandle;
use crate::storage::ledger_store::LedgerStore;
use crate::storage::notify::BroadcastNotifier;
use crate::storage::state_store::KvStateStore;
use crate::storage::{self, IndexNotifier};
use crate::sync::auditor::{AuditOutcome, ChainAuditor};
use crate::sync::live::LiveImporter;
use crate::sync::state::{ChainState, SharedChainState};
use crate::sync::walker::{ChainWalker, WalkMode, WalkReport, WalkRequest};
use crate::utils::errors::{StoreError, SyncError};
use crate::utils::metrics::METRICS;

/// What `status` prints.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub markers: ChainState,
    pub earliest_stored: Option<LedgerIndex>,
    pub latest_stored: Option<LedgerIndex>,
    pub engine: String,
}

pub struct Importer {
    cfg: ImporterConfig,
    source: Arc<RemoteLedgerSource>,
    store: Arc<LedgerStore>,
    chain: SharedChainState,
    notifier: Arc<BroadcastNotifier>,
}

impl Importer {
    /// Open storage under `cfg.data_dir` and wrap `peers` in a failover source.
    pub async fn open(cfg: ImporterConfig, peers: Vec<Arc<dyn PeerClient>>) -> Result<Self> {
        std::fs::create_dir_all(&cfg.data_dir)?;
        let kv = storage::open(cfg.ledgers_path(), cfg.storage)?;
        let state_kv = storage::open(cfg.state_path(), cfg.storage)?;
        info!(engine = %kv.name(), path = ?kv.path(), "opened ledger store");

        let chain = SharedChainState::load(Arc::new(KvStateStore::new(state_kv))).await?;
        let source = Arc::new(RemoteLedgerSource::new(peers, cfg.source_config()));
        Ok(Self {
            source,
            store: Arc::new(LedgerStore::new(kv)),
            chain,
            notifier: Arc::new(BroadcastNotifier::new(256)),
            cfg,
        })
    }

    /// `open` with JSON-RPC peers for every configured endpoint.
    pub async fn connect(cfg: ImporterConfig) -> Result<Self> {
        if cfg.peers.endpoints.is_empty() {
            bail!("no peer endpoints configured (set [peers].endpoints or pass --peers)");
        }
        let timeout = cfg.source_config().fetch_timeout;
        let mut peers: Vec<Arc<dyn PeerClient>> = Vec::with_capacity(cfg.peers.endpoints.len());
        for addr in &cfg.peers.endpoints {
            peers.push(Arc::new(JsonRpcPeer::connect(addr, timeout)?));
        }
        Self::open(cfg, peers).await
    }

    pub fn store(&self) -> &Arc<LedgerStore> {
        &self.store
    }

    pub fn chain(&self) -> &SharedChainState {
        &self.chain
    }

    pub fn notifier(&self) -> &Arc<BroadcastNotifier> {
        &self.notifier
    }

    fn walker(&self, shutdown: watch::Receiver<bool>) -> ChainWalker {
        ChainWalker::new(
            self.source.clone(),
            self.store.clone(),
            self.notifier.clone() as Arc<dyn IndexNotifier>,
            self.cfg.walker_config(),
        )
        .with_shutdown(shutdown)
    }

    /// Walk from `start` (default: network head) down to `min`.
    pub async fn historical(
        &self,
        start: Option<LedgerIndex>,
        min: Option<LedgerIndex>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<WalkReport, SyncError> {
        let walker = self.walker(shutdown);
        let req = WalkRequest {
            start: start.map(LedgerSelector::Index).unwrap_or(LedgerSelector::Closed),
            min_index: min,
            mode: WalkMode::Historical,
        };
        let mut writer = self.chain.acquire_writer().await;
        walker.walk(req, &mut writer).await
    }

    /// Import history from the network down to `min` (default: genesis),
    /// continuing below the `first` marker one batch-sized walk at a time.
    /// The marker writer is released between walks, so a live importer
    /// sharing it waits for at most one batch.
    pub async fn backfill_history(
        &self,
        start: Option<LedgerIndex>,
        min: Option<LedgerIndex>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<WalkReport, SyncError> {
        let genesis = self.cfg.genesis_index;
        let floor = min.unwrap_or(genesis);
        if floor < genesis {
            return Err(SyncError::BelowGenesis { requested: floor, genesis });
        }
        let walker = self.walker(shutdown.clone());
        let chunk = self.cfg.import.batch_size.max(1) as LedgerIndex;
        let mut total = WalkReport::default();
        let mut explicit_start = start;

        loop {
            let mut writer = self.chain.acquire_writer().await;
            let state = writer.state();
            if *shutdown.borrow() {
                return Err(SyncError::Cancelled(state.first_index().unwrap_or(floor)));
            }
            let (selector, top) = match (explicit_start.take(), &state.first) {
                (Some(s), _) => (LedgerSelector::Index(s), s),
                (None, Some(first)) if first.index > floor => {
                    let below = first.index - 1;
                    match self.store.get(first.index).await {
                        Ok(Some(stored)) => (LedgerSelector::Hash(stored.parent_hash), below),
                        _ => (LedgerSelector::Index(below), below),
                    }
                }
                (None, Some(_)) => break,
                (None, None) => {
                    let (head, _) = self.source.closed_head().await?;
                    (LedgerSelector::Index(head), head)
                }
            };
            let req = WalkRequest {
                start: selector,
                min_index: Some(top.saturating_sub(chunk - 1).max(floor)),
                mode: WalkMode::Historical,
            };
            let report = walker.walk(req, &mut writer).await?;
            drop(writer);

            total.saved += report.saved;
            total.fetched += report.fetched;
            total.repairs += report.repairs;
            total.anchored = report.anchored;
            total.highest = total.highest.max(report.highest);
            total.lowest = match (total.lowest, report.lowest) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            if report.lowest.map_or(true, |l| l <= floor) {
                break;
            }
        }
        info!(saved = total.saved, lowest = ?total.lowest, floor, "history backfill reached its floor");
        Ok(total)
    }

    /// Spawn the closed-ledger feed and the live importer onto `svc`.
    pub fn start_live(&self, svc: &mut ServiceHandle) {
        let shutdown = svc.shutdown_rx();
        let (events, feed) = spawn_polling_feed(self.source.clone(), self.cfg.poll_interval(), shutdown.clone());
        svc.attach("ledger-feed", feed);

        let live = LiveImporter::new(
            Arc::new(self.walker(shutdown.clone())),
            self.store.clone(),
            self.notifier.clone() as Arc<dyn IndexNotifier>,
            self.chain.clone(),
            self.cfg.live_config(),
        );
        let stop = svc.shutdown_sender();
        svc.attach(
            "live-import",
            tokio::spawn(async move {
                let res = live.run(events, shutdown).await;
                if let Err(e) = &res {
                    error!(error = %e, "live import stopped on a configuration error");
                    let _ = stop.send(true);
                }
                res.map_err(anyhow::Error::from)
            }),
        );
    }

    /// Spawn `backfill_history` onto `svc`, next to a live importer.
    pub fn start_backfill(self: &Arc<Self>, svc: &mut ServiceHandle, start: Option<LedgerIndex>, min: Option<LedgerIndex>) {
        let this = self.clone();
        let shutdown = svc.shutdown_rx();
        let stop = svc.shutdown_sender();
        svc.attach(
            "historical-import",
            tokio::spawn(async move {
                match this.backfill_history(start, min, shutdown).await {
                    Ok(report) => {
                        info!(saved = report.saved, lowest = ?report.lowest, "historical backfill finished");
                        Ok(())
                    }
                    Err(SyncError::Cancelled(at)) => {
                        info!(index = at, "historical backfill cancelled");
                        Ok(())
                    }
                    Err(e) => {
                        error!(error = %e, "historical backfill failed");
                        if e.is_config_error() {
                            let _ = stop.send(true);
                        }
                        Err(e.into())
                    }
                }
            }),
        );
    }

    /// Audit `from..=to`; `from` defaults to the lowest stored ledger.
    pub async fn audit(&self, from: Option<LedgerIndex>, to: Option<LedgerIndex>) -> Result<AuditOutcome, StoreError> {
        let from = match from {
            Some(f) => f,
            None => self.store.earliest_index().await?.unwrap_or(self.cfg.genesis_index),
        };
        ChainAuditor::new(self.store.clone(), self.cfg.audit_config()).audit_from(from, to).await
    }

    pub async fn status(&self) -> Result<StatusReport, StoreError> {
        Ok(StatusReport {
            markers: self.chain.snapshot(),
            earliest_stored: self.store.earliest_index().await?,
            latest_stored: self.store.latest_index().await?,
            engine: self.store.backend().name(),
        })
    }

    pub fn metrics(&self) -> String {
        METRICS.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageEngine;
    use crate::tests::fixtures::{build_chain, extend_chain, MockNetwork, MockPeer, PeerBehavior};
    use std::time::Duration;

    fn config(dir: &std::path::Path) -> ImporterConfig {
        let mut cfg = ImporterConfig::default();
        cfg.data_dir = dir.to_path_buf();
        cfg.storage = StorageEngine::Fs;
        cfg.import.batch_size = 8;
        cfg.live.poll_interval_ms = 10;
        cfg.live.retry_delay_ms = 5;
        cfg
    }

    fn peers(net: &MockNetwork) -> Vec<Arc<dyn PeerClient>> {
        vec![Arc::new(MockPeer::new("mock", net.clone()))]
    }

    #[tokio::test]
    async fn test_historical_status_and_audit() {
        let dir = tempfile::tempdir().unwrap();
        let net = MockNetwork::from_chain(build_chain(1, 20, "node"));
        let importer = Importer::open(config(dir.path()), peers(&net)).await.unwrap();
        let (_tx, rx) = watch::channel(false);

        let report = importer.historical(None, Some(1), rx).await.unwrap();
        assert_eq!(report.saved, 20);

        let status = importer.status().await.unwrap();
        assert_eq!(status.engine, "fs");
        assert_eq!((status.earliest_stored, status.latest_stored), (Some(1), Some(20)));
        assert_eq!(status.markers.validated_index(), Some(20));

        let audit = importer.audit(None, None).await.unwrap();
        assert_eq!(audit, AuditOutcome::Completed { last_index: Some(20), checked: 20 });
    }

    #[tokio::test]
    async fn test_below_genesis_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.genesis_index = 10;
        let net = MockNetwork::from_chain(build_chain(10, 20, "genesis"));
        let importer = Importer::open(cfg, peers(&net)).await.unwrap();
        let (_tx, rx) = watch::channel(false);
        let err = importer.historical(None, Some(5), rx).await.unwrap_err();
        assert!(err.is_config_error());
    }

    #[tokio::test]
    async fn test_connect_requires_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Importer::connect(config(dir.path())).await.is_err());
    }

    #[tokio::test]
    async fn test_live_service_follows_head() {
        let dir = tempfile::tempdir().unwrap();
        let base = build_chain(1, 5, "svc");
        let net = MockNetwork::from_chain(base.clone());
        let importer = Importer::open(config(dir.path()), peers(&net)).await.unwrap();

        let (mut svc, _rx) = ServiceHandle::new();
        importer.start_live(&mut svc);

        let mut seen = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if importer.chain().snapshot().last_index() == Some(5) {
                seen = true;
                break;
            }
        }
        assert!(seen, "seed never landed");

        net.replace(extend_chain(&base[4], 3, "svc"));
        let mut caught_up = false;
        for _ in 0..300 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if importer.chain().snapshot().validated_index() == Some(8) {
                caught_up = true;
                break;
            }
        }
        tokio_test::assert_ok!(svc.shutdown().await);
        assert!(caught_up, "live importer did not reach 8");
        assert_eq!(importer.store().latest_index().await.unwrap(), Some(8));
    }

    async fn wait_until<F: Fn() -> bool>(what: &str, tries: usize, cond: F) {
        for _ in 0..tries {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}");
    }

    async fn stored_count(importer: &Importer, end: LedgerIndex) -> usize {
        importer.store().get_range(1, end).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_combined_backfill_after_live_seed_imports_history() {
        let dir = tempfile::tempdir().unwrap();
        let net = MockNetwork::from_chain(build_chain(1, 40, "combined"));
        let importer = Arc::new(Importer::open(config(dir.path()), peers(&net)).await.unwrap());

        let (mut svc, _rx) = ServiceHandle::new();
        importer.start_live(&mut svc);
        let chain = importer.chain().clone();
        wait_until("live seed", 300, || chain.snapshot().validated_index() == Some(40)).await;

        importer.start_backfill(&mut svc, None, None);
        for _ in 0..300 {
            if stored_count(&importer, 40).await == 40 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio_test::assert_ok!(svc.shutdown().await);

        assert_eq!(stored_count(&importer, 40).await, 40);
        assert_eq!(importer.chain().snapshot().first_index(), Some(1));
        let audit = importer.audit(None, None).await.unwrap();
        assert_eq!(audit, AuditOutcome::Completed { last_index: Some(40), checked: 40 });
    }

    #[tokio::test]
    async fn test_live_tracking_is_not_blocked_by_a_running_backfill() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.storage = StorageEngine::Memory;
        let base = build_chain(1, 300, "busy");
        let net = MockNetwork::from_chain(base.clone());
        let slow: Vec<Arc<dyn PeerClient>> =
            vec![Arc::new(MockPeer::new("slow", net.clone()).with_behavior(PeerBehavior::Delay(Duration::from_millis(2))))];
        let importer = Arc::new(Importer::open(cfg, slow).await.unwrap());

        let (mut svc, _rx) = ServiceHandle::new();
        importer.start_backfill(&mut svc, None, None);
        let chain = importer.chain().clone();
        wait_until("first history batch", 300, || chain.snapshot().first_index().is_some()).await;

        importer.start_live(&mut svc);
        net.replace(extend_chain(&base[299], 2, "busy"));
        wait_until("live head", 500, || chain.snapshot().validated_index() == Some(302)).await;
        // live caught up while history was still being walked
        assert!(importer.store().earliest_index().await.unwrap().unwrap() > 1);

        for _ in 0..1000 {
            if stored_count(&importer, 302).await == 302 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        tokio_test::assert_ok!(svc.shutdown().await);
        let audit = importer.audit(None, None).await.unwrap();
        assert_eq!(audit, AuditOutcome::Completed { last_index: Some(302), checked: 302 });
    }
}
