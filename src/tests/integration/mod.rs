//! Integration tests: walk, repair, track and audit against mock peers.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::ledger::record::LedgerRecord;
use crate::network::feed::LedgerClosed;
use crate::network::peer::PeerClient;
use crate::network::source::{LedgerSelector, RemoteLedgerSource, SourceConfig};
use crate::storage::ledger_store::LedgerStore;
use crate::storage::notify::{BroadcastNotifier, IndexNotifier};
use crate::storage::state_store::KvStateStore;
use crate::storage::{open, MemKvStore, StorageEngine};
use crate::sync::auditor::{AuditConfig, AuditOutcome, ChainAuditor};
use crate::sync::live::{LiveConfig, LiveImporter};
use crate::sync::state::SharedChainState;
use crate::sync::walker::{ChainWalker, WalkMode, WalkRequest, WalkerConfig};
use crate::tests::fixtures::{build_chain, extend_chain, fork_chain, MockNetwork, MockPeer, PeerBehavior};

struct Pipeline {
    net: MockNetwork,
    store: Arc<LedgerStore>,
    chain: SharedChainState,
    walker: Arc<ChainWalker>,
    notifier: Arc<BroadcastNotifier>,
}

async fn pipeline(records: Vec<LedgerRecord>, peers: Vec<PeerBehavior>, cfg: WalkerConfig) -> Pipeline {
    let net = MockNetwork::from_chain(records);
    let clients: Vec<Arc<dyn PeerClient>> = peers
        .into_iter()
        .enumerate()
        .map(|(i, b)| Arc::new(MockPeer::new(&format!("peer-{i}"), net.clone()).with_behavior(b)) as Arc<dyn PeerClient>)
        .collect();
    let source = Arc::new(RemoteLedgerSource::new(clients, SourceConfig::default()));
    let store = Arc::new(LedgerStore::new(Arc::new(MemKvStore::new())));
    let chain = SharedChainState::load(Arc::new(KvStateStore::new(Arc::new(MemKvStore::new())))).await.unwrap();
    let notifier = Arc::new(BroadcastNotifier::new(64));
    let walker = Arc::new(ChainWalker::new(source, store.clone(), notifier.clone(), cfg));
    Pipeline { net, store, chain, walker, notifier }
}

fn quick(batch_size: usize) -> WalkerConfig {
    WalkerConfig { batch_size, retry_base: Duration::from_millis(1), ..Default::default() }
}

fn from_head(min: Option<u32>) -> WalkRequest {
    WalkRequest { start: LedgerSelector::Closed, min_index: min, mode: WalkMode::Historical }
}

#[tokio::test]
async fn test_end_to_end_walk_of_fifty_ledgers() {
    let records = build_chain(1, 50, "e2e");
    let p = pipeline(records.clone(), vec![PeerBehavior::Healthy], quick(10)).await;
    let mut pings = p.notifier.subscribe();

    let mut w = p.chain.acquire_writer().await;
    let report = p.walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    drop(w);

    assert_eq!(report.saved, 50);
    let stored = p.store.get_range(1, 50).await.unwrap();
    assert_eq!(stored.len(), 50);
    for (got, want) in stored.iter().zip(records.iter()) {
        assert!(got.content_eq(want));
    }
    let validated = p.chain.snapshot().validated.unwrap();
    assert_eq!(validated.index, 50);
    assert_eq!(validated.hash, records[49].hash);

    let mut pinged = 0;
    while let Ok(s) = pings.try_recv() {
        pinged += s.saved_count;
    }
    assert_eq!(pinged, 50);

    let audit = ChainAuditor::new(p.store.clone(), AuditConfig::default()).audit_from(1, None).await.unwrap();
    assert_eq!(audit, AuditOutcome::Completed { last_index: Some(50), checked: 50 });
}

#[tokio::test]
async fn test_rerun_is_a_noop() {
    let records = build_chain(1, 20, "noop");
    let p = pipeline(records, vec![PeerBehavior::Healthy], quick(8)).await;
    let mut w = p.chain.acquire_writer().await;
    p.walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    let revisions: Vec<_> = p.store.get_range(1, 20).await.unwrap().into_iter().map(|r| r.revision).collect();

    let again = p.walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    assert_eq!(again.saved, 0);
    let after: Vec<_> = p.store.get_range(1, 20).await.unwrap().into_iter().map(|r| r.revision).collect();
    assert_eq!(revisions, after);
}

#[tokio::test]
async fn test_fork_resolution_with_lookback() {
    let records = build_chain(1, 50, "fork");
    let p = pipeline(records.clone(), vec![PeerBehavior::Healthy], WalkerConfig { lookback: 5, ..quick(10) }).await;
    let mut w = p.chain.acquire_writer().await;
    p.walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    let before = p.store.get_range(1, 47).await.unwrap();

    // the network now serves a different 48 with a consistent 48..50 on top
    let forked = fork_chain(&records, 48, 50, "fork-b");
    assert_ne!(forked[47].hash, records[47].hash);
    p.net.replace(forked.clone());

    let report = p.walker.walk(from_head(None), &mut w).await.unwrap();
    assert_eq!(report.repairs, 1);
    assert_eq!(report.saved, 3);

    for i in 48..=50u32 {
        assert_eq!(p.store.get(i).await.unwrap().unwrap().hash, forked[(i - 1) as usize].hash);
    }
    // 1..47 untouched, revisions included
    assert_eq!(p.store.get_range(1, 47).await.unwrap(), before);
    let snap = p.chain.snapshot();
    assert_eq!(snap.validated.unwrap().hash, forked[49].hash);
    assert_eq!(snap.last.unwrap().hash, forked[49].hash);

    let audit = ChainAuditor::new(p.store.clone(), AuditConfig::default()).audit_from(1, None).await.unwrap();
    assert!(matches!(audit, AuditOutcome::Completed { checked: 50, .. }));
}

#[tokio::test]
async fn test_walk_survives_a_dead_peer() {
    let records = build_chain(1, 15, "failover");
    let p = pipeline(records, vec![PeerBehavior::AlwaysError, PeerBehavior::Healthy], quick(5)).await;
    let mut w = p.chain.acquire_writer().await;
    let report = p.walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    assert_eq!(report.saved, 15);
    assert!(report.anchored);
}

#[tokio::test]
async fn test_historical_then_live_then_audit() {
    let records = build_chain(1, 30, "combined");
    let p = pipeline(records.clone(), vec![PeerBehavior::Healthy], quick(10)).await;
    {
        let mut w = p.chain.acquire_writer().await;
        p.walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    }

    let importer = LiveImporter::new(
        p.walker.clone(),
        p.store.clone(),
        p.notifier.clone() as Arc<dyn IndexNotifier>,
        p.chain.clone(),
        LiveConfig { retry_delay: Duration::from_millis(5), lookback: 3 },
    );
    // more ledgers closed while the importer was down
    let more = extend_chain(&records[29], 6, "combined");
    p.net.replace(more.clone());

    let (_stop_tx, stop_rx) = watch::channel(false);
    let (tx, rx) = mpsc::channel(8);
    let next = extend_chain(&more[5], 1, "combined");
    p.net.replace(next.clone());
    tx.send(LedgerClosed { index: next[0].index, hash: Some(next[0].hash.clone()) }).await.unwrap();
    drop(tx);
    importer.run(rx, stop_rx).await.unwrap();

    let snap = p.chain.snapshot();
    assert_eq!(snap.last_index(), Some(37));
    assert_eq!(snap.validated_index(), Some(37));
    assert_eq!(snap.first_index(), Some(1));

    let audit = ChainAuditor::new(p.store.clone(), AuditConfig::default()).audit_from(1, None).await.unwrap();
    assert_eq!(audit, AuditOutcome::Completed { last_index: Some(37), checked: 37 });
}

#[tokio::test]
async fn test_fs_engine_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let records = build_chain(1, 12, "fs");
    let net = MockNetwork::from_chain(records.clone());
    let peers: Vec<Arc<dyn PeerClient>> = vec![Arc::new(MockPeer::new("fs-peer", net))];
    let source = Arc::new(RemoteLedgerSource::new(peers, SourceConfig::default()));

    let kv = open(dir.path().join("ledgers"), StorageEngine::Fs).unwrap();
    let state_kv = open(dir.path().join("state"), StorageEngine::Fs).unwrap();
    let store = Arc::new(LedgerStore::new(kv));
    let chain = SharedChainState::load(Arc::new(KvStateStore::new(state_kv))).await.unwrap();
    let walker = ChainWalker::new(source, store.clone(), Arc::new(crate::storage::NoopNotifier), quick(5));
    {
        let mut w = chain.acquire_writer().await;
        walker.walk(from_head(Some(1)), &mut w).await.unwrap();
    }

    // reopen from disk
    let store = Arc::new(LedgerStore::new(open(dir.path().join("ledgers"), StorageEngine::Fs).unwrap()));
    let state = Arc::new(KvStateStore::new(open(dir.path().join("state"), StorageEngine::Fs).unwrap()));
    let chain = SharedChainState::load(state).await.unwrap();
    assert_eq!(chain.snapshot().validated.unwrap().hash, records[11].hash);
    assert_eq!(store.latest_index().await.unwrap(), Some(12));
    let audit = ChainAuditor::new(store, AuditConfig::default()).audit_from(1, None).await.unwrap();
    assert!(matches!(audit, AuditOutcome::Completed { checked: 12, .. }));
}
