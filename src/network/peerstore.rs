use std::time::Instant;
use tokio::sync::RwLock;
use std::sync::Arc;

/// A remote source candidate and its failure bookkeeping.
#[derive(Clone, Debug)]
pub struct PeerEndpoint {
    pub address: String,
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
}

impl PeerEndpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into(), failure_count: 0, last_failure: None }
    }
}

/// In-memory endpoint registry, positions match the source's client list.
#[derive(Clone, Debug)]
pub struct PeerStore {
    inner: Arc<RwLock<Vec<PeerEndpoint>>>,
}

impl PeerStore {
    pub fn new(addresses: impl IntoIterator<Item = String>) -> Self {
        let peers = addresses.into_iter().map(PeerEndpoint::new).collect();
        Self { inner: Arc::new(RwLock::new(peers)) }
    }

    /// Positions ordered best-first: fewest failures, then least recently
    /// failed, then configuration order.
    pub async fn ranked(&self) -> Vec<usize> {
        let peers = self.inner.read().await;
        let mut order: Vec<usize> = (0..peers.len()).collect();
        order.sort_by(|&a, &b| {
            let (pa, pb) = (&peers[a], &peers[b]);
            pa.failure_count
                .cmp(&pb.failure_count)
                .then_with(|| pa.last_failure.cmp(&pb.last_failure))
                .then_with(|| a.cmp(&b))
        });
        order
    }

    pub async fn record_failure(&self, pos: usize) {
        let mut peers = self.inner.write().await;
        if let Some(p) = peers.get_mut(pos) {
            p.failure_count = p.failure_count.saturating_add(1);
            p.last_failure = Some(Instant::now());
        }
    }

    pub async fn record_success(&self, pos: usize) {
        let mut peers = self.inner.write().await;
        if let Some(p) = peers.get_mut(pos) {
            p.failure_count = 0;
        }
    }
}
