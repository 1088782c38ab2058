//! Downstream "new data" signal, sent after every batch that wrote documents.

use tokio::sync::broadcast;
use tracing::debug;

use crate::storage::ledger_store::UpsertSummary;

pub trait IndexNotifier: Send + Sync + 'static {
    fn ping(&self, summary: &UpsertSummary);
}

pub struct NoopNotifier;

impl IndexNotifier for NoopNotifier {
    fn ping(&self, _summary: &UpsertSummary) {}
}

/// Fans summaries out to any number of subscribers. Having no subscriber is
/// not an error.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<UpsertSummary>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpsertSummary> {
        self.tx.subscribe()
    }
}

impl IndexNotifier for BroadcastNotifier {
    fn ping(&self, summary: &UpsertSummary) {
        let receivers = self.tx.send(summary.clone()).unwrap_or(0);
        debug!(saved = summary.saved_count, receivers, "index ping");
    }
}
