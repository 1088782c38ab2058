//! Chain markers (`first`, `last`, `validated`) and the single-writer token.
//!
//! Anyone may read a snapshot. Writes go through a `MarkerWriter`, which
//! owns the writer lock for as long as it lives, and every write is
//! persisted through the `StateStore` before it becomes visible.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use crate::ledger::record::{ChainMarker, LedgerIndex, LedgerRecord, MarkerId};
use crate::storage::state_store::StateStore;
use crate::utils::errors::StoreError;
use crate::utils::metrics::{LAST_INDEX, METRICS, VALIDATED_INDEX};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Lowest ledger the importer has stored.
    pub first: Option<ChainMarker>,
    /// Highest ledger the importer has stored.
    pub last: Option<ChainMarker>,
    /// Top of the stretch verified as hash-linked down to its anchor.
    pub validated: Option<ChainMarker>,
}

impl ChainState {
    pub fn last_index(&self) -> Option<LedgerIndex> {
        self.last.as_ref().map(|m| m.index)
    }

    pub fn validated_index(&self) -> Option<LedgerIndex> {
        self.validated.as_ref().map(|m| m.index)
    }

    pub fn first_index(&self) -> Option<LedgerIndex> {
        self.first.as_ref().map(|m| m.index)
    }
}

#[derive(Clone)]
pub struct SharedChainState {
    inner: Arc<RwLock<ChainState>>,
    writer: Arc<Mutex<()>>,
    store: Arc<dyn StateStore>,
}

impl SharedChainState {
    /// Load the persisted markers.
    pub async fn load(store: Arc<dyn StateStore>) -> Result<Self, StoreError> {
        let state = store.load().await?;
        publish_gauges(&state);
        Ok(Self { inner: Arc::new(RwLock::new(state)), writer: Arc::new(Mutex::new(())), store })
    }

    pub fn snapshot(&self) -> ChainState {
        self.inner.read().clone()
    }

    /// Wait for the writer token.
    pub async fn acquire_writer(&self) -> MarkerWriter {
        let guard = self.writer.clone().lock_owned().await;
        MarkerWriter { _guard: guard, inner: self.inner.clone(), store: self.store.clone() }
    }

    /// The writer token, if nobody holds it.
    pub fn try_acquire_writer(&self) -> Option<MarkerWriter> {
        let guard = self.writer.clone().try_lock_owned().ok()?;
        Some(MarkerWriter { _guard: guard, inner: self.inner.clone(), store: self.store.clone() })
    }
}

fn publish_gauges(state: &ChainState) {
    if let Some(i) = state.last_index() {
        METRICS.set_gauge(LAST_INDEX, i as f64);
    }
    if let Some(i) = state.validated_index() {
        METRICS.set_gauge(VALIDATED_INDEX, i as f64);
    }
}

/// Exclusive right to move the markers. Dropping it releases the token.
pub struct MarkerWriter {
    _guard: OwnedMutexGuard<()>,
    inner: Arc<RwLock<ChainState>>,
    store: Arc<dyn StateStore>,
}

impl MarkerWriter {
    pub fn state(&self) -> ChainState {
        self.inner.read().clone()
    }

    async fn commit(&mut self, next: ChainState) -> Result<(), StoreError> {
        self.store.save(&next).await?;
        publish_gauges(&next);
        debug!(
            first = ?next.first_index(),
            last = ?next.last_index(),
            validated = ?next.validated_index(),
            "markers updated"
        );
        *self.inner.write() = next;
        Ok(())
    }

    /// Move `last`. `validated` is pulled down with it if it would end up above.
    pub async fn set_last(&mut self, mut marker: ChainMarker) -> Result<(), StoreError> {
        marker.id = MarkerId::Last;
        let mut next = self.state();
        if next.validated_index().map(|v| v > marker.index).unwrap_or(false) {
            next.validated = Some(ChainMarker { id: MarkerId::Validated, ..marker.clone() });
        }
        next.last = Some(marker);
        self.commit(next).await
    }

    /// Move `validated`. `last` is raised with it if it would end up below.
    pub async fn set_validated(&mut self, mut marker: ChainMarker) -> Result<(), StoreError> {
        marker.id = MarkerId::Validated;
        let mut next = self.state();
        if next.last_index().map(|l| l < marker.index).unwrap_or(true) {
            next.last = Some(ChainMarker { id: MarkerId::Last, ..marker.clone() });
        }
        next.validated = Some(marker);
        self.commit(next).await
    }

    /// Widen `first`/`last` to cover a freshly stored `low..=high` stretch.
    /// A marker at the same index is replaced, since the stored ledger there
    /// may have been rewritten.
    pub async fn extend(&mut self, low: &LedgerRecord, high: &LedgerRecord) -> Result<(), StoreError> {
        let mut next = self.state();
        if next.first_index().map(|f| low.index <= f).unwrap_or(true) {
            next.first = Some(low.marker(MarkerId::First));
        }
        if next.last_index().map(|l| high.index >= l).unwrap_or(true) {
            next.last = Some(high.marker(MarkerId::Last));
        }
        if next == self.state() {
            return Ok(());
        }
        self.commit(next).await
    }
}
