//! Persistence for the chain markers.

use async_trait::async_trait;
use std::sync::Arc;

use crate::storage::traits::KvStore;
use crate::sync::state::ChainState;
use crate::utils::errors::StoreError;

const STATE_KEY: &[u8] = b"chain_state";

#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// Markers from the last save, or the empty state on first run.
    async fn load(&self) -> Result<ChainState, StoreError>;
    async fn save(&self, state: &ChainState) -> Result<(), StoreError>;
}

/// Bincode-encoded `ChainState` under a single key.
pub struct KvStateStore {
    kv: Arc<dyn KvStore>,
}

impl KvStateStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }
}

#[async_trait]
impl StateStore for KvStateStore {
    async fn load(&self) -> Result<ChainState, StoreError> {
        match self.kv.get(STATE_KEY).await? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(ChainState::default()),
        }
    }

    async fn save(&self, state: &ChainState) -> Result<(), StoreError> {
        let bytes = bincode::serialize(state)?;
        self.kv.put(STATE_KEY, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::record::{ChainMarker, MarkerId};
    use crate::storage::mem_store::MemKvStore;

    #[tokio::test]
    async fn test_state_survives_reload() {
        let kv: Arc<dyn KvStore> = Arc::new(MemKvStore::new());
        let store = KvStateStore::new(kv.clone());
        assert_eq!(store.load().await.unwrap(), ChainState::default());

        let state = ChainState {
            first: Some(ChainMarker { id: MarkerId::First, index: 3, hash: "AA".into() }),
            last: Some(ChainMarker { id: MarkerId::Last, index: 9, hash: "BB".into() }),
            validated: None,
        };
        store.save(&state).await.unwrap();
        assert_eq!(KvStateStore::new(kv).load().await.unwrap(), state);
    }
}
