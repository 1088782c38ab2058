//! In-memory engine for tests and throwaway runs.

use crate::storage::traits::{BatchOp, KvIter, KvStore, WriteBatch};
use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default, Clone)]
pub struct MemKvStore {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, simulating a lost backend.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("memory store is rejecting writes"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KvStore for MemKvStore {
    fn name(&self) -> String { "memory".into() }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.inner.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.inner.write().remove(key);
        Ok(())
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        self.check_writable()?;
        let mut map = self.inner.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(k, v) => { map.insert(k, v); }
                BatchOp::Delete(k) => { map.remove(&k); }
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<KvIter> {
        let map = self.inner.read();
        let items = map
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(KvIter { items })
    }

    async fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<KvIter> {
        if start > end {
            return Ok(KvIter::default());
        }
        let map = self.inner.read();
        let items = map
            .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(KvIter { items })
    }

    async fn last_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.inner.read().iter().next_back().map(|(k, v)| (k.clone(), v.clone())))
    }

    async fn first_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.inner.read().iter().next().map(|(k, v)| (k.clone(), v.clone())))
    }

    fn path(&self) -> Option<PathBuf> {
        None
    }
}
