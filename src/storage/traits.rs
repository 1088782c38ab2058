use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Simple KV iterator returned by scans, ordered by key.
#[derive(Debug, Default)]
pub struct KvIter {
    // each item: (key, value)
    pub items: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Engine-independent batch of operations, applied atomically by `write_batch`.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Core key-value store trait
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Put a key / value
    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Get a key
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Delete a key
    async fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check existence
    async fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Get several keys; result positions match `keys`.
    async fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            out.push(self.get(k).await?);
        }
        Ok(out)
    }

    /// Apply a write batch atomically
    async fn write_batch(&self, batch: WriteBatch) -> Result<()>;

    /// All pairs whose key starts with `prefix`, in key order.
    async fn scan_prefix(&self, prefix: &[u8]) -> Result<KvIter>;

    /// All pairs with `start <= key <= end`, in key order.
    async fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<KvIter>;

    /// Highest-keyed pair.
    async fn last_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan_prefix(&[]).await?.items.pop())
    }

    /// Lowest-keyed pair.
    async fn first_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        Ok(self.scan_prefix(&[]).await?.items.into_iter().next())
    }

    /// Path where the engine stores data (useful for debugging)
    fn path(&self) -> Option<PathBuf>;
}
