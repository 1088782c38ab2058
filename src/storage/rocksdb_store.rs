#[cfg(feature = "rocksdb")]
use crate::storage::traits::{BatchOp, KvIter, KvStore, WriteBatch};
#[cfg(feature = "rocksdb")]
use anyhow::Result;
#[cfg(feature = "rocksdb")]
use rocksdb::{Direction, IteratorMode, Options, WriteBatch as RocksWriteBatch, DB};
#[cfg(feature = "rocksdb")]
use std::path::{Path, PathBuf};

#[cfg(feature = "rocksdb")]
pub struct RocksKvStore {
    db: DB,
    path: PathBuf,
}

#[cfg(feature = "rocksdb")]
impl RocksKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = DB::open(&opts, path.as_ref())?;
        Ok(Self { db, path: path.as_ref().to_path_buf() })
    }

    fn first_from(&self, mode: IteratorMode) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.db.iterator(mode).next() {
            Some(item) => {
                let (k, v) = item?;
                Ok(Some((k.to_vec(), v.to_vec())))
            }
            None => Ok(None),
        }
    }
}

#[cfg(feature = "rocksdb")]
#[async_trait::async_trait]
impl KvStore for RocksKvStore {
    fn name(&self) -> String { "rocksdb".into() }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?)
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete(key)?;
        Ok(())
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut wb = RocksWriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(k, v) => wb.put(k, v),
                BatchOp::Delete(k) => wb.delete(k),
            }
        }
        self.db.write(wb)?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<KvIter> {
        let mut items = Vec::new();
        for item in self.db.iterator(IteratorMode::From(prefix, Direction::Forward)) {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            items.push((k.to_vec(), v.to_vec()));
        }
        Ok(KvIter { items })
    }

    async fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<KvIter> {
        let mut items = Vec::new();
        for item in self.db.iterator(IteratorMode::From(start, Direction::Forward)) {
            let (k, v) = item?;
            if &*k > end {
                break;
            }
            items.push((k.to_vec(), v.to_vec()));
        }
        Ok(KvIter { items })
    }

    async fn last_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_from(IteratorMode::End)
    }

    async fn first_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_from(IteratorMode::Start)
    }

    fn path(&self) -> Option<PathBuf> {
        Some(self.path.clone())
    }
}
