use crate::storage::traits::{BatchOp, KvIter, KvStore, WriteBatch};
use anyhow::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

/// One file per key, named by the hex of the key. The directory is listed
/// once on open; after that a sorted in-memory key index answers scans and
/// bounds, and only matching files are read.
pub struct FsKvStore {
    dir: PathBuf,
    index: RwLock<BTreeSet<Vec<u8>>>,
    // serializes batches against each other
    write_lock: Mutex<()>,
}

impl FsKvStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let dir = path.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut index = BTreeSet::new();
        for entry in fs::read_dir(&dir)? {
            let name = entry?.file_name().into_string().unwrap_or_default();
            // temp files and foreign names fail to decode
            if let Ok(key) = hex::decode(&name) {
                index.insert(key);
            }
        }
        Ok(Self { dir, index: RwLock::new(index), write_lock: Mutex::new(()) })
    }

    fn key_path(&self, key: &[u8]) -> PathBuf {
        self.dir.join(hex::encode(key))
    }

    /// Write through a temp file and rename so readers never see a torn value.
    fn write_file(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let p = self.key_path(key);
        let tmp = p.with_extension("tmp");
        {
            let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(&tmp)?;
            f.write_all(value)?;
            f.sync_data()?;
        }
        fs::rename(&tmp, &p)?;
        self.index.write().insert(key.to_vec());
        Ok(())
    }

    fn remove_file(&self, key: &[u8]) -> Result<()> {
        let p = self.key_path(key);
        if p.exists() {
            fs::remove_file(&p)?;
        }
        self.index.write().remove(key);
        Ok(())
    }

    fn read_file(path: &Path) -> Result<Vec<u8>> {
        let mut f = OpenOptions::new().read(true).open(path)?;
        let mut buf = Vec::new();
        f.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn read_keys(&self, keys: Vec<Vec<u8>>) -> Result<KvIter> {
        let mut items = Vec::with_capacity(keys.len());
        for key in keys {
            let value = Self::read_file(&self.key_path(&key))?;
            items.push((key, value));
        }
        Ok(KvIter { items })
    }

    fn entry(&self, key: Option<Vec<u8>>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match key {
            Some(key) => {
                let value = Self::read_file(&self.key_path(&key))?;
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl KvStore for FsKvStore {
    fn name(&self) -> String { "fs".into() }

    async fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.write_file(key, value)
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if !self.index.read().contains(key) {
            return Ok(None);
        }
        Ok(Some(Self::read_file(&self.key_path(key))?))
    }

    async fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.index.read().contains(key))
    }

    async fn delete(&self, key: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.remove_file(key)
    }

    async fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let _guard = self.write_lock.lock();
        for op in batch.ops() {
            match op {
                BatchOp::Put(k, v) => self.write_file(k, v)?,
                BatchOp::Delete(k) => self.remove_file(k)?,
            }
        }
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &[u8]) -> Result<KvIter> {
        let keys: Vec<Vec<u8>> = self
            .index
            .read()
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        self.read_keys(keys)
    }

    async fn scan_range(&self, start: &[u8], end: &[u8]) -> Result<KvIter> {
        if start > end {
            return Ok(KvIter::default());
        }
        let keys: Vec<Vec<u8>> = self
            .index
            .read()
            .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            .cloned()
            .collect();
        self.read_keys(keys)
    }

    async fn last_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let key = self.index.read().iter().next_back().cloned();
        self.entry(key)
    }

    async fn first_entry(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let key = self.index.read().iter().next().cloned();
        self.entry(key)
    }

    fn path(&self) -> Option<PathBuf> {
        Some(self.dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_roundtrip_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsKvStore::open(dir.path()).unwrap();
        let mut b = WriteBatch::new();
        for k in ["0000000005", "0000000001", "0000000003"] {
            b.put(k.as_bytes().to_vec(), k.as_bytes().to_vec());
        }
        s.write_batch(b).await.unwrap();

        let got = s.scan_range(b"0000000002", b"0000000005").await.unwrap();
        let keys: Vec<_> = got.items.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![b"0000000003".to_vec(), b"0000000005".to_vec()]);

        s.delete(b"0000000003").await.unwrap();
        assert!(!s.exists(b"0000000003").await.unwrap());
        assert_eq!(s.last_entry().await.unwrap().unwrap().0, b"0000000005".to_vec());

        // reopen sees the same data
        drop(s);
        let s = FsKvStore::open(dir.path()).unwrap();
        assert_eq!(s.get(b"0000000001").await.unwrap(), Some(b"0000000001".to_vec()));
        assert_eq!(s.first_entry().await.unwrap().unwrap().0, b"0000000001".to_vec());
    }

    #[tokio::test]
    async fn test_bounds_read_only_the_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        let s = FsKvStore::open(dir.path()).unwrap();
        for k in ["0000000002", "0000000004", "0000000009"] {
            s.put(k.as_bytes(), b"{}").await.unwrap();
        }
        // a stray temp file and a garbage neighbour never get read
        std::fs::write(dir.path().join("junk.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join(hex::encode(b"0000000004")), b"not json").unwrap();
        std::fs::remove_file(dir.path().join(hex::encode(b"0000000002"))).unwrap();

        // bounds come from the key index, so only the boundary files are read
        let s = FsKvStore::open(dir.path()).unwrap();
        assert_eq!(s.first_entry().await.unwrap().unwrap(), (b"0000000004".to_vec(), b"not json".to_vec()));
        assert_eq!(s.last_entry().await.unwrap().unwrap(), (b"0000000009".to_vec(), b"{}".to_vec()));
        assert!(!s.exists(b"0000000002").await.unwrap());
        let prefixed = s.scan_prefix(b"00000000").await.unwrap();
        assert_eq!(prefixed.items.len(), 2);
    }
}
