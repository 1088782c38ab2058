//! Storage module: key-value backends and the stores built on them.
//!
//! Engines: in-memory, one-file-per-key FS, RocksDB (feature "rocksdb").
//! Use `storage::open(path, engine)` to create an Arc<dyn KvStore> to pass to other modules.

pub mod traits;
pub mod mem_store;
pub mod fs_store;

#[cfg(feature = "rocksdb")]
pub mod rocksdb_store;

pub mod ledger_store;
pub mod state_store;
pub mod notify;

pub use traits::{BatchOp, KvIter, KvStore, WriteBatch};
pub use mem_store::MemKvStore;
pub use fs_store::FsKvStore;

#[cfg(feature = "rocksdb")]
pub use rocksdb_store::RocksKvStore;

pub use ledger_store::{LedgerStore, UpsertSummary};
pub use state_store::{KvStateStore, StateStore};
pub use notify::{BroadcastNotifier, IndexNotifier, NoopNotifier};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Engine selection enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    Memory,
    Fs,
    RocksDb,
}

impl Default for StorageEngine {
    fn default() -> Self {
        StorageEngine::Fs
    }
}

impl FromStr for StorageEngine {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageEngine::Memory),
            "fs" => Ok(StorageEngine::Fs),
            "rocksdb" => Ok(StorageEngine::RocksDb),
            other => bail!("unknown storage engine {other:?}"),
        }
    }
}

/// Open a KvStore at `path` with the chosen engine.
pub fn open(path: impl AsRef<Path>, engine: StorageEngine) -> Result<Arc<dyn KvStore>> {
    match engine {
        StorageEngine::Memory => Ok(Arc::new(MemKvStore::new())),
        StorageEngine::Fs => {
            let s = FsKvStore::open(path)?;
            Ok(Arc::new(s))
        }
        #[cfg(feature = "rocksdb")]
        StorageEngine::RocksDb => {
            let s = RocksKvStore::open(path)?;
            Ok(Arc::new(s))
        }
        #[cfg(not(feature = "rocksdb"))]
        StorageEngine::RocksDb => bail!("built without the rocksdb feature"),
    }
}
