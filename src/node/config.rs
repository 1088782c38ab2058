use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ledger::record::LedgerIndex;
use crate::network::source::SourceConfig;
use crate::storage::StorageEngine;
use crate::sync::auditor::AuditConfig;
use crate::sync::live::LiveConfig;
use crate::sync::walker::WalkerConfig;

/// Importer configuration, read from TOML. Every field has a default, so an
/// empty file is valid.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImporterConfig {
    pub data_dir: PathBuf,
    /// Lowest ledger the network still serves; never walked past.
    pub genesis_index: LedgerIndex,
    pub storage: StorageEngine,
    pub log_level: String,
    pub peers: PeersSection,
    pub import: ImportSection,
    pub live: LiveSection,
    pub audit: AuditSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeersSection {
    pub endpoints: Vec<String>,
    pub fetch_timeout_secs: u64,
    pub failure_threshold: u32,
    pub include_json: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportSection {
    pub batch_size: usize,
    pub lookback: u32,
    pub fetch_concurrency: usize,
    pub fetch_attempts: u32,
    pub max_repair_rounds: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LiveSection {
    pub retry_delay_ms: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditSection {
    pub batch_size: u32,
    pub gap_retry_delay_ms: u64,
}

impl Default for ImporterConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            genesis_index: 1,
            storage: StorageEngine::default(),
            log_level: "info".into(),
            peers: PeersSection::default(),
            import: ImportSection::default(),
            live: LiveSection::default(),
            audit: AuditSection::default(),
        }
    }
}

impl Default for PeersSection {
    fn default() -> Self {
        let source = SourceConfig::default();
        Self {
            endpoints: Vec::new(),
            fetch_timeout_secs: source.fetch_timeout.as_secs(),
            failure_threshold: source.failure_threshold,
            include_json: source.include_json,
        }
    }
}

impl Default for ImportSection {
    fn default() -> Self {
        let walker = WalkerConfig::default();
        Self {
            batch_size: walker.batch_size,
            lookback: walker.lookback,
            fetch_concurrency: walker.fetch_concurrency,
            fetch_attempts: walker.fetch_attempts,
            max_repair_rounds: walker.max_repair_rounds,
        }
    }
}

impl Default for LiveSection {
    fn default() -> Self {
        Self { retry_delay_ms: 500, poll_interval_ms: 2_000 }
    }
}

impl Default for AuditSection {
    fn default() -> Self {
        Self { batch_size: 1000, gap_retry_delay_ms: 2_000 }
    }
}

impl ImporterConfig {
    /// Load config from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(data: &str) -> Result<Self> {
        Ok(toml::from_str(data)?)
    }

    pub fn ledgers_path(&self) -> PathBuf {
        self.data_dir.join("ledgers")
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            fetch_timeout: Duration::from_secs(self.peers.fetch_timeout_secs.max(1)),
            failure_threshold: self.peers.failure_threshold.max(1),
            include_json: self.peers.include_json,
        }
    }

    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            batch_size: self.import.batch_size,
            lookback: self.import.lookback,
            genesis_index: self.genesis_index,
            fetch_attempts: self.import.fetch_attempts,
            fetch_concurrency: self.import.fetch_concurrency,
            max_repair_rounds: self.import.max_repair_rounds,
            ..WalkerConfig::default()
        }
    }

    pub fn live_config(&self) -> LiveConfig {
        LiveConfig { retry_delay: Duration::from_millis(self.live.retry_delay_ms), lookback: self.import.lookback }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.live.poll_interval_ms.max(1))
    }

    pub fn audit_config(&self) -> AuditConfig {
        AuditConfig {
            batch_size: self.audit.batch_size,
            gap_retry_delay: Duration::from_millis(self.audit.gap_retry_delay_ms),
            genesis_index: self.genesis_index,
        }
    }
}

/// Parse a CSV list of peers into Vec<String>
pub fn parse_peers_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}
