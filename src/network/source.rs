//! RemoteLedgerSource: fetch one ledger from the best available peer,
//! failing over to the next endpoint on any error.

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ledger::normalize::{attach_json_transactions, normalize_ledger};
use crate::ledger::record::{LedgerIndex, LedgerRecord};
use crate::network::peer::PeerClient;
use crate::network::peerstore::PeerStore;
use crate::utils::errors::FetchError;
use crate::utils::metrics::{FETCH_FAILURES, LEDGERS_FETCHED, METRICS};

/// Which ledger to ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerSelector {
    Index(LedgerIndex),
    Hash(String),
    /// Most recently closed ledger.
    Closed,
}

impl fmt::Display for LedgerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerSelector::Index(i) => write!(f, "#{}", i),
            LedgerSelector::Hash(h) => write!(f, "{}", h),
            LedgerSelector::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub fetch_timeout: Duration,
    /// Attempts per endpoint within one lookup.
    pub failure_threshold: u32,
    /// Also fetch decoded JSON transactions.
    pub include_json: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self { fetch_timeout: Duration::from_secs(20), failure_threshold: 2, include_json: false }
    }
}

fn ledger_params(selector: &LedgerSelector, binary: bool) -> Value {
    let mut params = json!({
        "transactions": true,
        "expand": true,
        "binary": binary,
    });
    match selector {
        LedgerSelector::Index(i) => params["ledger_index"] = json!(i),
        LedgerSelector::Hash(h) => params["ledger_hash"] = json!(h),
        LedgerSelector::Closed => params["ledger_index"] = json!("closed"),
    }
    params
}

/// Reject error envelopes that arrive as ordinary results.
fn check_envelope(result: &Value, peer: &str, selector: &LedgerSelector) -> Result<(), FetchError> {
    let is_error = result.get("status").and_then(Value::as_str) == Some("error") || result.get("error").is_some();
    if !is_error {
        return Ok(());
    }
    let code = result
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    if code == "lgrNotFound" {
        Err(FetchError::NotFound { peer: peer.to_string(), selector: selector.to_string() })
    } else {
        Err(FetchError::ErrorEnvelope { peer: peer.to_string(), code })
    }
}

pub struct RemoteLedgerSource {
    peers: Vec<Arc<dyn PeerClient>>,
    store: PeerStore,
    cfg: SourceConfig,
}

impl RemoteLedgerSource {
    pub fn new(peers: Vec<Arc<dyn PeerClient>>, cfg: SourceConfig) -> Self {
        let store = PeerStore::new(peers.iter().map(|p| p.address().to_string()));
        Self { peers, store, cfg }
    }

    /// Run `op` against endpoints best-first until one succeeds. Each
    /// endpoint gets `failure_threshold` tries; retries are immediate.
    async fn with_failover<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut(Arc<dyn PeerClient>) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if self.peers.is_empty() {
            return Err(FetchError::NoPeers);
        }
        let mut tries = vec![0u32; self.peers.len()];
        let mut total = 0usize;
        loop {
            let ranked = self.store.ranked().await;
            let Some(pos) = ranked.into_iter().find(|&p| tries[p] < self.cfg.failure_threshold) else {
                return Err(FetchError::Exhausted { selector: what.to_string(), attempts: total });
            };
            tries[pos] += 1;
            total += 1;

            let peer = self.peers[pos].clone();
            let addr = peer.address().to_string();
            let timeout = self.cfg.fetch_timeout;
            let outcome = match tokio::time::timeout(timeout, op(peer)).await {
                Ok(res) => res,
                Err(_) => Err(FetchError::Timeout { peer: addr.clone(), secs: timeout.as_secs() }),
            };
            match outcome {
                Ok(v) => {
                    self.store.record_success(pos).await;
                    return Ok(v);
                }
                Err(e) => {
                    warn!(peer = %addr, selector = %what, attempt = tries[pos], error = %e, "peer request failed");
                    METRICS.inc_counter(FETCH_FAILURES);
                    self.store.record_failure(pos).await;
                }
            }
        }
    }

    /// Fetch and normalize one ledger. Hashes are not checked here.
    pub async fn fetch(&self, selector: &LedgerSelector) -> Result<LedgerRecord, FetchError> {
        let what = selector.to_string();
        let include_json = self.cfg.include_json;
        let record = self
            .with_failover(&what, |peer| async move { fetch_from(peer, selector, include_json).await })
            .await?;
        METRICS.inc_counter(LEDGERS_FETCHED);
        debug!(index = record.index, hash = %record.hash, peer = ?record.retrieved_from, "fetched ledger");
        Ok(record)
    }

    /// Index and hash of the most recently closed ledger.
    pub async fn closed_head(&self) -> Result<(LedgerIndex, String), FetchError> {
        self.with_failover("ledger_closed", |peer| async move {
            let addr = peer.address().to_string();
            let result = peer.request("ledger_closed", json!({})).await?;
            check_envelope(&result, &addr, &LedgerSelector::Closed)?;
            let index = result
                .get("ledger_index")
                .and_then(Value::as_u64)
                .and_then(|i| LedgerIndex::try_from(i).ok());
            let hash = result.get("ledger_hash").and_then(Value::as_str);
            match (index, hash) {
                (Some(i), Some(h)) => Ok((i, h.to_ascii_uppercase())),
                _ => Err(FetchError::Malformed { peer: addr, reason: "ledger_closed without index/hash".into() }),
            }
        })
        .await
    }

    /// Fetch many ledgers by index with at most `concurrency` requests in
    /// flight. Results come back in input order.
    pub async fn fetch_many(
        &self,
        indices: Vec<LedgerIndex>,
        concurrency: usize,
    ) -> Vec<Result<LedgerRecord, FetchError>> {
        stream::iter(indices)
            .map(|i| async move { self.fetch(&LedgerSelector::Index(i)).await })
            .buffered(concurrency.max(1))
            .collect()
            .await
    }
}

async fn fetch_from(
    peer: Arc<dyn PeerClient>,
    selector: &LedgerSelector,
    include_json: bool,
) -> Result<LedgerRecord, FetchError> {
    let addr = peer.address().to_string();
    let result = peer.request("ledger", ledger_params(selector, true)).await?;
    check_envelope(&result, &addr, selector)?;
    let ledger = result
        .get("ledger")
        .ok_or_else(|| FetchError::Malformed { peer: addr.clone(), reason: "response has no ledger".into() })?;
    let mut record = normalize_ledger(ledger, &addr)?;

    match selector {
        LedgerSelector::Index(i) if record.index != *i => {
            return Err(FetchError::Malformed {
                peer: addr,
                reason: format!("asked for ledger {}, got {}", i, record.index),
            });
        }
        LedgerSelector::Hash(h) if !record.hash.eq_ignore_ascii_case(h) => {
            return Err(FetchError::Malformed {
                peer: addr,
                reason: format!("asked for ledger {}, got {}", h, record.hash),
            });
        }
        _ => {}
    }

    if include_json && !record.transactions.is_empty() {
        let by_hash = LedgerSelector::Hash(record.hash.clone());
        let result = peer.request("ledger", ledger_params(&by_hash, false)).await?;
        check_envelope(&result, &addr, &by_hash)?;
        let txs = result
            .get("ledger")
            .and_then(|l| l.get("transactions"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        attach_json_transactions(&mut record, &txs);
    }
    Ok(record)
}
