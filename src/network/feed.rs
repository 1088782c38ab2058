//! "Ledger closed" notifications. Peers are polled for their closed head
//! and every advance is pushed onto a channel the live importer drains.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ledger::record::LedgerIndex;
use crate::network::source::RemoteLedgerSource;

/// Trigger for the live importer; the payload beyond the index is advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerClosed {
    pub index: LedgerIndex,
    pub hash: Option<String>,
}

/// Poll `closed_head` every `interval` and emit one event per advance.
/// When several ledgers closed between polls only the newest is emitted;
/// the importer fills the gap itself.
pub fn spawn_polling_feed(
    source: Arc<RemoteLedgerSource>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (mpsc::Receiver<LedgerClosed>, JoinHandle<anyhow::Result<()>>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = tokio::spawn(async move {
        let mut last_seen: Option<LedgerIndex> = None;
        loop {
            if *shutdown.borrow() {
                info!("ledger feed observed shutdown");
                break;
            }
            match source.closed_head().await {
                Ok((index, hash)) => {
                    if last_seen.map(|l| index > l).unwrap_or(true) {
                        debug!(index, hash = %hash, "ledger closed");
                        last_seen = Some(index);
                        if tx.send(LedgerClosed { index, hash: Some(hash) }).await.is_err() {
                            // importer gone
                            break;
                        }
                    }
                }
                Err(e) => warn!(error = %e, "closed head poll failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        Ok(())
    });
    (rx, handle)
}
