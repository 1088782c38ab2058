//! In-memory and stored shape of one closed ledger.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type LedgerIndex = u32;

/// Width of the zero-padded storage key. Fits every `u32`.
pub const KEY_WIDTH: usize = 10;

/// Network close times count seconds from 2000-01-01T00:00:00Z.
pub const NETWORK_EPOCH_OFFSET: i64 = 946_684_800;

/// Storage key for a ledger: lexicographic order equals numeric order.
pub fn ledger_key(index: LedgerIndex) -> String {
    format!("{:0width$}", index, width = KEY_WIDTH)
}

pub fn parse_ledger_key(key: &str) -> Option<LedgerIndex> {
    if key.len() != KEY_WIDTH || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Calendar timestamp for a network-epoch close time.
pub fn close_time_to_utc(close_time: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(NETWORK_EPOCH_OFFSET + close_time as i64, 0)
        .single()
        .unwrap_or_default()
}

/// One transaction as served by a peer. Only `tx_blob`, `meta_blob` and
/// `hash` take part in hashing; the decoded forms are carried for readers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionEntry {
    pub hash: String,
    pub tx_blob: String,
    pub meta_blob: String,
    /// Engine result code, e.g. `tesSUCCESS`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl TransactionEntry {
    pub fn succeeded(&self) -> bool {
        self.result.as_deref().map(|r| r.starts_with("tes")).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerRecord {
    pub index: LedgerIndex,
    pub hash: String,
    pub parent_hash: String,
    pub account_hash: String,
    pub transaction_hash: String,
    pub total_coins: u64,
    /// Network epoch seconds
    pub close_time: u32,
    pub close_time_utc: DateTime<Utc>,
    pub parent_close_time: u32,
    pub close_time_resolution: u8,
    pub close_flags: u8,
    pub transactions: Vec<TransactionEntry>,

    /// Storage revision token, owned by `LedgerStore`.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Peer the record was fetched from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieved_from: Option<String>,
}

impl LedgerRecord {
    pub fn key(&self) -> String {
        ledger_key(self.index)
    }

    /// Equality on ledger content, ignoring bookkeeping fields.
    pub fn content_eq(&self, other: &LedgerRecord) -> bool {
        self.without_bookkeeping() == other.without_bookkeeping()
    }

    pub fn without_bookkeeping(&self) -> LedgerRecord {
        LedgerRecord { revision: None, retrieved_from: None, ..self.clone() }
    }

    pub fn marker(&self, id: MarkerId) -> ChainMarker {
        ChainMarker { id, index: self.index, hash: self.hash.clone() }
    }

    /// True when `self` is the direct successor of `prev` in the chain.
    pub fn follows(&self, prev: &LedgerRecord) -> bool {
        self.index == prev.index.wrapping_add(1) && self.parent_hash.eq_ignore_ascii_case(&prev.hash)
    }

    pub fn follows_marker(&self, prev: &ChainMarker) -> bool {
        self.index == prev.index.wrapping_add(1) && self.parent_hash.eq_ignore_ascii_case(&prev.hash)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MarkerId {
    First,
    Last,
    Validated,
}

impl MarkerId {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarkerId::First => "first",
            MarkerId::Last => "last",
            MarkerId::Validated => "validated",
        }
    }
}

/// Bookmark into the stored chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainMarker {
    pub id: MarkerId,
    pub index: LedgerIndex,
    pub hash: String,
}
