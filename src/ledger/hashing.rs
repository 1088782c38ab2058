//! Canonical ledger hashing, following the published XRP Ledger formats:
//! transaction ids, the transaction-set radix tree, and the ledger header.
//!
//! Everything here is pure and deterministic; all digests are SHA-512Half
//! (the first 256 bits of SHA-512) over a 4-byte domain prefix plus payload.

use sha2::{Digest, Sha512};

use crate::ledger::record::LedgerRecord;

pub type Hash256 = [u8; 32];

pub const ZERO_HASH: Hash256 = [0u8; 32];

pub mod prefix {
    /// `TXN\0`, transaction id
    pub const TRANSACTION_ID: [u8; 4] = *b"TXN\0";
    /// `SND\0`, transaction-with-metadata tree leaf
    pub const TX_NODE: [u8; 4] = *b"SND\0";
    /// `MIN\0`, inner tree node
    pub const INNER_NODE: [u8; 4] = *b"MIN\0";
    /// `LWR\0`, ledger header
    pub const LEDGER_MASTER: [u8; 4] = *b"LWR\0";
}

/// First 32 bytes of SHA-512 over the concatenated parts.
pub fn sha512_half(parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha512::new();
    for p in parts {
        hasher.update(p);
    }
    let full = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&full[..32]);
    out
}

/// Variable-length prefix used by the binary serialization format.
/// Lengths above 918744 bytes are not representable.
pub fn encode_vl_length(len: usize) -> Option<Vec<u8>> {
    if len <= 192 {
        Some(vec![len as u8])
    } else if len <= 12_480 {
        let l = len - 193;
        Some(vec![193 + (l >> 8) as u8, (l & 0xff) as u8])
    } else if len <= 918_744 {
        let l = len - 12_481;
        Some(vec![241 + (l >> 16) as u8, ((l >> 8) & 0xff) as u8, (l & 0xff) as u8])
    } else {
        None
    }
}

pub fn transaction_id(tx_blob: &[u8]) -> Hash256 {
    sha512_half(&[&prefix::TRANSACTION_ID, tx_blob])
}

/// Tree leaf for a transaction and its metadata, keyed by `tx_id`.
pub fn transaction_leaf(tx_id: &Hash256, tx_blob: &[u8], meta_blob: &[u8]) -> Option<Hash256> {
    let tx_len = encode_vl_length(tx_blob.len())?;
    let meta_len = encode_vl_length(meta_blob.len())?;
    Some(sha512_half(&[
        &prefix::TX_NODE,
        &tx_len,
        tx_blob,
        &meta_len,
        meta_blob,
        tx_id,
    ]))
}

fn nibble(key: &Hash256, depth: usize) -> usize {
    let byte = key[depth / 2];
    if depth % 2 == 0 {
        (byte >> 4) as usize
    } else {
        (byte & 0x0f) as usize
    }
}

fn inner_hash(items: &[(Hash256, Hash256)], depth: usize) -> Hash256 {
    let mut buckets: [Vec<(Hash256, Hash256)>; 16] = Default::default();
    for item in items {
        buckets[nibble(&item.0, depth)].push(*item);
    }
    let mut children = [ZERO_HASH; 16];
    for (branch, bucket) in buckets.iter().enumerate() {
        children[branch] = match bucket.len() {
            0 => ZERO_HASH,
            1 => bucket[0].1,
            // keys are unique, so depth never runs past 63
            _ => inner_hash(bucket, depth + 1),
        };
    }
    let mut parts: Vec<&[u8]> = Vec::with_capacity(17);
    parts.push(&prefix::INNER_NODE);
    for child in &children {
        parts.push(child);
    }
    sha512_half(&parts)
}

/// Root of the radix-16 tree over `(key, leaf_hash)` pairs. Input order does
/// not matter. Duplicate keys are collapsed (last one wins).
pub fn tree_root(mut items: Vec<(Hash256, Hash256)>) -> Hash256 {
    if items.is_empty() {
        return ZERO_HASH;
    }
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items.reverse();
    items.dedup_by(|a, b| a.0 == b.0);
    inner_hash(&items, 0)
}

/// Decoded transaction, ready for hashing.
#[derive(Debug, Clone)]
pub struct HashableTx {
    pub id: Hash256,
    pub tx_blob: Vec<u8>,
    pub meta_blob: Vec<u8>,
}

/// Transaction-set hash over already-decoded transactions.
pub fn transaction_set_hash(txs: &[HashableTx]) -> Option<Hash256> {
    let mut leaves = Vec::with_capacity(txs.len());
    for tx in txs {
        leaves.push((tx.id, transaction_leaf(&tx.id, &tx.tx_blob, &tx.meta_blob)?));
    }
    Some(tree_root(leaves))
}

/// Fixed-layout header fields that make up the ledger hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFields {
    pub index: u32,
    pub total_coins: u64,
    pub parent_hash: Hash256,
    pub transaction_hash: Hash256,
    pub account_hash: Hash256,
    pub parent_close_time: u32,
    pub close_time: u32,
    pub close_time_resolution: u8,
    pub close_flags: u8,
}

pub fn header_hash(h: &HeaderFields) -> Hash256 {
    sha512_half(&[
        &prefix::LEDGER_MASTER,
        &h.index.to_be_bytes(),
        &h.total_coins.to_be_bytes(),
        &h.parent_hash,
        &h.transaction_hash,
        &h.account_hash,
        &h.parent_close_time.to_be_bytes(),
        &h.close_time.to_be_bytes(),
        &[h.close_time_resolution],
        &[h.close_flags],
    ])
}

pub fn decode_hash256(s: &str) -> Option<Hash256> {
    let bytes = hex::decode(s).ok()?;
    bytes.try_into().ok()
}

impl HeaderFields {
    /// Pull header fields out of a record; `None` if a hash field is not 256-bit hex.
    pub fn from_record(r: &LedgerRecord) -> Option<Self> {
        Some(Self {
            index: r.index,
            total_coins: r.total_coins,
            parent_hash: decode_hash256(&r.parent_hash)?,
            transaction_hash: decode_hash256(&r.transaction_hash)?,
            account_hash: decode_hash256(&r.account_hash)?,
            parent_close_time: r.parent_close_time,
            close_time: r.close_time,
            close_time_resolution: r.close_time_resolution,
            close_flags: r.close_flags,
        })
    }
}
