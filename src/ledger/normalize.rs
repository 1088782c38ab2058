//! Turn a peer's `ledger` payload into a `LedgerRecord`.
//!
//! Binary-mode transactions (`tx_blob` + `meta`) are what the hashes are
//! computed over. Decoded JSON transactions, when available, are merged in by
//! transaction hash and their offer nodes annotated with an exchange rate.

use serde::Deserialize;
use serde_json::Value;

use crate::ledger::hashing::transaction_id;
use crate::ledger::record::{close_time_to_utc, LedgerRecord, TransactionEntry};
use crate::utils::errors::FetchError;
use crate::utils::serde_helpers::{encode_hex, u32_from_str_or_num, u64_from_str_or_num};

/// Header fields as peers send them.
#[derive(Debug, Deserialize)]
struct WireLedger {
    #[serde(deserialize_with = "u32_from_str_or_num")]
    ledger_index: u32,
    hash: String,
    parent_hash: String,
    #[serde(default)]
    account_hash: String,
    transaction_hash: String,
    #[serde(deserialize_with = "u64_from_str_or_num")]
    total_coins: u64,
    close_time: u32,
    #[serde(default)]
    parent_close_time: u32,
    #[serde(default)]
    close_time_resolution: u8,
    #[serde(default)]
    close_flags: u8,
    #[serde(default)]
    transactions: Vec<Value>,
}

/// Peers send several fields under two names; keep the first one present.
const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("ledger_index", &["ledger_index", "seqNum"]),
    ("hash", &["hash", "ledger_hash"]),
    ("total_coins", &["total_coins", "totalCoins"]),
];

fn canonical_fields(obj: &serde_json::Map<String, Value>) -> serde_json::Map<String, Value> {
    let mut out = obj.clone();
    for (canonical, names) in FIELD_ALIASES {
        let value = names.iter().find_map(|n| obj.get(*n)).cloned();
        for n in names.iter() {
            out.remove(*n);
        }
        if let Some(v) = value {
            out.insert(canonical.to_string(), v);
        }
    }
    out
}

fn malformed(peer: &str, reason: impl Into<String>) -> FetchError {
    FetchError::Malformed { peer: peer.to_string(), reason: reason.into() }
}

/// Normalize the `ledger` object of a binary-mode response.
pub fn normalize_ledger(ledger: &Value, peer: &str) -> Result<LedgerRecord, FetchError> {
    let obj = ledger.as_object().ok_or_else(|| malformed(peer, "ledger is not an object"))?;
    let obj = canonical_fields(obj);
    if !obj.contains_key("ledger_index") {
        return Err(malformed(peer, "missing ledger index"));
    }
    if !obj.get("hash").map(Value::is_string).unwrap_or(false) {
        return Err(malformed(peer, "missing ledger hash"));
    }

    let wire: WireLedger =
        serde_json::from_value(Value::Object(obj)).map_err(|e| malformed(peer, e.to_string()))?;

    let mut transactions = Vec::with_capacity(wire.transactions.len());
    for (pos, tx) in wire.transactions.iter().enumerate() {
        transactions.push(normalize_binary_tx(tx, pos, peer)?);
    }

    Ok(LedgerRecord {
        index: wire.ledger_index,
        hash: wire.hash.to_ascii_uppercase(),
        parent_hash: wire.parent_hash.to_ascii_uppercase(),
        account_hash: wire.account_hash.to_ascii_uppercase(),
        transaction_hash: wire.transaction_hash.to_ascii_uppercase(),
        total_coins: wire.total_coins,
        close_time: wire.close_time,
        close_time_utc: close_time_to_utc(wire.close_time),
        parent_close_time: wire.parent_close_time,
        close_time_resolution: wire.close_time_resolution,
        close_flags: wire.close_flags,
        transactions,
        revision: None,
        retrieved_from: Some(peer.to_string()),
    })
}

fn normalize_binary_tx(tx: &Value, pos: usize, peer: &str) -> Result<TransactionEntry, FetchError> {
    let tx_blob = tx
        .get("tx_blob")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(peer, format!("transaction {} has no tx_blob", pos)))?;
    let meta_blob = tx
        .get("meta")
        .or_else(|| tx.get("meta_blob"))
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(peer, format!("transaction {} has no meta", pos)))?;

    let hash = match tx.get("hash").and_then(Value::as_str) {
        Some(h) => h.to_ascii_uppercase(),
        None => {
            let blob = hex::decode(tx_blob)
                .map_err(|_| malformed(peer, format!("transaction {} blob is not hex", pos)))?;
            encode_hex(&transaction_id(&blob))
        }
    };

    Ok(TransactionEntry {
        hash,
        tx_blob: tx_blob.to_ascii_uppercase(),
        meta_blob: meta_blob.to_ascii_uppercase(),
        result: None,
        tx: None,
        meta: None,
    })
}

/// Merge JSON-mode transactions into `record` by transaction hash.
/// Returns how many entries were matched.
pub fn attach_json_transactions(record: &mut LedgerRecord, json_txs: &[Value]) -> usize {
    let mut matched = 0;
    for jtx in json_txs {
        let Some(hash) = jtx.get("hash").and_then(Value::as_str) else { continue };
        let Some(entry) = record.transactions.iter_mut().find(|t| t.hash.eq_ignore_ascii_case(hash)) else {
            continue;
        };

        let mut tx = jtx.clone();
        let mut meta = tx
            .as_object_mut()
            .and_then(|o| o.remove("metaData").or_else(|| o.remove("meta")));
        if let Some(m) = meta.as_mut() {
            annotate_exchange_rates(m);
            entry.result = m.get("TransactionResult").and_then(Value::as_str).map(str::to_string);
        }
        entry.tx = Some(tx);
        entry.meta = meta;
        matched += 1;
    }
    matched
}

/// Rate encoded in the last 64 bits of an order book directory id:
/// top byte is the exponent biased by 100, the low 56 bits the mantissa.
pub fn quality_from_book_directory(dir: &str) -> Option<f64> {
    let tail = dir.get(dir.len().checked_sub(16)?..)?;
    let q = u64::from_str_radix(tail, 16).ok()?;
    let exponent = (q >> 56) as i32 - 100;
    let mantissa = (q & 0x00ff_ffff_ffff_ffff) as f64;
    Some(if exponent >= 0 {
        mantissa * 10f64.powi(exponent)
    } else {
        mantissa / 10f64.powi(-exponent)
    })
}

const DROPS_PER_XRP: f64 = 1_000_000.0;

/// Add `exchange_rate` to every offer node that carries a `BookDirectory`.
/// Native amounts are strings of drops; rates are expressed in whole units.
pub fn annotate_exchange_rates(meta: &mut Value) {
    let Some(nodes) = meta.get_mut("AffectedNodes").and_then(Value::as_array_mut) else { return };
    for wrapper in nodes.iter_mut() {
        let Some(obj) = wrapper.as_object_mut() else { continue };
        for node in obj.values_mut() {
            if node.get("LedgerEntryType").and_then(Value::as_str) != Some("Offer") {
                continue;
            }
            let fields = node.get("FinalFields").or_else(|| node.get("NewFields"));
            let Some(fields) = fields else { continue };
            let Some(dir) = fields.get("BookDirectory").and_then(Value::as_str) else { continue };
            let Some(mut rate) = quality_from_book_directory(dir) else { continue };
            if fields.get("TakerPays").map(Value::is_string).unwrap_or(false) {
                rate /= DROPS_PER_XRP;
            }
            if fields.get("TakerGets").map(Value::is_string).unwrap_or(false) {
                rate *= DROPS_PER_XRP;
            }
            if let Some(n) = node.as_object_mut() {
                n.insert("exchange_rate".into(), Value::String(rate.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book_dir(exp_byte: u8, mantissa: u64) -> String {
        format!("{}{:02X}{:014X}", "A".repeat(48), exp_byte, mantissa)
    }

    fn wire_ledger() -> Value {
        json!({
            "accepted": true,
            "account_hash": "aa".repeat(32),
            "close_flags": 0,
            "close_time": 86_400,
            "close_time_resolution": 10,
            "hash": "bb".repeat(32),
            "ledger_hash": "bb".repeat(32),
            "ledger_index": "32570",
            "seqNum": "32570",
            "parent_close_time": 86_390,
            "parent_hash": "cc".repeat(32),
            "totalCoins": "99999999999999990",
            "transaction_hash": "dd".repeat(32),
            "transactions": [ { "tx_blob": "1200", "meta": "201C" } ]
        })
    }

    #[test]
    fn test_normalize_renames_and_parses() {
        let r = normalize_ledger(&wire_ledger(), "peerA").unwrap();
        assert_eq!(r.index, 32570);
        assert_eq!(r.total_coins, 99_999_999_999_999_990);
        assert_eq!(r.hash, "BB".repeat(32));
        assert_eq!(r.close_time_utc.to_rfc3339(), "2000-01-02T00:00:00+00:00");
        assert_eq!(r.retrieved_from.as_deref(), Some("peerA"));
        assert_eq!(r.transactions.len(), 1);
        assert_eq!(r.transactions[0].hash, encode_hex(&transaction_id(&[0x12, 0x00])));
    }

    #[test]
    fn test_missing_index_or_hash_is_malformed() {
        let mut l = wire_ledger();
        l.as_object_mut().unwrap().remove("ledger_index");
        l.as_object_mut().unwrap().remove("seqNum");
        assert!(matches!(normalize_ledger(&l, "p"), Err(FetchError::Malformed { .. })));

        let mut l = wire_ledger();
        l.as_object_mut().unwrap().remove("ledger_hash");
        l.as_object_mut().unwrap().remove("hash");
        assert!(matches!(normalize_ledger(&l, "p"), Err(FetchError::Malformed { .. })));

        let mut l = wire_ledger();
        l["transactions"] = json!([{ "meta": "00" }]);
        assert!(matches!(normalize_ledger(&l, "p"), Err(FetchError::Malformed { .. })));
    }

    #[test]
    fn test_quality_parsing() {
        assert_eq!(quality_from_book_directory(&book_dir(84, 2_500_000_000_000_000)), Some(0.25));
        assert_eq!(quality_from_book_directory(&book_dir(100, 7)), Some(7.0));
        assert_eq!(quality_from_book_directory("abc"), None);
    }

    #[test]
    fn test_exchange_rate_annotation_and_json_merge() {
        let mut record = normalize_ledger(&wire_ledger(), "p").unwrap();
        let hash = record.transactions[0].hash.clone();
        let json_txs = vec![json!({
            "hash": hash.to_lowercase(),
            "TransactionType": "OfferCreate",
            "metaData": {
                "TransactionResult": "tesSUCCESS",
                "AffectedNodes": [
                    { "CreatedNode": { "LedgerEntryType": "Offer", "NewFields": {
                        "BookDirectory": book_dir(84, 2_500_000_000_000_000),
                        "TakerPays": "1000000",
                        "TakerGets": { "currency": "USD", "value": "4" } } } },
                    { "ModifiedNode": { "LedgerEntryType": "AccountRoot", "FinalFields": {} } }
                ]
            }
        })];
        assert_eq!(attach_json_transactions(&mut record, &json_txs), 1);
        let tx = &record.transactions[0];
        assert!(tx.succeeded());
        assert!(tx.tx.as_ref().unwrap().get("metaData").is_none());
        let nodes = tx.meta.as_ref().unwrap()["AffectedNodes"].as_array().unwrap();
        assert_eq!(nodes[0]["CreatedNode"]["exchange_rate"], json!("0.00000025"));
        assert!(nodes[1]["ModifiedNode"].get("exchange_rate").is_none());
    }
}
