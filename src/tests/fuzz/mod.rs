//! Fuzz tests: random single-record corruptions of stored chains, and
//! hostile peer payloads.

use proptest::prelude::*;
use rand::Rng;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::ledger::normalize::normalize_ledger;
use crate::ledger::record::{ledger_key, LedgerIndex, LedgerRecord};
use crate::ledger::validator::validate;
use crate::storage::ledger_store::LedgerStore;
use crate::storage::mem_store::MemKvStore;
use crate::storage::traits::KvStore;
use crate::sync::auditor::{AuditConfig, AuditOutcome, ChainAuditor};
use crate::tests::fixtures::{build_chain, to_wire};

#[derive(Debug, Clone, Copy)]
enum Corruption {
    ParentHash,
    OwnHash,
    TxBlob,
    TotalCoins,
    Remove,
    Garble,
}

fn corruption() -> impl Strategy<Value = Corruption> {
    prop_oneof![
        Just(Corruption::ParentHash),
        Just(Corruption::OwnHash),
        Just(Corruption::TxBlob),
        Just(Corruption::TotalCoins),
        Just(Corruption::Remove),
        Just(Corruption::Garble),
    ]
}

fn corrupt(record: &mut LedgerRecord, how: Corruption) {
    match how {
        Corruption::ParentHash => record.parent_hash = "1F".repeat(32),
        Corruption::OwnHash => record.hash = "2E".repeat(32),
        Corruption::TxBlob => record.transactions[0].tx_blob.push_str("00"),
        Corruption::TotalCoins => record.total_coins += 1,
        Corruption::Remove | Corruption::Garble => {}
    }
}

async fn audit_corrupted(start: LedgerIndex, len: u32, victim: u32, how: Corruption) -> AuditOutcome {
    let kv = MemKvStore::new();
    let store = Arc::new(LedgerStore::new(Arc::new(kv.clone())));
    let chain = build_chain(start, start + len - 1, "fuzz");
    store.upsert_batch(chain.clone()).await.unwrap();

    let index = start + victim;
    let key = ledger_key(index);
    match how {
        Corruption::Remove => kv.delete(key.as_bytes()).await.unwrap(),
        Corruption::Garble => kv.put(key.as_bytes(), b"{\"ledger_index\": [").await.unwrap(),
        _ => {
            let mut bad = chain[victim as usize].clone();
            corrupt(&mut bad, how);
            kv.put(key.as_bytes(), &serde_json::to_vec(&bad).unwrap()).await.unwrap();
        }
    }

    let cfg = AuditConfig { batch_size: 7, gap_retry_delay: Duration::ZERO, genesis_index: 1 };
    ChainAuditor::new(store, cfg).audit_from(start, None).await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Every single-record corruption is caught at the corrupted index.
    #[test]
    fn fuzz_auditor_catches_corruption(
        start in 1u32..500,
        len in 3u32..40,
        victim_seed in any::<u32>(),
        how in corruption(),
    ) {
        // removing the top ledger just shortens the chain
        let victim = match how {
            Corruption::Remove => victim_seed % (len - 1),
            _ => victim_seed % len,
        };
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let outcome = rt.block_on(audit_corrupted(start, len, victim, how));
        let index = start + victim;
        let expected_last_good = if victim == 0 { None } else { Some(index - 1) };
        match outcome {
            AuditOutcome::BrokenAt { last_good, failure } => {
                prop_assert_eq!(last_good, expected_last_good);
                prop_assert_eq!(failure.index(), index);
            }
            other => prop_assert!(false, "corruption {:?} at {} not detected: {:?}", how, index, other),
        }
    }

    /// Hashing is a pure function of the record.
    #[test]
    fn fuzz_validation_is_deterministic(start in 1u32..10_000, len in 1u32..6) {
        for record in build_chain(start, start + len - 1, "det") {
            prop_assert!(validate(&record).is_ok());
            prop_assert_eq!(validate(&record.clone()), validate(&record));
        }
    }
}

#[test]
fn fuzz_normalize_never_panics() {
    let mut rng = rand::thread_rng();
    let template = to_wire(&build_chain(1, 1, "wire")[0], true);
    let ledger = template["ledger"].clone();
    let keys: Vec<String> = ledger.as_object().map(|o| o.keys().cloned().collect()).unwrap_or_default();

    for _ in 0..500 {
        let mut mutated = ledger.clone();
        let key = &keys[rng.gen_range(0..keys.len())];
        let junk: Value = match rng.gen_range(0..5) {
            0 => Value::Null,
            1 => json!(rng.gen::<i64>()),
            2 => json!(hex::encode((0..rng.gen_range(0..40)).map(|_| rng.gen::<u8>()).collect::<Vec<u8>>())),
            3 => json!([rng.gen::<u8>(), "x"]),
            _ => json!({ "nested": rng.gen::<bool>() }),
        };
        mutated[key.as_str()] = junk;
        // Ok or Err, never a panic
        if let Ok(record) = normalize_ledger(&mutated, "fuzz") {
            let _ = validate(&record);
        }
    }
}
