//! LedgerValidator: recompute a fetched ledger's hashes and compare them
//! against what the peer claimed. Pure, no I/O.

use crate::ledger::hashing::{
    decode_hash256, header_hash, transaction_id, transaction_set_hash, HashableTx, HeaderFields,
};
use crate::ledger::record::LedgerRecord;
use crate::utils::errors::ValidationError;
use crate::utils::serde_helpers::encode_hex;

fn decode_transactions(record: &LedgerRecord) -> Result<Vec<HashableTx>, ValidationError> {
    let mut out = Vec::with_capacity(record.transactions.len());
    for tx in &record.transactions {
        let tx_blob = hex::decode(&tx.tx_blob)
            .map_err(|_| ValidationError::MalformedHex { index: record.index, field: "tx_blob" })?;
        let meta_blob = hex::decode(&tx.meta_blob)
            .map_err(|_| ValidationError::MalformedHex { index: record.index, field: "meta_blob" })?;
        let id = transaction_id(&tx_blob);
        let claimed = decode_hash256(&tx.hash)
            .ok_or(ValidationError::MalformedHex { index: record.index, field: "transaction hash" })?;
        if claimed != id {
            return Err(ValidationError::TransactionIdMismatch {
                index: record.index,
                claimed: tx.hash.clone(),
                computed: encode_hex(&id),
            });
        }
        out.push(HashableTx { id, tx_blob, meta_blob });
    }
    Ok(out)
}

/// Recompute the transaction-set hash from the record's transactions.
pub fn compute_transaction_hash(record: &LedgerRecord) -> Result<String, ValidationError> {
    let txs = decode_transactions(record)?;
    let root = transaction_set_hash(&txs)
        .ok_or(ValidationError::MalformedHex { index: record.index, field: "blob length" })?;
    Ok(encode_hex(&root))
}

/// Recompute the ledger header hash from the record's header fields.
pub fn compute_ledger_hash(record: &LedgerRecord) -> Result<String, ValidationError> {
    let fields = HeaderFields::from_record(record)
        .ok_or(ValidationError::MalformedHex { index: record.index, field: "header hash" })?;
    Ok(encode_hex(&header_hash(&fields)))
}

/// Check the transaction set, then the header. Hex compares ignore case.
pub fn validate(record: &LedgerRecord) -> Result<(), ValidationError> {
    let computed = compute_transaction_hash(record)?;
    if !computed.eq_ignore_ascii_case(&record.transaction_hash) {
        return Err(ValidationError::TransactionSetMismatch {
            index: record.index,
            claimed: record.transaction_hash.clone(),
            computed,
        });
    }

    let computed = compute_ledger_hash(record)?;
    if !computed.eq_ignore_ascii_case(&record.hash) {
        return Err(ValidationError::HeaderMismatch {
            index: record.index,
            claimed: record.hash.clone(),
            computed,
        });
    }
    Ok(())
}

/// `validate`, plus: the record must be the one the caller asked for.
pub fn validate_expected(record: &LedgerRecord, expected_hash: Option<&str>) -> Result<(), ValidationError> {
    validate(record)?;
    if let Some(expected) = expected_hash {
        if !expected.eq_ignore_ascii_case(&record.hash) {
            return Err(ValidationError::UnexpectedHash {
                index: record.index,
                expected: expected.to_string(),
                actual: record.hash.clone(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{build_chain, LedgerBuilder};

    #[test]
    fn test_valid_record_passes() {
        let chain = build_chain(1, 5, "main");
        for r in &chain {
            assert_eq!(validate(r), Ok(()));
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        let r = LedgerBuilder::new(12).with_transactions(6, "det").build();
        let a = compute_transaction_hash(&r).unwrap();
        let b = compute_transaction_hash(&r.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r.transaction_hash);
    }

    #[test]
    fn test_wrong_transaction_hash_is_rejected() {
        let mut r = LedgerBuilder::new(3).with_transactions(3, "x").build();
        r.transaction_hash = "00".repeat(32);
        match validate(&r) {
            Err(ValidationError::TransactionSetMismatch { index, .. }) => assert_eq!(index, 3),
            other => panic!("expected mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_lowercase_claims_accepted() {
        let mut r = LedgerBuilder::new(4).with_transactions(2, "case").build();
        r.transaction_hash = r.transaction_hash.to_lowercase();
        r.hash = r.hash.to_lowercase();
        assert_eq!(validate(&r), Ok(()));
    }

    #[test]
    fn test_tampered_transaction_is_rejected() {
        let mut r = LedgerBuilder::new(5).with_transactions(2, "tamper").build();
        r.transactions[1].meta_blob = "ABCD".into();
        assert!(matches!(validate(&r), Err(ValidationError::TransactionSetMismatch { .. })));

        let mut r = LedgerBuilder::new(5).with_transactions(2, "tamper").build();
        r.transactions[0].tx_blob = "ABCD".into();
        assert!(matches!(validate(&r), Err(ValidationError::TransactionIdMismatch { .. })));

        let mut r = LedgerBuilder::new(5).build();
        r.transactions = vec![];
        r.total_coins += 1;
        assert!(matches!(validate(&r), Err(ValidationError::HeaderMismatch { .. })));
    }

    #[test]
    fn test_mainnet_ledger_validates() {
        let mut r = LedgerBuilder::new(32570).build();
        r.hash = "4109C6F2045FC7EFF4CDE8F9905D19C28820D86304080FF886B299F0206E42B5".into();
        r.parent_hash = "60A01EBF11537D8394EA1235253293508BDA7131D5F8710EFE9413AA129653A2".into();
        r.account_hash = "3806AF8F22037DE598D30D38C8861FADF391171D26F7DE34ACFA038996EA6BEB".into();
        r.transaction_hash = "0".repeat(64);
        r.total_coins = 99_999_999_999_996_320;
        r.parent_close_time = 410_325_660;
        r.close_time = 410_325_670;
        r.close_time_resolution = 10;
        r.close_flags = 0;
        r.transactions.clear();
        assert_eq!(validate(&r), Ok(()));

        r.account_hash = r.account_hash.replace("3806", "3807");
        assert!(matches!(validate(&r), Err(ValidationError::HeaderMismatch { index: 32570, .. })));
    }

    #[test]
    fn test_malformed_hex() {
        let mut r = LedgerBuilder::new(6).with_transactions(1, "hex").build();
        r.transactions[0].tx_blob = "zz".into();
        assert!(matches!(validate(&r), Err(ValidationError::MalformedHex { field: "tx_blob", .. })));
    }

    #[test]
    fn test_expected_hash() {
        let r = LedgerBuilder::new(9).build();
        assert_eq!(validate_expected(&r, Some(&r.hash.to_lowercase())), Ok(()));
        assert!(matches!(
            validate_expected(&r, Some(&"11".repeat(32))),
            Err(ValidationError::UnexpectedHash { .. })
        ));
    }
}
