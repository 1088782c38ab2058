//! Ledger model: the stored record shape, canonical hashing, wire
//! normalization and validation.

pub mod record;
pub mod hashing;
pub mod normalize;
pub mod validator;

pub use record::{
    ledger_key, parse_ledger_key, ChainMarker, LedgerIndex, LedgerRecord, MarkerId, TransactionEntry,
};
pub use validator::{validate, validate_expected};
