use thiserror::Error;

use crate::ledger::record::LedgerIndex;

/// Failure talking to a remote peer. Everything except `Exhausted` is
/// retried by `RemoteLedgerSource` against the next endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transport error from {peer}: {reason}")]
    Transport { peer: String, reason: String },

    #[error("request to {peer} timed out after {secs}s")]
    Timeout { peer: String, secs: u64 },

    #[error("malformed ledger payload from {peer}: {reason}")]
    Malformed { peer: String, reason: String },

    #[error("ledger {selector} not found on {peer}")]
    NotFound { peer: String, selector: String },

    #[error("error envelope from {peer}: {code}")]
    ErrorEnvelope { peer: String, code: String },

    #[error("all peers exhausted fetching {selector} ({attempts} attempts)")]
    Exhausted { selector: String, attempts: usize },

    #[error("no peer endpoints configured")]
    NoPeers,
}

impl FetchError {
    /// Name of the peer that produced this error, if any.
    pub fn peer(&self) -> Option<&str> {
        match self {
            FetchError::Transport { peer, .. }
            | FetchError::Timeout { peer, .. }
            | FetchError::Malformed { peer, .. }
            | FetchError::NotFound { peer, .. }
            | FetchError::ErrorEnvelope { peer, .. } => Some(peer),
            FetchError::Exhausted { .. } | FetchError::NoPeers => None,
        }
    }
}

/// The ledger does not hash to what it claims.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ledger {index}: transaction set hash mismatch (claimed {claimed}, computed {computed})")]
    TransactionSetMismatch {
        index: LedgerIndex,
        claimed: String,
        computed: String,
    },

    #[error("ledger {index}: transaction id mismatch (claimed {claimed}, computed {computed})")]
    TransactionIdMismatch {
        index: LedgerIndex,
        claimed: String,
        computed: String,
    },

    #[error("ledger {index}: header hash mismatch (claimed {claimed}, computed {computed})")]
    HeaderMismatch {
        index: LedgerIndex,
        claimed: String,
        computed: String,
    },

    #[error("ledger {index}: expected hash {expected}, peer served {actual}")]
    UnexpectedHash {
        index: LedgerIndex,
        expected: String,
        actual: String,
    },

    #[error("ledger {index}: malformed hex in {field}")]
    MalformedHex { index: LedgerIndex, field: &'static str },
}

/// Storage layer failure. Fatal for the batch in flight.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("state encoding error: {0}")]
    StateEncoding(#[from] bincode::Error),

    #[error("revision conflict on {key}: stored {stored:?}, supplied {supplied:?}")]
    Conflict {
        key: String,
        stored: Option<String>,
        supplied: Option<String>,
    },

    #[error("stored key {key} does not match ledger index {index}")]
    KeyMismatch { key: String, index: LedgerIndex },
}

/// Errors surfaced by the import pipeline to its caller.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("chain break at ledger {index}: expected parent {expected}, found {found}")]
    ChainBreak {
        index: LedgerIndex,
        expected: String,
        found: String,
    },

    #[error("ledger {requested} is below the genesis floor {genesis}")]
    BelowGenesis {
        requested: LedgerIndex,
        genesis: LedgerIndex,
    },

    #[error("ledger {requested} is outside the known range {low}..={high}")]
    OutOfRange {
        requested: LedgerIndex,
        low: LedgerIndex,
        high: LedgerIndex,
    },

    #[error("gave up repairing chain after {rounds} rounds near ledger {index}")]
    RepairExhausted { index: LedgerIndex, rounds: u32 },

    #[error("cancelled at ledger {0}")]
    Cancelled(LedgerIndex),
}

impl SyncError {
    /// Configuration errors terminate the process. Everything else the
    /// live path retries.
    pub fn is_config_error(&self) -> bool {
        matches!(self, SyncError::BelowGenesis { .. } | SyncError::OutOfRange { .. })
    }
}

/// Convenience alias
pub type Result<T> = std::result::Result<T, SyncError>;
