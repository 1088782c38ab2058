//! Sync module: the import pipeline and its verification.
//!
//! - state: chain markers and the single-writer token
//! - walker: batched backward walk with boundary repair
//! - live: head tracking with gap backfill
//! - auditor: read-only re-verification of the stored chain

pub mod state;
pub mod walker;
pub mod live;
pub mod auditor;

pub use state::{ChainState, MarkerWriter, SharedChainState};
pub use walker::{ChainWalker, WalkMode, WalkReport, WalkRequest, WalkerConfig};
pub use live::{LiveConfig, LiveImporter, LiveState};
pub use auditor::{AuditConfig, AuditEvent, AuditFailure, AuditOutcome, ChainAuditor};
