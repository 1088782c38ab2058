//! Network module: everything that talks to remote peers.
//!
//! - peer: `PeerClient` seam and the JSON-RPC implementation
//! - peerstore: endpoint failure bookkeeping
//! - source: `RemoteLedgerSource` with per-peer failover
//! - feed: closed-ledger notifications

pub mod peer;
pub mod peerstore;
pub mod source;
pub mod feed;

pub use peer::{JsonRpcPeer, PeerClient};
pub use peerstore::{PeerEndpoint, PeerStore};
pub use source::{LedgerSelector, RemoteLedgerSource, SourceConfig};
pub use feed::{spawn_polling_feed, LedgerClosed};
