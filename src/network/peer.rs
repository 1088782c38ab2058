//! Peer client seam. `JsonRpcPeer` talks JSON-RPC over HTTP; tests plug in
//! in-memory peers through the same trait.

use async_trait::async_trait;
use jsonrpsee::core::client::ClientT;
use jsonrpsee::core::ClientError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use serde_json::Value;
use std::time::Duration;

use crate::utils::errors::FetchError;

#[async_trait]
pub trait PeerClient: Send + Sync + 'static {
    /// Address used in logs and peer bookkeeping.
    fn address(&self) -> &str;

    /// Issue one RPC call and return its `result` object.
    async fn request(&self, method: &str, params: Value) -> Result<Value, FetchError>;
}

pub struct JsonRpcPeer {
    address: String,
    client: HttpClient,
    timeout: Duration,
}

impl JsonRpcPeer {
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = HttpClientBuilder::default()
            .request_timeout(timeout)
            .build(address)
            .map_err(|e| FetchError::Transport { peer: address.to_string(), reason: e.to_string() })?;
        Ok(Self { address: address.to_string(), client, timeout })
    }
}

#[async_trait]
impl PeerClient for JsonRpcPeer {
    fn address(&self) -> &str {
        &self.address
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, FetchError> {
        // rippled-style servers take a single params object wrapped in an array
        self.client
            .request::<Value, _>(method, rpc_params![params])
            .await
            .map_err(|e| match e {
                ClientError::RequestTimeout => FetchError::Timeout {
                    peer: self.address.clone(),
                    secs: self.timeout.as_secs(),
                },
                ClientError::ParseError(err) => FetchError::Malformed {
                    peer: self.address.clone(),
                    reason: err.to_string(),
                },
                other => FetchError::Transport { peer: self.address.clone(), reason: other.to_string() },
            })
    }
}
