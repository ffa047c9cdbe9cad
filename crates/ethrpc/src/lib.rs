//! Chain RPC plumbing: provider construction, the current-block stream and
//! typed state reads.

use {
    alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect},
    model::eth::ChainId,
    thiserror::Error,
    url::Url,
};

pub mod current_block;
pub mod state;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] alloy::transports::TransportError),
    #[error("contract call error: {0}")]
    Contract(#[from] alloy::contract::Error),
    #[error("block {0} not found")]
    MissingBlock(u64),
}

/// An Ethereum RPC connection: an HTTP provider for calls and polling, and a
/// WebSocket provider for subscriptions.
#[derive(Clone)]
pub struct Rpc {
    http: DynProvider,
    ws: DynProvider,
    chain_id: ChainId,
}

impl Rpc {
    pub async fn connect(http_url: &Url, ws_url: &Url) -> Result<Self, Error> {
        let http = ProviderBuilder::new()
            .connect_http(http_url.clone())
            .erased();
        let ws = ProviderBuilder::new()
            .connect_ws(WsConnect::new(ws_url.as_str()))
            .await?
            .erased();
        let chain_id = ChainId(http.get_chain_id().await?);
        Ok(Self { http, ws, chain_id })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The HTTP provider. Used for everything except subscriptions.
    pub fn provider(&self) -> &DynProvider {
        &self.http
    }

    /// The WebSocket provider, for `eth_subscribe`.
    pub fn ws(&self) -> &DynProvider {
        &self.ws
    }
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rpc")
            .field("chain_id", &self.chain_id)
            .finish()
    }
}
