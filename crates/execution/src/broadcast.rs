//! Submitting the composed transaction for inclusion at the target block:
//! directly through a (forked) node in test setups, or as a signed bundle
//! through a private relay in production.

use {
    alloy::{
        consensus::TxReceipt,
        eips::Encodable2718,
        network::{EthereumWallet, TransactionBuilder},
        primitives::keccak256,
        providers::Provider,
        rpc::types::TransactionRequest,
        signers::{Signer, local::PrivateKeySigner},
    },
    async_trait::async_trait,
    ethrpc::Rpc,
    model::eth::{B256, Block, TargetBlock, U256},
    serde::{Deserialize, Serialize},
    std::time::Duration,
    thiserror::Error,
    url::Url,
};

/// The part of a transaction receipt the pipeline records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// True for status 1.
    pub success: bool,
    pub tx_hash: B256,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub effective_gas_price: U256,
    pub block_hash: B256,
    pub block_number: u64,
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    /// The relay refused the bundle at simulation time.
    #[error("bundle simulation failed: {0}")]
    Simulation(String),
    /// No receipt materialized for the target block; the transaction was
    /// not included.
    #[error("no receipt for the target block")]
    NotIncluded,
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

#[async_trait]
pub trait Broadcast: Send + Sync + 'static {
    /// Submits `tx` aiming at the target block and reports the outcome.
    async fn broadcast(
        &self,
        tx: TransactionRequest,
        current: &Block,
        target: &TargetBlock,
    ) -> Result<Receipt, BroadcastError>;
}

/// Submission through the connected node itself, waiting one confirmation.
/// Meant for forked networks where the node mines on demand.
pub struct ForkedBroadcaster {
    rpc: Rpc,
    wallet: EthereumWallet,
}

impl ForkedBroadcaster {
    pub fn new(rpc: Rpc, signer: PrivateKeySigner) -> Self {
        Self {
            rpc,
            wallet: EthereumWallet::from(signer),
        }
    }
}

#[async_trait]
impl Broadcast for ForkedBroadcaster {
    async fn broadcast(
        &self,
        tx: TransactionRequest,
        _current: &Block,
        _target: &TargetBlock,
    ) -> Result<Receipt, BroadcastError> {
        let raw = sign(&self.rpc, &self.wallet, tx).await?;
        let pending = self
            .rpc
            .provider()
            .send_raw_transaction(&raw)
            .await
            .map_err(|err| BroadcastError::Transport(err.into()))?;
        let receipt = pending
            .get_receipt()
            .await
            .map_err(|_| BroadcastError::NotIncluded)?;
        Ok(Receipt {
            success: receipt.status(),
            tx_hash: receipt.transaction_hash,
            gas_used: receipt.gas_used,
            cumulative_gas_used: receipt.inner.cumulative_gas_used(),
            effective_gas_price: U256::from(receipt.effective_gas_price),
            block_hash: receipt.block_hash.unwrap_or_default(),
            block_number: receipt.block_number.unwrap_or_default(),
        })
    }
}

/// Submission through a flashbots-style private relay: simulate the bundle,
/// send it for exactly the target block, then look for the receipt once the
/// target block has passed.
pub struct RelayBroadcaster {
    rpc: Rpc,
    client: reqwest::Client,
    relay: Url,
    wallet: EthereumWallet,
    auth_signer: PrivateKeySigner,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BundleParams {
    txs: Vec<String>,
    block_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_block_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_timestamp: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reverting_tx_hashes: Option<Vec<B256>>,
}

#[derive(Deserialize)]
struct RelayResponse {
    #[serde(default)]
    error: Option<RelayError>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct RelayError {
    message: String,
}

impl RelayBroadcaster {
    pub fn new(
        rpc: Rpc,
        client: reqwest::Client,
        relay: Url,
        signer: PrivateKeySigner,
        auth_signer: PrivateKeySigner,
    ) -> Self {
        Self {
            rpc,
            client,
            relay,
            wallet: EthereumWallet::from(signer),
            auth_signer,
        }
    }

    /// Performs one signed relay call. Relays authenticate the caller with
    /// a signature of the request body's hash in the
    /// `X-Flashbots-Signature` header.
    async fn call(
        &self,
        method: &str,
        params: &BundleParams,
    ) -> Result<serde_json::Value, BroadcastError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": [params],
        })
        .to_string();
        let message = format!("0x{}", hex::encode(keccak256(body.as_bytes())));
        let signature = self
            .auth_signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|err| BroadcastError::Transport(err.into()))?;
        let header = format!(
            "{:?}:0x{}",
            self.auth_signer.address(),
            hex::encode(signature.as_bytes())
        );

        let response = self
            .client
            .post(self.relay.clone())
            .header("X-Flashbots-Signature", header)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| BroadcastError::Transport(err.into()))?
            .json::<RelayResponse>()
            .await
            .map_err(|err| BroadcastError::Transport(err.into()))?;
        if let Some(error) = response.error {
            return Err(BroadcastError::Simulation(error.message));
        }
        Ok(response.result.unwrap_or_default())
    }

    async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        target: u64,
    ) -> Result<Receipt, BroadcastError> {
        // Poll until the chain has moved past the target block; if the
        // receipt still isn't there, the bundle was not included.
        loop {
            let number = self
                .rpc
                .provider()
                .get_block_number()
                .await
                .map_err(|err| BroadcastError::Transport(err.into()))?;
            if let Some(receipt) = self
                .rpc
                .provider()
                .get_transaction_receipt(tx_hash)
                .await
                .map_err(|err| BroadcastError::Transport(err.into()))?
            {
                return Ok(Receipt {
                    success: receipt.status(),
                    tx_hash: receipt.transaction_hash,
                    gas_used: receipt.gas_used,
                    cumulative_gas_used: receipt.inner.cumulative_gas_used(),
                    effective_gas_price: U256::from(receipt.effective_gas_price),
                    block_hash: receipt.block_hash.unwrap_or_default(),
                    block_number: receipt.block_number.unwrap_or_default(),
                });
            }
            if number > target {
                return Err(BroadcastError::NotIncluded);
            }
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
    }
}

#[async_trait]
impl Broadcast for RelayBroadcaster {
    async fn broadcast(
        &self,
        tx: TransactionRequest,
        current: &Block,
        target: &TargetBlock,
    ) -> Result<Receipt, BroadcastError> {
        let raw = sign(&self.rpc, &self.wallet, tx).await?;
        let tx_hash = keccak256(&raw);
        let raw = format!("0x{}", hex::encode(&raw));

        let simulation = BundleParams {
            txs: vec![raw.clone()],
            block_number: format!("{:#x}", target.number),
            state_block_number: Some("latest".to_string()),
            min_timestamp: None,
            max_timestamp: None,
            reverting_tx_hashes: None,
        };
        self.call("eth_callBundle", &simulation).await?;

        let bundle = BundleParams {
            txs: vec![raw],
            block_number: format!("{:#x}", target.number),
            state_block_number: None,
            min_timestamp: Some(current.timestamp),
            // Give the bundle one block interval's worth of slack past the
            // target.
            max_timestamp: Some(target.timestamp + (target.timestamp - current.timestamp)),
            reverting_tx_hashes: Some(vec![]),
        };
        self.call("eth_sendBundle", &bundle).await?;
        tracing::info!(%tx_hash, target = target.number, "bundle submitted");

        self.wait_for_receipt(tx_hash, target.number).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_params_follow_the_relay_wire_shape() {
        let params = BundleParams {
            txs: vec!["0xdead".to_string()],
            block_number: format!("{:#x}", 17_000_000),
            state_block_number: None,
            min_timestamp: Some(1_700_000_000),
            max_timestamp: Some(1_700_000_052),
            reverting_tx_hashes: Some(vec![]),
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "txs": ["0xdead"],
                "blockNumber": "0x1036640",
                "minTimestamp": 1_700_000_000u64,
                "maxTimestamp": 1_700_000_052u64,
                "revertingTxHashes": [],
            })
        );
    }

    #[test]
    fn relay_errors_surface_the_message() {
        let response: RelayResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"bundle reverted"}}"#,
        )
        .unwrap();
        assert_eq!(response.error.unwrap().message, "bundle reverted");
    }
}

/// Fills in nonce and gas from the node and signs with the wallet,
/// producing the raw RLP bytes.
async fn sign(
    rpc: &Rpc,
    wallet: &EthereumWallet,
    mut tx: TransactionRequest,
) -> Result<Vec<u8>, BroadcastError> {
    let from = tx.from.unwrap_or_default();
    if tx.nonce.is_none() {
        let nonce = rpc
            .provider()
            .get_transaction_count(from)
            .await
            .map_err(|err| BroadcastError::Transport(err.into()))?;
        tx = tx.with_nonce(nonce);
    }
    if tx.gas.is_none() {
        let gas = rpc
            .provider()
            .estimate_gas(tx.clone())
            .await
            .map_err(|err| BroadcastError::Transport(err.into()))?;
        // Headroom for state drift between estimation and inclusion.
        tx = tx.with_gas_limit(gas.saturating_mul(12) / 10);
    }
    let envelope = tx
        .build(wallet)
        .await
        .map_err(|err| BroadcastError::Transport(err.into()))?;
    Ok(envelope.encoded_2718())
}
