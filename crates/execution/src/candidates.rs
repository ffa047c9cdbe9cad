//! Turning stored matches into executable candidates. Native pairs are
//! ready as-is; broker matches first need the source marketplace's
//! fulfillment call and the maker's conduit.

use {
    async_trait::async_trait,
    model::{
        eth::{Address, B256, Bytes, U256},
        matches::Match,
        source::OrderSource,
    },
    serde::Deserialize,
    thiserror::Error,
};

/// The exact call that fills a source-marketplace order, as returned by the
/// marketplace's fulfillment-data API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentData {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// The source marketplace's API surface the engine depends on.
#[async_trait]
pub trait SeaportApi: Send + Sync + 'static {
    /// The call that fulfills `source_order` with `taker` receiving the
    /// assets. Also completes the order's signature if the stored blob
    /// lacks it.
    async fn fulfillment(
        &self,
        source: OrderSource,
        source_order: &serde_json::Value,
        taker: Address,
    ) -> anyhow::Result<FulfillmentData>;
}

/// Resolves Seaport conduits; backed by the conduit controller on chain.
#[async_trait]
pub trait ConduitResolver: Send + Sync + 'static {
    async fn conduit(&self, conduit_key: B256) -> anyhow::Result<Address>;
}

#[derive(Debug, Error)]
pub enum PrepareError {
    /// API failures are transient: the match stays recorded and the next
    /// block tries again.
    #[error("fulfillment data unavailable: {0}")]
    Fulfillment(anyhow::Error),
    #[error("conduit unavailable: {0}")]
    Conduit(anyhow::Error),
}

/// A match instantiated for execution at one specific block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Native(Match),
    Broker {
        m: Match,
        fulfillment: FulfillmentData,
        conduit: Address,
    },
}

impl Candidate {
    pub fn inner(&self) -> &Match {
        match self {
            Self::Native(m) | Self::Broker { m, .. } => m,
        }
    }

    pub fn is_native(&self) -> bool {
        matches!(self, Self::Native(_))
    }
}

/// Instantiates one match. For broker matches this talks to the source
/// marketplace, so it runs with bounded concurrency at the call site.
pub async fn prepare(
    m: Match,
    seaport: &dyn SeaportApi,
    conduits: &dyn ConduitResolver,
    executor: Address,
) -> Result<Candidate, PrepareError> {
    if m.is_native {
        return Ok(Candidate::Native(m));
    }
    let fulfillment = seaport
        .fulfillment(m.listing.source, &m.listing.source_order, executor)
        .await
        .map_err(PrepareError::Fulfillment)?;
    let conduit = match conduit_key(&m.listing.source_order) {
        // The zero key means no conduit: transfers come from the
        // marketplace itself.
        B256::ZERO => seaport_address(m.listing.source),
        key => conduits.conduit(key).await.map_err(PrepareError::Conduit)?,
    };
    Ok(Candidate::Broker {
        m,
        fulfillment,
        conduit,
    })
}

fn seaport_address(source: OrderSource) -> Address {
    use contracts::deployments;
    match source {
        OrderSource::SeaportV1_0 => deployments::seaport_v1_0(),
        OrderSource::SeaportV1_4 => deployments::seaport_v1_4(),
        OrderSource::Native | OrderSource::SeaportV1_5 => deployments::seaport_v1_5(),
    }
}

/// The conduit key the maker chose, from the stored Seaport order
/// parameters. A missing or malformed key is the zero key.
fn conduit_key(source_order: &serde_json::Value) -> B256 {
    source_order
        .pointer("/parameters/conduitKey")
        .and_then(|value| value.as_str())
        .and_then(|hex| hex.parse().ok())
        .unwrap_or(B256::ZERO)
}

/// The marketplace fulfillment API, reqwest against an OpenSea-compatible
/// endpoint.
pub mod remote {
    use {super::*, serde::Serialize, url::Url};

    pub struct RemoteSeaportApi {
        client: reqwest::Client,
        base: Url,
        api_key: String,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Request<'a> {
        listing: &'a serde_json::Value,
        protocol: String,
        fulfiller: Address,
    }

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Response {
        fulfillment_data: FulfillmentData,
    }

    impl RemoteSeaportApi {
        pub fn new(client: reqwest::Client, base: Url, api_key: String) -> Self {
            Self {
                client,
                base,
                api_key,
            }
        }
    }

    #[async_trait]
    impl SeaportApi for RemoteSeaportApi {
        async fn fulfillment(
            &self,
            source: OrderSource,
            source_order: &serde_json::Value,
            taker: Address,
        ) -> anyhow::Result<FulfillmentData> {
            let url = self.base.join("listings/fulfillment_data")?;
            let response = self
                .client
                .post(url)
                .header("x-api-key", &self.api_key)
                .json(&Request {
                    listing: source_order,
                    protocol: source.to_string(),
                    fulfiller: taker,
                })
                .send()
                .await?
                .error_for_status()?
                .json::<Response>()
                .await?;
            Ok(response.fulfillment_data)
        }
    }
}

/// Conduit resolution against the on-chain conduit controller.
pub mod on_chain {
    use {super::*, contracts::IConduitController, ethrpc::Rpc};

    pub struct OnChainConduits {
        controller: contracts::ConduitController,
    }

    impl OnChainConduits {
        pub fn new(rpc: &Rpc) -> Self {
            Self {
                controller: IConduitController::new(
                    contracts::deployments::conduit_controller(),
                    rpc.provider().clone(),
                ),
            }
        }
    }

    #[async_trait]
    impl ConduitResolver for OnChainConduits {
        async fn conduit(&self, conduit_key: B256) -> anyhow::Result<Address> {
            let result = self.controller.getConduit(conduit_key).call().await?;
            anyhow::ensure!(result.exists, "conduit {conduit_key} does not exist");
            Ok(result.conduit)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conduit_key_reads_seaport_parameters() {
        let order = serde_json::json!({
            "parameters": {
                "conduitKey": "0x0000007b02230091a7ed01230072f7006a004d60a8d4e71d599b8104250f0000",
            }
        });
        assert_ne!(conduit_key(&order), B256::ZERO);
        assert_eq!(conduit_key(&serde_json::Value::Null), B256::ZERO);
    }
}
