//! A stream of new chain heads, fed by a `newHeads` subscription with an
//! `eth_blockNumber` polling fallback. Consumers observe the latest block
//! through a watch channel; intermediate blocks may be skipped, block
//! numbers never go backwards.

use {
    crate::{Error, Rpc},
    alloy::{
        eips::BlockNumberOrTag,
        providers::Provider,
    },
    futures::StreamExt,
    model::eth::{Block, U256},
    std::time::Duration,
    tokio::sync::{mpsc, watch},
};

/// The polling fallback cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Wait before re-opening a dropped subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_secs(1);

pub type CurrentBlockStream = watch::Receiver<Block>;

/// Starts the block feed. The returned receiver always holds the most
/// recently observed block; the background tasks stop when every receiver
/// is dropped.
pub async fn current_block_stream(rpc: Rpc) -> Result<CurrentBlockStream, Error> {
    let first = fetch_block(&rpc, BlockNumberOrTag::Latest).await?;
    let (sender, receiver) = watch::channel(first);

    // Both sources push candidate block numbers into one queue so that the
    // single consumer below is the only place deduplication happens.
    let (numbers, mut candidates) = mpsc::unbounded_channel();

    tokio::spawn(subscribe_new_heads(rpc.clone(), numbers.clone()));
    tokio::spawn(poll_block_number(rpc.clone(), numbers));

    tokio::spawn(async move {
        let mut last = first.number;
        while let Some(number) = candidates.recv().await {
            if number <= last {
                continue;
            }
            let block = match fetch_block(&rpc, BlockNumberOrTag::Number(number)).await {
                Ok(block) => block,
                Err(err) => {
                    tracing::warn!(number, ?err, "failed to fetch new block");
                    continue;
                }
            };
            last = number;
            tracing::debug!(number, "new block");
            if sender.send(block).is_err() {
                // No receivers left; shut the feed down.
                break;
            }
        }
    });

    Ok(receiver)
}

async fn subscribe_new_heads(rpc: Rpc, numbers: mpsc::UnboundedSender<u64>) {
    loop {
        let subscription = match rpc.ws().subscribe_blocks().await {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(?err, "newHeads subscription failed, retrying");
                tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
                continue;
            }
        };
        let mut stream = subscription.into_stream();
        while let Some(header) = stream.next().await {
            if numbers.send(header.number).is_err() {
                return;
            }
        }
        tracing::warn!("newHeads subscription ended, reconnecting");
        tokio::time::sleep(RESUBSCRIBE_BACKOFF).await;
    }
}

async fn poll_block_number(rpc: Rpc, numbers: mpsc::UnboundedSender<u64>) {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match rpc.provider().get_block_number().await {
            Ok(number) => {
                if numbers.send(number).is_err() {
                    return;
                }
            }
            Err(err) => tracing::warn!(?err, "eth_blockNumber poll failed"),
        }
    }
}

async fn fetch_block(rpc: &Rpc, tag: BlockNumberOrTag) -> Result<Block, Error> {
    let block = rpc
        .provider()
        .get_block_by_number(tag)
        .await?
        .ok_or(Error::MissingBlock(match tag {
            BlockNumberOrTag::Number(number) => number,
            _ => 0,
        }))?;
    Ok(Block {
        number: block.header.number,
        timestamp: block.header.timestamp,
        base_fee_per_gas: U256::from(block.header.base_fee_per_gas.unwrap_or_default()),
    })
}
