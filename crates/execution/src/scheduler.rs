//! Distributes new-block events to the registered block processors. One
//! scheduler instance per chain is active at a time, selected by a lease.

use {
    chrono::{DateTime, Utc},
    database::leases::{self, Lease, RENEWAL_INTERVAL},
    ethrpc::current_block::CurrentBlockStream,
    futures::future::join_all,
    model::eth::{Block, ChainId, TargetBlock},
    sqlx::PgPool,
    std::{sync::Arc, time::Duration},
    tokio::sync::watch,
};

/// Blocks older than this are replays or catch-up noise and are dropped.
const MAX_BLOCK_AGE: Duration = Duration::from_secs(5 * 60);

/// Liveness heartbeat cadence.
const HEARTBEAT: Duration = Duration::from_secs(60);

/// How far past the current block the composed transaction aims.
pub const DEFAULT_BLOCK_OFFSET: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockJob {
    /// `"{chain}:{block}"`; used to deduplicate double delivery.
    pub id: String,
    pub current: Block,
    pub target: TargetBlock,
}

#[async_trait::async_trait]
pub trait BlockProcessor: Send + Sync + 'static {
    fn name(&self) -> &str;
    async fn process_block(&self, job: &BlockJob) -> anyhow::Result<()>;
}

pub struct BlockScheduler {
    chain_id: ChainId,
    db: PgPool,
    blocks: CurrentBlockStream,
    processors: Vec<Arc<dyn BlockProcessor>>,
    block_offset: u64,
}

impl BlockScheduler {
    pub fn new(
        chain_id: ChainId,
        db: PgPool,
        blocks: CurrentBlockStream,
        block_offset: u64,
    ) -> Self {
        Self {
            chain_id,
            db,
            blocks,
            processors: Vec::new(),
            block_offset,
        }
    }

    pub fn register(&mut self, processor: Arc<dyn BlockProcessor>) {
        self.processors.push(processor);
    }

    /// Runs until the abort signal flips. Without the lease the scheduler
    /// idles and keeps retrying, so a died leader is replaced within the
    /// renewal interval.
    pub async fn run(self, mut abort: watch::Receiver<bool>) {
        let mut lease = Lease::new(self.db.clone(), leases::block_scheduler_key(self.chain_id));
        let mut blocks = self.blocks.clone();
        let mut last_dispatched = 0u64;
        let mut heartbeat = tokio::time::interval(HEARTBEAT);

        loop {
            if *abort.borrow() {
                break;
            }
            match lease.try_acquire().await {
                Ok(true) => (),
                Ok(false) => {
                    tracing::debug!("block scheduler lease held elsewhere");
                    idle(&mut abort, RENEWAL_INTERVAL).await;
                    continue;
                }
                Err(err) => {
                    tracing::warn!(?err, "block scheduler lease error");
                    idle(&mut abort, RENEWAL_INTERVAL).await;
                    continue;
                }
            }

            tokio::select! {
                _ = abort.changed() => break,
                _ = heartbeat.tick() => {
                    tracing::info!(last_dispatched, "block scheduler alive");
                }
                changed = blocks.changed() => {
                    if changed.is_err() {
                        tracing::error!("block stream ended");
                        break;
                    }
                    let block = *blocks.borrow_and_update();
                    let Some(job) =
                        job_for(self.chain_id, &block, self.block_offset, Utc::now())
                    else {
                        continue;
                    };
                    if block.number <= last_dispatched {
                        // The polling fallback and the subscription both
                        // deliver; only the first one counts.
                        continue;
                    }
                    last_dispatched = block.number;
                    self.dispatch(&job).await;
                }
            }
        }
        lease.release().await;
    }

    async fn dispatch(&self, job: &BlockJob) {
        tracing::info!(job = %job.id, target = job.target.number, "dispatching block");
        let runs = self.processors.iter().map(|processor| {
            let processor = processor.clone();
            async move {
                if let Err(err) = processor.process_block(job).await {
                    tracing::error!(
                        processor = processor.name(),
                        job = %job.id,
                        ?err,
                        "block processor failed"
                    );
                }
            }
        });
        join_all(runs).await;
    }
}

/// Builds the job for a received block, unless the block is stale.
fn job_for(
    chain_id: ChainId,
    block: &Block,
    block_offset: u64,
    now: DateTime<Utc>,
) -> Option<BlockJob> {
    let age = now
        .timestamp()
        .saturating_sub(i64::try_from(block.timestamp).unwrap_or(i64::MAX));
    if age > i64::try_from(MAX_BLOCK_AGE.as_secs()).unwrap_or(i64::MAX) {
        tracing::warn!(number = block.number, age, "dropping stale block");
        return None;
    }
    Some(BlockJob {
        id: format!("{chain_id}:{}", block.number),
        current: *block,
        target: TargetBlock::project(block, block_offset),
    })
}

async fn idle(abort: &mut watch::Receiver<bool>, wait: Duration) {
    tokio::select! {
        _ = tokio::time::sleep(wait) => (),
        _ = abort.changed() => (),
    }
}
