//! The per-block execution pipeline: select candidates, verify them at the
//! target block, simulate their joint effect, compose one settlement
//! transaction, validate it against the live chain, broadcast it and record
//! the outcome.

use {
    crate::{
        broadcast::Broadcast,
        candidates::{self, Candidate, ConduitResolver, SeaportApi},
        executor::{ComposedTx, Executor},
        info::{ContractSet, ExecutionInfo, verify},
        scheduler::{BlockJob, BlockProcessor},
        simulator::Simulator,
        state::{BalanceSimulator, StateReader, load_initial_state},
    },
    chrono::{Duration, Utc},
    database::executed_orders::{self, ExecutedOrder},
    futures::{StreamExt, stream},
    model::{
        eth::{Block, Gwei, TargetBlock, U256},
        execution::{BlockStatus, ExecutionBlock, ExecutionOrder, Timing},
        matches::Match,
        order::OrderId,
    },
    order_store::OrderStore,
    sqlx::PgPool,
    std::{
        collections::{HashMap, HashSet},
        sync::Arc,
    },
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Priority fee offered on top of the projected base fee.
    pub priority_fee: U256,
    /// Candidate matches pulled from the store per block.
    pub max_matches: usize,
    /// Concurrency of the prepare step.
    pub prepare_concurrency: usize,
    /// How long a broadcast reserves its orders.
    pub pending_ttl: Duration,
    /// How long a balance-losing match is kept out of selection.
    pub quarantine_ttl: Duration,
    /// Balance-validation attempts per block before the attempt is
    /// abandoned.
    pub max_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            priority_fee: U256::from(3_000_000_000u64),
            max_matches: 100,
            prepare_concurrency: 10,
            pending_ttl: Duration::minutes(5),
            quarantine_ttl: Duration::minutes(15),
            max_attempts: 3,
        }
    }
}

pub struct ExecutionEngine {
    store: OrderStore,
    db: PgPool,
    state: Arc<dyn StateReader>,
    seaport: Arc<dyn SeaportApi>,
    conduits: Arc<dyn ConduitResolver>,
    balances: Arc<dyn BalanceSimulator>,
    broadcaster: Arc<dyn Broadcast>,
    executor: Executor,
    contracts: ContractSet,
    config: EngineConfig,
    /// Jobs targeting a block before this are stale replays and dropped.
    started_at: u64,
    metrics: &'static Metrics,
}

/// One candidate carried through the pipeline with its derived transfers.
struct Prepared {
    candidate: Candidate,
    info: ExecutionInfo,
}

impl ExecutionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: OrderStore,
        db: PgPool,
        state: Arc<dyn StateReader>,
        seaport: Arc<dyn SeaportApi>,
        conduits: Arc<dyn ConduitResolver>,
        balances: Arc<dyn BalanceSimulator>,
        broadcaster: Arc<dyn Broadcast>,
        executor: Executor,
        contracts: ContractSet,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            db,
            state,
            seaport,
            conduits,
            balances,
            broadcaster,
            executor,
            contracts,
            config,
            started_at: Utc::now().timestamp().max(0) as u64,
            metrics: Metrics::get(),
        }
    }

    async fn execute(&self, job: &BlockJob) -> anyhow::Result<()> {
        let current = &job.current;
        let target = &job.target;
        let timing = Timing::started(Utc::now());

        if target.timestamp < self.started_at {
            tracing::debug!(job = %job.id, "target predates engine start, dropping");
            return Ok(());
        }

        let max_fee_per_gas = target.base_fee_per_gas + self.config.priority_fee;
        let candidates = self.select(max_fee_per_gas);
        if candidates.is_empty() {
            self.record_skipped(current, target, max_fee_per_gas, timing, "No matches found");
            self.cleanup();
            return Ok(());
        }

        // Per-order outcome records; better states win (executed > pending
        // > inexecutable) so an order in several matches gets one record.
        let mut records: HashMap<OrderId, ExecutionOrder> = HashMap::new();
        let mut num_inexecutable = 0usize;

        let mut prepared = self
            .prepare(candidates, target, max_fee_per_gas, &mut records, &mut num_inexecutable)
            .await;
        // Highest arbitrage first; equal arbitrage by the older offer, then
        // by id so reruns pick the same set.
        prepared.sort_by(|a, b| {
            let (a, b) = (a.candidate.inner(), b.candidate.inner());
            b.arbitrage_wei
                .cmp(&a.arbitrage_wei)
                .then(a.offer.start_time.cmp(&b.offer.start_time))
                .then(a.id.cmp(&b.id))
        });

        let mut executable = match self
            .simulate(prepared, current, &mut records, &mut num_inexecutable)
            .await
        {
            Ok(executable) => executable,
            Err(err) => {
                tracing::warn!(job = %job.id, ?err, "initial state load failed");
                self.flush_records(&records);
                self.record_skipped(current, target, max_fee_per_gas, timing, "State unavailable");
                self.cleanup();
                return Ok(());
            }
        };

        // Compose and validate against the live chain, quarantining any
        // match that would cost the intermediary money.
        let mut composed: Option<(ComposedTx, i128)> = None;
        for attempt in 1..=self.config.max_attempts {
            if executable.is_empty() {
                break;
            }
            let tx = self
                .executor
                .compose(
                    &executable.iter().map(|p| p.candidate.clone()).collect::<Vec<_>>(),
                    current,
                    target,
                    self.config.priority_fee,
                )
                .await?;
            match self.balances.intermediary_delta(&tx.request, current.number).await {
                Ok(delta) if delta >= 0 => {
                    composed = Some((tx, delta));
                    break;
                }
                Ok(delta) => {
                    tracing::warn!(attempt, delta, "attempt loses intermediary funds");
                }
                Err(err) => {
                    tracing::warn!(attempt, ?err, "balance simulation failed");
                }
            }
            let offender = self.find_offender(&executable, current, target).await;
            let removed = executable.remove(offender);
            self.quarantine(&removed, target.number, &mut records, &mut num_inexecutable);
        }

        let Some((tx, delta)) = composed else {
            self.flush_records(&records);
            self.record_skipped(
                current,
                target,
                max_fee_per_gas,
                timing,
                if executable.is_empty() {
                    "No matches found"
                } else {
                    "Balance validation failed"
                },
            );
            self.cleanup();
            return Ok(());
        };

        // Reserve everything the broadcast touches and make the attempt
        // visible before the transaction goes out.
        let pending_until = Utc::now() + self.config.pending_ttl;
        self.store.reserve_pending(tx.order_ids.iter().copied(), pending_until);
        for id in &tx.order_ids {
            records.insert(*id, ExecutionOrder::Pending { block: target.number });
        }
        self.flush_records(&records);
        let mut block_record = ExecutionBlock {
            number: target.number,
            timestamp: target.timestamp,
            base_fee_per_gas: target.base_fee_per_gas,
            max_fee_per_gas,
            max_priority_fee_per_gas: self.config.priority_fee,
            status: BlockStatus::Pending,
            skip_reason: None,
            num_executable_matches: executable.len(),
            num_inexecutable_matches: num_inexecutable,
            balance_change_wei: Some(delta),
            timing: Timing {
                broadcast_at: Some(Utc::now()),
                ..timing
            },
            tx_hash: None,
        };
        self.store.set_block(block_record.clone());

        let outcome = self
            .broadcaster
            .broadcast(tx.request.clone(), current, target)
            .await;
        block_record.timing.completed_at = Some(Utc::now());

        match outcome {
            Ok(receipt) if receipt.success => {
                tracing::info!(
                    job = %job.id,
                    tx = %receipt.tx_hash,
                    gas_used = receipt.gas_used,
                    "block executed"
                );
                let mut durable = Vec::new();
                for id in &tx.order_ids {
                    let record = ExecutionOrder::Executed {
                        block: receipt.block_number,
                        tx_hash: receipt.tx_hash,
                        gas_used: receipt.gas_used,
                        effective_gas_price: receipt.effective_gas_price,
                        block_timestamp: target.timestamp,
                    };
                    if let Some(row) = ExecutedOrder::new(id, &record) {
                        durable.push(row);
                    }
                    self.store.set_execution_order(*id, record);
                }
                self.persist_executed(&durable).await;
                block_record.status = BlockStatus::Executed;
                block_record.tx_hash = Some(receipt.tx_hash);
                self.metrics.blocks_executed.inc();
                self.metrics
                    .orders_executed
                    .inc_by(tx.order_ids.len() as u64);
                if let Some(duration) = block_record.timing.duration() {
                    self.metrics
                        .block_duration_seconds
                        .observe(duration.num_milliseconds() as f64 / 1000.0);
                }
            }
            Ok(receipt) => {
                tracing::warn!(job = %job.id, tx = %receipt.tx_hash, "transaction reverted");
                for id in &tx.order_ids {
                    self.store
                        .set_execution_order(*id, ExecutionOrder::NotIncluded { block: target.number });
                }
                block_record.status = BlockStatus::NotIncluded;
                block_record.tx_hash = Some(receipt.tx_hash);
                self.metrics.blocks_not_included.inc();
            }
            Err(err) => {
                tracing::warn!(job = %job.id, %err, "broadcast failed");
                for id in &tx.order_ids {
                    self.store
                        .set_execution_order(*id, ExecutionOrder::NotIncluded { block: target.number });
                }
                block_record.status = BlockStatus::NotIncluded;
                self.metrics.blocks_not_included.inc();
            }
        }
        self.store.set_block(block_record);
        self.cleanup();
        Ok(())
    }

    /// Step 3: the best matches tolerating the projected fee, minus
    /// anything a previous block still has in flight.
    fn select(&self, max_fee_per_gas: U256) -> Vec<Match> {
        let pending: HashSet<OrderId> =
            self.store.pending_order_ids(Utc::now()).into_iter().collect();
        self.store
            .best_matches(Gwei::from_wei(max_fee_per_gas), self.config.max_matches)
            .into_iter()
            .filter(|m| m.order_ids().iter().all(|id| !pending.contains(id)))
            .collect()
    }

    /// Steps 4 and 6: instantiate candidates with bounded concurrency and
    /// verify them at the target block.
    async fn prepare(
        &self,
        matches: Vec<Match>,
        target: &TargetBlock,
        max_fee_per_gas: U256,
        records: &mut HashMap<OrderId, ExecutionOrder>,
        num_inexecutable: &mut usize,
    ) -> Vec<Prepared> {
        let instantiated: Vec<_> = stream::iter(matches.into_iter().map(|m| async move {
            let id = m.id.clone();
            (
                id,
                candidates::prepare(
                    m,
                    self.seaport.as_ref(),
                    self.conduits.as_ref(),
                    self.contracts.executor,
                )
                .await,
            )
        }))
        .buffer_unordered(self.config.prepare_concurrency)
        .collect()
        .await;

        let mut prepared = Vec::new();
        for (id, result) in instantiated {
            let candidate = match result {
                Ok(candidate) => candidate,
                Err(err) => {
                    // Transient; the match stays recorded for later blocks.
                    tracing::debug!(match_id = %id, %err, "prepare failed");
                    continue;
                }
            };
            match verify(candidate.inner(), target, max_fee_per_gas) {
                Ok(()) => {
                    let info = ExecutionInfo::new(candidate.inner(), &self.contracts);
                    prepared.push(Prepared { candidate, info });
                }
                Err(err) => {
                    *num_inexecutable += 1;
                    mark_inexecutable(records, candidate.inner(), target.number, &err.to_string());
                }
            }
        }
        prepared
    }

    /// Step 7: load the touched state once, then run the convergence loop.
    /// The loop terminates because every iteration removes one match.
    async fn simulate(
        &self,
        mut executable: Vec<Prepared>,
        current: &Block,
        records: &mut HashMap<OrderId, ExecutionOrder>,
        num_inexecutable: &mut usize,
    ) -> anyhow::Result<Vec<Prepared>> {
        let infos: Vec<_> = executable.iter().map(|p| p.info.clone()).collect();
        let initial = load_initial_state(self.state.as_ref(), &infos, current.number).await?;
        let mut simulator = Simulator::new(initial);

        loop {
            simulator.reset();
            // External legs first: a match whose marketplace fill cannot
            // happen is out regardless of the native side.
            executable.retain(|prepared| match simulator.apply_non_native(&prepared.info) {
                Ok(()) => true,
                Err(err) => {
                    *num_inexecutable += 1;
                    mark_inexecutable(
                        records,
                        prepared.candidate.inner(),
                        current.number,
                        &err.to_string(),
                    );
                    false
                }
            });

            // Then the native legs in order. The first failure invalidates
            // the joint state, so the whole pass reruns without the match.
            let mut failed = None;
            for (index, prepared) in executable.iter().enumerate() {
                if let Err(err) = simulator.apply_native(&prepared.info) {
                    failed = Some((index, err));
                    break;
                }
            }
            match failed {
                Some((index, err)) => {
                    let removed = executable.remove(index);
                    *num_inexecutable += 1;
                    mark_inexecutable(
                        records,
                        removed.candidate.inner(),
                        current.number,
                        &err.to_string(),
                    );
                }
                None => return Ok(executable),
            }
        }
    }

    /// Step 9's offender hunt: gas-estimate growing prefixes of the
    /// executable set; the first prefix that reverts ends at the offender.
    /// If every prefix passes, the loss comes from fee interplay and the
    /// last match is taken out.
    async fn find_offender(
        &self,
        executable: &[Prepared],
        current: &Block,
        target: &TargetBlock,
    ) -> usize {
        for end in 1..=executable.len() {
            let prefix: Vec<_> = executable[..end]
                .iter()
                .map(|p| p.candidate.clone())
                .collect();
            let composed = match self
                .executor
                .compose(&prefix, current, target, self.config.priority_fee)
                .await
            {
                Ok(composed) => composed,
                Err(err) => {
                    tracing::warn!(?err, "prefix composition failed");
                    return end - 1;
                }
            };
            if self.balances.estimate_gas(&composed.request).await.is_err() {
                return end - 1;
            }
        }
        executable.len() - 1
    }

    fn quarantine(
        &self,
        prepared: &Prepared,
        block: u64,
        records: &mut HashMap<OrderId, ExecutionOrder>,
        num_inexecutable: &mut usize,
    ) {
        let m = prepared.candidate.inner();
        tracing::warn!(match_id = %m.id, "quarantining balance-losing match");
        self.store.reserve_pending(
            m.order_ids().iter().copied(),
            Utc::now() + self.config.quarantine_ttl,
        );
        *num_inexecutable += 1;
        mark_inexecutable(records, m, block, "intermediary balance loss");
        self.metrics.matches_quarantined.inc();
    }

    fn record_skipped(
        &self,
        current: &Block,
        target: &TargetBlock,
        max_fee_per_gas: U256,
        timing: Timing,
        reason: &str,
    ) {
        tracing::debug!(block = current.number, reason, "skipping block");
        self.store.set_block(ExecutionBlock {
            number: target.number,
            timestamp: target.timestamp,
            base_fee_per_gas: target.base_fee_per_gas,
            max_fee_per_gas,
            max_priority_fee_per_gas: self.config.priority_fee,
            status: BlockStatus::Skipped,
            skip_reason: Some(reason.to_string()),
            num_executable_matches: 0,
            num_inexecutable_matches: 0,
            balance_change_wei: None,
            timing: Timing {
                completed_at: Some(Utc::now()),
                ..timing
            },
            tx_hash: None,
        });
        self.metrics.blocks_skipped.inc();
    }

    fn flush_records(&self, records: &HashMap<OrderId, ExecutionOrder>) {
        for (id, record) in records {
            self.store.set_execution_order(*id, record.clone());
        }
    }

    async fn persist_executed(&self, rows: &[ExecutedOrder]) {
        let result = async {
            let mut conn = self.db.acquire().await?;
            executed_orders::save_all(&mut conn, rows).await
        }
        .await;
        if let Err(err) = result {
            // The cache still has the records; losing the durable write is
            // recoverable on the next status sweep.
            tracing::error!(?err, "failed to persist executed orders");
        }
    }

    /// Step 13.
    fn cleanup(&self) {
        self.store.purge_expired_pending(Utc::now());
    }
}

fn mark_inexecutable(
    records: &mut HashMap<OrderId, ExecutionOrder>,
    m: &Match,
    block: u64,
    reason: &str,
) {
    for id in m.order_ids() {
        records.entry(id).or_insert(ExecutionOrder::Inexecutable {
            block,
            reason: reason.to_string(),
        });
    }
}

#[async_trait::async_trait]
impl BlockProcessor for ExecutionEngine {
    fn name(&self) -> &str {
        "execution-engine"
    }

    async fn process_block(&self, job: &BlockJob) -> anyhow::Result<()> {
        self.execute(job).await
    }
}

#[derive(prometheus_metric_storage::MetricStorage)]
#[metric(subsystem = "execution")]
struct Metrics {
    /// Blocks whose settlement transaction landed.
    blocks_executed: prometheus::IntCounter,
    /// Blocks with nothing executable.
    blocks_skipped: prometheus::IntCounter,
    /// Blocks whose transaction did not land.
    blocks_not_included: prometheus::IntCounter,
    /// Orders settled on chain.
    orders_executed: prometheus::IntCounter,
    /// Matches quarantined after balance validation.
    matches_quarantined: prometheus::IntCounter,
    /// Wall-clock duration of executed block attempts.
    #[metric(buckets(0.5, 1, 2, 4, 8, 13, 26))]
    block_duration_seconds: prometheus::Histogram,
}

impl Metrics {
    fn get() -> &'static Self {
        Metrics::instance(observe::metrics::get_storage_registry()).unwrap()
    }
}
