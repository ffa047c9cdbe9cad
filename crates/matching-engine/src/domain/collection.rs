//! Lifecycle of one collection's pipeline: the lease-guarded relay and
//! matching workers, their retry policy, and the handle the control surface
//! uses to stop them or inject work.

use {
    crate::{
        domain::{
            admission::AdmissionConfig,
            health::{CollectionHealth, JobReceiver, JobSender, job_queue},
            matching::MatchingEngine,
            relay::OrderRelay,
        },
        infra::{CursorStore, OrderEventSource, SnapshotSource},
    },
    database::leases::{self, Lease, RENEWAL_INTERVAL},
    model::{
        eth::{Address, ChainId},
        order::Order,
    },
    order_store::OrderStore,
    sqlx::PgPool,
    std::{
        sync::{Arc, atomic::Ordering},
        time::Duration,
    },
    thiserror::Error,
    tokio::{sync::watch, task::JoinHandle, time::Instant},
};

/// Consecutive failures a worker tolerates before giving up.
const MAX_ATTEMPTS: u32 = 5;

/// Base of the linear retry backoff: attempt `n` waits `n` times this.
const BACKOFF_STEP: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("gave up after 5 attempts: {0}")]
    GivenUp(String),
}

#[derive(Clone)]
pub struct CollectionPipeline {
    pub chain_id: ChainId,
    pub store: OrderStore,
    pub events: Arc<dyn OrderEventSource>,
    pub snapshots: Arc<dyn SnapshotSource>,
    pub cursors: Arc<dyn CursorStore>,
    pub db: PgPool,
    pub admission: AdmissionConfig,
}

/// Control handle of a running collection pipeline.
pub struct PipelineHandle {
    pub collection: Address,
    pub health: Arc<CollectionHealth>,
    matching_jobs: JobSender<Order>,
    abort: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl PipelineHandle {
    /// Queues an order for (re-)matching, bypassing the relay.
    pub fn force_match(&self, order: Order) -> bool {
        self.matching_jobs.send(order)
    }

    pub fn report(&self) -> crate::domain::health::CollectionReport {
        self.health.report(self.matching_jobs.waiting())
    }

    pub fn stop(&self) {
        let _ = self.abort.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|task| task.is_finished())
    }
}

impl CollectionPipeline {
    /// Starts the relay and matching workers for `collection`.
    pub fn start(&self, collection: Address) -> PipelineHandle {
        let health = Arc::new(CollectionHealth::default());
        let (abort_tx, abort_rx) = watch::channel(false);
        let (matching_tx, matching_rx) = job_queue();

        let relay = OrderRelay {
            chain_id: self.chain_id,
            collection,
            store: self.store.clone(),
            events: self.events.clone(),
            snapshots: self.snapshots.clone(),
            cursors: self.cursors.clone(),
            admission: self.admission.clone(),
            matching_jobs: matching_tx.clone(),
            health: health.clone(),
        };
        let relay_lease = Lease::new(
            self.db.clone(),
            leases::order_relay_key(self.chain_id, &collection),
        );
        let relay_task = tokio::spawn(
            run_relay(relay, relay_lease, abort_rx.clone()),
        );

        let matching_lease = Lease::new(
            self.db.clone(),
            leases::matching_engine_key(self.chain_id, &collection),
        );
        let matching_task = tokio::spawn(run_matching(
            MatchingEngine::new(self.store.clone()),
            matching_rx,
            matching_lease,
            health.clone(),
            abort_rx,
        ));

        PipelineHandle {
            collection,
            health,
            matching_jobs: matching_tx,
            abort: abort_tx,
            tasks: vec![relay_task, matching_task],
        }
    }
}

async fn run_relay(relay: OrderRelay, mut lease: Lease, mut abort: watch::Receiver<bool>) {
    let collection = relay.collection;
    let result = async {
        let mut attempt = 0u32;
        loop {
            if *abort.borrow() {
                return Ok(());
            }
            if !acquire(&mut lease, &mut attempt, &mut abort).await? {
                continue;
            }
            relay.health.lease_held.store(1, Ordering::Relaxed);

            // The relay runs until shutdown, stream failure, or losing the
            // lease; the latter two retry with linear backoff.
            let (lease_abort_tx, mut lease_abort) = watch::channel(false);
            let outcome = tokio::select! {
                result = relay.run(&mut lease_abort) => result.map_err(|err| err.to_string()),
                _ = hold(&mut lease) => Err("lease lost".to_string()),
                _ = abort.changed() => Ok(()),
            };
            let _ = lease_abort_tx.send(true);
            relay.health.lease_held.store(0, Ordering::Relaxed);

            match outcome {
                Ok(()) => return Ok(()),
                Err(reason) => {
                    attempt += 1;
                    tracing::warn!(%collection, attempt, %reason, "relay run failed");
                    if attempt >= MAX_ATTEMPTS {
                        return Err(Error::GivenUp(reason));
                    }
                    backoff(attempt, &mut abort).await;
                }
            }
        }
    }
    .await;
    lease.release().await;
    if let Err(err) = result {
        tracing::error!(%collection, %err, "order relay stopped");
    }
}

async fn run_matching(
    engine: MatchingEngine,
    mut jobs: JobReceiver<Order>,
    mut lease: Lease,
    health: Arc<CollectionHealth>,
    mut abort: watch::Receiver<bool>,
) {
    let result = async {
        let mut attempt = 0u32;
        loop {
            if *abort.borrow() {
                return Ok(());
            }
            if !acquire(&mut lease, &mut attempt, &mut abort).await? {
                continue;
            }

            {
                // One watch future for the whole work loop, so a steady
                // stream of jobs cannot starve the lease check.
                let mut lease_watch = std::pin::pin!(hold(&mut lease));
                loop {
                    let job = tokio::select! {
                        _ = abort.changed() => return Ok(()),
                        _ = &mut lease_watch => break,
                        job = jobs.recv() => match job {
                            Some(job) => job,
                            None => return Ok(()),
                        },
                    };
                    let started = Instant::now();
                    engine.match_order(&job);
                    health.record_matching_job(started.elapsed());
                }
            }
            attempt += 1;
            tracing::warn!(attempt, "matching lease lost");
            if attempt >= MAX_ATTEMPTS {
                return Err(Error::GivenUp("lease lost".to_string()));
            }
            backoff(attempt, &mut abort).await;
        }
    }
    .await;
    lease.release().await;
    if let Err(err) = result {
        tracing::error!(%err, "matching engine stopped");
    }
}

/// One acquisition attempt. Returns Ok(true) once the lease is held;
/// Ok(false) after a failed attempt (the caller loops), an error once all
/// attempts are spent.
async fn acquire(
    lease: &mut Lease,
    attempt: &mut u32,
    abort: &mut watch::Receiver<bool>,
) -> Result<bool, Error> {
    match lease.try_acquire().await {
        Ok(true) => {
            *attempt = 0;
            Ok(true)
        }
        Ok(false) => {
            *attempt += 1;
            tracing::info!(
                key = lease.key(),
                attempt = *attempt,
                "another instance is syncing, waiting for the lease"
            );
            if *attempt >= MAX_ATTEMPTS {
                return Err(Error::GivenUp("lease unavailable".to_string()));
            }
            backoff(*attempt, abort).await;
            Ok(false)
        }
        Err(err) => {
            *attempt += 1;
            tracing::warn!(key = lease.key(), ?err, "lease acquisition failed");
            if *attempt >= MAX_ATTEMPTS {
                return Err(Error::GivenUp(err.to_string()));
            }
            backoff(*attempt, abort).await;
            Ok(false)
        }
    }
}

/// Resolves when the held lease is lost. Checks on the renewal cadence.
async fn hold(lease: &mut Lease) {
    loop {
        tokio::time::sleep(RENEWAL_INTERVAL).await;
        match lease.try_acquire().await {
            Ok(true) => (),
            Ok(false) => return,
            Err(err) => {
                tracing::warn!(key = lease.key(), ?err, "lease renewal failed");
                return;
            }
        }
    }
}

async fn backoff(attempt: u32, abort: &mut watch::Receiver<bool>) {
    let wait = BACKOFF_STEP * attempt;
    tokio::select! {
        _ = tokio::time::sleep(wait) => (),
        _ = abort.changed() => (),
    }
}
