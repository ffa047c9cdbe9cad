//! Per-collection health bookkeeping, surfaced through the control API.

use {
    serde::Serialize,
    std::sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    tokio::sync::mpsc,
};

/// Queue depth below which a worker counts as synced.
pub const SYNCED_THRESHOLD: usize = 100;

/// An unbounded job queue that tracks its depth, so health can tell
/// "synced" from "catching up".
pub fn job_queue<T>() -> (JobSender<T>, JobReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        JobSender {
            tx,
            depth: depth.clone(),
        },
        JobReceiver { rx, depth },
    )
}

#[derive(Clone)]
pub struct JobSender<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> JobSender<T> {
    pub fn send(&self, job: T) -> bool {
        let sent = self.tx.send(job).is_ok();
        if sent {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    pub fn waiting(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

pub struct JobReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

impl<T> JobReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let job = self.rx.recv().await;
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        job
    }
}

/// Live counters of one collection pipeline. The matching queue depth
/// lives in the queue itself; the caller passes it in when building the
/// report.
#[derive(Default)]
pub struct CollectionHealth {
    pub relay_events: AtomicU64,
    pub matching_jobs_completed: AtomicU64,
    pub matching_job_micros_total: AtomicU64,
    pub lease_held: AtomicU64,
}

impl CollectionHealth {
    pub fn record_matching_job(&self, duration: std::time::Duration) {
        self.matching_jobs_completed.fetch_add(1, Ordering::Relaxed);
        self.matching_job_micros_total
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn report(&self, waiting: usize) -> CollectionReport {
        let completed = self.matching_jobs_completed.load(Ordering::Relaxed);
        let total_micros = self.matching_job_micros_total.load(Ordering::Relaxed);
        CollectionReport {
            status: if waiting < SYNCED_THRESHOLD {
                SyncStatus::Synced
            } else {
                SyncStatus::CatchingUp
            },
            relay_events: self.relay_events.load(Ordering::Relaxed),
            matching_jobs_waiting: waiting,
            matching_jobs_completed: completed,
            average_job_duration_micros: total_micros.checked_div(completed).unwrap_or(0),
            lease_held: self.lease_held.load(Ordering::Relaxed) != 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Synced,
    CatchingUp,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionReport {
    pub status: SyncStatus,
    pub relay_events: u64,
    pub matching_jobs_waiting: usize,
    pub matching_jobs_completed: u64,
    pub average_job_duration_micros: u64,
    pub lease_held: bool,
}
