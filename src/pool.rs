//! Bounded worker pool with per-feed single-flight.
//!
//! A fixed number of workers pull jobs from one shared queue, so at most
//! `worker_count` refreshes run at once no matter how large a batch is.
//! `push` never blocks the caller; a feed already queued or running is
//! dropped at enqueue time, which is what keeps a slow feed from piling up
//! duplicate refreshes across scheduler ticks.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::batch::Job;
use crate::pipeline::RefreshPipeline;

#[derive(Clone)]
pub struct WorkerPool {
    tx: mpsc::UnboundedSender<Job>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    stopping: Arc<AtomicBool>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers sharing one queue.
    pub fn start(pipeline: Arc<RefreshPipeline>, worker_count: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let in_flight: Arc<Mutex<HashSet<i64>>> = Arc::new(Mutex::new(HashSet::new()));
        let stopping = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            handles.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&in_flight),
                Arc::clone(&stopping),
                Arc::clone(&pipeline),
            )));
        }

        tracing::info!(workers = worker_count, "Worker pool started");

        Self {
            tx,
            in_flight,
            stopping,
            handles: Arc::new(Mutex::new(handles)),
        }
    }

    /// Enqueue a refresh job without blocking.
    ///
    /// The single-flight token is claimed here, at enqueue time, so a feed
    /// cannot be queued twice even if a second push lands while the first
    /// job is still waiting for a worker.
    pub fn push(&self, job: Job) {
        {
            let mut in_flight = lock_unpoisoned(&self.in_flight);
            if !in_flight.insert(job.feed_id) {
                tracing::debug!(feed_id = job.feed_id, "Refresh already in flight, dropping");
                return;
            }
        }

        if self.tx.send(job).is_err() {
            lock_unpoisoned(&self.in_flight).remove(&job.feed_id);
            tracing::warn!(feed_id = job.feed_id, "Worker pool is shut down, dropping job");
        }
    }

    /// Wait for in-progress jobs to finish; still-queued jobs are dropped
    /// and their feeds picked up again on the next sweep, untouched.
    ///
    /// Any other clone of the pool (the scheduler's, typically) must be
    /// dropped first, or the queue never closes.
    pub async fn shutdown(self) {
        let Self {
            tx,
            in_flight: _,
            stopping,
            handles,
        } = self;
        stopping.store(true, Ordering::Relaxed);
        drop(tx);

        let handles: Vec<JoinHandle<()>> = lock_unpoisoned(&handles).drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Worker task failed to join");
            }
        }
        tracing::info!("Worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Job>>>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    stopping: Arc<AtomicBool>,
    pipeline: Arc<RefreshPipeline>,
) {
    loop {
        // Hold the receiver lock only while waiting for a job, never while
        // running one.
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            tracing::debug!(worker_id = worker_id, "Worker stopping");
            return;
        };

        // During shutdown the queue is discarded, not drained: the feed's
        // state is untouched so the next sweep re-selects it.
        if stopping.load(Ordering::Relaxed) {
            tracing::debug!(feed_id = job.feed_id, "Dropping queued job at shutdown");
            lock_unpoisoned(&in_flight).remove(&job.feed_id);
            continue;
        }

        let result = AssertUnwindSafe(pipeline.refresh(job.user_id, job.feed_id, false))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(report)) => {
                tracing::debug!(
                    worker_id = worker_id,
                    feed_id = report.feed_id,
                    created = report.created,
                    "Job finished"
                );
            }
            Ok(Err(e)) => {
                tracing::debug!(worker_id = worker_id, feed_id = job.feed_id, error = %e, "Job failed");
            }
            Err(payload) => {
                let message = panic_message(payload);
                tracing::error!(
                    worker_id = worker_id,
                    feed_id = job.feed_id,
                    panic = %message,
                    "Worker job panicked"
                );
                pipeline
                    .record_panic(job.user_id, job.feed_id, &message)
                    .await;
            }
        }

        lock_unpoisoned(&in_flight).remove(&job.feed_id);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker task panicked".to_string()
    }
}
