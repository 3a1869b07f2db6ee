//! Bounded-concurrency async worker pool with retry and metrics.
//!
//! Batches are submitted over an mpsc channel and run through a
//! `tokio::task::JoinSet` bounded by a semaphore permit per in-flight batch
//! (generalizes the teacher's request-fan-out-then-join pattern to an
//! unbounded incoming stream instead of one fixed batch of futures).

use crate::chunk::Batch;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct BatchResult {
    pub batch_id: String,
    pub success: bool,
    pub item_count: usize,
    pub duration_ms: u64,
    pub retry_count: u32,
    pub error: Option<String>,
}

pub type BatchHandler =
    Arc<dyn Fn(Batch) -> Pin<Box<dyn Future<Output = Result<(), String>> + Send>> + Send + Sync>;

#[derive(Default)]
struct Stats {
    queue_depth: AtomicU64,
    completed: AtomicU64,
    total_duration_ms: AtomicU64,
}

/// Runs submitted batches with bounded concurrency, exponential-backoff
/// retry, and rolling duration stats.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    tx: mpsc::UnboundedSender<(Batch, BatchHandler)>,
    stats: Arc<Stats>,
    on_complete: Arc<dyn Fn(BatchResult) + Send + Sync>,
    on_queue_change: Arc<dyn Fn(u64) + Send + Sync>,
    driver: tokio::task::JoinHandle<()>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        on_complete: impl Fn(BatchResult) + Send + Sync + 'static,
        on_queue_change: impl Fn(u64) + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Stats::default());
        let on_complete: Arc<dyn Fn(BatchResult) + Send + Sync> = Arc::new(on_complete);
        let on_queue_change: Arc<dyn Fn(u64) + Send + Sync> = Arc::new(on_queue_change);

        let driver = tokio::spawn(Self::drive(
            rx,
            config.clone(),
            Arc::clone(&stats),
            Arc::clone(&on_complete),
            Arc::clone(&on_queue_change),
        ));

        Self {
            config,
            tx,
            stats,
            on_complete,
            on_queue_change,
            driver,
        }
    }

    /// Enqueues `batch` to run under `handler`. Never blocks the caller.
    pub fn submit(&self, batch: Batch, handler: BatchHandler) {
        let depth = self.stats.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
        (self.on_queue_change)(depth);
        let _ = self.tx.send((batch, handler));
    }

    async fn drive(
        mut rx: mpsc::UnboundedReceiver<(Batch, BatchHandler)>,
        config: WorkerPoolConfig,
        stats: Arc<Stats>,
        on_complete: Arc<dyn Fn(BatchResult) + Send + Sync>,
        on_queue_change: Arc<dyn Fn(u64) + Send + Sync>,
    ) {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                maybe_item = rx.recv() => {
                    match maybe_item {
                        Some((batch, handler)) => {
                            let permit = Arc::clone(&semaphore).acquire_owned().await
                                .expect("semaphore never closed");
                            let stats = Arc::clone(&stats);
                            let on_complete = Arc::clone(&on_complete);
                            let on_queue_change = Arc::clone(&on_queue_change);
                            let config = config.clone();
                            in_flight.spawn(async move {
                                let _permit = permit;
                                let result = run_with_retry(batch, handler, &config).await;
                                stats.completed.fetch_add(1, Ordering::SeqCst);
                                stats.total_duration_ms.fetch_add(result.duration_ms, Ordering::SeqCst);
                                let depth = stats.queue_depth.fetch_sub(1, Ordering::SeqCst) - 1;
                                on_queue_change(depth);
                                on_complete(result);
                            });
                        }
                        None => break,
                    }
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    /// Current queue depth (queued + in-flight) and rolling average duration.
    pub fn stats(&self) -> (u64, f64) {
        let depth = self.stats.queue_depth.load(Ordering::SeqCst);
        let completed = self.stats.completed.load(Ordering::SeqCst);
        let avg = if completed == 0 {
            0.0
        } else {
            self.stats.total_duration_ms.load(Ordering::SeqCst) as f64 / completed as f64
        };
        (depth, avg)
    }

    pub fn queue_depth(&self) -> u64 {
        self.stats.queue_depth.load(Ordering::SeqCst)
    }

    /// Waits for the queue to empty and all in-flight handlers to finish.
    pub async fn drain(&self) {
        while self.queue_depth() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn shutdown(self) {
        self.drain().await;
        drop(self.tx);
        let _ = self.driver.await;
    }

    /// Stops accepting new work immediately; in-flight handlers still run to
    /// completion since they hold no cooperative-cancellation hook here.
    pub fn force_shutdown(self) {
        self.driver.abort();
    }
}

async fn run_with_retry(batch: Batch, handler: BatchHandler, config: &WorkerPoolConfig) -> BatchResult {
    let started = std::time::Instant::now();
    let item_count = batch.len();
    let batch_id = batch.id.clone();
    let mut retry_count = 0;
    let mut last_error = None;

    loop {
        match handler(batch.clone()).await {
            Ok(()) => {
                return BatchResult {
                    batch_id,
                    success: true,
                    item_count,
                    duration_ms: started.elapsed().as_millis() as u64,
                    retry_count,
                    error: None,
                };
            }
            Err(e) => {
                last_error = Some(e);
                if retry_count >= config.max_retries {
                    warn!(batch_id, retry_count, "batch failed after max retries");
                    break;
                }
                let delay = (config.retry_base_delay * 2u32.pow(retry_count)).min(config.retry_max_delay);
                retry_count += 1;
                info!(batch_id, retry_count, delay_ms = delay.as_millis() as u64, "retrying batch");
                tokio::time::sleep(delay).await;
            }
        }
    }

    BatchResult {
        batch_id,
        success: false,
        item_count,
        duration_ms: started.elapsed().as_millis() as u64,
        retry_count,
        error: last_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::BatchType;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn empty_batch(id: &str) -> Batch {
        Batch::new(id.to_string(), BatchType::Upsert, vec![])
    }

    #[tokio::test]
    async fn successful_batch_reports_no_retries() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let results_clone = Arc::clone(&results);
        let pool = WorkerPool::new(
            WorkerPoolConfig {
                concurrency: 2,
                max_retries: 3,
                retry_base_delay: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(10),
            },
            move |result| results_clone.lock().unwrap().push(result),
            |_| {},
        );

        let handler: BatchHandler = Arc::new(|_batch| Box::pin(async { Ok(()) }));
        pool.submit(empty_batch("b1"), handler);
        pool.drain().await;
        pool.shutdown().await;

        let results = results.lock().unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
        assert_eq!(results[0].retry_count, 0);
    }

    #[tokio::test]
    async fn failing_batch_retries_up_to_max_then_reports_failure() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let results_clone = Arc::clone(&results);
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let pool = WorkerPool::new(
            WorkerPoolConfig {
                concurrency: 1,
                max_retries: 2,
                retry_base_delay: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(5),
            },
            move |result| results_clone.lock().unwrap().push(result),
            |_| {},
        );

        let handler: BatchHandler = Arc::new(move |_batch| {
            attempts_clone.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err("boom".to_string()) })
        });
        pool.submit(empty_batch("b1"), handler);
        pool.drain().await;
        pool.shutdown().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        let results = results.lock().unwrap();
        assert!(!results[0].success);
        assert_eq!(results[0].retry_count, 2);
    }

    #[tokio::test]
    async fn queue_depth_reflects_submitted_and_completed_batches() {
        let pool = WorkerPool::new(
            WorkerPoolConfig {
                concurrency: 1,
                max_retries: 0,
                retry_base_delay: Duration::from_millis(1),
                retry_max_delay: Duration::from_millis(1),
            },
            |_| {},
            |_| {},
        );
        let handler: BatchHandler = Arc::new(|_batch| Box::pin(async { Ok(()) }));
        pool.submit(empty_batch("b1"), handler);
        pool.drain().await;
        assert_eq!(pool.queue_depth(), 0);
        pool.shutdown().await;
    }
}
