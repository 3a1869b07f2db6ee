//! Pipeline coordinator: owns the upsert and delete accumulators, wires them
//! to the worker pool, and propagates backpressure from queue depth.

use crate::accumulator::{Accumulator, AccumulatorConfig};
use crate::chunk::{Batch, BatchType, UpsertItem, WorkItem};
use crate::external::VectorStore;
use crate::worker_pool::{BatchHandler, BatchResult, WorkerPool, WorkerPoolConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub queue_depth: u64,
    pub avg_batch_duration_ms: f64,
    pub batches_completed: u64,
    pub batches_failed: u64,
}

type UpsertAccumulator = Accumulator<UpsertItem, Box<dyn Fn(Vec<UpsertItem>) + Send + Sync>, Box<dyn Fn(bool) + Send + Sync>>;
type DeleteAccumulator = Accumulator<String, Box<dyn Fn(Vec<String>) + Send + Sync>, Box<dyn Fn(bool) + Send + Sync>>;

struct Shared {
    max_queue_size: u64,
    upsert_paused: AtomicBool,
    delete_paused: AtomicBool,
    batches_completed: AtomicU64,
    batches_failed: AtomicU64,
    backpressure_notify: tokio::sync::Notify,
    // Filled in once the accumulators exist; `apply_backpressure_policy` is
    // wired into the pool before they do, so it looks them up lazily rather
    // than taking them as constructor args.
    accumulators: Mutex<Option<(Weak<UpsertAccumulator>, Weak<DeleteAccumulator>)>>,
}

/// Owns both accumulators plus the shared worker pool and applies the
/// pipeline-wide backpressure policy: pause both accumulators once queue
/// depth reaches `max_queue_size`, resume both once it drops below half.
pub struct Pipeline {
    pool: Arc<WorkerPool>,
    upsert: Arc<UpsertAccumulator>,
    delete: Arc<DeleteAccumulator>,
    shared: Arc<Shared>,
}

impl Pipeline {
    pub fn new(
        collection: impl Into<String>,
        store: Arc<dyn VectorStore>,
        upsert_config: AccumulatorConfig,
        delete_config: AccumulatorConfig,
        pool_config: WorkerPoolConfig,
    ) -> Arc<Self> {
        let collection = collection.into();
        let max_queue_size = upsert_config.max_queue_size.max(delete_config.max_queue_size) as u64;
        let shared = Arc::new(Shared {
            max_queue_size,
            upsert_paused: AtomicBool::new(false),
            delete_paused: AtomicBool::new(false),
            batches_completed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            backpressure_notify: tokio::sync::Notify::new(),
            accumulators: Mutex::new(None),
        });

        let shared_for_complete = Arc::clone(&shared);
        let pool = Arc::new(WorkerPool::new(
            pool_config,
            move |result: BatchResult| {
                shared_for_complete.batches_completed.fetch_add(1, Ordering::SeqCst);
                if !result.success {
                    shared_for_complete.batches_failed.fetch_add(1, Ordering::SeqCst);
                }
                info!(batch_id = %result.batch_id, success = result.success, "batch complete");
            },
            {
                let shared = Arc::clone(&shared);
                move |depth| apply_backpressure_policy(&shared, depth)
            },
        ));

        let handler = vector_store_handler(collection, store);

        let pool_for_upsert = Arc::clone(&pool);
        let handler_for_upsert = Arc::clone(&handler);
        let upsert: Arc<UpsertAccumulator> = Arc::new(Accumulator::new(
            upsert_config,
            Box::new(move |items: Vec<UpsertItem>| {
                let batch = Batch::new(
                    new_batch_id(),
                    BatchType::Upsert,
                    items.into_iter().map(WorkItem::Upsert).collect(),
                );
                pool_for_upsert.submit(batch, Arc::clone(&handler_for_upsert));
            }) as Box<dyn Fn(Vec<UpsertItem>) + Send + Sync>,
            {
                let shared = Arc::clone(&shared);
                Box::new(move |paused| shared.upsert_paused.store(paused, Ordering::SeqCst)) as Box<dyn Fn(bool) + Send + Sync>
            },
        ));

        let pool_for_delete = Arc::clone(&pool);
        let handler_for_delete = Arc::clone(&handler);
        let delete: Arc<DeleteAccumulator> = Arc::new(Accumulator::new(
            delete_config,
            Box::new(move |paths: Vec<String>| {
                let batch = Batch::new(
                    new_batch_id(),
                    BatchType::Delete,
                    paths.into_iter().map(WorkItem::Delete).collect(),
                );
                pool_for_delete.submit(batch, Arc::clone(&handler_for_delete));
            }) as Box<dyn Fn(Vec<String>) + Send + Sync>,
            {
                let shared = Arc::clone(&shared);
                Box::new(move |paused| shared.delete_paused.store(paused, Ordering::SeqCst)) as Box<dyn Fn(bool) + Send + Sync>
            },
        ));

        *shared.accumulators.lock().expect("accumulators mutex poisoned") =
            Some((Arc::downgrade(&upsert), Arc::downgrade(&delete)));

        Arc::new(Self {
            pool,
            upsert,
            delete,
            shared,
        })
    }

    pub fn add_upsert(&self, item: UpsertItem) -> bool {
        self.upsert.add(item)
    }

    pub fn add_upsert_many(&self, items: impl IntoIterator<Item = UpsertItem>) -> usize {
        self.upsert.add_many(items)
    }

    pub fn add_delete(&self, relative_path: String) -> bool {
        self.delete.add(relative_path)
    }

    pub fn add_delete_many(&self, paths: impl IntoIterator<Item = String>) -> usize {
        self.delete.add_many(paths)
    }

    /// Drains both accumulators and waits for all submitted batches.
    pub async fn flush(&self) {
        self.upsert.flush();
        self.delete.flush();
        self.pool.drain().await;
    }

    pub async fn shutdown(&self) {
        self.upsert.drain();
        self.delete.drain();
        self.pool.drain().await;
    }

    pub fn stats(&self) -> PipelineStats {
        let (queue_depth, avg) = self.pool.stats();
        PipelineStats {
            queue_depth,
            avg_batch_duration_ms: avg,
            batches_completed: self.shared.batches_completed.load(Ordering::SeqCst),
            batches_failed: self.shared.batches_failed.load(Ordering::SeqCst),
        }
    }

    pub fn is_upsert_backpressured(&self) -> bool {
        self.shared.upsert_paused.load(Ordering::SeqCst)
    }

    pub fn is_delete_backpressured(&self) -> bool {
        self.shared.delete_paused.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for backpressure to release; `true` if released
    /// before the timeout, `false` on expiry.
    pub async fn wait_for_backpressure(&self, timeout: Duration) -> bool {
        if !self.is_upsert_backpressured() && !self.is_delete_backpressured() {
            return true;
        }
        tokio::time::timeout(timeout, self.shared.backpressure_notify.notified())
            .await
            .is_ok()
    }
}

fn apply_backpressure_policy(shared: &Arc<Shared>, depth: u64) {
    let (upsert, delete) = {
        let guard = shared.accumulators.lock().expect("accumulators mutex poisoned");
        let Some((upsert, delete)) = guard.as_ref() else { return };
        let (Some(upsert), Some(delete)) = (upsert.upgrade(), delete.upgrade()) else { return };
        (upsert, delete)
    };

    if depth >= shared.max_queue_size {
        upsert.pause();
        delete.pause();
    } else if depth < shared.max_queue_size / 2 {
        upsert.resume();
        delete.resume();
        shared.backpressure_notify.notify_waiters();
    }
}

fn new_batch_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("batch-{}", COUNTER.fetch_add(1, Ordering::SeqCst))
}

/// The per-batch handler the pool runs for both accumulators, dispatching
/// on `batch.batch_type` to the matching vector-store call.
fn vector_store_handler(collection: String, store: Arc<dyn VectorStore>) -> BatchHandler {
    Arc::new(move |batch| {
        let collection = collection.clone();
        let store = Arc::clone(&store);
        Box::pin(async move {
            match batch.batch_type {
                BatchType::Upsert => {
                    let points: Vec<crate::external::DensePoint> = batch
                        .items
                        .into_iter()
                        .filter_map(|item| match item {
                            WorkItem::Upsert(u) => Some(crate::external::DensePoint {
                                id: u.id,
                                vector: u.dense_vector,
                                payload: serde_json::to_value(&u.payload).unwrap_or(serde_json::Value::Null),
                            }),
                            WorkItem::Delete(_) => None,
                        })
                        .collect();
                    store
                        .add_points_optimized(
                            &collection,
                            points,
                            crate::external::UpsertOptions {
                                wait: false,
                                ordering: crate::external::Ordering::Weak,
                            },
                        )
                        .await
                        .map_err(|e| e.to_string())
                }
                BatchType::Delete => {
                    let paths: Vec<String> = batch
                        .items
                        .into_iter()
                        .filter_map(|item| match item {
                            WorkItem::Delete(p) => Some(p),
                            WorkItem::Upsert(_) => None,
                        })
                        .collect();
                    store
                        .delete_points_by_paths(&collection, &paths)
                        .await
                        .map_err(|e| e.to_string())
                }
            }
        })
    })
}
