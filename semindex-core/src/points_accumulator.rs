//! Durability-tuned upsert accumulator: a specialized accumulator whose
//! flushes go directly to the vector store rather than through the generic
//! worker pool, because upsert ordering/durability tradeoffs differ from
//! delete batching.

use crate::chunk::UpsertItem;
use crate::external::{DensePoint, Ordering as StoreOrdering, UpsertOptions, VectorStore};
use crate::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, trace};

#[derive(Debug, Clone)]
pub struct PointsAccumulatorConfig {
    pub batch_size: usize,
    pub flush_timeout: Duration,
}

/// Buffers upsert items and flushes them to the vector store. The
/// timer-driven path is fire-and-forget (`wait=false`, `ordering=weak`);
/// an explicit [`PointsAccumulator::flush`] is a durability barrier
/// (`wait=true`). On a store error the batch is unshifted back to the head
/// of the buffer so a caller that retries gets at-least-once delivery.
pub struct PointsAccumulator {
    collection: String,
    config: PointsAccumulatorConfig,
    store: Arc<dyn VectorStore>,
    buffer: Mutex<VecDeque<UpsertItem>>,
    timer_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PointsAccumulator {
    pub fn new(collection: impl Into<String>, config: PointsAccumulatorConfig, store: Arc<dyn VectorStore>) -> Arc<Self> {
        Arc::new(Self {
            collection: collection.into(),
            config,
            store,
            buffer: Mutex::new(VecDeque::new()),
            timer_handle: Mutex::new(None),
        })
    }

    /// Appends an item, flushing (fire-and-forget) if the buffer reaches
    /// `batch_size`, and arming the flush timer otherwise.
    pub async fn add(self: &Arc<Self>, item: UpsertItem) {
        let should_flush = {
            let mut buffer = self.buffer.lock().await;
            buffer.push_back(item);
            buffer.len() >= self.config.batch_size
        };
        if should_flush {
            let _ = self.flush_internal(false).await;
        } else {
            self.arm_timer();
        }
    }

    fn arm_timer(self: &Arc<Self>) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(this.config.flush_timeout).await;
            let _ = this.flush_internal(false).await;
        });
        tokio::spawn({
            let this = Arc::clone(self);
            async move {
                let mut guard = this.timer_handle.lock().await;
                *guard = Some(handle);
            }
        });
    }

    /// Durability-barrier flush: `wait=true`, strong ordering.
    pub async fn flush(self: &Arc<Self>) -> Result<()> {
        self.flush_internal(true).await
    }

    async fn flush_internal(self: &Arc<Self>, wait: bool) -> Result<()> {
        let batch: Vec<UpsertItem> = {
            let mut buffer = self.buffer.lock().await;
            buffer.drain(..).collect()
        };
        if batch.is_empty() {
            return Ok(());
        }

        let points: Vec<DensePoint> = batch
            .iter()
            .map(|item| DensePoint {
                id: item.id.clone(),
                vector: item.dense_vector.clone(),
                payload: serde_json::to_value(&item.payload).unwrap_or(serde_json::Value::Null),
            })
            .collect();

        let options = UpsertOptions {
            wait,
            ordering: if wait { StoreOrdering::Strong } else { StoreOrdering::Weak },
        };

        match self
            .store
            .add_points_optimized(&self.collection, points, options)
            .await
        {
            Ok(()) => {
                trace!(collection = %self.collection, count = batch.len(), wait, "flushed upsert batch");
                Ok(())
            }
            Err(e) => {
                error!(collection = %self.collection, error = %e, "upsert flush failed, re-queuing at head");
                let mut buffer = self.buffer.lock().await;
                for item in batch.into_iter().rev() {
                    buffer.push_front(item);
                }
                Err(e)
            }
        }
    }

    pub async fn buffered_len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    pub async fn drain(self: &Arc<Self>) -> Result<()> {
        if let Some(handle) = self.timer_handle.lock().await.take() {
            handle.abort();
        }
        self.flush().await
    }
}
