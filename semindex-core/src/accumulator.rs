//! Generic batch accumulator: collects items, flushes by size or timer,
//! signals backpressure. Driven by a single logical producer; `on_batch_ready`
//! must be cheap and non-blocking since it may run from the timer task.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

#[derive(Debug, Clone)]
pub struct AccumulatorConfig {
    pub batch_size: usize,
    pub flush_timeout: Duration,
    pub max_queue_size: usize,
    pub min_batch_size: Option<usize>,
}

struct Inner<T> {
    buffer: Vec<T>,
    paused: bool,
    timer_armed: bool,
}

/// Generic over the item type so the same machinery backs both the upsert
/// and delete accumulators in the pipeline coordinator.
pub struct Accumulator<T, F, B>
where
    T: Send + 'static,
    F: Fn(Vec<T>) + Send + Sync + 'static,
    B: Fn(bool) + Send + Sync + 'static,
{
    config: AccumulatorConfig,
    inner: Arc<Mutex<Inner<T>>>,
    on_batch_ready: Arc<F>,
    on_backpressure: Arc<B>,
    timer_cancel: Arc<Notify>,
    timer_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T, F, B> Accumulator<T, F, B>
where
    T: Send + 'static,
    F: Fn(Vec<T>) + Send + Sync + 'static,
    B: Fn(bool) + Send + Sync + 'static,
{
    pub fn new(config: AccumulatorConfig, on_batch_ready: F, on_backpressure: B) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                buffer: Vec::new(),
                paused: false,
                timer_armed: false,
            })),
            on_batch_ready: Arc::new(on_batch_ready),
            on_backpressure: Arc::new(on_backpressure),
            timer_cancel: Arc::new(Notify::new()),
            timer_handle: Mutex::new(None),
        }
    }

    /// Appends `item` to the buffer if not paused. Arms the flush timer on
    /// the first item, and flushes immediately once `batch_size` is hit.
    pub fn add(&self, item: T) -> bool {
        let mut should_flush = false;
        let mut should_arm_timer = false;
        {
            let mut inner = self.inner.lock().expect("accumulator mutex poisoned");
            if inner.paused {
                return false;
            }
            inner.buffer.push(item);
            if !inner.timer_armed {
                inner.timer_armed = true;
                should_arm_timer = true;
            }
            if inner.buffer.len() >= self.config.batch_size {
                should_flush = true;
            }
        }
        if should_arm_timer {
            self.arm_timer(self.config.flush_timeout);
        }
        if should_flush {
            self.flush();
        }
        true
    }

    /// Stops at the first rejected item (the accumulator became paused mid-way).
    pub fn add_many(&self, items: impl IntoIterator<Item = T>) -> usize {
        let mut accepted = 0;
        for item in items {
            if !self.add(item) {
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Emits the current buffer as one batch, clears it, cancels the timer.
    pub fn flush(&self) {
        let batch = {
            let mut inner = self.inner.lock().expect("accumulator mutex poisoned");
            inner.timer_armed = false;
            std::mem::take(&mut inner.buffer)
        };
        self.timer_cancel.notify_waiters();
        if !batch.is_empty() {
            (self.on_batch_ready)(batch);
        }
    }

    pub fn pause(&self) {
        let became_paused = {
            let mut inner = self.inner.lock().expect("accumulator mutex poisoned");
            let was_paused = inner.paused;
            inner.paused = true;
            !was_paused
        };
        if became_paused {
            (self.on_backpressure)(true);
        }
    }

    pub fn resume(&self) {
        let became_resumed = {
            let mut inner = self.inner.lock().expect("accumulator mutex poisoned");
            let was_paused = inner.paused;
            inner.paused = false;
            was_paused
        };
        if became_resumed {
            (self.on_backpressure)(false);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().expect("accumulator mutex poisoned").paused
    }

    pub fn buffered_len(&self) -> usize {
        self.inner.lock().expect("accumulator mutex poisoned").buffer.len()
    }

    /// Flush plus stop the timer; safe to call at shutdown.
    pub fn drain(&self) {
        self.flush();
        if let Some(handle) = self.timer_handle.lock().expect("accumulator mutex poisoned").take() {
            handle.abort();
        }
    }

    /// Discards buffered items without emitting a batch.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("accumulator mutex poisoned");
        inner.buffer.clear();
        inner.timer_armed = false;
        self.timer_cancel.notify_waiters();
    }

    fn arm_timer(&self, duration: Duration) {
        let inner = Arc::clone(&self.inner);
        let on_batch_ready = Arc::clone(&self.on_batch_ready);
        let cancel = Arc::clone(&self.timer_cancel);
        let min_batch_size = self.config.min_batch_size;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(duration) => {}
                    _ = cancel.notified() => return,
                }

                let (batch, should_rearm_half) = {
                    let mut guard = inner.lock().expect("accumulator mutex poisoned");
                    if guard.buffer.is_empty() {
                        guard.timer_armed = false;
                        return;
                    }
                    let below_min = min_batch_size.is_some_and(|min| guard.buffer.len() < min);
                    if below_min {
                        (None, true)
                    } else {
                        guard.timer_armed = false;
                        (Some(std::mem::take(&mut guard.buffer)), false)
                    }
                };

                if let Some(batch) = batch {
                    trace!(batch_size = batch.len(), "flush timer fired");
                    on_batch_ready(batch);
                    return;
                }
                if should_rearm_half {
                    tokio::select! {
                        _ = tokio::time::sleep(duration / 2) => {}
                        _ = cancel.notified() => return,
                    }
                    let batch = {
                        let mut guard = inner.lock().expect("accumulator mutex poisoned");
                        guard.timer_armed = false;
                        std::mem::take(&mut guard.buffer)
                    };
                    if !batch.is_empty() {
                        on_batch_ready(batch);
                    }
                    return;
                }
            }
        });
        *self.timer_handle.lock().expect("accumulator mutex poisoned") = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn add_flushes_immediately_at_batch_size() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = Arc::clone(&flushed);
        let accumulator = Accumulator::new(
            AccumulatorConfig {
                batch_size: 2,
                flush_timeout: Duration::from_secs(60),
                max_queue_size: 100,
                min_batch_size: None,
            },
            move |batch: Vec<i32>| flushed_clone.lock().unwrap().push(batch),
            |_paused| {},
        );

        accumulator.add(1);
        accumulator.add(2);
        assert_eq!(flushed.lock().unwrap().len(), 1);
        assert_eq!(flushed.lock().unwrap()[0], vec![1, 2]);
    }

    #[tokio::test]
    async fn paused_accumulator_rejects_items() {
        let accumulator = Accumulator::new(
            AccumulatorConfig {
                batch_size: 10,
                flush_timeout: Duration::from_secs(60),
                max_queue_size: 100,
                min_batch_size: None,
            },
            |_batch: Vec<i32>| {},
            |_paused| {},
        );
        accumulator.pause();
        assert!(!accumulator.add(1));
    }

    #[tokio::test]
    async fn backpressure_callback_fires_only_on_edge_transitions() {
        let transitions = Arc::new(AtomicUsize::new(0));
        let transitions_clone = Arc::clone(&transitions);
        let accumulator: Accumulator<i32, _, _> = Accumulator::new(
            AccumulatorConfig {
                batch_size: 10,
                flush_timeout: Duration::from_secs(60),
                max_queue_size: 100,
                min_batch_size: None,
            },
            |_batch| {},
            move |_paused| {
                transitions_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        accumulator.pause();
        accumulator.pause();
        accumulator.resume();
        accumulator.resume();
        assert_eq!(transitions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn drain_flushes_remaining_items() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = Arc::clone(&flushed);
        let accumulator = Accumulator::new(
            AccumulatorConfig {
                batch_size: 10,
                flush_timeout: Duration::from_secs(60),
                max_queue_size: 100,
                min_batch_size: None,
            },
            move |batch: Vec<i32>| flushed_clone.lock().unwrap().push(batch),
            |_paused| {},
        );
        accumulator.add(1);
        accumulator.drain();
        assert_eq!(flushed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_discards_without_emitting() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = Arc::clone(&flushed);
        let accumulator = Accumulator::new(
            AccumulatorConfig {
                batch_size: 10,
                flush_timeout: Duration::from_secs(60),
                max_queue_size: 100,
                min_batch_size: None,
            },
            move |batch: Vec<i32>| flushed_clone.lock().unwrap().push(batch),
            |_paused| {},
        );
        accumulator.add(1);
        accumulator.clear();
        accumulator.flush();
        assert!(flushed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_timer_fires_after_timeout() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = Arc::clone(&flushed);
        let accumulator = Accumulator::new(
            AccumulatorConfig {
                batch_size: 100,
                flush_timeout: Duration::from_millis(20),
                max_queue_size: 100,
                min_batch_size: None,
            },
            move |batch: Vec<i32>| flushed_clone.lock().unwrap().push(batch),
            |_paused| {},
        );
        accumulator.add(1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(flushed.lock().unwrap().len(), 1);
    }
}
