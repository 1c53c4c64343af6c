use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use darkmap_core::QueueItem;

/// The storage operation the prefetcher pulls from. Items returned are
/// already marked `processing` in the store.
#[async_trait]
pub trait QueueSource: Send + Sync + 'static {
    async fn next_batch(&self, worker_id: &str, n: i64) -> Result<Vec<QueueItem>>;
}

/// In-memory pull-ahead buffer between workers and the claim query. Workers
/// call `take`; the prefetcher refills in bulk whenever the buffer dips below
/// the low-water mark or the refill period elapses, with at most one refill
/// in flight.
pub struct QueuePrefetcher<S> {
    source: Arc<S>,
    fetcher_id: String,
    batch_size: usize,
    low_water: usize,
    buffer: Mutex<VecDeque<QueueItem>>,
    refilling: Mutex<()>,
    /// Back-reference for spawning refills from `&self` methods.
    this: std::sync::Weak<Self>,
}

impl<S: QueueSource> QueuePrefetcher<S> {
    pub fn new(source: Arc<S>, fetcher_id: String, batch_size: usize, low_water: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            source,
            fetcher_id,
            batch_size,
            low_water,
            buffer: Mutex::new(VecDeque::new()),
            refilling: Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Hand out up to `n` buffered items. The caller owns their disposal:
    /// every taken item must end in a completed/failed mark or be returned to
    /// pending.
    pub async fn take(&self, n: usize) -> Vec<QueueItem> {
        let (items, below_low_water) = {
            let mut buffer = self.buffer.lock().await;
            let take = n.min(buffer.len());
            let items: Vec<QueueItem> = buffer.drain(..take).collect();
            (items, buffer.len() < self.low_water)
        };

        if below_low_water {
            if let Some(this) = self.this.upgrade() {
                tokio::spawn(async move {
                    if let Err(e) = this.refill().await {
                        warn!(error = %e, "prefetch refill failed");
                    }
                });
            }
        }

        items
    }

    /// One bulk claim against the source. A second caller finding the guard
    /// held returns immediately; never two claims in flight.
    pub async fn refill(&self) -> Result<()> {
        let _guard = match self.refilling.try_lock() {
            Ok(g) => g,
            Err(_) => return Ok(()),
        };

        let batch = self
            .source
            .next_batch(&self.fetcher_id, self.batch_size as i64)
            .await?;
        if batch.is_empty() {
            return Ok(());
        }

        debug!(count = batch.len(), "prefetched queue items");
        let mut buffer = self.buffer.lock().await;
        buffer.extend(batch);
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Empty the buffer, handing the items back to the caller. Used at
    /// shutdown so claimed-but-unworked rows can be reverted to pending.
    pub async fn drain(&self) -> Vec<QueueItem> {
        let mut buffer = self.buffer.lock().await;
        buffer.drain(..).collect()
    }

    /// Periodic refill task; stops at the shutdown signal.
    pub fn spawn_refill_task(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.refill().await {
                            warn!(error = %e, "periodic refill failed");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
        next_id: AtomicI64,
        delay: Duration,
    }

    impl CountingSource {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                next_id: AtomicI64::new(1),
                delay,
            })
        }
    }

    #[async_trait]
    impl QueueSource for CountingSource {
        async fn next_batch(&self, _worker_id: &str, n: i64) -> Result<Vec<QueueItem>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            let mut items = Vec::new();
            for _ in 0..n {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                items.push(QueueItem {
                    id,
                    url: format!("http://{}.onion/p{}", "a".repeat(56), id),
                    domain: format!("{}.onion", "a".repeat(56)),
                    priority: 100,
                    attempts: 1,
                });
            }
            Ok(items)
        }
    }

    #[tokio::test]
    async fn test_refill_then_take_preserves_order() {
        let source = CountingSource::new(Duration::ZERO);
        let prefetcher = QueuePrefetcher::new(Arc::clone(&source), "pf0".into(), 10, 2);

        prefetcher.refill().await.unwrap();
        assert_eq!(prefetcher.len().await, 10);

        let first = prefetcher.take(3).await;
        assert_eq!(first.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        let second = prefetcher.take(2).await;
        assert_eq!(second.iter().map(|i| i.id).collect::<Vec<_>>(), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_only_one_refill_in_flight() {
        let source = CountingSource::new(Duration::from_millis(50));
        let prefetcher = QueuePrefetcher::new(Arc::clone(&source), "pf0".into(), 5, 2);

        let a = {
            let p = Arc::clone(&prefetcher);
            tokio::spawn(async move { p.refill().await })
        };
        let b = {
            let p = Arc::clone(&prefetcher);
            tokio::spawn(async move { p.refill().await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(prefetcher.len().await, 5);
    }

    #[tokio::test]
    async fn test_take_below_low_water_triggers_refill() {
        let source = CountingSource::new(Duration::ZERO);
        let prefetcher = QueuePrefetcher::new(Arc::clone(&source), "pf0".into(), 10, 5);

        prefetcher.refill().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // drains 8 of 10 → 2 left, under the low-water mark of 5
        let taken = prefetcher.take(8).await;
        assert_eq!(taken.len(), 8);

        // the triggered refill is async; give it a moment
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(prefetcher.len().await, 12);
    }

    #[tokio::test]
    async fn test_drain_empties_buffer() {
        let source = CountingSource::new(Duration::ZERO);
        let prefetcher = QueuePrefetcher::new(Arc::clone(&source), "pf0".into(), 4, 1);

        prefetcher.refill().await.unwrap();
        let drained = prefetcher.drain().await;
        assert_eq!(drained.len(), 4);
        assert_eq!(prefetcher.len().await, 0);
    }
}
