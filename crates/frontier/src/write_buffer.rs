use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use darkmap_core::{CrawlLogEntry, ScanSeed};

/// Where flushed batches land. Implemented by the storage gateway; tests plug
/// in an in-memory sink.
#[async_trait]
pub trait FlushSink: Send + Sync + 'static {
    async fn flush_crawl_logs(&self, entries: Vec<CrawlLogEntry>) -> Result<()>;
    async fn flush_scan_seeds(&self, seeds: Vec<ScanSeed>) -> Result<()>;
}

/// Coalesces the two append-heavy streams (crawl log rows, scan-queue seeds)
/// into periodic bulk inserts so worker stampedes don't translate into row-at-
/// a-time writes. Callers never block on the database.
pub struct WriteBuffer<S> {
    sink: Arc<S>,
    max_entries: usize,
    logs: Mutex<Vec<CrawlLogEntry>>,
    seeds: Mutex<Vec<ScanSeed>>,
    /// Held for the duration of a flush; try_lock failure means one is
    /// already running.
    flushing: Mutex<()>,
    /// Back-reference for spawning flushes from `&self` methods.
    this: std::sync::Weak<Self>,
}

impl<S: FlushSink> WriteBuffer<S> {
    pub fn new(sink: Arc<S>, max_entries: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            sink,
            max_entries,
            logs: Mutex::new(Vec::new()),
            seeds: Mutex::new(Vec::new()),
            flushing: Mutex::new(()),
            this: this.clone(),
        })
    }

    pub async fn buffer_log(&self, entry: CrawlLogEntry) {
        let over_cap = {
            let mut logs = self.logs.lock().await;
            logs.push(entry);
            logs.len() >= self.max_entries
        };
        if over_cap {
            self.trigger_flush();
        }
    }

    pub async fn buffer_seed(&self, seed: ScanSeed) {
        let over_cap = {
            let mut seeds = self.seeds.lock().await;
            seeds.push(seed);
            seeds.len() >= self.max_entries
        };
        if over_cap {
            self.trigger_flush();
        }
    }

    fn trigger_flush(&self) {
        let Some(buf) = self.this.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            if let Err(e) = buf.flush().await {
                warn!(error = %e, "write buffer flush failed, entries retained");
            }
        });
    }

    /// Flush both buffers. Skips silently when a flush is already in flight.
    /// On sink failure the batch is re-prepended in original order, so nothing
    /// is lost; it rides along with the next flush.
    pub async fn flush(&self) -> Result<()> {
        let _guard = match self.flushing.try_lock() {
            Ok(g) => g,
            Err(_) => return Ok(()),
        };

        let log_result = self.flush_logs().await;
        let seed_result = self.flush_seeds().await;
        log_result.and(seed_result)
    }

    async fn flush_logs(&self) -> Result<()> {
        let batch = {
            let mut logs = self.logs.lock().await;
            std::mem::take(&mut *logs)
        };
        if batch.is_empty() {
            return Ok(());
        }

        match self.sink.flush_crawl_logs(batch.clone()).await {
            Ok(()) => {
                debug!(count = batch.len(), "flushed crawl logs");
                Ok(())
            }
            Err(e) => {
                let mut logs = self.logs.lock().await;
                let mut restored = batch;
                restored.append(&mut logs);
                *logs = restored;
                Err(e)
            }
        }
    }

    async fn flush_seeds(&self) -> Result<()> {
        let batch = {
            let mut seeds = self.seeds.lock().await;
            std::mem::take(&mut *seeds)
        };
        if batch.is_empty() {
            return Ok(());
        }

        // Dedup by domain, keeping the lowest priority number (= most urgent),
        // first-seen order.
        let mut best: HashMap<&str, i32> = HashMap::new();
        for seed in &batch {
            best.entry(seed.domain.as_str())
                .and_modify(|p| *p = (*p).min(seed.priority))
                .or_insert(seed.priority);
        }
        let mut deduped: Vec<ScanSeed> = Vec::with_capacity(best.len());
        for seed in &batch {
            if let Some(priority) = best.remove(seed.domain.as_str()) {
                deduped.push(ScanSeed {
                    domain: seed.domain.clone(),
                    priority,
                });
            }
        }

        match self.sink.flush_scan_seeds(deduped).await {
            Ok(()) => {
                debug!(count = batch.len(), "flushed scan seeds");
                Ok(())
            }
            Err(e) => {
                // Restore the pre-dedup batch; nothing is dropped on failure.
                let mut seeds = self.seeds.lock().await;
                let mut restored = batch;
                restored.append(&mut seeds);
                *seeds = restored;
                Err(e)
            }
        }
    }

    /// Final flush. Waits for any in-flight flush before issuing its own.
    pub async fn stop(&self) -> Result<()> {
        {
            let _wait = self.flushing.lock().await;
        }
        self.flush().await
    }

    /// Periodic flush task; runs until the shutdown signal fires, then does a
    /// final flush.
    pub fn spawn_flush_task(
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
                        if let Err(e) = self.flush().await {
                            warn!(error = %e, "periodic flush failed, entries retained");
                        }
                    }
                    _ = shutdown.recv() => {
                        if let Err(e) = self.stop().await {
                            warn!(error = %e, "final flush failed");
                        }
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingSink {
        fail_next: AtomicBool,
        logs: Mutex<Vec<Vec<CrawlLogEntry>>>,
        seeds: Mutex<Vec<Vec<ScanSeed>>>,
    }

    #[async_trait]
    impl FlushSink for RecordingSink {
        async fn flush_crawl_logs(&self, entries: Vec<CrawlLogEntry>) -> Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("sink unavailable");
            }
            self.logs.lock().await.push(entries);
            Ok(())
        }

        async fn flush_scan_seeds(&self, seeds: Vec<ScanSeed>) -> Result<()> {
            self.seeds.lock().await.push(seeds);
            Ok(())
        }
    }

    fn log_entry(url: &str) -> CrawlLogEntry {
        CrawlLogEntry {
            url: url.to_string(),
            domain: "d".to_string(),
            success: true,
            status_code: Some(200),
            error: None,
            duration_ms: 1,
            worker_id: "w0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_failed_flush_retains_entries_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let buf = WriteBuffer::new(Arc::clone(&sink), 50);

        for url in ["a", "b", "c"] {
            buf.buffer_log(log_entry(url)).await;
        }

        sink.fail_next.store(true, Ordering::SeqCst);
        assert!(buf.flush().await.is_err());
        assert!(sink.logs.lock().await.is_empty());

        // buffered after the failure; must flush after the retained entries
        buf.buffer_log(log_entry("d")).await;

        buf.flush().await.unwrap();
        let flushed = sink.logs.lock().await;
        assert_eq!(flushed.len(), 1);
        let urls: Vec<&str> = flushed[0].iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_seed_dedup_keeps_lowest_priority() {
        let sink = Arc::new(RecordingSink::default());
        let buf = WriteBuffer::new(Arc::clone(&sink), 50);

        let addr = format!("{}.onion", "a".repeat(56));
        buf.buffer_seed(ScanSeed {
            domain: addr.clone(),
            priority: 100,
        })
        .await;
        buf.buffer_seed(ScanSeed {
            domain: addr.clone(),
            priority: 50,
        })
        .await;
        buf.buffer_seed(ScanSeed {
            domain: addr.clone(),
            priority: 80,
        })
        .await;

        buf.flush().await.unwrap();
        let flushed = sink.seeds.lock().await;
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].len(), 1);
        assert_eq!(flushed[0][0].domain, addr);
        assert_eq!(flushed[0][0].priority, 50);
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining() {
        let sink = Arc::new(RecordingSink::default());
        let buf = WriteBuffer::new(Arc::clone(&sink), 50);

        buf.buffer_log(log_entry("a")).await;
        buf.stop().await.unwrap();
        assert_eq!(sink.logs.lock().await.len(), 1);
    }
}
