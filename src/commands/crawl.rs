use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashSet;
use rand::Rng;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use url::Url;

use darkmap_core::config::{CrawlerConfig, ProxyConfig};
use darkmap_core::{
    extract_onion_domain, is_connection_failure, AppConfig, CrawlLogEntry, CrawlStatus, LinkSource,
    PageData, QueueItem, ScanSeed, Subsystem,
};
use darkmap_frontier::{FlushSink, QueuePrefetcher, QueueSource, WriteBuffer};
use darkmap_parser::{body_to_string, parse_html};
use darkmap_proxy::{FetchOptions, ProxyClient};
use darkmap_storage::Storage;

use crate::seeds::collect_seeds;

/// URLs handed to a worker per prefetcher pull.
const FETCH_BATCH: usize = 3;

/// Seeds outrank everything discovered later.
const PRIORITY_SEED: i32 = 10;
/// Onion domains that only show up in prose/comments; typically fresh leads.
const PRIORITY_TEXT_MENTION: i32 = 50;
const PRIORITY_ELEMENT_LINK: i32 = 100;
const PRIORITY_ERROR_PAGE_LINK: i32 = 150;

const SCAN_SEED_PRIORITY: i32 = 100;

fn link_priority(parent_is_error_page: bool) -> i32 {
    if parent_is_error_page {
        PRIORITY_ERROR_PAGE_LINK
    } else {
        PRIORITY_ELEMENT_LINK
    }
}

/// Error pages are persisted too; the status prefix keeps them recognizable
/// in search results.
fn page_title(parsed_title: Option<String>, status: u16) -> Option<String> {
    if status < 400 {
        return parsed_title;
    }
    Some(match parsed_title {
        Some(t) => format!("[{}] {}", status, t),
        None => format!("[{}]", status),
    })
}

struct StorageQueueSource(Storage);

#[async_trait]
impl QueueSource for StorageQueueSource {
    async fn next_batch(&self, worker_id: &str, n: i64) -> Result<Vec<QueueItem>> {
        self.0.get_next_urls(worker_id, n).await
    }
}

struct StorageFlushSink(Storage);

#[async_trait]
impl FlushSink for StorageFlushSink {
    async fn flush_crawl_logs(&self, entries: Vec<CrawlLogEntry>) -> Result<()> {
        self.0.flush_crawl_logs(&entries).await
    }

    /// Discovered domains feed both reconnaissance queues.
    async fn flush_scan_seeds(&self, seeds: Vec<ScanSeed>) -> Result<()> {
        self.0.seed_scan_queue(&seeds).await?;
        self.0.seed_dir_scan_queue(&seeds).await?;
        Ok(())
    }
}

pub async fn run(config: AppConfig, seeds: Option<String>, seed: Option<String>) -> Result<()> {
    let pool_size = ((config.crawler.workers as u32) + 5).max(config.database.max_connections);
    let storage = Storage::with_pool_size(&config.database.url, pool_size).await?;
    storage.run_migrations().await?;

    let seed_urls = collect_seeds(seeds, seed)?;
    let seed_domains: Vec<String> = seed_urls
        .iter()
        .filter_map(|u| Url::parse(u).ok())
        .filter_map(|u| extract_onion_domain(&u))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    storage.ensure_domains(&seed_domains).await?;
    let queued = storage.add_to_crawl_queue(&seed_urls, PRIORITY_SEED).await?;
    info!(seeds = seed_urls.len(), queued, "seeds loaded");

    let proxy = Arc::new(ProxyClient::new(
        &config.proxy.socks_addr(),
        Duration::from_secs(config.proxy.connect_timeout_secs),
        config.proxy.retries,
    )?);
    info!(proxy = %config.proxy.socks_addr(), "proxy client ready");

    let storage = Arc::new(storage);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let prefetcher = QueuePrefetcher::new(
        Arc::new(StorageQueueSource((*storage).clone())),
        "prefetch".to_string(),
        config.crawler.prefetch_batch,
        config.crawler.prefetch_low_water,
    );
    let prefetch_task = Arc::clone(&prefetcher).spawn_refill_task(
        Duration::from_secs(config.crawler.prefetch_period_secs),
        shutdown_tx.subscribe(),
    );

    let write_buffer = WriteBuffer::new(
        Arc::new(StorageFlushSink((*storage).clone())),
        config.crawler.write_buffer_cap,
    );
    let flush_task = Arc::clone(&write_buffer).spawn_flush_task(
        Duration::from_secs(config.crawler.flush_period_secs),
        shutdown_tx.subscribe(),
    );

    // Domains already pushed to the scan queues this session.
    let seeded: Arc<DashSet<String>> = Arc::new(DashSet::new());

    info!(workers = config.crawler.workers, "spawning crawler workers");
    let mut handles = Vec::new();
    for i in 0..config.crawler.workers {
        let worker_id = format!("crawl-{}", i);
        let storage = Arc::clone(&storage);
        let proxy = Arc::clone(&proxy);
        let prefetcher = Arc::clone(&prefetcher);
        let write_buffer = Arc::clone(&write_buffer);
        let seeded = Arc::clone(&seeded);
        let crawler_cfg = config.crawler.clone();
        let proxy_cfg = config.proxy.clone();
        let shutdown = shutdown_tx.subscribe();

        handles.push(tokio::spawn(worker_loop(
            worker_id,
            storage,
            proxy,
            prefetcher,
            write_buffer,
            seeded,
            crawler_cfg,
            proxy_cfg,
            shutdown,
        )));
    }

    info!("press Ctrl+C to stop crawling");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }
    let _ = prefetch_task.await;
    let _ = flush_task.await;

    // Prefetched rows nobody worked on go back to pending.
    let leftovers = prefetcher.drain().await;
    for item in &leftovers {
        if let Err(e) = storage.return_url_to_pending(&item.url).await {
            warn!(url = %item.url, error = %e, "failed to return queue item");
        }
    }
    if !leftovers.is_empty() {
        info!(count = leftovers.len(), "returned prefetched items to queue");
    }

    info!("shutdown complete");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: String,
    storage: Arc<Storage>,
    proxy: Arc<ProxyClient>,
    prefetcher: Arc<QueuePrefetcher<StorageQueueSource>>,
    write_buffer: Arc<WriteBuffer<StorageFlushSink>>,
    seeded: Arc<DashSet<String>>,
    cfg: CrawlerConfig,
    proxy_cfg: ProxyConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(worker = %worker_id, "crawler worker started");
    let crawl_delay = Duration::from_secs(cfg.crawl_delay_secs);

    loop {
        let batch = prefetcher.take(FETCH_BATCH).await;
        if batch.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(crawl_delay) => continue,
                _ = shutdown.recv() => break,
            }
        }

        let mut batch_failed = false;
        for item in &batch {
            match process_url(
                &storage,
                &proxy,
                &write_buffer,
                &seeded,
                &cfg,
                &proxy_cfg,
                &worker_id,
                item,
            )
            .await
            {
                Ok(()) => {}
                Err(e) => {
                    error!(worker = %worker_id, url = %item.url, error = %e, "storage error in crawl");
                    batch_failed = true;
                    break;
                }
            }

            if shutdown.try_recv().is_ok() {
                info!(worker = %worker_id, "worker shutting down");
                return;
            }

            let jitter = rand::thread_rng().gen_range(500..1500);
            tokio::time::sleep(Duration::from_millis(jitter)).await;
        }

        // database trouble gets a longer back-off
        let delay = if batch_failed { 2 * crawl_delay } else { crawl_delay };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.recv() => break,
        }
    }
    info!(worker = %worker_id, "worker stopped");
}

/// One queue item end to end: lock, fetch, persist, enqueue discoveries,
/// dispose of the queue row. The domain always comes out `completed` and
/// unlocked, whatever happened to the URL itself.
#[allow(clippy::too_many_arguments)]
async fn process_url(
    storage: &Storage,
    proxy: &ProxyClient,
    write_buffer: &Arc<WriteBuffer<StorageFlushSink>>,
    seeded: &DashSet<String>,
    cfg: &CrawlerConfig,
    proxy_cfg: &ProxyConfig,
    worker_id: &str,
    item: &QueueItem,
) -> Result<()> {
    let Ok(url) = Url::parse(&item.url) else {
        storage
            .mark_url_completed(&item.url, false, Some("invalid URL"))
            .await?;
        write_buffer
            .buffer_log(log_entry(item, worker_id, false, None, Some("invalid URL"), 0))
            .await;
        return Ok(());
    };
    if extract_onion_domain(&url).as_deref() != Some(item.domain.as_str()) {
        storage
            .mark_url_completed(&item.url, false, Some("invalid onion URL"))
            .await?;
        write_buffer
            .buffer_log(log_entry(item, worker_id, false, None, Some("invalid onion URL"), 0))
            .await;
        return Ok(());
    }

    let lease = Duration::from_secs(cfg.lock_lease_secs);
    if !storage
        .acquire_domain_lock(Subsystem::Crawl, &item.domain, worker_id, lease)
        .await?
    {
        debug!(worker = %worker_id, domain = %item.domain, "crawl lock held elsewhere, returning url");
        storage.return_url_to_pending(&item.url).await?;
        return Ok(());
    }

    storage
        .update_domain_status(&item.domain, CrawlStatus::Crawling, Some(worker_id))
        .await?;

    let outcome = crawl_url(storage, proxy, write_buffer, seeded, cfg, proxy_cfg, worker_id, item, &url).await;

    // completed regardless of the per-URL outcome so the domain stays
    // eligible for re-crawl
    if let Err(e) = storage
        .update_domain_status(&item.domain, CrawlStatus::Completed, Some(worker_id))
        .await
    {
        warn!(domain = %item.domain, error = %e, "failed to reset domain status");
    }
    if let Err(e) = storage
        .release_domain_lock(Subsystem::Crawl, &item.domain, worker_id)
        .await
    {
        warn!(domain = %item.domain, error = %e, "failed to release crawl lock");
    }

    outcome
}

#[allow(clippy::too_many_arguments)]
async fn crawl_url(
    storage: &Storage,
    proxy: &ProxyClient,
    write_buffer: &Arc<WriteBuffer<StorageFlushSink>>,
    seeded: &DashSet<String>,
    cfg: &CrawlerConfig,
    proxy_cfg: &ProxyConfig,
    worker_id: &str,
    item: &QueueItem,
    url: &Url,
) -> Result<()> {
    let started = Instant::now();
    let opts = FetchOptions {
        timeout: Duration::from_secs(proxy_cfg.request_timeout_secs),
        max_content_length: cfg.max_content_length,
    };

    let resp = match proxy.get(url, &opts).await {
        Ok(resp) => resp,
        Err(e) => {
            let msg = e.to_string();
            let duration = started.elapsed().as_millis() as i64;
            if is_connection_failure(&msg) {
                let failed = storage.mark_domain_connection_failed(&item.domain, &msg).await?;
                warn!(worker = %worker_id, domain = %item.domain, failed, "domain unreachable: {}", msg);
            } else {
                storage.mark_url_completed(&item.url, false, Some(&msg)).await?;
                debug!(worker = %worker_id, url = %item.url, "fetch failed: {}", msg);
            }
            write_buffer
                .buffer_log(log_entry(item, worker_id, false, None, Some(&msg), duration))
                .await;
            return Ok(());
        }
    };

    let status = resp.status;
    let is_error_page = status >= 400;
    let body_len = resp.body.len();

    let parsed = if resp.is_html() {
        Some(parse_html(&body_to_string(&resp.body), url))
    } else {
        None
    };

    let title = page_title(parsed.as_ref().and_then(|p| p.title.clone()), status);
    let meta_description = parsed.as_ref().and_then(|p| p.meta_description.clone());
    let links = parsed.as_ref().map(|p| p.links.clone()).unwrap_or_default();
    let element_domains = parsed
        .as_ref()
        .map(|p| p.element_domains.clone())
        .unwrap_or_default();
    let text_only_domains = parsed
        .as_ref()
        .map(|p| p.text_only_domains.clone())
        .unwrap_or_default();

    let content_html = if parsed.is_some() && body_len < cfg.html_store_cap {
        Some(body_to_string(&resp.body))
    } else {
        None
    };

    let page = PageData {
        url: item.url.clone(),
        path: url.path().to_string(),
        title,
        content_text: parsed.as_ref().map(|p| p.content_text.clone()).unwrap_or_default(),
        content_html,
        status_code: status,
        content_length: body_len as i64,
        content_type: resp.content_type().map(str::to_string),
        language: parsed.as_ref().and_then(|p| p.language.clone()),
        meta_description: meta_description.clone(),
        h1: parsed.as_ref().map(|p| p.h1.clone()).unwrap_or_default(),
        accessible: !is_error_page,
    };

    storage
        .store_crawl(&item.domain, meta_description.as_deref(), &page, &resp.headers, &links)
        .await?;

    // element-discovered onion URLs re-enter the crawl queue
    let element_urls: Vec<String> = links
        .iter()
        .filter(|l| l.source == LinkSource::Element && l.target_domain.is_some())
        .map(|l| l.url.clone())
        .collect();
    if !element_urls.is_empty() {
        storage
            .add_to_crawl_queue(&element_urls, link_priority(is_error_page))
            .await?;
    }

    // text-only mentions enter at the domain root, ahead of element links
    if !text_only_domains.is_empty() {
        let text_urls: Vec<String> = text_only_domains
            .iter()
            .map(|d| format!("http://{}/", d))
            .collect();
        storage
            .add_to_crawl_queue(&text_urls, PRIORITY_TEXT_MENTION)
            .await?;
    }

    // every domain seen on this page heads for the scan queues, once per session
    let mut discovered: BTreeSet<String> = element_domains.into_iter().collect();
    discovered.extend(text_only_domains);
    let new_domains: Vec<String> = discovered
        .iter()
        .filter(|d| d.as_str() != item.domain)
        .cloned()
        .collect();
    storage.ensure_domains(&new_domains).await?;
    discovered.insert(item.domain.clone());
    for domain in discovered {
        if seeded.insert(domain.clone()) {
            write_buffer
                .buffer_seed(ScanSeed {
                    domain,
                    priority: SCAN_SEED_PRIORITY,
                })
                .await;
        }
    }

    storage.mark_url_completed(&item.url, true, None).await?;
    let duration = started.elapsed().as_millis() as i64;
    write_buffer
        .buffer_log(log_entry(item, worker_id, true, Some(status), None, duration))
        .await;

    info!(
        worker = %worker_id,
        url = %item.url,
        status,
        links = links.len(),
        "crawled"
    );
    Ok(())
}

fn log_entry(
    item: &QueueItem,
    worker_id: &str,
    success: bool,
    status_code: Option<u16>,
    error: Option<&str>,
    duration_ms: i64,
) -> CrawlLogEntry {
    CrawlLogEntry {
        url: item.url.clone(),
        domain: item.domain.clone(),
        success,
        status_code,
        error: error.map(str::to_string),
        duration_ms,
        worker_id: worker_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_priority_drops_for_error_pages() {
        assert_eq!(link_priority(false), 100);
        assert_eq!(link_priority(true), 150);
        assert!(PRIORITY_TEXT_MENTION < PRIORITY_ELEMENT_LINK);
        assert!(PRIORITY_SEED < PRIORITY_TEXT_MENTION);
    }

    #[test]
    fn test_page_title_prefixes_error_status() {
        assert_eq!(page_title(Some("Home".into()), 200).as_deref(), Some("Home"));
        assert_eq!(
            page_title(Some("Forbidden".into()), 403).as_deref(),
            Some("[403] Forbidden")
        );
        assert_eq!(page_title(None, 404).as_deref(), Some("[404]"));
        assert_eq!(page_title(None, 200), None);
    }
}
