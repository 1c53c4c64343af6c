use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use darkmap_core::{
    CrawlLogEntry, CrawlStatus, DirScanRecord, ExtractedLink, PageData, PortScanRecord, QueueItem,
    ScanJob, ScanSeed, Subsystem,
};

mod locks;
mod pages;
mod queue;
mod scans;

pub use pages::DomainRef;

/// Owns every persisted row. Workers go through this facade and hold only
/// value snapshots and the lock tokens they acquired.
#[derive(Clone)]
pub struct Storage {
    pool: PgPool,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        Self::with_pool_size(database_url, 10).await
    }

    pub async fn with_pool_size(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!(max_connections, "connected to postgres");
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../migrations/001_init.sql"))
            .execute(&self.pool)
            .await?;
        info!("migrations complete");
        Ok(())
    }

    pub async fn check_connectivity(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // --- domains & pages ---

    pub async fn upsert_domain(
        &self,
        address: &str,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<DomainRef> {
        pages::upsert_domain(&self.pool, address, title, description).await
    }

    /// Create bare rows for newly sighted domains; existing rows untouched.
    pub async fn ensure_domains(&self, addresses: &[String]) -> Result<()> {
        pages::ensure_domains(&self.pool, addresses).await
    }

    pub async fn update_domain_status(
        &self,
        domain: &str,
        status: CrawlStatus,
        worker_id: Option<&str>,
    ) -> Result<()> {
        pages::update_domain_status(&self.pool, domain, status, worker_id).await
    }

    /// Persist one crawl atomically: domain, page, links, headers commit
    /// together or not at all.
    pub async fn store_crawl(
        &self,
        address: &str,
        description: Option<&str>,
        page: &PageData,
        headers: &HashMap<String, String>,
        links: &[ExtractedLink],
    ) -> Result<(i64, i64)> {
        let mut tx = self.pool.begin().await?;
        let domain = pages::upsert_domain(&mut *tx, address, page.title.as_deref(), description).await?;
        let page_id = pages::upsert_page(&mut *tx, domain.id, page).await?;
        pages::insert_links(&mut *tx, page_id, links).await?;
        pages::insert_headers(&mut *tx, page_id, headers).await?;
        tx.commit().await?;
        Ok((domain.id, page_id))
    }

    pub async fn flush_crawl_logs(&self, entries: &[CrawlLogEntry]) -> Result<()> {
        pages::flush_crawl_logs(&self.pool, entries).await
    }

    // --- crawl queue ---

    pub async fn add_to_crawl_queue(&self, urls: &[String], priority: i32) -> Result<u64> {
        queue::add_to_crawl_queue(&self.pool, urls, priority).await
    }

    /// Atomically claim up to `n` pending URLs for `worker_id`. SKIP LOCKED
    /// keeps concurrent callers on disjoint slices.
    pub async fn get_next_urls(&self, worker_id: &str, n: i64) -> Result<Vec<QueueItem>> {
        queue::get_next_urls(&self.pool, worker_id, n).await
    }

    pub async fn mark_url_completed(
        &self,
        url: &str,
        success: bool,
        error: Option<&str>,
    ) -> Result<()> {
        queue::mark_url_completed(&self.pool, url, success, error).await
    }

    /// Put a claimed URL back so another worker can pick it up (lock lost).
    pub async fn return_url_to_pending(&self, url: &str) -> Result<()> {
        queue::return_url_to_pending(&self.pool, url).await
    }

    /// Transport said the domain itself is down: fail every outstanding URL
    /// for it in one statement. Returns how many rows were failed.
    pub async fn mark_domain_connection_failed(&self, domain: &str, error: &str) -> Result<u64> {
        queue::mark_domain_connection_failed(&self.pool, domain, error).await
    }

    // --- domain locks ---

    pub async fn acquire_domain_lock(
        &self,
        subsystem: Subsystem,
        domain: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<bool> {
        locks::acquire(&self.pool, subsystem, domain, worker_id, lease).await
    }

    pub async fn release_domain_lock(
        &self,
        subsystem: Subsystem,
        domain: &str,
        worker_id: &str,
    ) -> Result<()> {
        locks::release(&self.pool, subsystem, domain, worker_id).await
    }

    pub async fn extend_domain_lock(
        &self,
        subsystem: Subsystem,
        domain: &str,
        worker_id: &str,
        lease: Duration,
    ) -> Result<bool> {
        locks::extend(&self.pool, subsystem, domain, worker_id, lease).await
    }

    // --- scan queues & results ---

    pub async fn seed_scan_queue(&self, seeds: &[ScanSeed]) -> Result<u64> {
        scans::seed(&self.pool, scans::ScanQueueKind::Port, seeds).await
    }

    pub async fn seed_dir_scan_queue(&self, seeds: &[ScanSeed]) -> Result<u64> {
        scans::seed(&self.pool, scans::ScanQueueKind::Dir, seeds).await
    }

    pub async fn next_port_scan_job(&self, worker_id: &str) -> Result<Option<ScanJob>> {
        scans::next_job(&self.pool, scans::ScanQueueKind::Port, worker_id).await
    }

    pub async fn next_dir_scan_job(&self, worker_id: &str) -> Result<Option<ScanJob>> {
        scans::next_job(&self.pool, scans::ScanQueueKind::Dir, worker_id).await
    }

    pub async fn complete_port_scan_job(&self, job_id: i64) -> Result<()> {
        scans::finish_job(&self.pool, scans::ScanQueueKind::Port, job_id, "completed", None).await
    }

    pub async fn fail_port_scan_job(&self, job_id: i64, error: &str) -> Result<()> {
        scans::finish_job(&self.pool, scans::ScanQueueKind::Port, job_id, "failed", Some(error)).await
    }

    pub async fn return_port_scan_job(&self, job_id: i64) -> Result<()> {
        scans::return_job(&self.pool, scans::ScanQueueKind::Port, job_id).await
    }

    pub async fn complete_dir_scan_job(&self, job_id: i64) -> Result<()> {
        scans::finish_job(&self.pool, scans::ScanQueueKind::Dir, job_id, "completed", None).await
    }

    pub async fn fail_dir_scan_job(&self, job_id: i64, error: &str) -> Result<()> {
        scans::finish_job(&self.pool, scans::ScanQueueKind::Dir, job_id, "failed", Some(error)).await
    }

    pub async fn return_dir_scan_job(&self, job_id: i64) -> Result<()> {
        scans::return_job(&self.pool, scans::ScanQueueKind::Dir, job_id).await
    }

    pub async fn insert_port_scan_results(&self, records: &[PortScanRecord]) -> Result<()> {
        scans::insert_port_scan_results(&self.pool, records).await
    }

    pub async fn insert_dir_scan_results(&self, records: &[DirScanRecord]) -> Result<()> {
        scans::insert_dir_scan_results(&self.pool, records).await
    }
}
