use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio::signal;
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, error, info, warn};

use darkmap_core::config::PortScanConfig;
use darkmap_core::{AppConfig, PortScanRecord, PortState, ScanJob, Subsystem};
use darkmap_scanner::{banner_snippet, match_banner, ports_for_profile, probe_port, PortProbeOutcome};
use darkmap_storage::Storage;

pub async fn run(config: AppConfig) -> Result<()> {
    let pool_size = ((config.portscan.workers as u32) + 2).max(config.database.max_connections);
    let storage = Storage::with_pool_size(&config.database.url, pool_size).await?;
    storage.run_migrations().await?;

    let storage = Arc::new(storage);
    let proxy_addr = config.proxy.socks_addr();
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    info!(workers = config.portscan.workers, proxy = %proxy_addr, "spawning port-scan workers");
    let mut handles = Vec::new();
    for i in 0..config.portscan.workers {
        let worker_id = format!("portscan-{}", i);
        let storage = Arc::clone(&storage);
        let cfg = config.portscan.clone();
        let proxy_addr = proxy_addr.clone();
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(worker_loop(worker_id, storage, cfg, proxy_addr, shutdown)));
    }

    info!("press Ctrl+C to stop scanning");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    for handle in handles {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn worker_loop(
    worker_id: String,
    storage: Arc<Storage>,
    cfg: PortScanConfig,
    proxy_addr: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(worker = %worker_id, "port-scan worker started");
    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        let job = match storage.next_port_scan_job(&worker_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(5)) => continue,
                    _ = shutdown.recv() => break,
                }
            }
            Err(e) => {
                error!(worker = %worker_id, error = %e, "queue poll failed");
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(10)) => continue,
                    _ = shutdown.recv() => break,
                }
            }
        };

        if let Err(e) = scan_domain(&storage, &cfg, &proxy_addr, &worker_id, &job).await {
            error!(worker = %worker_id, domain = %job.domain, error = %e, "port scan failed");
            let _ = storage.fail_port_scan_job(job.id, &e.to_string()).await;
            let _ = storage
                .release_domain_lock(Subsystem::PortScan, &job.domain, &worker_id)
                .await;
        }
    }
    info!(worker = %worker_id, "worker stopped");
}

async fn scan_domain(
    storage: &Arc<Storage>,
    cfg: &PortScanConfig,
    proxy_addr: &str,
    worker_id: &str,
    job: &ScanJob,
) -> Result<()> {
    let lease = Duration::from_secs(cfg.lock_lease_secs);
    if !storage
        .acquire_domain_lock(Subsystem::PortScan, &job.domain, worker_id, lease)
        .await?
    {
        debug!(worker = %worker_id, domain = %job.domain, "scan lock held elsewhere, returning job");
        storage.return_port_scan_job(job.id).await?;
        return Ok(());
    }

    let result = scan_ports(storage, cfg, proxy_addr, worker_id, job).await;

    if let Err(e) = storage
        .release_domain_lock(Subsystem::PortScan, &job.domain, worker_id)
        .await
    {
        warn!(domain = %job.domain, error = %e, "failed to release scan lock");
    }
    result
}

async fn scan_ports(
    storage: &Arc<Storage>,
    cfg: &PortScanConfig,
    proxy_addr: &str,
    worker_id: &str,
    job: &ScanJob,
) -> Result<()> {
    let ports = ports_for_profile(job.profile);
    info!(
        worker = %worker_id,
        domain = %job.domain,
        profile = job.profile.as_str(),
        ports = ports.len(),
        "port scan started"
    );

    let connect_timeout = Duration::from_secs(cfg.connect_timeout_secs);
    let banner_timeout = Duration::from_secs(cfg.banner_timeout_secs);
    let probe_delay = Duration::from_millis(cfg.probe_delay_ms);
    let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent.max(1)));
    let retries = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(ports.len());
    for (i, port) in ports.iter().copied().enumerate() {
        if i > 0 {
            tokio::time::sleep(probe_delay).await;
        }
        if i > 0 && i % 20 == 0 {
            storage
                .extend_domain_lock(Subsystem::PortScan, &job.domain, worker_id, Duration::from_secs(cfg.lock_lease_secs))
                .await?;
        }

        let permit = semaphore.clone().acquire_owned().await?;
        let domain = job.domain.clone();
        let proxy_addr = proxy_addr.to_string();
        let retries = Arc::clone(&retries);
        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let outcome = probe_port(&proxy_addr, &domain, port, connect_timeout, banner_timeout).await;
            let (state, banner, service) = match outcome {
                PortProbeOutcome::Open { banner } => {
                    let service = match_banner(&banner);
                    (PortState::Open, banner_snippet(&banner), service)
                }
                PortProbeOutcome::Closed => (PortState::Closed, None, None),
                PortProbeOutcome::Filtered => (PortState::Filtered, None, None),
                PortProbeOutcome::TimedOut => (PortState::Timeout, None, None),
                PortProbeOutcome::Retry(msg) => {
                    debug!(domain = %domain, port, "probe retryable, skipping: {}", msg);
                    retries.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            };
            Some(PortScanRecord {
                domain,
                port,
                state,
                banner,
                service,
                scanned_at: Utc::now(),
            })
        }));
    }

    let mut records: Vec<PortScanRecord> = Vec::with_capacity(handles.len());
    for handle in handles {
        if let Ok(Some(record)) = handle.await {
            records.push(record);
        }
    }

    let skipped = retries.load(Ordering::Relaxed);
    if records.is_empty() && skipped > 0 {
        warn!(domain = %job.domain, skipped, "proxy failed every probe");
        storage.fail_port_scan_job(job.id, "proxy failed all probes").await?;
        return Ok(());
    }

    storage.insert_port_scan_results(&records).await?;
    storage.complete_port_scan_job(job.id).await?;

    let open = records.iter().filter(|r| r.state == PortState::Open).count();
    let fingerprinted = records.iter().filter(|r| r.service.is_some()).count();
    info!(
        worker = %worker_id,
        domain = %job.domain,
        probed = records.len(),
        open,
        fingerprinted,
        skipped,
        "port scan complete"
    );
    Ok(())
}
