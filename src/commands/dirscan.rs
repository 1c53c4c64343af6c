use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use url::Url;

use darkmap_core::config::DirScanConfig;
use darkmap_core::{is_connection_failure, AppConfig, DirScanRecord, ScanJob, Subsystem};
use darkmap_proxy::{FetchOptions, FetchResponse, ProxyClient};
use darkmap_scanner::{
    classify, paths_for_profile, random_missing_path, Baseline, ProbeObservation,
    MAX_SNIPPET_BYTES,
};
use darkmap_storage::Storage;

/// Consecutive transport failures that end a scan early.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Probes between lock-lease extensions.
const LOCK_EXTEND_EVERY: usize = 20;

pub async fn run(config: AppConfig) -> Result<()> {
    let pool_size = ((config.dirscan.workers as u32) + 2).max(config.database.max_connections);
    let storage = Storage::with_pool_size(&config.database.url, pool_size).await?;
    storage.run_migrations().await?;

    let proxy = Arc::new(ProxyClient::new(
        &config.proxy.socks_addr(),
        Duration::from_secs(config.proxy.connect_timeout_secs),
        config.proxy.retries,
    )?);

    let storage = Arc::new(storage);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    info!(workers = config.dirscan.workers, "spawning dir-scan workers");
    let mut handles = Vec::new();
    for i in 0..config.dirscan.workers {
        let worker_id = format!("dirscan-{}", i);
        let storage = Arc::clone(&storage);
        let proxy = Arc::clone(&proxy);
        let cfg = config.dirscan.clone();
        let shutdown = shutdown_tx.subscribe();
        handles.push(tokio::spawn(worker_loop(worker_id, storage, proxy, cfg, shutdown)));
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
    proxy: Arc<ProxyClient>,
    cfg: DirScanConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(worker = %worker_id, "dir-scan worker started");
    loop {
        if shutdown.try_recv().is_ok() {
            break;
        }

        let job = match storage.next_dir_scan_job(&worker_id).await {
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

        if let Err(e) = scan_domain(&storage, &proxy, &cfg, &worker_id, &job).await {
            error!(worker = %worker_id, domain = %job.domain, error = %e, "dir scan failed");
            let _ = storage.fail_dir_scan_job(job.id, &e.to_string()).await;
            let _ = storage
                .release_domain_lock(Subsystem::DirScan, &job.domain, &worker_id)
                .await;
        }
    }
    info!(worker = %worker_id, "worker stopped");
}

async fn scan_domain(
    storage: &Arc<Storage>,
    proxy: &Arc<ProxyClient>,
    cfg: &DirScanConfig,
    worker_id: &str,
    job: &ScanJob,
) -> Result<()> {
    let lease = Duration::from_secs(cfg.lock_lease_secs);
    if !storage
        .acquire_domain_lock(Subsystem::DirScan, &job.domain, worker_id, lease)
        .await?
    {
        debug!(worker = %worker_id, domain = %job.domain, "dir-scan lock held elsewhere, returning job");
        storage.return_dir_scan_job(job.id).await?;
        return Ok(());
    }

    let result = probe_paths(storage, proxy, cfg, worker_id, job).await;

    if let Err(e) = storage
        .release_domain_lock(Subsystem::DirScan, &job.domain, worker_id)
        .await
    {
        warn!(domain = %job.domain, error = %e, "failed to release dir-scan lock");
    }
    result
}

async fn probe_paths(
    storage: &Arc<Storage>,
    proxy: &Arc<ProxyClient>,
    cfg: &DirScanConfig,
    worker_id: &str,
    job: &ScanJob,
) -> Result<()> {
    let base = Url::parse(&format!("http://{}/", job.domain))?;
    let opts = FetchOptions {
        timeout: Duration::from_secs(cfg.request_timeout_secs),
        max_content_length: MAX_SNIPPET_BYTES,
    };
    let path_delay = Duration::from_millis(cfg.path_delay_ms);

    // Capture the not-found baseline from a path that cannot exist. An HTTP
    // error is a perfectly good baseline; only transport failure ends the job.
    let missing = random_missing_path();
    let baseline_url = base.join(&missing)?;
    let baseline = match proxy.get(&baseline_url, &opts).await {
        Ok(resp) => {
            let content_length = content_length_of(&resp);
            Baseline::new(resp.status, content_length, resp.body)
        }
        Err(e) => {
            let msg = e.to_string();
            if is_connection_failure(&msg) {
                warn!(worker = %worker_id, domain = %job.domain, "baseline unreachable: {}", msg);
                storage.fail_dir_scan_job(job.id, "Domain unreachable").await?;
            } else {
                storage.fail_dir_scan_job(job.id, &msg).await?;
            }
            return Ok(());
        }
    };
    debug!(
        domain = %job.domain,
        status = baseline.status_code,
        length = baseline.content_length,
        "baseline captured"
    );

    let paths = paths_for_profile(job.profile);
    info!(
        worker = %worker_id,
        domain = %job.domain,
        profile = job.profile.as_str(),
        paths = paths.len(),
        "dir scan started"
    );

    let mut consecutive_failures = 0u32;
    let mut records: Vec<DirScanRecord> = Vec::with_capacity(paths.len());
    for (i, probe) in paths.iter().enumerate() {
        if i > 0 && i % LOCK_EXTEND_EVERY == 0 {
            storage
                .extend_domain_lock(Subsystem::DirScan, &job.domain, worker_id, lease_of(cfg))
                .await?;
        }

        let probe_url = base.join(probe.path)?;
        match proxy.head(&probe_url, &opts).await {
            Err(e) => {
                let msg = e.to_string();
                if is_connection_failure(&msg) {
                    consecutive_failures += 1;
                    debug!(domain = %job.domain, path = probe.path, consecutive_failures, "probe unreachable");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        warn!(worker = %worker_id, domain = %job.domain, "domain went unreachable mid-scan");
                        storage.insert_dir_scan_results(&records).await?;
                        storage.fail_dir_scan_job(job.id, "Domain unreachable").await?;
                        return Ok(());
                    }
                } else {
                    debug!(domain = %job.domain, path = probe.path, "probe failed: {}", msg);
                }
            }
            Ok(head) => {
                consecutive_failures = 0;

                // a 200 HEAD earns a GET so the classifier has bytes to compare
                let body = if head.status == 200 {
                    match proxy.get(&probe_url, &opts).await {
                        Ok(get) => Some(get.body),
                        Err(_) => None,
                    }
                } else {
                    None
                };

                let content_length = head
                    .headers
                    .get("content-length")
                    .and_then(|v| v.parse::<i64>().ok())
                    .or_else(|| body.as_ref().map(|b| b.len() as i64));
                let redirect_url = if head.final_url != probe_url {
                    Some(head.final_url.to_string())
                } else {
                    None
                };

                let obs = ProbeObservation {
                    probe: *probe,
                    status_code: head.status,
                    content_length,
                    content_type: head.content_type().map(str::to_string),
                    response_time_ms: head.response_time_ms as i64,
                    server_header: head.headers.get("server").cloned(),
                    redirect_url,
                    body,
                };
                records.push(classify(&job.domain, &obs, &baseline));
            }
        }

        tokio::time::sleep(path_delay).await;
    }

    let interesting = records.iter().filter(|r| r.is_interesting).count();
    storage.insert_dir_scan_results(&records).await?;
    storage.complete_dir_scan_job(job.id).await?;
    info!(
        worker = %worker_id,
        domain = %job.domain,
        probed = records.len(),
        interesting,
        "dir scan complete"
    );
    Ok(())
}

fn lease_of(cfg: &DirScanConfig) -> Duration {
    Duration::from_secs(cfg.lock_lease_secs)
}

fn content_length_of(resp: &FetchResponse) -> i64 {
    resp.headers
        .get("content-length")
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(resp.body.len() as i64)
}
