use anyhow::Result;
use sqlx::PgExecutor;

use darkmap_core::{DirScanRecord, PortScanRecord, ScanJob, ScanProfile, ScanSeed};

/// The two per-domain job queues share a shape; only the table differs.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ScanQueueKind {
    Port,
    Dir,
}

impl ScanQueueKind {
    fn table(self) -> &'static str {
        match self {
            ScanQueueKind::Port => "scan_queue",
            ScanQueueKind::Dir => "dir_scan_queue",
        }
    }
}

/// Seed domains for scanning. A repeat sighting can only raise priority
/// (lower number) while the job is still pending.
pub(crate) async fn seed<'e>(
    exec: impl PgExecutor<'e>,
    kind: ScanQueueKind,
    seeds: &[ScanSeed],
) -> Result<u64> {
    if seeds.is_empty() {
        return Ok(0);
    }

    let mut domains: Vec<String> = Vec::with_capacity(seeds.len());
    let mut priorities: Vec<i32> = Vec::with_capacity(seeds.len());
    for seed in seeds {
        domains.push(seed.domain.clone());
        priorities.push(seed.priority);
    }

    let sql = format!(
        r#"INSERT INTO {table} (domain, priority)
           SELECT * FROM UNNEST($1::varchar[], $2::int[])
           ON CONFLICT (domain) DO UPDATE SET
               priority = LEAST({table}.priority, EXCLUDED.priority)
           WHERE {table}.status = 'pending'"#,
        table = kind.table()
    );

    let result = sqlx::query(&sql)
        .bind(&domains)
        .bind(&priorities)
        .execute(exec)
        .await?;
    Ok(result.rows_affected())
}

/// Claim the next pending job, if any. Same SKIP LOCKED discipline as the
/// crawl queue, one job at a time.
pub(crate) async fn next_job<'e>(
    exec: impl PgExecutor<'e>,
    kind: ScanQueueKind,
    worker_id: &str,
) -> Result<Option<ScanJob>> {
    let sql = format!(
        r#"WITH next AS (
               SELECT id FROM {table}
               WHERE status = 'pending'
               ORDER BY priority ASC, inserted_at ASC
               LIMIT 1
               FOR UPDATE SKIP LOCKED
           )
           UPDATE {table} q
           SET status = 'processing', worker_id = $1,
               attempts = q.attempts + 1, updated_at = NOW()
           FROM next
           WHERE q.id = next.id
           RETURNING q.id, q.domain, q.profile, q.priority, q.attempts"#,
        table = kind.table()
    );

    let row: Option<(i64, String, String, i32, i32)> = sqlx::query_as(&sql)
        .bind(worker_id)
        .fetch_optional(exec)
        .await?;

    Ok(row.map(|(id, domain, profile, priority, attempts)| ScanJob {
        id,
        domain,
        profile: ScanProfile::parse(&profile).unwrap_or(ScanProfile::Standard),
        priority,
        attempts,
    }))
}

pub(crate) async fn finish_job<'e>(
    exec: impl PgExecutor<'e>,
    kind: ScanQueueKind,
    job_id: i64,
    status: &str,
    error: Option<&str>,
) -> Result<()> {
    let sql = format!(
        "UPDATE {table} SET status = $2, last_error = $3, updated_at = NOW() WHERE id = $1",
        table = kind.table()
    );
    sqlx::query(&sql)
        .bind(job_id)
        .bind(status)
        .bind(error)
        .execute(exec)
        .await?;
    Ok(())
}

pub(crate) async fn return_job<'e>(
    exec: impl PgExecutor<'e>,
    kind: ScanQueueKind,
    job_id: i64,
) -> Result<()> {
    let sql = format!(
        r#"UPDATE {table}
           SET status = 'pending', worker_id = NULL, updated_at = NOW()
           WHERE id = $1 AND status = 'processing'"#,
        table = kind.table()
    );
    sqlx::query(&sql).bind(job_id).execute(exec).await?;
    Ok(())
}

/// One row per probed port, plus a detected_services row for each banner the
/// signature matcher recognized.
pub(crate) async fn insert_port_scan_results<'e>(
    exec: impl PgExecutor<'e> + Copy,
    records: &[PortScanRecord],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let mut domains: Vec<String> = Vec::with_capacity(records.len());
    let mut ports: Vec<i32> = Vec::with_capacity(records.len());
    let mut states: Vec<String> = Vec::with_capacity(records.len());
    let mut banners: Vec<String> = Vec::with_capacity(records.len());
    for r in records {
        domains.push(r.domain.clone());
        ports.push(i32::from(r.port));
        states.push(r.state.as_str().to_string());
        banners.push(r.banner.clone().unwrap_or_default());
    }

    sqlx::query(
        r#"INSERT INTO port_scans (domain, port, state, banner)
           SELECT t.dom, t.port, t.state, NULLIF(t.banner, '')
           FROM UNNEST($1::varchar[], $2::int[], $3::varchar[], $4::text[])
                AS t(dom, port, state, banner)"#,
    )
    .bind(&domains)
    .bind(&ports)
    .bind(&states)
    .bind(&banners)
    .execute(exec)
    .await?;

    let matched: Vec<&PortScanRecord> = records.iter().filter(|r| r.service.is_some()).collect();
    if matched.is_empty() {
        return Ok(());
    }

    let mut domains: Vec<String> = Vec::with_capacity(matched.len());
    let mut ports: Vec<i32> = Vec::with_capacity(matched.len());
    let mut services: Vec<String> = Vec::with_capacity(matched.len());
    let mut versions: Vec<String> = Vec::with_capacity(matched.len());
    let mut confidences: Vec<f32> = Vec::with_capacity(matched.len());
    for r in &matched {
        let m = r.service.as_ref().unwrap();
        domains.push(r.domain.clone());
        ports.push(i32::from(r.port));
        services.push(m.service.clone());
        versions.push(m.version.clone().unwrap_or_default());
        confidences.push(m.confidence);
    }

    sqlx::query(
        r#"INSERT INTO detected_services (domain, port, service, version, confidence)
           SELECT t.dom, t.port, t.svc, NULLIF(t.ver, ''), t.conf
           FROM UNNEST($1::varchar[], $2::int[], $3::varchar[], $4::varchar[], $5::real[])
                AS t(dom, port, svc, ver, conf)"#,
    )
    .bind(&domains)
    .bind(&ports)
    .bind(&services)
    .bind(&versions)
    .bind(&confidences)
    .execute(exec)
    .await?;

    Ok(())
}

/// One row per probed path, persisted in a single pass after the scan.
pub(crate) async fn insert_dir_scan_results<'e>(
    exec: impl PgExecutor<'e>,
    records: &[DirScanRecord],
) -> Result<()> {
    if records.is_empty() {
        return Ok(());
    }

    let n = records.len();
    let mut domains: Vec<String> = Vec::with_capacity(n);
    let mut paths: Vec<String> = Vec::with_capacity(n);
    let mut statuses: Vec<i32> = Vec::with_capacity(n);
    let mut lengths: Vec<i64> = Vec::with_capacity(n);
    let mut ctypes: Vec<String> = Vec::with_capacity(n);
    let mut times: Vec<i64> = Vec::with_capacity(n);
    let mut servers: Vec<String> = Vec::with_capacity(n);
    let mut redirects: Vec<String> = Vec::with_capacity(n);
    let mut snippets: Vec<String> = Vec::with_capacity(n);
    let mut interesting: Vec<bool> = Vec::with_capacity(n);
    let mut reasons: Vec<String> = Vec::with_capacity(n);
    let mut categories: Vec<String> = Vec::with_capacity(n);
    for r in records {
        domains.push(r.domain.clone());
        paths.push(r.path.clone());
        statuses.push(r.status_code.map(i32::from).unwrap_or(0));
        lengths.push(r.content_length.unwrap_or(-1));
        ctypes.push(r.content_type.clone().unwrap_or_default());
        times.push(r.response_time_ms);
        servers.push(r.server_header.clone().unwrap_or_default());
        redirects.push(r.redirect_url.clone().unwrap_or_default());
        snippets.push(r.body_snippet.clone().unwrap_or_default());
        interesting.push(r.is_interesting);
        reasons.push(r.interest_reason.clone().unwrap_or_default());
        categories.push(r.interest_category.clone().unwrap_or_default());
    }

    sqlx::query(
        r#"INSERT INTO dir_scan_results
               (domain, path, status_code, content_length, content_type, response_time_ms,
                server_header, redirect_url, body_snippet, is_interesting, interest_reason,
                interest_category)
           SELECT t.dom, t.path, NULLIF(t.code, 0), NULLIF(t.len, -1), NULLIF(t.ctype, ''),
                  t.ms, NULLIF(t.server, ''), NULLIF(t.redir, ''), NULLIF(t.snippet, ''),
                  t.hot, NULLIF(t.reason, ''), NULLIF(t.cat, '')
           FROM UNNEST($1::varchar[], $2::text[], $3::int[], $4::bigint[], $5::varchar[],
                       $6::bigint[], $7::text[], $8::text[], $9::text[], $10::bool[],
                       $11::text[], $12::varchar[])
                AS t(dom, path, code, len, ctype, ms, server, redir, snippet, hot, reason, cat)"#,
    )
    .bind(&domains)
    .bind(&paths)
    .bind(&statuses)
    .bind(&lengths)
    .bind(&ctypes)
    .bind(&times)
    .bind(&servers)
    .bind(&redirects)
    .bind(&snippets)
    .bind(&interesting)
    .bind(&reasons)
    .bind(&categories)
    .execute(exec)
    .await?;

    Ok(())
}
