use anyhow::Result;
use sqlx::PgExecutor;
use url::Url;

use darkmap_core::{extract_onion_domain, QueueItem};

/// Bulk enqueue. Non-onion URLs are dropped here so the queue only ever holds
/// crawlable work. Duplicate URLs are ignored.
pub(crate) async fn add_to_crawl_queue<'e>(
    exec: impl PgExecutor<'e>,
    urls: &[String],
    priority: i32,
) -> Result<u64> {
    let mut accepted: Vec<String> = Vec::with_capacity(urls.len());
    let mut domains: Vec<String> = Vec::with_capacity(urls.len());
    for url_str in urls {
        let Ok(url) = Url::parse(url_str) else {
            continue;
        };
        let Some(domain) = extract_onion_domain(&url) else {
            continue;
        };
        accepted.push(url_str.clone());
        domains.push(domain);
    }
    if accepted.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"INSERT INTO crawl_queue (url, domain, priority)
           SELECT t.url, t.dom, $3
           FROM UNNEST($1::text[], $2::varchar[]) AS t(url, dom)
           ON CONFLICT (url) DO NOTHING"#,
    )
    .bind(&accepted)
    .bind(&domains)
    .bind(priority)
    .execute(exec)
    .await?;

    Ok(result.rows_affected())
}

/// Claim up to `n` pending rows in strict (priority asc, inserted_at asc)
/// order. FOR UPDATE SKIP LOCKED means racing callers never receive the same
/// row; claimed rows are `processing` before this returns.
pub(crate) async fn get_next_urls<'e>(
    exec: impl PgExecutor<'e>,
    worker_id: &str,
    n: i64,
) -> Result<Vec<QueueItem>> {
    let rows: Vec<(i64, String, String, i32, i32)> = sqlx::query_as(
        r#"WITH next AS (
               SELECT id FROM crawl_queue
               WHERE status = 'pending'
               ORDER BY priority ASC, inserted_at ASC
               LIMIT $2
               FOR UPDATE SKIP LOCKED
           ),
           claimed AS (
               UPDATE crawl_queue q
               SET status = 'processing', worker_id = $1,
                   attempts = q.attempts + 1, updated_at = NOW()
               FROM next
               WHERE q.id = next.id
               RETURNING q.id, q.url, q.domain, q.priority, q.attempts, q.inserted_at
           )
           SELECT id, url, domain, priority, attempts FROM claimed
           ORDER BY priority ASC, inserted_at ASC"#,
    )
    .bind(worker_id)
    .bind(n)
    .fetch_all(exec)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, url, domain, priority, attempts)| QueueItem {
            id,
            url,
            domain,
            priority,
            attempts,
        })
        .collect())
}

pub(crate) async fn mark_url_completed<'e>(
    exec: impl PgExecutor<'e>,
    url: &str,
    success: bool,
    error: Option<&str>,
) -> Result<()> {
    let status = if success { "completed" } else { "failed" };
    sqlx::query(
        r#"UPDATE crawl_queue SET status = $2, error = $3, updated_at = NOW() WHERE url = $1"#,
    )
    .bind(url)
    .bind(status)
    .bind(error)
    .execute(exec)
    .await?;
    Ok(())
}

pub(crate) async fn return_url_to_pending<'e>(exec: impl PgExecutor<'e>, url: &str) -> Result<()> {
    sqlx::query(
        r#"UPDATE crawl_queue
           SET status = 'pending', worker_id = NULL, updated_at = NOW()
           WHERE url = $1 AND status = 'processing'"#,
    )
    .bind(url)
    .execute(exec)
    .await?;
    Ok(())
}

/// Fail every outstanding row for the domain in one statement, including
/// already-claimed siblings sitting in prefetch buffers.
pub(crate) async fn mark_domain_connection_failed<'e>(
    exec: impl PgExecutor<'e>,
    domain: &str,
    error: &str,
) -> Result<u64> {
    let result = sqlx::query(
        r#"UPDATE crawl_queue
           SET status = 'failed', error = $2, updated_at = NOW()
           WHERE domain = $1 AND status IN ('pending', 'processing')"#,
    )
    .bind(domain)
    .bind(error)
    .execute(exec)
    .await?;
    Ok(result.rows_affected())
}
