use std::collections::HashMap;

use anyhow::Result;
use sqlx::PgExecutor;

use darkmap_core::{CrawlLogEntry, CrawlStatus, ExtractedLink, PageData};

#[derive(Debug, Clone)]
pub struct DomainRef {
    pub id: i64,
    pub address: String,
    pub crawl_count: i32,
}

/// Insert-or-update by address. crawl_count only moves when a title is
/// supplied; sightings without content don't count as crawls.
pub(crate) async fn upsert_domain<'e>(
    exec: impl PgExecutor<'e>,
    address: &str,
    title: Option<&str>,
    description: Option<&str>,
) -> Result<DomainRef> {
    let row: (i64, String, i32) = sqlx::query_as(
        r#"INSERT INTO domains (address, title, description, crawl_count, last_crawled)
           VALUES ($1, $2, $3,
                   CASE WHEN $2::text IS NULL THEN 0 ELSE 1 END,
                   CASE WHEN $2::text IS NULL THEN NULL ELSE NOW() END)
           ON CONFLICT (address) DO UPDATE SET
               title = COALESCE(EXCLUDED.title, domains.title),
               description = COALESCE(EXCLUDED.description, domains.description),
               crawl_count = domains.crawl_count
                   + CASE WHEN EXCLUDED.title IS NULL THEN 0 ELSE 1 END,
               last_crawled = CASE WHEN EXCLUDED.title IS NULL
                   THEN domains.last_crawled ELSE NOW() END
           RETURNING id, address, crawl_count"#,
    )
    .bind(address)
    .bind(title)
    .bind(description)
    .fetch_one(exec)
    .await?;

    Ok(DomainRef {
        id: row.0,
        address: row.1,
        crawl_count: row.2,
    })
}

/// Record first sightings without touching crawl counters.
pub(crate) async fn ensure_domains<'e>(
    exec: impl PgExecutor<'e>,
    addresses: &[String],
) -> Result<()> {
    if addresses.is_empty() {
        return Ok(());
    }
    sqlx::query(
        r#"INSERT INTO domains (address)
           SELECT * FROM UNNEST($1::varchar[])
           ON CONFLICT (address) DO NOTHING"#,
    )
    .bind(addresses)
    .execute(exec)
    .await?;
    Ok(())
}

pub(crate) async fn update_domain_status<'e>(
    exec: impl PgExecutor<'e>,
    domain: &str,
    status: CrawlStatus,
    worker_id: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"UPDATE domains SET
               crawl_status = $2,
               crawl_started_at = CASE WHEN $2 = 'crawling' THEN NOW() ELSE crawl_started_at END,
               last_worker_id = COALESCE($3, last_worker_id)
           WHERE address = $1"#,
    )
    .bind(domain)
    .bind(status.as_str())
    .bind(worker_id)
    .execute(exec)
    .await?;
    Ok(())
}

/// Insert-or-update by url: last-writer-wins on scalars, crawl_count strictly
/// increments.
pub(crate) async fn upsert_page<'e>(
    exec: impl PgExecutor<'e>,
    domain_id: i64,
    page: &PageData,
) -> Result<i64> {
    let row: (i64,) = sqlx::query_as(
        r#"INSERT INTO pages (domain_id, url, path, title, content_text, content_html,
                              status_code, content_length, content_type, language,
                              meta_description, h1, is_accessible, last_crawled)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
           ON CONFLICT (url) DO UPDATE SET
               title = EXCLUDED.title,
               content_text = EXCLUDED.content_text,
               content_html = EXCLUDED.content_html,
               status_code = EXCLUDED.status_code,
               content_length = EXCLUDED.content_length,
               content_type = EXCLUDED.content_type,
               language = EXCLUDED.language,
               meta_description = EXCLUDED.meta_description,
               h1 = EXCLUDED.h1,
               is_accessible = EXCLUDED.is_accessible,
               crawl_count = pages.crawl_count + 1,
               last_crawled = NOW()
           RETURNING id"#,
    )
    .bind(domain_id)
    .bind(&page.url)
    .bind(&page.path)
    .bind(&page.title)
    .bind(&page.content_text)
    .bind(&page.content_html)
    .bind(page.status_code as i32)
    .bind(page.content_length)
    .bind(&page.content_type)
    .bind(&page.language)
    .bind(&page.meta_description)
    .bind(&page.h1)
    .bind(page.accessible)
    .fetch_one(exec)
    .await?;

    Ok(row.0)
}

/// Bulk insert, idempotent by (page, position). Re-crawls overwrite in place.
pub(crate) async fn insert_links<'e>(
    exec: impl PgExecutor<'e>,
    page_id: i64,
    links: &[ExtractedLink],
) -> Result<()> {
    if links.is_empty() {
        return Ok(());
    }

    let mut urls: Vec<String> = Vec::with_capacity(links.len());
    let mut domains: Vec<String> = Vec::with_capacity(links.len());
    let mut anchors: Vec<String> = Vec::with_capacity(links.len());
    let mut types: Vec<String> = Vec::with_capacity(links.len());
    let mut sources: Vec<String> = Vec::with_capacity(links.len());
    let mut positions: Vec<i32> = Vec::with_capacity(links.len());
    for link in links {
        urls.push(link.url.clone());
        domains.push(link.target_domain.clone().unwrap_or_default());
        anchors.push(link.anchor_text.clone().unwrap_or_default());
        types.push(link.link_type.as_str().to_string());
        sources.push(link.source.as_str().to_string());
        positions.push(link.position);
    }

    sqlx::query(
        r#"INSERT INTO links (source_page_id, target_url, target_domain, anchor_text,
                              link_type, source_of_link, position)
           SELECT $1, t.url, NULLIF(t.dom, ''), NULLIF(t.anchor, ''), t.ltype, t.src, t.pos
           FROM UNNEST($2::text[], $3::varchar[], $4::text[], $5::varchar[], $6::varchar[], $7::int[])
                AS t(url, dom, anchor, ltype, src, pos)
           ON CONFLICT (source_page_id, position) DO UPDATE SET
               target_url = EXCLUDED.target_url,
               target_domain = EXCLUDED.target_domain,
               anchor_text = EXCLUDED.anchor_text,
               link_type = EXCLUDED.link_type,
               source_of_link = EXCLUDED.source_of_link"#,
    )
    .bind(page_id)
    .bind(&urls)
    .bind(&domains)
    .bind(&anchors)
    .bind(&types)
    .bind(&sources)
    .bind(&positions)
    .execute(exec)
    .await?;

    Ok(())
}

/// Bulk insert, idempotent by (page, name).
pub(crate) async fn insert_headers<'e>(
    exec: impl PgExecutor<'e>,
    page_id: i64,
    headers: &HashMap<String, String>,
) -> Result<()> {
    if headers.is_empty() {
        return Ok(());
    }

    let mut names: Vec<String> = Vec::with_capacity(headers.len());
    let mut values: Vec<String> = Vec::with_capacity(headers.len());
    for (name, value) in headers {
        names.push(name.clone());
        values.push(value.clone());
    }

    sqlx::query(
        r#"INSERT INTO headers (page_id, name, value)
           SELECT $1, * FROM UNNEST($2::varchar[], $3::text[])
           ON CONFLICT (page_id, name) DO UPDATE SET value = EXCLUDED.value"#,
    )
    .bind(page_id)
    .bind(&names)
    .bind(&values)
    .execute(exec)
    .await?;

    Ok(())
}

/// Append-only crawl attempt records, one multi-values insert per flush.
pub(crate) async fn flush_crawl_logs<'e>(
    exec: impl PgExecutor<'e>,
    entries: &[CrawlLogEntry],
) -> Result<()> {
    if entries.is_empty() {
        return Ok(());
    }

    let mut urls: Vec<String> = Vec::with_capacity(entries.len());
    let mut domains: Vec<String> = Vec::with_capacity(entries.len());
    let mut successes: Vec<bool> = Vec::with_capacity(entries.len());
    let mut statuses: Vec<i32> = Vec::with_capacity(entries.len());
    let mut errors: Vec<String> = Vec::with_capacity(entries.len());
    let mut durations: Vec<i64> = Vec::with_capacity(entries.len());
    let mut workers: Vec<String> = Vec::with_capacity(entries.len());
    for e in entries {
        urls.push(e.url.clone());
        domains.push(e.domain.clone());
        successes.push(e.success);
        statuses.push(e.status_code.map(i32::from).unwrap_or(0));
        errors.push(e.error.clone().unwrap_or_default());
        durations.push(e.duration_ms);
        workers.push(e.worker_id.clone());
    }

    sqlx::query(
        r#"INSERT INTO crawl_logs (url, domain, success, status_code, error, duration_ms, worker_id)
           SELECT t.url, t.dom, t.ok, NULLIF(t.code, 0), NULLIF(t.err, ''), t.dur, t.worker
           FROM UNNEST($1::text[], $2::varchar[], $3::bool[], $4::int[], $5::text[], $6::bigint[], $7::varchar[])
                AS t(url, dom, ok, code, err, dur, worker)"#,
    )
    .bind(&urls)
    .bind(&domains)
    .bind(&successes)
    .bind(&statuses)
    .bind(&errors)
    .bind(&durations)
    .bind(&workers)
    .execute(exec)
    .await?;

    Ok(())
}
