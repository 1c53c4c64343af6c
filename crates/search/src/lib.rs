pub mod query;

pub use query::{parse_query, serialize_query, SearchQuery};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub page_id: i64,
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub last_crawled: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub domains: i64,
    pub pages: i64,
    pub links: i64,
    pub queue_pending: i64,
    pub queue_completed: i64,
    pub queue_failed: i64,
    pub port_scan_jobs_pending: i64,
    pub dir_scan_jobs_pending: i64,
    pub open_ports: i64,
    pub detected_services: i64,
    pub interesting_findings: i64,
}

#[derive(Debug, Serialize)]
pub struct DomainInfo {
    pub address: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_crawled: Option<DateTime<Utc>>,
    pub crawl_count: i32,
    pub crawl_status: String,
}

#[derive(Debug, Serialize)]
pub struct PageSummary {
    pub url: String,
    pub title: Option<String>,
    pub status_code: Option<i32>,
    pub last_crawled: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OpenPort {
    pub port: i32,
    pub banner: Option<String>,
    pub service: Option<String>,
    pub version: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Finding {
    pub path: String,
    pub status_code: Option<i32>,
    pub interest_reason: Option<String>,
    pub interest_category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LinkEdge {
    pub source_url: String,
    pub target_url: String,
    pub anchor_text: Option<String>,
}

pub struct SearchEngine {
    pool: PgPool,
}

impl SearchEngine {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Combined search: every non-null query field must match (AND). Text runs
    /// over title, content and meta description; header/value over stored
    /// headers; port over open-port scan rows.
    pub async fn search(
        &self,
        query: &SearchQuery,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SearchResult>> {
        let rows: Vec<(i64, String, String, Option<String>, Option<String>, DateTime<Utc>)> =
            sqlx::query_as(
                r#"SELECT p.id, p.url, d.address, p.title, LEFT(p.content_text, 200), p.last_crawled
                   FROM pages p
                   JOIN domains d ON d.id = p.domain_id
                   WHERE ($1::text IS NULL
                          OR p.title ILIKE '%' || $1 || '%'
                          OR p.content_text ILIKE '%' || $1 || '%'
                          OR p.meta_description ILIKE '%' || $1 || '%')
                     AND ($2::text IS NULL OR p.title ILIKE '%' || $2 || '%')
                     AND ($3::text IS NULL OR EXISTS (
                          SELECT 1 FROM headers h
                          WHERE h.page_id = p.id AND LOWER(h.name) = $3
                            AND ($4::text IS NULL OR h.value ILIKE '%' || $4 || '%')))
                     AND ($5::int IS NULL OR EXISTS (
                          SELECT 1 FROM port_scans ps
                          WHERE ps.domain = d.address AND ps.port = $5 AND ps.state = 'open'))
                   ORDER BY p.last_crawled DESC
                   LIMIT $6 OFFSET $7"#,
            )
            .bind(query.text.as_deref())
            .bind(query.title.as_deref())
            .bind(query.header.as_deref())
            .bind(query.header_value.as_deref())
            .bind(query.port.map(i32::from))
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| SearchResult {
                page_id: r.0,
                url: r.1,
                domain: r.2,
                title: r.3,
                snippet: r.4,
                last_crawled: r.5,
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<StatsSnapshot> {
        let row: (i64, i64, i64, i64, i64, i64, i64, i64, i64, i64, i64) = sqlx::query_as(
            r#"SELECT
                   (SELECT COUNT(*) FROM domains),
                   (SELECT COUNT(*) FROM pages),
                   (SELECT COUNT(*) FROM links),
                   (SELECT COUNT(*) FROM crawl_queue WHERE status = 'pending'),
                   (SELECT COUNT(*) FROM crawl_queue WHERE status = 'completed'),
                   (SELECT COUNT(*) FROM crawl_queue WHERE status = 'failed'),
                   (SELECT COUNT(*) FROM scan_queue WHERE status = 'pending'),
                   (SELECT COUNT(*) FROM dir_scan_queue WHERE status = 'pending'),
                   (SELECT COUNT(*) FROM port_scans WHERE state = 'open'),
                   (SELECT COUNT(*) FROM detected_services),
                   (SELECT COUNT(*) FROM dir_scan_results WHERE is_interesting)"#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StatsSnapshot {
            domains: row.0,
            pages: row.1,
            links: row.2,
            queue_pending: row.3,
            queue_completed: row.4,
            queue_failed: row.5,
            port_scan_jobs_pending: row.6,
            dir_scan_jobs_pending: row.7,
            open_ports: row.8,
            detected_services: row.9,
            interesting_findings: row.10,
        })
    }

    pub async fn get_domain(&self, address: &str) -> Result<Option<DomainInfo>> {
        let row: Option<(
            String,
            Option<String>,
            Option<String>,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            i32,
            String,
        )> = sqlx::query_as(
            r#"SELECT address, title, description, first_seen, last_crawled, crawl_count, crawl_status
               FROM domains WHERE address = $1"#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DomainInfo {
            address: r.0,
            title: r.1,
            description: r.2,
            first_seen: r.3,
            last_crawled: r.4,
            crawl_count: r.5,
            crawl_status: r.6,
        }))
    }

    pub async fn pages_for_domain(&self, address: &str, limit: i64) -> Result<Vec<PageSummary>> {
        let rows: Vec<(String, Option<String>, Option<i32>, DateTime<Utc>)> = sqlx::query_as(
            r#"SELECT p.url, p.title, p.status_code, p.last_crawled
               FROM pages p JOIN domains d ON d.id = p.domain_id
               WHERE d.address = $1
               ORDER BY p.last_crawled DESC
               LIMIT $2"#,
        )
        .bind(address)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PageSummary {
                url: r.0,
                title: r.1,
                status_code: r.2,
                last_crawled: r.3,
            })
            .collect())
    }

    pub async fn open_ports_for_domain(&self, address: &str) -> Result<Vec<OpenPort>> {
        let rows: Vec<(i32, Option<String>, Option<String>, Option<String>)> = sqlx::query_as(
            r#"SELECT DISTINCT ON (ps.port) ps.port, ps.banner, ds.service, ds.version
               FROM port_scans ps
               LEFT JOIN detected_services ds ON ds.domain = ps.domain AND ds.port = ps.port
               WHERE ps.domain = $1 AND ps.state = 'open'
               ORDER BY ps.port, ps.scanned_at DESC"#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| OpenPort {
                port: r.0,
                banner: r.1,
                service: r.2,
                version: r.3,
            })
            .collect())
    }

    pub async fn findings_for_domain(&self, address: &str) -> Result<Vec<Finding>> {
        let rows: Vec<(String, Option<i32>, Option<String>, Option<String>)> = sqlx::query_as(
            r#"SELECT path, status_code, interest_reason, interest_category
               FROM dir_scan_results
               WHERE domain = $1 AND is_interesting
               ORDER BY scanned_at DESC"#,
        )
        .bind(address)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Finding {
                path: r.0,
                status_code: r.1,
                interest_reason: r.2,
                interest_category: r.3,
            })
            .collect())
    }

    /// Links pointing at this domain from elsewhere.
    pub async fn incoming_links(
        &self,
        address: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LinkEdge>> {
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            r#"SELECT p.url, l.target_url, l.anchor_text
               FROM links l
               JOIN pages p ON p.id = l.source_page_id
               JOIN domains d ON d.id = p.domain_id
               WHERE l.target_domain = $1 AND d.address <> $1
               ORDER BY l.id DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(address)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LinkEdge {
                source_url: r.0,
                target_url: r.1,
                anchor_text: r.2,
            })
            .collect())
    }

    /// Links found on this domain's pages.
    pub async fn outgoing_links(
        &self,
        address: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LinkEdge>> {
        let rows: Vec<(String, String, Option<String>)> = sqlx::query_as(
            r#"SELECT p.url, l.target_url, l.anchor_text
               FROM links l
               JOIN pages p ON p.id = l.source_page_id
               JOIN domains d ON d.id = p.domain_id
               WHERE d.address = $1
               ORDER BY l.id DESC
               LIMIT $2 OFFSET $3"#,
        )
        .bind(address)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LinkEdge {
                source_url: r.0,
                target_url: r.1,
                anchor_text: r.2,
            })
            .collect())
    }
}
