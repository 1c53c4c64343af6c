use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use darkmap_core::Subsystem;

fn lease_deadline(lease: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::seconds(600))
}

/// Take the (subsystem, domain) lease. Succeeds when the row is free, expired,
/// or already ours; returns false while another worker's lease is live.
pub(crate) async fn acquire<'e>(
    exec: impl PgExecutor<'e>,
    subsystem: Subsystem,
    domain: &str,
    worker_id: &str,
    lease: Duration,
) -> Result<bool> {
    let expires_at = lease_deadline(lease);

    let row: Option<(i64,)> = match subsystem {
        Subsystem::DirScan => {
            sqlx::query_as(
                r#"INSERT INTO dir_scan_locks (domain, worker_id, expires_at)
                   VALUES ($1, $2, $3)
                   ON CONFLICT (domain) DO UPDATE SET
                       worker_id = EXCLUDED.worker_id,
                       acquired_at = NOW(),
                       expires_at = EXCLUDED.expires_at
                   WHERE dir_scan_locks.expires_at < NOW()
                      OR dir_scan_locks.worker_id = EXCLUDED.worker_id
                   RETURNING id"#,
            )
            .bind(domain)
            .bind(worker_id)
            .bind(expires_at)
            .fetch_optional(exec)
            .await?
        }
        _ => {
            sqlx::query_as(
                r#"INSERT INTO domain_locks (subsystem, domain, worker_id, expires_at)
                   VALUES ($1, $2, $3, $4)
                   ON CONFLICT (subsystem, domain) DO UPDATE SET
                       worker_id = EXCLUDED.worker_id,
                       acquired_at = NOW(),
                       expires_at = EXCLUDED.expires_at
                   WHERE domain_locks.expires_at < NOW()
                      OR domain_locks.worker_id = EXCLUDED.worker_id
                   RETURNING id"#,
            )
            .bind(subsystem.as_str())
            .bind(domain)
            .bind(worker_id)
            .bind(expires_at)
            .fetch_optional(exec)
            .await?
        }
    };

    Ok(row.is_some())
}

pub(crate) async fn release<'e>(
    exec: impl PgExecutor<'e>,
    subsystem: Subsystem,
    domain: &str,
    worker_id: &str,
) -> Result<()> {
    match subsystem {
        Subsystem::DirScan => {
            sqlx::query("DELETE FROM dir_scan_locks WHERE domain = $1 AND worker_id = $2")
                .bind(domain)
                .bind(worker_id)
                .execute(exec)
                .await?;
        }
        _ => {
            sqlx::query(
                "DELETE FROM domain_locks WHERE subsystem = $1 AND domain = $2 AND worker_id = $3",
            )
            .bind(subsystem.as_str())
            .bind(domain)
            .bind(worker_id)
            .execute(exec)
            .await?;
        }
    }
    Ok(())
}

/// Push the lease out; only the owner can extend. Returns false when the lease
/// was already lost.
pub(crate) async fn extend<'e>(
    exec: impl PgExecutor<'e>,
    subsystem: Subsystem,
    domain: &str,
    worker_id: &str,
    lease: Duration,
) -> Result<bool> {
    let expires_at = lease_deadline(lease);

    let result = match subsystem {
        Subsystem::DirScan => {
            sqlx::query("UPDATE dir_scan_locks SET expires_at = $3 WHERE domain = $1 AND worker_id = $2")
                .bind(domain)
                .bind(worker_id)
                .bind(expires_at)
                .execute(exec)
                .await?
        }
        _ => {
            sqlx::query(
                r#"UPDATE domain_locks SET expires_at = $4
                   WHERE subsystem = $1 AND domain = $2 AND worker_id = $3"#,
            )
            .bind(subsystem.as_str())
            .bind(domain)
            .bind(worker_id)
            .bind(expires_at)
            .execute(exec)
            .await?
        }
    };

    Ok(result.rows_affected() > 0)
}
