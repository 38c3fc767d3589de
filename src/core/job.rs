// src/core/job.rs

//! Component I: the Job Engine (§4.I). Jobs are inserted by any process,
//! claimed by exactly one worker via a `WHERE job_picked_up_by = 0`
//! compare-and-swap, progressed through the fast-path update described in
//! §4.D, and read back for display.

use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use crate::core::model::Job;
use crate::core::upsert::local_host_exists;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct NewJob<'a> {
    pub host_uuid: Uuid,
    pub command: &'a str,
    pub data: &'a str,
    pub name: &'a str,
    pub title: &'a str,
    pub description: &'a str,
}

/// Inserts a new job in the Pending state (progress 0, picked_up_by 0).
/// Returns `None` under the Upserter's pre-insert host-existence check if
/// the owning host isn't in `hosts` yet (§4.D step 3).
pub async fn insert_job(ctx: &AnvilContext, pool: &PgPool, input: NewJob<'_>) -> Result<Option<Uuid>> {
    if input.command.trim().is_empty() {
        return Err(AnvilError::Job("job_command is required".to_string()));
    }
    if !local_host_exists(pool, ctx.local_host_uuid).await? {
        return Ok(None);
    }

    let now = ctx.refresh().await?;
    let job_uuid = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO jobs
            (job_uuid, job_host_uuid, job_command, job_data, job_picked_up_by,
             job_picked_up_at, job_updated, job_name, job_progress, job_title,
             job_description, job_status, modified_date)
         VALUES ($1, $2, $3, $4, 0, 0, $5, $6, 0, $7, $8, '', $9)",
    )
    .bind(job_uuid)
    .bind(input.host_uuid)
    .bind(input.command)
    .bind(input.data)
    .bind(now_unix())
    .bind(input.name)
    .bind(input.title)
    .bind(input.description)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(Some(job_uuid))
}

/// Candidate pending jobs for this host, oldest first, per §4.I's claim
/// query (`job_host_uuid = local AND job_progress < 100 AND
/// job_picked_up_by = 0`).
async fn pending_candidates(pool: &PgPool, host_uuid: Uuid) -> Result<Vec<Uuid>> {
    let rows: Vec<(Uuid,)> = sqlx::query_as(
        "SELECT job_uuid FROM jobs
         WHERE job_host_uuid = $1 AND job_progress < 100 AND job_picked_up_by = 0
         ORDER BY modified_date ASC",
    )
    .bind(host_uuid)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(u,)| u).collect())
}

/// Claims the next pending job for this host. Walks candidates oldest
/// first; each attempt issues an `UPDATE ... WHERE job_picked_up_by = 0`
/// and treats zero affected rows as "lost the race, try another job"
/// (§4.I "Claim protocol", §7 "Race").
pub async fn claim_next(ctx: &AnvilContext, pool: &PgPool, host_uuid: Uuid, pid: i64) -> Result<Option<Job>> {
    let candidates = pending_candidates(pool, host_uuid).await?;
    let now = ctx.refresh().await?;
    let picked_up_at = now_unix();

    for job_uuid in candidates {
        let result = sqlx::query(
            "UPDATE jobs SET job_picked_up_by = $1, job_picked_up_at = $2, job_progress = 1,
                    job_status = 'starting', job_updated = $3, modified_date = $4
             WHERE job_uuid = $5 AND job_picked_up_by = 0",
        )
        .bind(pid)
        .bind(picked_up_at)
        .bind(picked_up_at)
        .bind(now)
        .bind(job_uuid)
        .execute(pool)
        .await?;

        if result.rows_affected() == 1 {
            let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_uuid = $1")
                .bind(job_uuid)
                .fetch_one(pool)
                .await?;
            return Ok(Some(job));
        }
        // Lost the race on this one; another worker picked it up first.
        // Fall through and try the next candidate.
    }
    Ok(None)
}

/// The subset of columns the job-progress fast-path is allowed to touch
/// (§4.D "Job progress fast-path"). Every field is optional; only fields
/// that are `Some` AND differ from the stored value are written.
#[derive(Default)]
pub struct ProgressUpdate<'a> {
    pub progress: Option<i32>,
    pub status: Option<&'a str>,
    pub picked_up_by: Option<i64>,
    pub picked_up_at: Option<i64>,
    pub data: Option<&'a str>,
}

/// Applies a fast-path progress update: builds a `SET` clause containing
/// only the non-empty fields that differ from the stored row, per §4.D.
pub async fn update_progress(
    ctx: &AnvilContext,
    pool: &PgPool,
    job_uuid: Uuid,
    update: ProgressUpdate<'_>,
) -> Result<()> {
    let Some(current) = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_uuid = $1")
        .bind(job_uuid)
        .fetch_optional(pool)
        .await?
    else {
        return Err(AnvilError::RowNotFound {
            table: "jobs".to_string(),
            uuid: job_uuid,
        });
    };

    let mut builder = QueryBuilder::<Postgres>::new("UPDATE jobs SET ");
    let mut first = true;

    macro_rules! push_field {
        ($cond:expr, $col:literal, $value:expr) => {
            if $cond {
                if !first {
                    builder.push(", ");
                }
                builder.push(concat!($col, " = "));
                builder.push_bind($value);
                first = false;
            }
        };
    }

    push_field!(
        update.progress.is_some_and(|p| p != current.job_progress),
        "job_progress",
        update.progress.unwrap()
    );
    push_field!(
        update.status.is_some_and(|s| !s.is_empty() && s != current.job_status),
        "job_status",
        update.status.unwrap().to_string()
    );
    push_field!(
        update.picked_up_by.is_some_and(|p| p != current.job_picked_up_by),
        "job_picked_up_by",
        update.picked_up_by.unwrap()
    );
    push_field!(
        update.picked_up_at.is_some_and(|p| p != current.job_picked_up_at),
        "job_picked_up_at",
        update.picked_up_at.unwrap()
    );
    push_field!(
        update.data.is_some_and(|d| !d.is_empty() && d != current.job_data),
        "job_data",
        update.data.unwrap().to_string()
    );

    if first {
        // Nothing differs; the Upserter never issues a no-op UPDATE
        // (§3 invariant 3).
        return Ok(());
    }

    let now = ctx.refresh().await?;
    builder.push(", job_updated = ");
    builder.push_bind(now_unix());
    builder.push(", modified_date = ");
    builder.push_bind(now);
    builder.push(" WHERE job_uuid = ");
    builder.push_bind(job_uuid);

    builder.build().execute(pool).await?;
    Ok(())
}

pub async fn get(pool: &PgPool, job_uuid: Uuid) -> Result<Option<Job>> {
    let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE job_uuid = $1")
        .bind(job_uuid)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

pub async fn list_for_host(pool: &PgPool, host_uuid: Uuid) -> Result<Vec<Job>> {
    let jobs = sqlx::query_as::<_, Job>(
        "SELECT * FROM jobs WHERE job_host_uuid = $1 ORDER BY modified_date DESC",
    )
    .bind(host_uuid)
    .fetch_all(pool)
    .await?;
    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_update_skips_empty_status() {
        // Empty status strings never count as "differ", matching the
        // fast-path's "non-empty and differ" rule.
        let update = ProgressUpdate {
            status: Some(""),
            ..Default::default()
        };
        assert!(update.status.is_some_and(|s| s.is_empty()));
    }

    #[test]
    fn candidates_empty_when_no_rows() {
        // Pure shape check: an empty candidate list means claim_next
        // returns None without issuing any UPDATE.
        let candidates: Vec<Uuid> = Vec::new();
        assert!(candidates.is_empty());
    }
}
