// src/core/bootstrap.rs

//! Component B: Schema Bootstrap (§4.B). Checks for the sentinel `hosts`
//! table on a freshly connected peer and, if missing, executes the bundled
//! schema script inside a single transaction.

use crate::core::errors::{AnvilError, Result};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

/// The table whose presence proves a peer has already been initialised.
pub const SENTINEL_TABLE: &str = "hosts";

/// The canonical schema script, with `#!variable!user!#` placeholders
/// substituted at execution time (§4.B, §6).
const SCHEMA_SCRIPT: &str = include_str!("../../schema.sql");

/// Checks the sentinel table; if absent, runs the bootstrap script, then
/// re-checks. A peer that still lacks the sentinel after bootstrap is
/// reported as a schema-bootstrap failure so the caller can exclude it
/// from the pool (§4.B, §7 "Schema" error kind).
pub async fn ensure_bootstrapped(pool: &PgPool, peer: Uuid, user: &str) -> Result<()> {
    if sentinel_exists(pool).await? {
        return Ok(());
    }

    info!(peer = %peer, "sentinel table missing, running schema bootstrap");
    let script = SCHEMA_SCRIPT.replace("#!variable!user!#", user);

    let mut tx = pool.begin().await?;
    sqlx::raw_sql(&script).execute(&mut *tx).await?;
    tx.commit().await?;

    if sentinel_exists(pool).await? {
        Ok(())
    } else {
        warn!(peer = %peer, "sentinel table still missing after bootstrap");
        Err(AnvilError::SchemaBootstrapFailed { peer })
    }
}

async fn sentinel_exists(pool: &PgPool) -> Result<bool> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS (
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = 'public' AND table_name = $1
        )",
    )
    .bind(SENTINEL_TABLE)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_user_placeholder() {
        let script = "GRANT ALL ON SCHEMA public TO #!variable!user!#;";
        let substituted = script.replace("#!variable!user!#", "admin");
        assert_eq!(substituted, "GRANT ALL ON SCHEMA public TO admin;");
    }
}
