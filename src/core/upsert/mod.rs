// src/core/upsert/mod.rs

//! Component D: the Upserter (§4.D) — one routine per table, each an
//! idempotent "insert-or-update" keyed on a natural key, each change also
//! producing a history row via the trigger installed in `schema.sql`.
//!
//! Shared across every entity routine: the pre-insert host-existence check
//! (§4.D step 3) and the cached refresh timestamp (`AnvilContext::refresh`,
//! §4.D step 4). Everything else — natural-key lookup, field comparison,
//! the generated `INSERT`/`UPDATE` — is written out per table, since the
//! column set is fixed per table rather than discovered at runtime (that
//! runtime discovery is the Resync Engine's job, not the Upserter's).

pub mod alert;
pub mod file;
pub mod host;
pub mod network;
pub mod oui;
pub mod session;
pub mod state;
pub mod user;
pub mod variable;

use crate::core::errors::Result;
use sqlx::PgPool;
use uuid::Uuid;

/// Pre-insert host-existence check (§4.D step 3): every table but `hosts`
/// itself carries a foreign key back to the local host, and inserting
/// before that host row exists would violate it. Every non-host Upserter
/// routine calls this first and silently returns `Ok(None)` if it fails.
pub async fn local_host_exists(pool: &PgPool, local_host_uuid: Uuid) -> Result<bool> {
    let row: (bool,) =
        sqlx::query_as("SELECT EXISTS (SELECT 1 FROM hosts WHERE host_uuid = $1)")
            .bind(local_host_uuid)
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}
