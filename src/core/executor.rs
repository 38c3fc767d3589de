// src/core/executor.rs

//! Component C (second half): the Executor (§4.C). The Quoter lives in
//! `quoter.rs`; this module is the read/write path that every other
//! component funnels queries through, plus the handle liveness test and
//! lock-age auto-renew check that run before every call.

use crate::core::connector;
use crate::core::context::{AnvilContext, PeerHandle};
use crate::core::errors::{AnvilError, Result};
use crate::core::lock;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Statements longer than this are chunked into multiple transactions
/// (§4.C "batched write", default 25 000 — overridable via
/// `sys::database::maximum_batch_size`).
pub const DEFAULT_BATCH_SIZE: usize = 25_000;

/// A fully materialised query result: one `Vec<String>` per row, `None`
/// standing in for SQL `NULL`, column order matching the query's `SELECT`
/// list. Generic enough for the Drift Detector and Resync Engine, which
/// both need to walk arbitrary, runtime-discovered column sets.
pub type RowValues = Vec<Option<String>>;

/// Runs before every Executor call (§4.C "Lock age check" + "Handle
/// liveness test"). Renews the lock if we hold one and it's past half its
/// reap age, then pings the named peer (or the reader, if none named).
async fn pre_call_checks(ctx: &AnvilContext, peer: Option<Uuid>) -> Result<()> {
    lock::maybe_auto_renew(ctx).await?;

    let target = match peer {
        Some(uuid) => uuid,
        None => match ctx.reader() {
            Some(uuid) => uuid,
            None => return Err(AnvilError::NoLivePeers),
        },
    };
    liveness_check(ctx, target).await
}

/// The non-blocking driver-level ping described in §4.C. On failure it
/// demotes the reader if necessary, drops the handle, sleeps 5s, and
/// attempts exactly one reconnect for that peer alone. If the live-peer
/// count then reaches zero, the process exits with code 1 (§4.C,
/// §7 "Catastrophic").
async fn liveness_check(ctx: &AnvilContext, peer: Uuid) -> Result<()> {
    let Some(handle) = ctx.peer(peer) else {
        return Ok(());
    };

    if sqlx::query("SELECT 1").fetch_one(&handle.pool).await.is_ok() {
        return Ok(());
    }

    warn!(peer = %peer, "handle liveness test failed, demoting and reconnecting");
    let was_reader = ctx.reader() == Some(peer);
    ctx.remove_peer(peer);
    if was_reader {
        ctx.promote_any_reader();
    }

    tokio::time::sleep(Duration::from_secs(5)).await;

    if let Some(peer_config) = ctx.config.peers.get(&peer) {
        match connector::connect_one(ctx, peer, peer_config).await {
            Ok(()) => info!(peer = %peer, "peer reconnected after liveness failure"),
            Err(e) => warn!(peer = %peer, error = %e, "reconnect attempt failed"),
        }
    }

    if ctx.peer_count() == 0 {
        error!("no live peers remain after handle-failure recovery, exiting");
        std::process::exit(1);
    }

    Ok(())
}

/// Executor — single query read (§4.C). Runs the pre-call checks, then
/// prepares and executes against the named peer (or the reader).
pub async fn query(ctx: &AnvilContext, peer: Option<Uuid>, sql: &str) -> Result<Vec<RowValues>> {
    pre_call_checks(ctx, peer).await?;

    let target = match peer {
        Some(uuid) => uuid,
        None => ctx.reader().ok_or(AnvilError::NoLivePeers)?,
    };
    let handle = ctx.peer(target).ok_or(AnvilError::NoLivePeers)?;
    rows_from(&handle, sql).await
}

async fn rows_from(handle: &PeerHandle, sql: &str) -> Result<Vec<RowValues>> {
    let rows = sqlx::query(sql).fetch_all(&handle.pool).await?;
    let mut out = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(row.len());
        for i in 0..row.len() {
            let value: Option<String> = row.try_get(i).unwrap_or(None);
            values.push(value);
        }
        out.push(values);
    }
    Ok(out)
}

/// One or many SQL statements destined for one or many peers.
pub enum Batch<'a> {
    Single(&'a str),
    Many(Vec<String>),
}

/// Executor — batched write (§4.C). If `peer` is `None`, the batch runs
/// against every connected peer in handle order; lists longer than
/// `batch_size` are chunked, each chunk in its own transaction.
pub async fn execute_batch(
    ctx: &AnvilContext,
    peer: Option<Uuid>,
    batch: Batch<'_>,
    batch_size: usize,
) -> Result<()> {
    pre_call_checks(ctx, peer).await?;

    let statements: Vec<String> = match batch {
        Batch::Single(sql) => vec![sql.to_string()],
        Batch::Many(list) => list,
    };
    if statements.is_empty() {
        return Ok(());
    }

    let targets: Vec<PeerHandle> = match peer {
        Some(uuid) => ctx.peer(uuid).into_iter().collect(),
        None => {
            let mut peers: Vec<_> = ctx.peers().into_values().collect();
            peers.sort_by_key(|p| p.uuid);
            peers
        }
    };

    for handle in &targets {
        for chunk in statements.chunks(batch_size.max(1)) {
            let mut tx = handle.pool.begin().await?;
            for stmt in chunk {
                sqlx::query(stmt).execute(&mut *tx).await?;
            }
            tx.commit().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_count(len: usize, batch_size: usize) -> usize {
        len.div_ceil(batch_size)
    }

    #[test]
    fn chunk_boundary() {
        assert_eq!(chunk_count(DEFAULT_BATCH_SIZE, DEFAULT_BATCH_SIZE), 1);
        assert_eq!(chunk_count(DEFAULT_BATCH_SIZE + 1, DEFAULT_BATCH_SIZE), 2);
    }

    #[test]
    fn single_statement_is_one_chunk() {
        let statements = vec!["INSERT INTO t VALUES (1)".to_string()];
        let chunks: Vec<_> = statements.chunks(DEFAULT_BATCH_SIZE).collect();
        assert_eq!(chunks.len(), 1);
    }
}
