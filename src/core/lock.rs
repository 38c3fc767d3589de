// src/core/lock.rs

//! Component H: the distributed advisory lock (§4.H). A single logical
//! lock realised as a `variables` row named [`LOCK_VARIABLE_NAME`], whose
//! value encodes `<hostname>::<host_uuid>::<unix_time>`. Cooperative: any
//! host can read or overwrite it, so mutual exclusion rests entirely on
//! every caller honouring `request`/`release` and the reap-age lease.

use crate::core::connector::local_hostname;
use crate::core::context::{AnvilContext, LockToken};
use crate::core::errors::{AnvilError, Result};
use crate::core::model::LOCK_VARIABLE_NAME;
use crate::core::upsert::variable::{find_by_name, upsert_variable, UpsertVariable};
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

fn format_token(hostname: &str, host_uuid: Uuid, unix_time: i64) -> String {
    format!("{hostname}::{host_uuid}::{unix_time}")
}

/// Parses a lock token string, tolerating the empty (unlocked) value.
fn parse_token(raw: &str) -> Option<LockToken> {
    let mut parts = raw.splitn(3, "::");
    let hostname = parts.next()?.to_string();
    let host_uuid = Uuid::parse_str(parts.next()?).ok()?;
    let acquired_at: i64 = parts.next()?.parse().ok()?;
    Some(LockToken {
        hostname,
        host_uuid,
        acquired_at,
    })
}

fn is_expired(token: &LockToken, reap_age: u64) -> bool {
    now_unix() - token.acquired_at > reap_age as i64
}

/// Writes the heartbeat file (§6 "Heartbeat file"): a tiny file whose body
/// is a decimal unix timestamp, giving out-of-process observers a cheap
/// liveness probe without touching the database.
fn touch_heartbeat(path: &str, unix_time: i64) -> Result<()> {
    std::fs::write(path, unix_time.to_string())?;
    Ok(())
}

/// Reads the heartbeat file's timestamp, if present and well-formed.
pub fn read_heartbeat(path: &str) -> Option<i64> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// **check**: returns the current lock string, empty if none is set
/// (§4.H "check").
pub async fn check(pool: &PgPool) -> Result<String> {
    let current = find_by_name(pool, LOCK_VARIABLE_NAME, None).await?;
    Ok(current.map(|v| v.variable_value).unwrap_or_default())
}

async fn write_token(ctx: &AnvilContext, pool: &PgPool, token: &LockToken) -> Result<()> {
    let value = format_token(&token.hostname, token.host_uuid, token.acquired_at);
    upsert_variable(
        ctx,
        pool,
        UpsertVariable {
            variable_uuid: None,
            name: LOCK_VARIABLE_NAME,
            value: &value,
            default: "",
            description: "distributed advisory lock token",
            section: "locking",
            source_uuid: None,
            source_table: None,
        },
    )
    .await?;
    ctx.set_held_lock(token.clone());
    touch_heartbeat(&ctx.config.heartbeat_file, token.acquired_at)?;
    Ok(())
}

/// **request**: loops until the lock is ours. If the current value is
/// empty, or held by anyone but stale past `reap_age`, we write our own
/// identity and timestamp and return. If it's held by someone else and
/// still fresh, sleep 5s and retry (§4.H "request").
pub async fn request(ctx: &AnvilContext, pool: &PgPool) -> Result<()> {
    let reap_age = ctx.config.database.locking_reap_age;
    let hostname = local_hostname();

    loop {
        let raw = check(pool).await?;
        let parsed = if raw.is_empty() { None } else { parse_token(&raw) };

        let take_it = match &parsed {
            None => true,
            Some(token) => is_expired(token, reap_age),
        };

        if take_it {
            let token = LockToken {
                hostname: hostname.clone(),
                host_uuid: ctx.local_host_uuid,
                acquired_at: now_unix(),
            };
            write_token(ctx, pool, &token).await?;
            info!(hostname = %token.hostname, "advisory lock acquired");
            return Ok(());
        }

        debug!("advisory lock held by another host, waiting");
        tokio::time::sleep(Duration::from_secs(5)).await;
    }
}

/// **renew**: overwrites the value with a fresh timestamp under our own
/// identity. Idempotent (§4.H "renew").
pub async fn renew(ctx: &AnvilContext, pool: &PgPool) -> Result<()> {
    let token = LockToken {
        hostname: local_hostname(),
        host_uuid: ctx.local_host_uuid,
        acquired_at: now_unix(),
    };
    write_token(ctx, pool, &token).await
}

/// **release**: blanks out the value if currently set (§4.H "release").
pub async fn release(ctx: &AnvilContext, pool: &PgPool) -> Result<()> {
    upsert_variable(
        ctx,
        pool,
        UpsertVariable {
            variable_uuid: None,
            name: LOCK_VARIABLE_NAME,
            value: "",
            default: "",
            description: "distributed advisory lock token",
            section: "locking",
            source_uuid: None,
            source_table: None,
        },
    )
    .await?;
    ctx.clear_held_lock();
    Ok(())
}

/// **auto-renew**: called by the Executor before every call (§4.C "Lock
/// age check"). If we believe we hold the lock and its age exceeds half
/// `reap_age`, renew it and re-stamp the heartbeat file. A no-op if we
/// don't currently hold a lock.
pub async fn maybe_auto_renew(ctx: &AnvilContext) -> Result<()> {
    let Some(token) = ctx.held_lock() else {
        return Ok(());
    };
    let reap_age = ctx.config.database.locking_reap_age;
    let age = now_unix() - token.acquired_at;
    if age <= (reap_age / 2) as i64 {
        return Ok(());
    }
    let Some(reader_uuid) = ctx.reader() else {
        return Err(AnvilError::NoLivePeers);
    };
    let pool = ctx.peer(reader_uuid).ok_or(AnvilError::NoLivePeers)?.pool;
    renew(ctx, &pool).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_through_format_and_parse() {
        let uuid = Uuid::new_v4();
        let raw = format_token("node1", uuid, 1_700_000_000);
        let parsed = parse_token(&raw).unwrap();
        assert_eq!(parsed.hostname, "node1");
        assert_eq!(parsed.host_uuid, uuid);
        assert_eq!(parsed.acquired_at, 1_700_000_000);
    }

    #[test]
    fn expiry_boundary_matches_reap_age() {
        let token = LockToken {
            hostname: "node1".to_string(),
            host_uuid: Uuid::new_v4(),
            acquired_at: now_unix() - 301,
        };
        assert!(is_expired(&token, 300));
        let fresh = LockToken {
            acquired_at: now_unix() - 299,
            ..token
        };
        assert!(!is_expired(&fresh, 300));
    }

    #[test]
    fn parse_rejects_malformed_token() {
        assert!(parse_token("not-a-token").is_none());
        assert!(parse_token("node1::not-a-uuid::1700000000").is_none());
    }
}
