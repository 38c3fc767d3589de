// src/core/connector.rs

//! Component A: opens, verifies, and tears down the peer connection pool
//! (§4.A). Grounded on the teacher's replica-connect flow in
//! `warden/client.rs` generalised from a single RESP connection to a pool
//! of `sqlx::PgPool` handles, one per configured peer.

use crate::config::PeerConfig;
use crate::core::bootstrap;
use crate::core::context::{AnvilContext, PeerHandle};
use crate::core::drift;
use crate::core::errors::{AnvilError, ConnectErrorKind};
use crate::core::lock;
use crate::core::model::{AlertLevel, VERSION_VARIABLE_NAME};
use crate::core::resync;
use crate::core::upsert::alert::{self, UpsertAlert};
use crate::core::upsert::host::mark_active;
use crate::core::upsert::variable::{find_by_name, upsert_variable, UpsertVariable};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::net::ToSocketAddrs;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// The fixed `(set_by, title_key)` pair every connectivity alert is
/// registered and cleared under (§4.A step 4, §7 kind 2).
const ALERT_SET_BY: &str = "anvil-connector";
const ALERT_TITLE_KEY: &str = "connector_peer_unreachable";

/// The version this build advertises; compared against each peer's
/// advertised version during connect (§4.A step 3).
pub const ANVIL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Opens a live pool against every configured peer, runs bootstrap/lock/
/// drift/resync post-connect sequencing, and returns the number of peers
/// that ended up connected. Returning zero is the Connector's only failure
/// mode (§4.A "Errors").
pub async fn connect_all(ctx: &AnvilContext) -> usize {
    let deduped = dedupe_by_target(&ctx.config.peers);

    for (uuid, peer) in &deduped {
        if let Err(e) = connect_one(ctx, *uuid, peer).await {
            warn!(peer = %uuid, error = %e, "peer connect failed");
        }
    }

    select_reader(ctx);

    if ctx.peer_count() == 0 {
        return 0;
    }

    if ctx.local_host_uuid.is_nil() {
        warn!("local host identity is not a valid uuid, tearing down pool");
        for uuid in ctx.peers().into_keys() {
            ctx.remove_peer(uuid);
        }
        return 0;
    }

    let Some(reader_uuid) = ctx.reader() else {
        return 0;
    };
    let Some(reader) = ctx.peer(reader_uuid) else {
        return 0;
    };

    if ctx.pending_lock_request() {
        if let Err(e) = lock::request(ctx, &reader.pool).await {
            warn!(error = %e, "advisory lock request failed");
        }
    }

    if let Err(e) = mark_active(ctx, &reader.pool, &local_hostname(), "node").await {
        warn!(error = %e, "failed to mark local host active");
    }

    drift::run(ctx).await;
    resync::run(ctx).await;

    ctx.peer_count()
}

/// Deduplicates configured peers by `host:port`, logging and skipping
/// repeats (§4.A step 1).
fn dedupe_by_target(peers: &HashMap<Uuid, PeerConfig>) -> Vec<(Uuid, PeerConfig)> {
    let mut seen = Vec::new();
    let mut out = Vec::new();
    for (uuid, peer) in peers {
        let target = format!("{}:{}", peer.host, peer.port);
        if seen.contains(&target) {
            warn!(peer = %uuid, target = %target, "duplicate peer target, skipping");
            continue;
        }
        seen.push(target);
        out.push((*uuid, peer.clone()));
    }
    out
}

/// Probes reachability with a network-level ping before attempting a TCP
/// connection (§4.A step 2). A failed probe excludes the peer without a
/// connection attempt ever being made.
async fn probe_reachable(peer: &PeerConfig) -> bool {
    if peer.ping_timeout_s == 0 {
        return true;
    }
    let target = format!("{}:{}", peer.host, peer.port);
    let addr = match target.to_socket_addrs() {
        Ok(mut addrs) => match addrs.next() {
            Some(addr) => addr,
            None => return false,
        },
        Err(_) => return false,
    };
    timeout(Duration::from_secs(peer.ping_timeout_s), TcpStream::connect(addr))
        .await
        .is_ok_and(|r| r.is_ok())
}

/// Connects a single peer. `pub(crate)` so the Executor's handle-liveness
/// recovery path (§4.C) can reuse it for a one-shot reconnect attempt.
pub(crate) async fn connect_one(
    ctx: &AnvilContext,
    uuid: Uuid,
    peer: &PeerConfig,
) -> Result<(), AnvilError> {
    if !probe_reachable(peer).await {
        warn!(peer = %uuid, "ping probe failed, excluding peer");
        return Err(AnvilError::Connect {
            peer: uuid,
            kind: ConnectErrorKind::RouteUnreachable,
        });
    }

    let url = format!(
        "postgres://{}:{}@{}:{}/{}",
        peer.user,
        peer.password.as_deref().unwrap_or(""),
        peer.host,
        peer.port,
        peer.name,
    );

    let pool = match PgPoolOptions::new().max_connections(5).connect(&url).await {
        Ok(pool) => pool,
        Err(e) => {
            let kind = ConnectErrorKind::classify(&e.to_string());
            raise_connect_alert(ctx, uuid, kind).await;
            return Err(AnvilError::Connect { peer: uuid, kind });
        }
    };

    if let Err(e) = bootstrap::ensure_bootstrapped(&pool, uuid, &peer.user).await {
        raise_connect_alert(ctx, uuid, ConnectErrorKind::Generic).await;
        return Err(e);
    }

    if let Err(kind) = check_peer_version(&pool).await {
        warn!(peer = %uuid, local_version = ANVIL_VERSION, "peer advertises a mismatched Anvil version, excluding");
        raise_connect_alert(ctx, uuid, kind).await;
        return Err(AnvilError::Connect { peer: uuid, kind });
    }
    record_own_version(ctx, &pool).await;

    info!(peer = %uuid, host = %peer.host, "peer connected");
    clear_connect_alert(&pool, uuid).await;
    ctx.insert_peer(PeerHandle { uuid, pool });
    Ok(())
}

/// Compares the peer's advertised `anvil_version` variable (if any) against
/// [`ANVIL_VERSION`] (§4.A step 3). A peer that has never recorded one yet
/// (fresh install) is taken as matching.
async fn check_peer_version(pool: &PgPool) -> Result<(), ConnectErrorKind> {
    let existing = find_by_name(pool, VERSION_VARIABLE_NAME, None)
        .await
        .ok()
        .flatten();
    match existing {
        Some(variable) if variable.variable_value != ANVIL_VERSION => {
            Err(ConnectErrorKind::VersionMismatch)
        }
        _ => Ok(()),
    }
}

/// Records this build's version on the peer so a later connect (from this
/// host or another) can detect drift. A no-op until the local host row
/// exists (`upsert_variable`'s host-existence gate), which is fine: the
/// version gets recorded on the next connect after `mark_active` runs.
async fn record_own_version(ctx: &AnvilContext, pool: &PgPool) {
    let _ = upsert_variable(
        ctx,
        pool,
        UpsertVariable {
            variable_uuid: None,
            name: VERSION_VARIABLE_NAME,
            value: ANVIL_VERSION,
            default: "",
            description: "Anvil build version last advertised by a connecting host",
            section: "connector",
            source_uuid: None,
            source_table: None,
        },
    )
    .await;
}

/// Registers a connectivity alert for `uuid` exactly once (§4.A step 4, §7
/// kind 2), writing to any already-live peer since the failed peer itself
/// has no reachable pool to write into.
async fn raise_connect_alert(ctx: &AnvilContext, uuid: Uuid, kind: ConnectErrorKind) {
    let Some(pool) = alert_pool(ctx) else {
        return;
    };
    match alert::already_raised(&pool, ALERT_SET_BY, uuid, ALERT_TITLE_KEY).await {
        Ok(true) => {}
        Ok(false) => {
            let vars = kind.to_string();
            if let Err(e) = alert::upsert_alert(
                ctx,
                &pool,
                UpsertAlert {
                    alert_uuid: None,
                    host_uuid: uuid,
                    set_by: ALERT_SET_BY,
                    level: AlertLevel::Warning,
                    title_key: ALERT_TITLE_KEY,
                    title_vars: "",
                    message_key: "connector_peer_unreachable_message",
                    message_vars: &vars,
                    sort: 0,
                    header_flag: true,
                },
            )
            .await
            {
                warn!(peer = %uuid, error = %e, "failed to raise connectivity alert");
            }
        }
        Err(e) => warn!(peer = %uuid, error = %e, "failed to check existing connectivity alert"),
    }
}

/// Clears a previously raised connectivity alert on a successful (re)connect
/// (§7 kind 2, "a later successful reconnect clears it"), using the peer's
/// own freshly-opened pool.
async fn clear_connect_alert(pool: &PgPool, uuid: Uuid) {
    if let Err(e) = alert::clear(pool, ALERT_SET_BY, uuid, ALERT_TITLE_KEY).await {
        warn!(peer = %uuid, error = %e, "failed to clear connectivity alert");
    }
}

/// Any already-connected peer's pool, used to persist an alert about a peer
/// that itself failed to connect. `None` if this is the very first peer and
/// nothing is live yet to write to.
fn alert_pool(ctx: &AnvilContext) -> Option<PgPool> {
    ctx.reader()
        .and_then(|uuid| ctx.peer(uuid))
        .or_else(|| ctx.peers().values().next().cloned())
        .map(|handle| handle.pool)
}

/// Selects the designated reader: prefer a peer whose host is the local
/// machine, otherwise the first successfully connected peer (§4.A step 5).
fn select_reader(ctx: &AnvilContext) {
    let peers = ctx.peers();
    if peers.is_empty() {
        return;
    }

    let local_names = local_host_aliases();
    for (uuid, peer) in &ctx.config.peers {
        if peers.contains_key(uuid) && local_names.contains(&peer.host.to_lowercase()) {
            ctx.set_reader(*uuid);
            return;
        }
    }

    if let Some(uuid) = peers.keys().next() {
        ctx.set_reader(*uuid);
    }
}

/// Picks the configured peer whose `host` matches this machine (by the
/// same aliasing rule as reader selection), so a CLI binary can build its
/// `AnvilContext` without a separate `--host-uuid` flag. Returns `None`
/// if this machine isn't one of the configured peers.
pub fn resolve_local_host_uuid(config: &crate::config::Config) -> Option<Uuid> {
    let local_names = local_host_aliases();
    config
        .peers
        .iter()
        .find(|(_, peer)| local_names.contains(&peer.host.to_lowercase()))
        .map(|(uuid, _)| *uuid)
}

fn local_host_aliases() -> Vec<String> {
    let mut aliases = vec!["localhost".to_string(), "127.0.0.1".to_string()];
    let hostname = local_hostname();
    aliases.push(hostname.clone());
    if let Some(short) = hostname.split('.').next() {
        aliases.push(short.to_string());
    }
    aliases
}

/// The local machine's hostname, used both for reader selection (§4.A step
/// 5) and as the identity embedded in an advisory lock token (§4.H).
pub fn local_hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PeerConfig;

    fn peer(host: &str, port: u16) -> PeerConfig {
        PeerConfig {
            host: host.to_string(),
            port,
            name: "anvil".to_string(),
            user: "admin".to_string(),
            password: None,
            ping_timeout_s: 0,
        }
    }

    #[test]
    fn dedupe_keeps_first_and_drops_repeats() {
        let mut peers = HashMap::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        peers.insert(a, peer("10.0.0.1", 5432));
        peers.insert(b, peer("10.0.0.1", 5432));
        let deduped = dedupe_by_target(&peers);
        assert_eq!(deduped.len(), 1);
    }

    #[tokio::test]
    async fn probe_skips_network_when_timeout_is_zero() {
        assert!(probe_reachable(&peer("unreachable.invalid", 1)).await);
    }
}
