// src/core/cli.rs

//! Shared bootstrap for the `anvil-*` binaries (§6 "CLI surface"): logging
//! setup and `AnvilContext` construction, so each `src/bin/*.rs` stays a
//! thin wrapper around the library.

use crate::config::Config;
use crate::core::collaborator::ProcessCollaborator;
use crate::core::connector::{self, resolve_local_host_uuid};
use crate::core::context::AnvilContext;
use crate::core::errors::{AnvilError, Result};
use std::sync::Arc;
use tracing_subscriber::{filter::EnvFilter, prelude::*, reload};

/// The four exit codes every `anvil-*` binary shares (§6): 0 success, 1
/// catastrophic (no live peers), 2 configuration error, 3 operation
/// failure. Tool-specific codes start at 4.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const NO_LIVE_PEERS: i32 = 1;
    pub const CONFIG: i32 = 2;
    pub const FAILED: i32 = 3;
}

/// Installs a reloadable `EnvFilter` layer, mirroring the teacher's
/// `tracing_subscriber::registry()` + `reload::Layer` setup in `main.rs`
/// so the log level can be changed at runtime.
pub fn init_tracing(default_level: &str) {
    let initial = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let (filter, _reload_handle) = reload::Layer::new(EnvFilter::new(initial));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .try_init();
}

/// Loads config from `path`, resolves which configured peer is this
/// machine, and returns a bare `AnvilContext` with no peers connected
/// yet. Each binary calls `connector::connect_all` itself so it can
/// decide how to react to a zero-peer result.
pub fn bare_context(path: &str) -> Result<AnvilContext> {
    let config = Config::from_file(path)?;
    let local_host_uuid = resolve_local_host_uuid(&config).ok_or_else(|| {
        AnvilError::Config("this host is not one of the configured database::<uuid>::* peers".to_string())
    })?;
    Ok(AnvilContext::new(config, local_host_uuid, Arc::new(ProcessCollaborator)))
}

/// Builds a context and connects every configured peer (§4.A), exiting
/// the process with [`exit_code::NO_LIVE_PEERS`] if none come up —
/// the Connector's only failure mode (§4.A "Errors").
pub async fn connected_context(path: &str) -> Result<AnvilContext> {
    connected_context_inner(path, false).await
}

/// Like [`connected_context`], but flags the Connector to also acquire the
/// advisory lock as part of this run (§4.A step 6). Used by tools that need
/// exclusive cluster access — withdraw/migrate and the OS-update variant —
/// before they touch anything.
pub async fn connected_context_with_lock(path: &str) -> Result<AnvilContext> {
    connected_context_inner(path, true).await
}

async fn connected_context_inner(path: &str, request_lock: bool) -> Result<AnvilContext> {
    let ctx = bare_context(path)?;
    if request_lock {
        ctx.set_pending_lock_request(true);
    }
    let connected = connector::connect_all(&ctx).await;
    if connected == 0 {
        eprintln!("no live peers, exiting");
        std::process::exit(exit_code::NO_LIVE_PEERS);
    }
    Ok(ctx)
}

/// The reader pool handle, or [`exit_code::NO_LIVE_PEERS`] if the reader
/// vanished since connect (handle liveness failure with no surviving peer).
pub fn reader_pool(ctx: &AnvilContext) -> sqlx::PgPool {
    let Some(reader_uuid) = ctx.reader() else {
        eprintln!("no live peers, exiting");
        std::process::exit(exit_code::NO_LIVE_PEERS);
    };
    let Some(handle) = ctx.peer(reader_uuid) else {
        eprintln!("no live peers, exiting");
        std::process::exit(exit_code::NO_LIVE_PEERS);
    };
    handle.pool
}
