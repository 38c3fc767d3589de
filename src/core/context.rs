// src/core/context.rs

//! `AnvilContext` replaces the source toolkit's global mutable tools handle
//! with an explicit value threaded through every call (§9 re-architecture
//! note). It owns the peer pool, the config snapshot, and the cached
//! refresh timestamp the Upserter stamps new/changed rows with.

use crate::config::Config;
use crate::core::collaborator::Collaborator;
use crate::core::errors::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// The locally-held advisory lock token, cached so the Executor's auto-renew
/// check (§4.C "lock age check") doesn't need to re-read the `variables` row
/// on every call.
#[derive(Debug, Clone)]
pub struct LockToken {
    pub hostname: String,
    pub host_uuid: Uuid,
    pub acquired_at: i64,
}

/// A single connected peer: its pool handle plus the UUID it was
/// configured under.
#[derive(Clone)]
pub struct PeerHandle {
    pub uuid: Uuid,
    pub pool: PgPool,
}

/// Per-process state shared by every component. One `AnvilContext` is built
/// per executable invocation and held for the duration of that process's
/// run (§5 Scheduling).
pub struct AnvilContext {
    pub config: Config,
    pub local_host_uuid: Uuid,
    pub collaborator: Arc<dyn Collaborator>,
    peers: RwLock<HashMap<Uuid, PeerHandle>>,
    reader: RwLock<Option<Uuid>>,
    refreshed_at: RwLock<Option<DateTime<Utc>>>,
    held_lock: RwLock<Option<LockToken>>,
    resync_needed: RwLock<bool>,
    pending_lock_request: RwLock<bool>,
}

impl AnvilContext {
    pub fn new(config: Config, local_host_uuid: Uuid, collaborator: Arc<dyn Collaborator>) -> Self {
        Self {
            config,
            local_host_uuid,
            collaborator,
            peers: RwLock::new(HashMap::new()),
            reader: RwLock::new(None),
            refreshed_at: RwLock::new(None),
            held_lock: RwLock::new(None),
            resync_needed: RwLock::new(false),
            pending_lock_request: RwLock::new(false),
        }
    }

    /// Marks that this process wants the advisory lock acquired as part of
    /// its Connector run, rather than just observing peer connectivity
    /// (§4.A step 6: "request the advisory lock if one is pending"). Tools
    /// that need exclusive cluster access (withdraw, OS update) set this
    /// before calling `connector::connect_all`; read-only tools leave it
    /// unset and the Connector skips the request.
    pub fn set_pending_lock_request(&self, pending: bool) {
        *self.pending_lock_request.write() = pending;
    }

    pub fn pending_lock_request(&self) -> bool {
        *self.pending_lock_request.read()
    }

    /// Set by the Drift Detector when any peer is found lagging; cleared
    /// by the Resync Engine once it has reconciled every table (§4.E, §4.F
    /// step 7).
    pub fn resync_needed(&self) -> bool {
        *self.resync_needed.read()
    }

    pub fn set_resync_needed(&self) {
        *self.resync_needed.write() = true;
    }

    pub fn clear_resync_needed(&self) {
        *self.resync_needed.write() = false;
    }

    /// The lock token we believe we currently hold, cached so the
    /// Executor's lock-age check (§4.C) doesn't need to re-read the
    /// `variables` row before every call.
    pub fn held_lock(&self) -> Option<LockToken> {
        self.held_lock.read().clone()
    }

    pub fn set_held_lock(&self, token: LockToken) {
        *self.held_lock.write() = Some(token);
    }

    pub fn clear_held_lock(&self) {
        *self.held_lock.write() = None;
    }

    pub fn peers(&self) -> HashMap<Uuid, PeerHandle> {
        self.peers.read().clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    pub fn peer(&self, uuid: Uuid) -> Option<PeerHandle> {
        self.peers.read().get(&uuid).cloned()
    }

    pub fn insert_peer(&self, handle: PeerHandle) {
        self.peers.write().insert(handle.uuid, handle);
    }

    pub fn remove_peer(&self, uuid: Uuid) {
        self.peers.write().remove(&uuid);
        let mut reader = self.reader.write();
        if *reader == Some(uuid) {
            *reader = None;
        }
    }

    pub fn reader(&self) -> Option<Uuid> {
        *self.reader.read()
    }

    pub fn set_reader(&self, uuid: Uuid) {
        *self.reader.write() = Some(uuid);
    }

    /// Picks any other live peer to become the new reader, per the handle
    /// liveness test's failover step (§4.C).
    pub fn promote_any_reader(&self) {
        let peers = self.peers.read();
        let mut reader = self.reader.write();
        *reader = peers.keys().next().copied();
    }

    /// Returns the cached refresh timestamp, fetching and caching a fresh
    /// one from the reader peer if absent (§4.D step 4: "cached per
    /// connect/refresh call").
    pub async fn refresh(&self) -> Result<DateTime<Utc>> {
        if let Some(ts) = *self.refreshed_at.read() {
            return Ok(ts);
        }
        let reader_uuid = self.reader().ok_or(crate::core::errors::AnvilError::NoLivePeers)?;
        let pool = self.peer(reader_uuid).ok_or(crate::core::errors::AnvilError::NoLivePeers)?.pool;
        let row: (DateTime<Utc>,) = sqlx::query_as("SELECT now()::timestamptz").fetch_one(&pool).await?;
        *self.refreshed_at.write() = Some(row.0);
        Ok(row.0)
    }

    /// Invalidates the cached refresh timestamp; the next `refresh()` call
    /// re-fetches from the database.
    pub fn invalidate_refresh(&self) {
        *self.refreshed_at.write() = None;
    }
}
