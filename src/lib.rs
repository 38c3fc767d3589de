// src/lib.rs

pub mod config;
pub mod core;

/// Test-only helpers shared between the crate's own `#[cfg(test)]`
/// modules and the `tests/integration_pg.rs` integration suite, which
/// (being an external test crate) can't reach items gated behind
/// `#[cfg(test)]` in the library itself.
#[cfg(feature = "integration-pg")]
pub mod test_support {
    use crate::config::{ArchiveConfig, Config, DatabaseSysConfig};
    use crate::core::collaborator::RecordingCollaborator;
    use crate::core::context::{AnvilContext, PeerHandle};
    use sqlx::PgPool;
    use std::sync::Arc;
    use uuid::Uuid;

    /// Builds a bare `AnvilContext` around an already-open pool, for
    /// integration tests that exercise real Upserter/Job Engine calls
    /// against a live instance without going through `Config::from_file`.
    pub fn context_for(pool: &PgPool, local_host_uuid: Uuid) -> AnvilContext {
        let config = Config {
            peers: Default::default(),
            database: DatabaseSysConfig::default(),
            archive: ArchiveConfig::default(),
            heartbeat_file: "/tmp/anvil-test-heartbeat".to_string(),
        };
        let ctx = AnvilContext::new(config, local_host_uuid, Arc::new(RecordingCollaborator::default()));
        ctx.insert_peer(PeerHandle {
            uuid: local_host_uuid,
            pool: pool.clone(),
        });
        ctx.set_reader(local_host_uuid);
        ctx
    }
}
