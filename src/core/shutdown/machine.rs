// src/core/shutdown/machine.rs

//! The migrate-or-stop / withdraw state machine (§4.J). Drives locally
//! hosted servers to a safe state, waits for DRBD to drop out of
//! SyncSource, stops the cluster stack, and optionally powers the host
//! off — reporting progress through the Job Engine at the milestones in
//! §4.J's diagram (5/10/20/30/40/50/60/70/80/100).

use crate::core::cluster_info::{parse_cib, ServerRole, ServerStatus};
use crate::core::context::AnvilContext;
use crate::core::errors::Result;
use crate::core::job::{self, ProgressUpdate};
use crate::core::upsert::host::upsert_host;
use crate::core::upsert::host::UpsertHost;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    Power,
    Thermal,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::User => "user",
            StopReason::Power => "power",
            StopReason::Thermal => "thermal",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShutdownInput {
    pub power_off: bool,
    pub stop_reason: StopReason,
    pub stop_servers: bool,
}

/// The per-server action the poller decided on this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    Skip,
    Wait,
    PcsShutdown,
    VirshShutdown,
    PcsMigrate(String),
}

/// The escalation threshold after which a `stop-servers` withdrawal falls
/// back from a graceful `pcs` shutdown to a forced `virsh shutdown`
/// (§4.J diagram: "after 120s: virsh shutdown").
const VIRSH_ESCALATION: Duration = Duration::from_secs(120);

/// Pure decision function: given a server's current role, whether we're
/// stopping (vs. migrating) servers, how long we've been trying, and a
/// migration target if one exists, decides the next action. Kept free of
/// I/O so the escalation boundary and role branches are unit-testable
/// without a live cluster.
pub fn decide_action(
    role: &ServerRole,
    stop_servers: bool,
    attempting_for: Option<Duration>,
    migration_target: Option<&str>,
) -> ServerAction {
    match role {
        ServerRole::Stopped => ServerAction::Skip,
        ServerRole::Migrating => ServerAction::Wait,
        ServerRole::Started => {
            if stop_servers {
                match attempting_for {
                    None => ServerAction::PcsShutdown,
                    Some(d) if d >= VIRSH_ESCALATION => ServerAction::VirshShutdown,
                    Some(_) => ServerAction::Wait,
                }
            } else {
                match migration_target {
                    Some(host) => ServerAction::PcsMigrate(host.to_string()),
                    None => ServerAction::Wait,
                }
            }
        }
        ServerRole::Unknown(_) => ServerAction::Wait,
    }
}

/// Picks a migration target: the first other connected peer's
/// configured host, by ascending UUID (stable, deterministic).
fn pick_migration_target(ctx: &AnvilContext) -> Option<String> {
    let mut peers: Vec<_> = ctx.config.peers.iter().collect();
    peers.sort_by_key(|(uuid, _)| **uuid);
    peers
        .into_iter()
        .find(|(uuid, _)| **uuid != ctx.local_host_uuid)
        .map(|(_, peer)| peer.host.clone())
}

async fn report(ctx: &AnvilContext, pool: &PgPool, job_uuid: Uuid, progress: i32, status: &str) -> Result<()> {
    job::update_progress(
        ctx,
        pool,
        job_uuid,
        ProgressUpdate {
            progress: Some(progress),
            status: Some(status),
            ..Default::default()
        },
    )
    .await
}

fn has_sync_source(drbdadm_status_text: &str) -> bool {
    drbdadm_status_text.contains("SyncSource")
}

fn local_servers(servers: &[ServerStatus], local_hostname: &str) -> Vec<ServerStatus> {
    servers
        .iter()
        .filter(|s| s.host.as_deref() == Some(local_hostname))
        .cloned()
        .collect()
}

/// Runs the full withdraw state machine for one job. `local_hostname` is
/// the name `parse_cib` reports servers as running on (§4.J).
pub async fn run(
    ctx: &AnvilContext,
    pool: &PgPool,
    job_uuid: Uuid,
    local_hostname: &str,
    input: ShutdownInput,
) -> Result<()> {
    report(ctx, pool, job_uuid, 5, "enumerating servers").await?;

    let cib = ctx.collaborator.pcs_cluster_cib().await;
    let cluster_is_up = cib.as_ref().is_ok_and(|o| o.success());

    if cluster_is_up {
        let servers = parse_cib(&cib.unwrap().stdout);
        let mut pending = local_servers(&servers, local_hostname);

        report(ctx, pool, job_uuid, 10, "migrating or stopping servers").await?;

        let mut attempt_started: HashMap<String, Instant> = HashMap::new();
        while !pending.is_empty() {
            let migration_target = pick_migration_target(ctx);
            let mut still_pending = Vec::new();

            for server in &pending {
                let attempting_for = attempt_started.get(&server.name).map(|t| t.elapsed());
                let action = decide_action(
                    &server.role,
                    input.stop_servers,
                    attempting_for,
                    migration_target.as_deref(),
                );

                match action {
                    ServerAction::Skip => {}
                    ServerAction::Wait => still_pending.push(server.clone()),
                    ServerAction::PcsShutdown => {
                        ctx.collaborator.pcs_shutdown(&server.name).await?;
                        attempt_started.entry(server.name.clone()).or_insert_with(Instant::now);
                        still_pending.push(server.clone());
                    }
                    ServerAction::VirshShutdown => {
                        ctx.collaborator.virsh_shutdown(&server.name).await?;
                        still_pending.push(server.clone());
                    }
                    ServerAction::PcsMigrate(target) => {
                        ctx.collaborator.pcs_migrate(&server.name, &target).await?;
                        attempt_started.entry(server.name.clone()).or_insert_with(Instant::now);
                        still_pending.push(server.clone());
                    }
                }
                report(ctx, pool, job_uuid, 20, &format!("acted on {}", server.name)).await?;
            }

            if still_pending.is_empty() {
                break;
            }
            pending = still_pending;
            tokio::time::sleep(Duration::from_secs(5)).await;

            // Re-enumerate so roles reflect the effect of the commands we
            // just issued (a server may have gone Stopped/Migrating).
            if let Ok(cib) = ctx.collaborator.pcs_cluster_cib().await
                && cib.success()
            {
                let servers = parse_cib(&cib.stdout);
                let fresh = local_servers(&servers, local_hostname);
                pending = pending
                    .into_iter()
                    .filter_map(|p| fresh.iter().find(|f| f.name == p.name).cloned())
                    .filter(|s| s.role != ServerRole::Stopped)
                    .collect();
            }
        }

        report(ctx, pool, job_uuid, 30, "all local servers drained").await?;

        report(ctx, pool, job_uuid, 40, "waiting for DRBD to quiesce").await?;
        loop {
            let status = ctx.collaborator.drbdadm_status().await?;
            if !has_sync_source(&status.stdout) {
                break;
            }
            report(ctx, pool, job_uuid, 50, "DRBD still syncing, holding").await?;
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        ctx.collaborator.drbdadm_down_all().await?;
        report(ctx, pool, job_uuid, 60, "DRBD down").await?;

        report(ctx, pool, job_uuid, 70, "stopping cluster").await?;
        ctx.collaborator.pcs_cluster_stop().await?;
        report(ctx, pool, job_uuid, 80, "cluster stopped").await?;
    } else {
        info!("cluster already down, skipping to cluster-stopped");
        report(ctx, pool, job_uuid, 80, "cluster already stopped").await?;
    }

    if input.power_off {
        upsert_host(
            ctx,
            pool,
            UpsertHost {
                host_uuid: Some(ctx.local_host_uuid),
                host_name: local_hostname,
                host_type: "node",
                host_key: "",
                host_status: "stopping",
            },
        )
        .await?;
        ctx.collaborator.systemctl(&["poweroff"]).await?;
        report(ctx, pool, job_uuid, 100, "power off issued").await?;
    } else {
        report(ctx, pool, job_uuid, 100, "withdraw complete").await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopped_server_is_skipped() {
        assert_eq!(
            decide_action(&ServerRole::Stopped, true, None, None),
            ServerAction::Skip
        );
    }

    #[test]
    fn migrating_server_waits() {
        assert_eq!(
            decide_action(&ServerRole::Migrating, true, None, None),
            ServerAction::Wait
        );
    }

    #[test]
    fn started_server_first_pass_is_pcs_shutdown() {
        assert_eq!(
            decide_action(&ServerRole::Started, true, None, None),
            ServerAction::PcsShutdown
        );
    }

    #[test]
    fn started_server_escalates_after_120s() {
        assert_eq!(
            decide_action(&ServerRole::Started, true, Some(Duration::from_secs(120)), None),
            ServerAction::VirshShutdown
        );
        assert_eq!(
            decide_action(&ServerRole::Started, true, Some(Duration::from_secs(119)), None),
            ServerAction::Wait
        );
    }

    #[test]
    fn started_server_migrates_when_not_stopping() {
        assert_eq!(
            decide_action(&ServerRole::Started, false, None, Some("peer-a")),
            ServerAction::PcsMigrate("peer-a".to_string())
        );
    }

    #[test]
    fn started_server_waits_with_no_migration_target() {
        assert_eq!(
            decide_action(&ServerRole::Started, false, None, None),
            ServerAction::Wait
        );
    }

    #[test]
    fn sync_source_detection() {
        assert!(has_sync_source("0: cs:SyncSource ro:Primary/Secondary"));
        assert!(!has_sync_source("0: cs:Connected ro:Primary/Secondary"));
    }
}
