// src/core/collaborator.rs

//! The collaborator surface: every shell-out to `systemctl`, `pcs`,
//! `drbdadm`, `virsh`, `dnf`, and `psql` is routed through this trait
//! (§6, §9 "shell-outs for psql administration ... retain as a
//! collaborator surface; wrap under an interface so tests can substitute
//! a recording fake"). Production code uses [`ProcessCollaborator`]; tests
//! use [`RecordingCollaborator`].

use crate::core::errors::{AnvilError, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// The captured result of a single shell-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Every external command family the core invokes (§6).
#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput>;
    async fn pcs_cluster_stop(&self) -> Result<CommandOutput>;
    async fn pcs_migrate(&self, server: &str, target_host: &str) -> Result<CommandOutput>;
    async fn pcs_shutdown(&self, server: &str) -> Result<CommandOutput>;
    async fn pcs_cluster_cib(&self) -> Result<CommandOutput>;
    async fn virsh_shutdown(&self, server: &str) -> Result<CommandOutput>;
    async fn drbdadm_down_all(&self) -> Result<CommandOutput>;
    async fn drbdadm_status(&self) -> Result<CommandOutput>;
    async fn dnf_update_stream(&self) -> Result<Vec<String>>;
    async fn psql_as_postgres(&self, sql: &str) -> Result<CommandOutput>;
}

/// Production collaborator: real `tokio::process::Command` invocations.
pub struct ProcessCollaborator;

impl ProcessCollaborator {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!(program, ?args, "invoking collaborator command");
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| AnvilError::Collaborator(format!("{program}: {e}")))?;
        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[async_trait]
impl Collaborator for ProcessCollaborator {
    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput> {
        self.run("systemctl", args).await
    }

    async fn pcs_cluster_stop(&self) -> Result<CommandOutput> {
        self.run("pcs", &["cluster", "stop", "--force"]).await
    }

    async fn pcs_migrate(&self, server: &str, target_host: &str) -> Result<CommandOutput> {
        self.run("pcs", &["resource", "move", server, target_host]).await
    }

    async fn pcs_shutdown(&self, server: &str) -> Result<CommandOutput> {
        self.run("pcs", &["resource", "disable", server]).await
    }

    async fn pcs_cluster_cib(&self) -> Result<CommandOutput> {
        self.run("pcs", &["cluster", "cib"]).await
    }

    async fn virsh_shutdown(&self, server: &str) -> Result<CommandOutput> {
        self.run("virsh", &["shutdown", server]).await
    }

    async fn drbdadm_down_all(&self) -> Result<CommandOutput> {
        self.run("drbdadm", &["down", "all"]).await
    }

    async fn drbdadm_status(&self) -> Result<CommandOutput> {
        self.run("drbdadm", &["status"]).await
    }

    async fn dnf_update_stream(&self) -> Result<Vec<String>> {
        let output = Command::new("sh")
            .arg("-c")
            .arg("dnf clean expire-cache && dnf -y update --best --allowerasing && echo return_code:$?")
            .output()
            .await
            .map_err(|e| AnvilError::Collaborator(format!("dnf update: {e}")))?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(String::from)
            .collect())
    }

    async fn psql_as_postgres(&self, sql: &str) -> Result<CommandOutput> {
        self.run("su", &["-", "postgres", "-c", &format!("psql template1 -c '{sql}'")])
            .await
    }
}

/// Test fake: records every invocation and returns caller-scripted
/// responses, so orchestrator tests (shutdown state machine, OS update
/// parsing) run without touching a real cluster.
#[derive(Default)]
pub struct RecordingCollaborator {
    pub calls: parking_lot::Mutex<Vec<String>>,
    pub systemctl_response: CommandOutput,
    pub pcs_cluster_stop_response: CommandOutput,
    pub pcs_migrate_response: CommandOutput,
    pub pcs_shutdown_response: CommandOutput,
    pub pcs_cluster_cib_response: CommandOutput,
    pub virsh_shutdown_response: CommandOutput,
    pub drbdadm_down_all_response: CommandOutput,
    pub drbdadm_status_response: CommandOutput,
    pub dnf_update_lines: Vec<String>,
    pub psql_response: CommandOutput,
}

impl Default for CommandOutput {
    fn default() -> Self {
        Self {
            status_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

impl RecordingCollaborator {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }
}

#[async_trait]
impl Collaborator for RecordingCollaborator {
    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput> {
        self.record(format!("systemctl {}", args.join(" ")));
        Ok(self.systemctl_response.clone())
    }

    async fn pcs_cluster_stop(&self) -> Result<CommandOutput> {
        self.record("pcs cluster stop --force");
        Ok(self.pcs_cluster_stop_response.clone())
    }

    async fn pcs_migrate(&self, server: &str, target_host: &str) -> Result<CommandOutput> {
        self.record(format!("pcs migrate {server} -> {target_host}"));
        Ok(self.pcs_migrate_response.clone())
    }

    async fn pcs_shutdown(&self, server: &str) -> Result<CommandOutput> {
        self.record(format!("pcs shutdown {server}"));
        Ok(self.pcs_shutdown_response.clone())
    }

    async fn pcs_cluster_cib(&self) -> Result<CommandOutput> {
        self.record("pcs cluster cib");
        Ok(self.pcs_cluster_cib_response.clone())
    }

    async fn virsh_shutdown(&self, server: &str) -> Result<CommandOutput> {
        self.record(format!("virsh shutdown {server}"));
        Ok(self.virsh_shutdown_response.clone())
    }

    async fn drbdadm_down_all(&self) -> Result<CommandOutput> {
        self.record("drbdadm down all");
        Ok(self.drbdadm_down_all_response.clone())
    }

    async fn drbdadm_status(&self) -> Result<CommandOutput> {
        self.record("drbdadm status");
        Ok(self.drbdadm_status_response.clone())
    }

    async fn dnf_update_stream(&self) -> Result<Vec<String>> {
        self.record("dnf update");
        Ok(self.dnf_update_lines.clone())
    }

    async fn psql_as_postgres(&self, sql: &str) -> Result<CommandOutput> {
        self.record(format!("psql {sql}"));
        Ok(self.psql_response.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_collaborator_captures_call_order() {
        let fake = RecordingCollaborator::default();
        fake.pcs_migrate("s1", "peer-a").await.unwrap();
        fake.pcs_cluster_stop().await.unwrap();
        let calls = fake.calls.lock();
        assert_eq!(calls[0], "pcs migrate s1 -> peer-a");
        assert_eq!(calls[1], "pcs cluster stop --force");
    }
}
