// src/core/shutdown/os_update.rs

//! The `anvil-update-system` variant (§4.J "OS-update variant"): streams
//! a `dnf` upgrade line by line, drives job progress off a handful of
//! recognisable markers, and records the persistent "reboot needed" flag
//! through the Variable mechanism (§4.J "Power-needed flag").

use crate::core::context::AnvilContext;
use crate::core::errors::Result;
use crate::core::job::{self, ProgressUpdate};
use crate::core::upsert::variable::{upsert_variable, UpsertVariable};
use sqlx::PgPool;
use uuid::Uuid;

/// The fixed variable name the reboot-needed flag is stored under,
/// toggled by `anvil-manage-power` and cleared by `anvil-daemon` post-boot.
pub const REBOOT_NEEDED_VARIABLE: &str = "reboot_needed";

const MAINTENANCE_MODE_VARIABLE: &str = "maintenance_mode";

/// True when the line's first whitespace-delimited field (the package name
/// in `dnf`'s verbose transaction output) names the kernel package itself —
/// `kernel` or `kernel-<version>` — as opposed to a related package such as
/// `kernel-tools` or `kernel-headers`.
fn is_kernel_line(line: &str) -> bool {
    let Some(package) = line.trim_start().split_whitespace().next() else {
        return false;
    };
    package == "kernel"
        || package
            .strip_prefix("kernel-")
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
}

fn is_nothing_to_do(line: &str) -> bool {
    line.contains("Nothing to do")
}

/// Parses a dnf progress fraction out of a `(x/y): package...` line.
fn parse_fraction(line: &str) -> Option<(u32, u32)> {
    let start = line.find('(')?;
    let end = line[start..].find(')')? + start;
    let (x, y) = line[start + 1..end].split_once('/')?;
    Some((x.trim().parse().ok()?, y.trim().parse().ok()?))
}

fn parse_return_code(line: &str) -> Option<i32> {
    line.strip_prefix("return_code:").and_then(|s| s.trim().parse().ok())
}

/// Maps one output line to the next progress value, never regressing
/// (§4.J: "Verifying ", "Running transaction", "Upgrading "/"Installing ",
/// "(x/y): " drive progress; "Nothing to do" jumps to 95%).
fn progress_for_line(line: &str, current: i32) -> i32 {
    if is_nothing_to_do(line) {
        return 95;
    }
    if let Some((x, y)) = parse_fraction(line)
        && y > 0
    {
        let scaled = (10.0 + (x as f64 / y as f64) * 80.0).round() as i32;
        return scaled.max(current);
    }
    if line.contains("Running transaction") {
        return current.max(10);
    }
    if line.starts_with("Upgrading ") || line.starts_with("Installing ") {
        return current.max(15);
    }
    if line.contains("Verifying ") {
        return current.max(92);
    }
    current
}

/// The outcome of one OS-update run: whether it succeeded and whether a
/// reboot is now needed (a kernel package was upgraded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub success: bool,
    pub reboot_needed: bool,
}

async fn set_maintenance_mode(ctx: &AnvilContext, pool: &PgPool, on: bool) -> Result<()> {
    upsert_variable(
        ctx,
        pool,
        UpsertVariable {
            variable_uuid: None,
            name: MAINTENANCE_MODE_VARIABLE,
            value: if on { "1" } else { "0" },
            default: "0",
            description: "host is running an OS update",
            section: "power",
            source_uuid: None,
            source_table: None,
        },
    )
    .await?;
    Ok(())
}

async fn set_reboot_needed(ctx: &AnvilContext, pool: &PgPool, needed: bool) -> Result<()> {
    upsert_variable(
        ctx,
        pool,
        UpsertVariable {
            variable_uuid: None,
            name: REBOOT_NEEDED_VARIABLE,
            value: if needed { "1" } else { "0" },
            default: "0",
            description: "a kernel upgrade is pending a reboot",
            section: "power",
            source_uuid: None,
            source_table: None,
        },
    )
    .await?;
    Ok(())
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

/// Streams the `dnf` update, driving job progress off each line and
/// recording whether a reboot is now required. Requires a trailing
/// `return_code:0` line to declare success (§4.J); any other outcome is a
/// failure that resets progress to 0.
pub async fn run(ctx: &AnvilContext, pool: &PgPool, job_uuid: Uuid) -> Result<UpdateOutcome> {
    set_maintenance_mode(ctx, pool, true).await?;
    report(ctx, pool, job_uuid, 1, "starting OS update").await?;

    let lines = ctx.collaborator.dnf_update_stream().await?;

    let mut progress = 1;
    let mut reboot_needed = false;
    let mut succeeded = false;

    for line in &lines {
        if is_kernel_line(line) {
            reboot_needed = true;
        }
        if let Some(code) = parse_return_code(line) {
            succeeded = code == 0;
            continue;
        }
        let next = progress_for_line(line, progress);
        if next != progress {
            progress = next;
            report(ctx, pool, job_uuid, progress, line).await?;
        }
    }

    set_reboot_needed(ctx, pool, reboot_needed).await?;

    if !succeeded {
        report(ctx, pool, job_uuid, 0, "failed").await?;
        set_maintenance_mode(ctx, pool, false).await?;
        return Ok(UpdateOutcome {
            success: false,
            reboot_needed,
        });
    }

    ctx.collaborator.systemctl(&["daemon-reload"]).await?;
    set_maintenance_mode(ctx, pool, false).await?;

    let final_status = if reboot_needed { "reboot needed" } else { "update complete" };
    report(ctx, pool, job_uuid, 100, final_status).await?;

    Ok(UpdateOutcome {
        success: true,
        reboot_needed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_kernel_line() {
        assert!(is_kernel_line("kernel-5.14.0-362.el9.x86_64  x86_64  99 M"));
        assert!(!is_kernel_line("kernel-tools-5.14.0  x86_64  1 M"));
    }

    #[test]
    fn nothing_to_do_jumps_to_95() {
        assert_eq!(progress_for_line("Nothing to do.", 10), 95);
    }

    #[test]
    fn fraction_scales_between_10_and_90() {
        assert_eq!(progress_for_line("  (1/10): foo-1.0.rpm", 10), 18);
        assert_eq!(progress_for_line("  (10/10): bar-2.0.rpm", 18), 90);
    }

    #[test]
    fn return_code_zero_is_success() {
        assert_eq!(parse_return_code("return_code:0"), Some(0));
        assert_eq!(parse_return_code("return_code:1"), Some(1));
        assert_eq!(parse_return_code("some other line"), None);
    }

    #[test]
    fn progress_never_regresses() {
        let after_transaction = progress_for_line("Running transaction", 10);
        let after_verify = progress_for_line("Verifying : foo-1.0.rpm", after_transaction);
        assert!(after_verify >= after_transaction);
    }
}
