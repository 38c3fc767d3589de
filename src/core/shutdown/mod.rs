// src/core/shutdown/mod.rs

//! Component J: the Shutdown Orchestrator (§4.J). A workflow job that
//! drains locally-hosted servers (migrate-or-stop), waits for DRBD to
//! quiesce, stops the cluster stack, and optionally powers off — plus the
//! OS-update variant that streams a `dnf` upgrade and drives the same job
//! progress protocol.

pub mod machine;
pub mod os_update;

pub use machine::{ShutdownInput, StopReason};
