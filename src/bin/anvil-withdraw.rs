// src/bin/anvil-withdraw.rs

//! Drives the Shutdown Orchestrator's migrate-or-stop/withdraw state
//! machine (§6 "CLI surface", §4.J).

use anvil::core::cli::{self, exit_code};
use anvil::core::connector::local_hostname;
use anvil::core::job::{self, NewJob};
use anvil::core::shutdown::machine::{self, ShutdownInput, StopReason};
use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(about = "Drain locally-hosted servers, quiesce DRBD, stop the cluster, optionally power off")]
struct Args {
    #[arg(long, default_value = "/etc/anvil/anvil.conf")]
    config: String,
    /// Stop locally-hosted servers instead of live-migrating them away.
    #[arg(long)]
    stop_servers: bool,
    /// Power the host off once the cluster stack is stopped.
    #[arg(long)]
    power_off: bool,
    /// Why this withdrawal was triggered.
    #[arg(long, value_enum, default_value_t = StopReasonArg::User)]
    stop_reason: StopReasonArg,
}

#[derive(Copy, Clone, ValueEnum)]
enum StopReasonArg {
    User,
    Power,
    Thermal,
}

impl From<StopReasonArg> for StopReason {
    fn from(v: StopReasonArg) -> Self {
        match v {
            StopReasonArg::User => StopReason::User,
            StopReasonArg::Power => StopReason::Power,
            StopReasonArg::Thermal => StopReason::Thermal,
        }
    }
}

#[tokio::main]
async fn main() {
    cli::init_tracing("info");
    let args = Args::parse();

    let ctx = match cli::connected_context_with_lock(&args.config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(exit_code::CONFIG);
        }
    };
    let pool = cli::reader_pool(&ctx);
    let hostname = local_hostname();

    let stop_reason: StopReason = args.stop_reason.into();
    let job_uuid = match job::insert_job(
        &ctx,
        &pool,
        NewJob {
            host_uuid: ctx.local_host_uuid,
            command: "withdraw",
            data: stop_reason.as_str(),
            name: "withdraw",
            title: "Withdraw host from cluster",
            description: "migrate-or-stop local servers, quiesce DRBD, stop the cluster stack",
        },
    )
    .await
    {
        Ok(Some(uuid)) => uuid,
        Ok(None) => {
            eprintln!("local host is not registered yet; cannot track withdraw progress");
            std::process::exit(exit_code::FAILED);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(exit_code::FAILED);
        }
    };

    let input = ShutdownInput {
        power_off: args.power_off,
        stop_reason,
        stop_servers: args.stop_servers,
    };

    if let Err(e) = machine::run(&ctx, &pool, job_uuid, &hostname, input).await {
        eprintln!("{e}");
        std::process::exit(exit_code::FAILED);
    }
}
