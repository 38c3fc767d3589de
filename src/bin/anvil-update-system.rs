// src/bin/anvil-update-system.rs

//! Drives the Shutdown Orchestrator's OS-update variant (§6 "CLI
//! surface", §4.J).

use anvil::core::cli::{self, exit_code};
use anvil::core::job::{self, NewJob};
use anvil::core::shutdown::os_update;
use clap::Parser;

#[derive(Parser)]
#[command(about = "Stream a dnf update, driving job progress and the reboot-needed flag")]
struct Args {
    #[arg(long, default_value = "/etc/anvil/anvil.conf")]
    config: String,
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

    let job_uuid = match job::insert_job(
        &ctx,
        &pool,
        NewJob {
            host_uuid: ctx.local_host_uuid,
            command: "update-system",
            data: "",
            name: "update-system",
            title: "OS update",
            description: "dnf clean expire-cache && dnf -y update --best --allowerasing",
        },
    )
    .await
    {
        Ok(Some(uuid)) => uuid,
        Ok(None) => {
            eprintln!("local host is not registered yet; cannot track update progress");
            std::process::exit(exit_code::FAILED);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(exit_code::FAILED);
        }
    };

    match os_update::run(&ctx, &pool, job_uuid).await {
        Ok(outcome) if outcome.success => {
            if outcome.reboot_needed {
                println!("update complete, reboot needed");
            } else {
                println!("update complete");
            }
        }
        Ok(_) => {
            eprintln!("update failed");
            std::process::exit(exit_code::FAILED);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(exit_code::FAILED);
        }
    }
}
