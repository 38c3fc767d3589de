// src/bin/anvil-job.rs

//! `submit`, `claim`, `progress`, `list` subcommands over the Job Engine
//! (§6 "CLI surface", §4.I).

use anvil::core::cli::{self, exit_code};
use anvil::core::job::{self, NewJob, ProgressUpdate};
use anvil::core::validate::parse_uuid;
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(about = "Insert, claim, progress, and list jobs")]
struct Args {
    #[arg(long, default_value = "/etc/anvil/anvil.conf")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert a new pending job for a host.
    Submit {
        #[arg(long)]
        host_uuid: String,
        #[arg(long)]
        command: String,
        #[arg(long, default_value = "")]
        data: String,
        #[arg(long, default_value = "")]
        name: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Claim the next pending job for a host.
    Claim {
        #[arg(long)]
        host_uuid: String,
    },
    /// Apply a fast-path progress update to one job.
    Progress {
        #[arg(long)]
        job_uuid: String,
        #[arg(long)]
        progress: Option<i32>,
        #[arg(long)]
        status: Option<String>,
    },
    /// List jobs for a host, most recently modified first.
    List {
        #[arg(long)]
        host_uuid: String,
    },
}

#[tokio::main]
async fn main() {
    cli::init_tracing("info");
    let args = Args::parse();

    let ctx = match cli::bare_context(&args.config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(exit_code::CONFIG);
        }
    };
    let connected = anvil::core::connector::connect_all(&ctx).await;
    if connected == 0 {
        eprintln!("no live peers");
        std::process::exit(exit_code::NO_LIVE_PEERS);
    }
    let pool = cli::reader_pool(&ctx);

    let result = match args.command {
        Command::Submit {
            host_uuid,
            command,
            data,
            name,
            title,
            description,
        } => run_submit(&ctx, &pool, &host_uuid, &command, &data, &name, &title, &description).await,
        Command::Claim { host_uuid } => run_claim(&ctx, &pool, &host_uuid).await,
        Command::Progress {
            job_uuid,
            progress,
            status,
        } => run_progress(&ctx, &pool, &job_uuid, progress, status).await,
        Command::List { host_uuid } => run_list(&pool, &host_uuid).await,
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(exit_code::FAILED);
    }
}

async fn run_submit(
    ctx: &anvil::core::context::AnvilContext,
    pool: &sqlx::PgPool,
    host_uuid: &str,
    command: &str,
    data: &str,
    name: &str,
    title: &str,
    description: &str,
) -> anvil::core::Result<()> {
    let host_uuid = parse_uuid(host_uuid)?;
    match job::insert_job(
        ctx,
        pool,
        NewJob {
            host_uuid,
            command,
            data,
            name,
            title,
            description,
        },
    )
    .await?
    {
        Some(job_uuid) => println!("{job_uuid}"),
        None => eprintln!("host '{host_uuid}' does not exist yet; job not inserted"),
    }
    Ok(())
}

async fn run_claim(ctx: &anvil::core::context::AnvilContext, pool: &sqlx::PgPool, host_uuid: &str) -> anvil::core::Result<()> {
    let host_uuid = parse_uuid(host_uuid)?;
    let pid = std::process::id() as i64;
    match job::claim_next(ctx, pool, host_uuid, pid).await? {
        Some(job) => println!("{} {}", job.job_uuid, job.job_command),
        None => println!("no pending jobs"),
    }
    Ok(())
}

async fn run_progress(
    ctx: &anvil::core::context::AnvilContext,
    pool: &sqlx::PgPool,
    job_uuid: &str,
    progress: Option<i32>,
    status: Option<String>,
) -> anvil::core::Result<()> {
    let job_uuid: Uuid = parse_uuid(job_uuid)?;
    job::update_progress(
        ctx,
        pool,
        job_uuid,
        ProgressUpdate {
            progress,
            status: status.as_deref(),
            ..Default::default()
        },
    )
    .await
}

async fn run_list(pool: &sqlx::PgPool, host_uuid: &str) -> anvil::core::Result<()> {
    let host_uuid = parse_uuid(host_uuid)?;
    for job in job::list_for_host(pool, host_uuid).await? {
        println!(
            "{} progress={} status={:?} command={}",
            job.job_uuid, job.job_progress, job.job_status, job.job_command
        );
    }
    Ok(())
}
