// src/bin/anvil-lock.rs

//! `check`, `request`, `renew`, `release` subcommands over the Lock
//! Manager (§6 "CLI surface", §4.H).

use anvil::core::cli::{self, exit_code};
use anvil::core::lock;
use clap::{Parser, Subcommand};

/// Distinct from the shared §6 exit codes: `anvil-lock request --no-wait`
/// reports "held by another host" without blocking.
const EXIT_LOCK_HELD: i32 = 4;

#[derive(Parser)]
#[command(about = "Check, request, renew, and release the distributed advisory lock")]
struct Args {
    #[arg(long, default_value = "/etc/anvil/anvil.conf")]
    config: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the current lock token, empty if unlocked.
    Check,
    /// Take the lock, blocking until it's free unless `--no-wait`.
    Request {
        #[arg(long)]
        no_wait: bool,
    },
    /// Overwrite the lock with a fresh timestamp under our own identity.
    Renew,
    /// Blank out the lock if currently set.
    Release,
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
        Command::Check => lock::check(&pool).await.map(|v| println!("{v}")),
        Command::Request { no_wait } => {
            if no_wait {
                match lock::check(&pool).await {
                    Ok(raw) if !raw.is_empty() => {
                        eprintln!("lock held by another host: {raw}");
                        std::process::exit(EXIT_LOCK_HELD);
                    }
                    Ok(_) => lock::request(&ctx, &pool).await,
                    Err(e) => Err(e),
                }
            } else {
                lock::request(&ctx, &pool).await
            }
        }
        Command::Renew => lock::renew(&ctx, &pool).await,
        Command::Release => lock::release(&ctx, &pool).await,
    };

    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(exit_code::FAILED);
    }
}
