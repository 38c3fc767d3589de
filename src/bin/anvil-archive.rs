// src/bin/anvil-archive.rs

//! Runs the Archiver once (§6 "CLI surface", §4.G). Dashboard-only: exits
//! 0 immediately on a node.

use anvil::core::archiver;
use anvil::core::cli::{self, exit_code};
use clap::Parser;

#[derive(Parser)]
#[command(about = "Cap history-table size by dumping and deleting the oldest rows")]
struct Args {
    #[arg(long, default_value = "/etc/anvil/anvil.conf")]
    config: String,
}

#[tokio::main]
async fn main() {
    cli::init_tracing("info");
    let args = Args::parse();

    let ctx = match cli::connected_context(&args.config).await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(exit_code::CONFIG);
        }
    };

    let timestamp = chrono::Utc::now().timestamp();
    match archiver::run(&ctx, timestamp).await {
        Ok(report) if report.skipped => {
            println!("archiver skipped: not a dashboard host");
        }
        Ok(report) => {
            println!(
                "archived {} row(s) into {} file(s)",
                report.rows_deleted,
                report.files_written.len()
            );
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(exit_code::FAILED);
        }
    }
}
