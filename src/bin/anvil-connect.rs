// src/bin/anvil-connect.rs

//! Opens the peer pool, runs the post-connect bootstrap/drift/resync
//! sequence once, and prints a peer summary (§6 "CLI surface").

use anvil::core::cli::{self, exit_code};
use anvil::core::connector;
use clap::Parser;

#[derive(Parser)]
#[command(about = "Connect to every configured peer and run one bootstrap/drift/resync pass")]
struct Args {
    /// Path to the anvil.conf-style configuration file.
    #[arg(long, default_value = "/etc/anvil/anvil.conf")]
    config: String,
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

    let connected = connector::connect_all(&ctx).await;
    if connected == 0 {
        eprintln!("no live peers");
        std::process::exit(exit_code::NO_LIVE_PEERS);
    }

    println!("connected {connected} of {} configured peer(s)", ctx.config.peers.len());
    for uuid in ctx.peers().keys() {
        let peer_config = &ctx.config.peers[uuid];
        println!("  {uuid} -> {}:{}", peer_config.host, peer_config.port);
    }
    if let Some(reader) = ctx.reader() {
        println!("reader: {reader}");
    }

    std::process::exit(exit_code::OK);
}
