// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parley chat server
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (127.0.0.1:8080)
//! parley-server
//!
//! # Custom address
//! parley-server --listen 0.0.0.0:9000
//!
//! # Config file, verbose logging
//! parley-server --config parley.json --log-level debug
//! ```

use clap::Parser;
use parley_server::{ChatServer, ServerConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Parley chat server - name registration, broadcast and private messages over TCP
#[derive(Parser, Debug)]
#[command(name = "parley-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on (host:port)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            ServerConfig::from_file(path)?
        }
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.set_listen_addr(listen);
    }

    info!("+----------------------------------------------------+");
    info!(
        "|       Parley Chat Server v{}                    |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Listen:   {:39} |", config.listen_addr());
    info!("|  Events:   {:39} |", config.event_queue_capacity);
    info!("|  Outbound: {:39} |", config.outbound_queue_capacity);
    info!(
        "|  Max line: {:39} |",
        format!("{} bytes", config.max_line_length)
    );
    info!("+----------------------------------------------------+");

    let server = ChatServer::bind(config).await?;

    // Handle shutdown signals
    let handle = server.handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping server...");
        handle.shutdown();
    });

    server.run().await?;

    info!("Chat server stopped");
    Ok(())
}
