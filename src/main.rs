// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Trestle binary: spawn and supervise a PHP language server, then serve
//! the HTTP front door until interrupted.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trestle::config::{Config, ServerKind};
use trestle::events::Dispatcher;
use trestle::http;
use trestle::lsp::LspClient;
use trestle::session::Session;

/// Command-line arguments for Trestle.
#[derive(Parser, Debug)]
#[command(name = "trestle")]
#[command(version = env!("TRESTLE_VERSION"))]
#[command(about = "HTTP bridge to PHP language servers")]
struct Args {
    /// Language server to spawn. Overrides the config file.
    #[arg(long)]
    server: Option<ServerKind>,

    /// Log level for the bridge's own output.
    #[arg(long, default_value = "debug")]
    level: String,

    /// Port for the HTTP front door. Overrides the config file.
    #[arg(long)]
    port: Option<u16>,

    /// Path to configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("trestle={}", args.level).parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load(args.config)?;
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    info!("starting trestle bridge");
    info!("language server: {:?}", config.server);
    info!("document cache horizon: {}s", config.cache_time);

    let command = config.server.command()?;
    let (client, inbound) = LspClient::spawn(command, config.max_crashes)?;

    let events = Dispatcher::new();
    let session = Session::new(client, events, config.timing());
    session.run(inbound);

    tokio::select! {
        result = http::serve(session.clone(), config.port) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            Ok(())
        }
    }
}
