mod bank;
mod board;
mod command;
mod config;
mod server;

use std::net::{Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bank::RelayBank;

#[tokio::main]
async fn main() -> ExitCode {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "greenhouse-relay".to_string());
    let (Some(path), None) = (args.next(), args.next()) else {
        eprintln!("usage: {program} <relay.toml>");
        return ExitCode::from(2);
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> Result<()> {
    let config = config::load(path)?;
    let mut bank = RelayBank::new(&config).context("failed to initialise relay board")?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.listener.port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            bank.all_off();
            return Err(e).with_context(|| format!("failed to bind {addr}"));
        }
    };
    info!(
        %addr,
        allowed_peer = %config.listener.allowed_peer,
        relays = config.relays.len(),
        "relay peripheral listening"
    );

    server::serve(listener, config.listener.allowed_peer, &mut bank, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for interrupt: {e}");
            std::future::pending::<()>().await;
        }
        info!("received interrupt");
    })
    .await
}
