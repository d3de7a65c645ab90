mod alerts;
mod config;
mod control;
mod decision;
mod directory;
mod dispatch;
mod email;
mod gateway;
mod model;
mod peer;
mod schedule;
mod smartplug;
#[cfg(test)]
mod testing;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use time::UtcOffset;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use alerts::AlertEngine;
use config::Config;
use control::ControlLoop;
use dispatch::Dispatcher;
use email::SmtpNotifier;
use gateway::HttpUplink;
use schedule::Clock;

fn main() -> ExitCode {
    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "greenhouse-server".to_string());
    let (Some(path), None) = (args.next(), args.next()) else {
        eprintln!("usage: {program} <config.toml>");
        return ExitCode::from(2);
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match start(&path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// The local offset can only be read while the process is single-threaded,
/// so it is settled before the runtime starts.
fn start(path: &str) -> Result<()> {
    let config = config::load(path)?;
    let offset = match &config.control.utc_offset {
        Some(offset) => config::parse_utc_offset(offset)?,
        None => UtcOffset::current_local_offset().unwrap_or_else(|e| {
            warn!("local utc offset unavailable ({e}), using UTC");
            UtcOffset::UTC
        }),
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(serve(config, offset))
}

async fn serve(config: Config, offset: UtcOffset) -> Result<()> {
    let config = Arc::new(config);
    let notifier = Arc::new(SmtpNotifier::new(&config.email)?);
    let alerts = Arc::new(AlertEngine::new(notifier, config.email.error_stages, offset));
    let uplink = Arc::new(HttpUplink::new(&config.rest)?);
    let dispatcher = Arc::new(Dispatcher::from_config(&config));

    info!(
        endpoint = %config.rest.base_url,
        cycle_secs = config.control.cycle_secs,
        stages = config.email.error_stages,
        %offset,
        "greenhouse server started"
    );

    let mut control = ControlLoop::new(
        Arc::clone(&config),
        uplink,
        Arc::clone(&alerts),
        dispatcher,
        Clock::system(offset),
    );

    // Registered up front so an interrupt during the first cycle is seen.
    let interrupt = tokio::spawn(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received interrupt, finishing the current cycle"),
            Err(e) => {
                warn!("failed to listen for interrupt: {e}");
                std::future::pending::<()>().await;
            }
        }
    });
    let result = control
        .run(async move {
            let _ = interrupt.await;
        })
        .await;

    alerts.shutdown().await;
    result
}
