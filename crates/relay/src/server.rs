//! Accept loop. Commands are handled one connection at a time.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::bank::RelayBank;
use crate::command;

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves until `shutdown` resolves, then switches every relay off.
pub(crate) async fn serve(
    listener: TcpListener,
    allowed_peer: IpAddr,
    bank: &mut RelayBank,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    let result = loop {
        tokio::select! {
            accepted = listener.accept() => match accepted.context("accept failed") {
                Ok((stream, peer)) => handle(stream, peer, allowed_peer, bank).await,
                Err(e) => break Err(e),
            },
            _ = &mut shutdown => {
                info!("shutting down");
                break Ok(());
            }
        }
    };

    bank.all_off();
    result
}

async fn handle(stream: TcpStream, peer: SocketAddr, allowed_peer: IpAddr, bank: &mut RelayBank) {
    if peer.ip() != allowed_peer {
        warn!(%peer, "connection from unexpected peer ignored");
        return;
    }
    match tokio::time::timeout(READ_TIMEOUT, command::read(stream)).await {
        Ok(Ok(cmd)) => {
            info!(relay = %cmd.name, category = %cmd.category, on = cmd.on, "command received");
            bank.apply(&cmd);
        }
        Ok(Err(e)) => warn!(%peer, "bad command: {e:#}"),
        Err(_) => warn!(%peer, "timed out waiting for command"),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
