//! Relay peer driver: one text command per TCP connection to the relay
//! controller that owns a category of actuators.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::dispatch::{DriverError, Switch};
use crate::model::Category;

const IO_TIMEOUT: Duration = Duration::from_secs(2);

/// `name:category:on|off`
pub fn command(name: &str, category: Category, on: bool) -> String {
    format!("{name}:{category}:{}", if on { "on" } else { "off" })
}

pub struct RelayPeer {
    addr: String,
}

impl RelayPeer {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }

    async fn send(&self, message: &str) -> io::Result<()> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        stream.write_all(message.as_bytes()).await?;
        stream.shutdown().await
    }
}

#[async_trait]
impl Switch for RelayPeer {
    async fn set(&self, name: &str, category: Category, on: bool) -> Result<(), DriverError> {
        let message = command(name, category, on);
        let result = match timeout(IO_TIMEOUT, self.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(io::ErrorKind::TimedOut.into()),
        };
        result.map_err(|source| DriverError::Unreachable {
            target: self.addr.clone(),
            source,
        })?;
        debug!(peer = %self.addr, %message, "relay command delivered");
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
