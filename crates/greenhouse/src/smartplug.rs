//! TP-Link smart plug driver (HS1xx local protocol over TCP).
//!
//! Frames are a 4-byte big-endian length followed by the payload scrambled
//! with an autokey XOR cipher whose initial key is 171.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::dispatch::{DriverError, Switch};
use crate::model::Category;

const INITIAL_KEY: u8 = 171;
const IO_TIMEOUT: Duration = Duration::from_secs(2);
/// Replies to a relay command are tiny; anything bigger is garbage.
const MAX_REPLY: usize = 64 * 1024;

pub fn encrypt(plain: &str) -> Vec<u8> {
    let bytes = plain.as_bytes();
    let mut out = Vec::with_capacity(4 + bytes.len());
    out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    let mut key = INITIAL_KEY;
    for &b in bytes {
        key ^= b;
        out.push(key);
    }
    out
}

/// Decrypt a payload (without its length prefix).
pub fn decrypt(cipher: &[u8]) -> String {
    let mut key = INITIAL_KEY;
    let plain: Vec<u8> = cipher
        .iter()
        .map(|&b| {
            let p = key ^ b;
            key = b;
            p
        })
        .collect();
    String::from_utf8_lossy(&plain).into_owned()
}

fn relay_command(on: bool) -> String {
    serde_json::json!({"system": {"set_relay_state": {"state": u8::from(on)}}}).to_string()
}

pub struct SmartPlug {
    addr: String,
}

impl SmartPlug {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }

    fn unreachable(&self, source: io::Error) -> DriverError {
        DriverError::Unreachable {
            target: self.addr.clone(),
            source,
        }
    }

    async fn exchange(&self, command: &str) -> Result<Vec<u8>, DriverError> {
        let mut stream = timeout(IO_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| self.unreachable(io::ErrorKind::TimedOut.into()))?
            .map_err(|e| self.unreachable(e))?;

        let io = async {
            stream.write_all(&encrypt(command)).await?;
            let mut len = [0u8; 4];
            stream.read_exact(&mut len).await?;
            let len = u32::from_be_bytes(len) as usize;
            if len > MAX_REPLY {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("reply of {len} bytes"),
                ));
            }
            let mut payload = vec![0u8; len];
            stream.read_exact(&mut payload).await?;
            Ok::<_, io::Error>(payload)
        };

        match timeout(IO_TIMEOUT, io).await {
            Err(_) => Err(self.unreachable(io::ErrorKind::TimedOut.into())),
            Ok(Err(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Err(DriverError::Rejected(format!("Error: {e}")))
            }
            Ok(Err(e)) => Err(self.unreachable(e)),
            Ok(Ok(payload)) => Ok(payload),
        }
    }
}

#[async_trait]
impl Switch for SmartPlug {
    async fn set(&self, _name: &str, _category: Category, on: bool) -> Result<(), DriverError> {
        let reply = decrypt(&self.exchange(&relay_command(on)).await?);
        let json: Value = serde_json::from_str(&reply)
            .map_err(|e| DriverError::Rejected(format!("Error: unreadable smartplug reply: {e}")))?;
        match json.pointer("/system/set_relay_state/err_code").and_then(Value::as_i64) {
            Some(0) => Ok(()),
            _ => Err(DriverError::Rejected(format!(
                "Error: Error from the smartplug: {json}"
            ))),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
