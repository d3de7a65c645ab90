//! The `name:category:on|off` text command sent by the greenhouse server.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::config::Category;

/// Largest command accepted from a peer.
pub const MAX_COMMAND: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub category: Category,
    pub on: bool,
}

impl Command {
    pub fn parse(text: &str) -> Result<Self> {
        let parts: Vec<&str> = text.trim().split(':').map(str::trim).collect();
        let [name, category, state] = parts.as_slice() else {
            bail!("expected name:category:state, got {text:?}");
        };
        if name.is_empty() {
            bail!("empty actuator name in {text:?}");
        }
        let category =
            Category::parse(category).with_context(|| format!("unknown category {category:?}"))?;
        let on = match state.to_ascii_lowercase().as_str() {
            "on" => true,
            "off" => false,
            other => bail!("unknown state {other:?}"),
        };
        Ok(Self {
            name: name.to_string(),
            category,
            on,
        })
    }
}

/// Reads one command; the sender closes its half once written.
pub async fn read<R: AsyncRead + Unpin>(reader: R) -> Result<Command> {
    let mut buf = Vec::with_capacity(64);
    reader
        .take(MAX_COMMAND as u64)
        .read_to_end(&mut buf)
        .await
        .context("failed to read command")?;
    let text = std::str::from_utf8(&buf).context("command is not valid UTF-8")?;
    Command::parse(text)
}

// ===========================================================================
// Tests
// ===========================================================================
