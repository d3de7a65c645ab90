//! Staged alert escalation with deduplication and throttled notification.
//!
//! Every fault is identified by a key. Each time a key is raised it climbs
//! one stage of the ladder; only keys that reach the last stage are buffered
//! for notification and count towards the accumulated severity. A fault that
//! clears before it reaches the top never produces an e-mail.
//!
//! ```text
//! raise ──▶ stage 0 ──raise──▶ stage 1 ──raise──▶ … ──▶ stage N-1 ─▶ buffer
//!              │                  │                         │
//!              └──────────────────┴────── clear ────────────┴──▶ (gone)
//! ```
//!
//! A key is recorded in every stage it has climbed through, so the stages
//! holding it always form a prefix `0..=k`; `k` is the stage it occupies.
//! Critical alerts skip the ladder and land in every stage at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::{OffsetDateTime, UtcOffset};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Subject line of every notification e-mail.
pub const SUBJECT: &str = "sGreen Errors";

// ---------------------------------------------------------------------------
// Severity & alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Mid,
    High,
    /// Bypasses the stage ladder.
    Critical,
}

impl Severity {
    pub fn weight(self) -> u32 {
        match self {
            Self::Low => 2,
            Self::Mid => 3,
            Self::High => 6,
            Self::Critical => 7,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Mid => "MID",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub severity: Severity,
    pub message: String,
    pub key: String,
}

impl Alert {
    pub fn new(severity: Severity, message: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            key: key.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notification sink
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Ledger (stage tables + pending buffer)
// ---------------------------------------------------------------------------

/// Rendered messages of one stage in the order their keys first arrived.
/// Re-raising a key updates its message in place.
#[derive(Debug, Clone, Default)]
struct Stage {
    entries: Vec<(String, String)>,
}

impl Stage {
    fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    #[cfg(test)]
    fn get(&self, key: &str) -> Option<&String> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, m)| m)
    }

    fn insert(&mut self, key: String, message: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = message,
            None => self.entries.push((key, message)),
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    fn values(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(_, m)| m)
    }
}

struct Ledger {
    stages: Vec<Stage>,
    pending: HashMap<String, Alert>,
    total_severity: u32,
}

impl Ledger {
    fn new(total_stages: usize) -> Self {
        Self {
            stages: vec![Stage::default(); total_stages.max(1)],
            pending: HashMap::new(),
            total_severity: 0,
        }
    }

    fn last(&self) -> usize {
        self.stages.len() - 1
    }

    fn stage_of(&self, key: &str) -> Option<usize> {
        self.stages.iter().rposition(|s| s.contains_key(key))
    }

    fn raise(&mut self, alert: Alert, rendered: String) {
        if alert.severity == Severity::Critical {
            for stage in &mut self.stages {
                stage.insert(alert.key.clone(), rendered.clone());
            }
            self.buffer(alert);
            return;
        }

        let last = self.last();
        match self.stage_of(&alert.key) {
            Some(stage) if stage == last => {
                // Already at the top: refresh the text, keep the accounting.
                self.stages[stage].insert(alert.key, rendered);
            }
            occupied => {
                let next = occupied.map_or(0, |s| s + 1);
                self.stages[next].insert(alert.key.clone(), rendered);
                if next == last {
                    self.buffer(alert);
                }
            }
        }
    }

    fn buffer(&mut self, alert: Alert) {
        self.total_severity += alert.severity.weight();
        if let Some(previous) = self.pending.insert(alert.key.clone(), alert) {
            self.total_severity = self
                .total_severity
                .saturating_sub(previous.severity.weight());
        }
    }

    fn clear(&mut self, key: &str) {
        for stage in &mut self.stages {
            stage.remove(key);
        }
        if let Some(alert) = self.pending.remove(key) {
            self.total_severity = self.total_severity.saturating_sub(alert.severity.weight());
        }
    }

    fn due(&self, flush: bool) -> bool {
        self.total_severity >= Severity::High.weight() || (flush && self.total_severity > 0)
    }

    /// Reset the accounting and render the body from the top stage.
    fn drain(&mut self) -> String {
        self.total_severity = 0;
        self.pending.clear();
        let top = self.last();
        self.stages[top]
            .values()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct AlertEngine {
    ledger: Mutex<Ledger>,
    /// The most recently started send; at most one is ever in flight.
    outbox: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    notifier: Arc<dyn Notifier>,
    offset: UtcOffset,
}

impl AlertEngine {
    pub fn new(notifier: Arc<dyn Notifier>, total_stages: usize, offset: UtcOffset) -> Self {
        Self {
            ledger: Mutex::new(Ledger::new(total_stages)),
            outbox: tokio::sync::Mutex::new(None),
            notifier,
            offset,
        }
    }

    pub fn raise(&self, alert: Alert) {
        let rendered = self.render(&alert);
        self.ledger.lock().raise(alert, rendered);
    }

    /// Forget `key` everywhere. Clearing an unknown key is a no-op.
    pub fn clear(&self, key: &str) {
        self.ledger.lock().clear(key);
    }

    /// Start a notification if the accumulated severity warrants one.
    ///
    /// Waits for the previous send to finish first, but does not wait for
    /// the send it starts. Returns whether a send was started.
    pub async fn notify(&self, recipients: &[String], flush: bool) -> bool {
        let mut outbox = self.outbox.lock().await;
        if let Some(previous) = outbox.take() {
            if let Err(e) = previous.await {
                warn!("previous notification task failed: {e}");
            }
        }

        let body = {
            let mut ledger = self.ledger.lock();
            if !ledger.due(flush) {
                return false;
            }
            ledger.drain()
        };

        info!(recipients = recipients.len(), flush, "sending alert notification");
        let notifier = Arc::clone(&self.notifier);
        let recipients = recipients.to_vec();
        *outbox = Some(tokio::spawn(async move {
            if let Err(e) = notifier.send(SUBJECT, &body, &recipients).await {
                error!("alert notification failed: {e:#}");
            }
        }));
        true
    }

    /// Wait for any in-flight notification to finish.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.outbox.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("notification task failed during shutdown: {e}");
            }
        }
    }

    fn render(&self, alert: &Alert) -> String {
        let at = OffsetDateTime::now_utc().to_offset(self.offset);
        format!(
            "{:02}/{:02}/{:02} {:02}:{:02}:{:02} {}: {}",
            u8::from(at.month()),
            at.day(),
            at.year().rem_euclid(100),
            at.hour(),
            at.minute(),
            at.second(),
            alert.severity,
            alert.message
        )
    }
}

#[cfg(test)]
impl AlertEngine {
    pub fn total_stages(&self) -> usize {
        self.ledger.lock().stages.len()
    }

    pub fn total_severity(&self) -> u32 {
        self.ledger.lock().total_severity
    }

    /// The stage `key` currently occupies.
    pub fn stage_of(&self, key: &str) -> Option<usize> {
        self.ledger.lock().stage_of(key)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.ledger.lock().pending.contains_key(key)
    }

    /// Rendered message for `key` at the stage it occupies.
    pub fn message(&self, key: &str) -> Option<String> {
        let ledger = self.ledger.lock();
        let stage = ledger.stage_of(key)?;
        ledger.stages[stage].get(key).cloned()
    }
}

// ===========================================================================
// Tests
// ===========================================================================
