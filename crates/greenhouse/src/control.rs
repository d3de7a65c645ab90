//! The control loop: one cycle every `cycle_secs`, each picking an endpoint,
//! fetching settings and actuators, running manual or automated mode and
//! flushing alerts on schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::future::join_all;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::alerts::{Alert, AlertEngine, Severity};
use crate::config::Config;
use crate::decision::checks::check_fans;
use crate::decision::{Cycle, Module};
use crate::dispatch::Dispatcher;
use crate::gateway::{select_endpoint, Gateway, GatewayError, Uplink};
use crate::model::{Actuator, Settings};
use crate::schedule::{Clock, DailySchedule};

pub const CONNECTION_KEY: &str = "connection_refused";
pub const FATAL_KEY: &str = "greenhouse_killer";

/// Manual mode only re-applies stored states, so the sensors need less time.
const MANUAL_FAN_SETTLE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    /// Settings could not be fetched; nothing else ran.
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// The data store could not be reached at all.
    #[error("{0}")]
    Connection(GatewayError),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

pub struct ControlLoop {
    config: Arc<Config>,
    uplink: Arc<dyn Uplink>,
    alerts: Arc<AlertEngine>,
    dispatcher: Arc<Dispatcher>,
    clock: Clock,
    email_addresses: Vec<String>,
    watering: Arc<tokio::sync::Mutex<DailySchedule>>,
    flush: DailySchedule,
}

impl ControlLoop {
    pub fn new(
        config: Arc<Config>,
        uplink: Arc<dyn Uplink>,
        alerts: Arc<AlertEngine>,
        dispatcher: Arc<Dispatcher>,
        clock: Clock,
    ) -> Self {
        Self {
            config,
            uplink,
            alerts,
            dispatcher,
            clock,
            email_addresses: Vec::new(),
            watering: Arc::default(),
            flush: DailySchedule::default(),
        }
    }

    /// Recipients from the latest settings, or the admin before any arrived.
    pub fn recipients(&self) -> Vec<String> {
        if self.email_addresses.is_empty() {
            vec![self.config.email.admin_email.clone()]
        } else {
            self.email_addresses.clone()
        }
    }

    /// Run cycles until a fatal error or until `shutdown` resolves.
    ///
    /// `shutdown` is only observed between cycles, so a cycle in progress
    /// (watering included) always finishes. Manual mode is paced by the
    /// same `cycle_secs` cadence as automated mode.
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);
        let mut ticker = interval(Duration::from_secs(self.config.control.cycle_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("stopping before the next cycle");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }
            let result = self.run_cycle().await;
            self.settle(result).await?;
        }
    }

    /// Turn one cycle's result into alert state. Only a fatal error is
    /// returned, after it has been raised and notified.
    pub async fn settle(&self, result: Result<CycleOutcome, CycleError>) -> anyhow::Result<()> {
        match result {
            Ok(outcome) => {
                debug!(?outcome, "cycle finished");
                Ok(())
            }
            Err(CycleError::Connection(e)) => {
                let message = format!(
                    "Connection refused error. Rest API server may be down. Exception message: {e}"
                );
                error!("{message}");
                self.alerts
                    .raise(Alert::new(Severity::High, message, CONNECTION_KEY));
                self.alerts.notify(&self.recipients(), false).await;
                Ok(())
            }
            Err(CycleError::Fatal(e)) => {
                let message = format!(
                    "An error occurred and now the greenhouse server is dead. Error message: {e:#}. See log output for details"
                );
                error!("{message}");
                self.alerts
                    .raise(Alert::new(Severity::Critical, message, FATAL_KEY));
                self.alerts.notify(&self.recipients(), false).await;
                Err(e)
            }
        }
    }

    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let online = self.uplink.is_online().await;
        let endpoint = select_endpoint(online, &self.config.rest);
        if !online {
            warn!(%endpoint, "internet unreachable");
        }
        let gateway = self.uplink.gateway(endpoint);

        if let Err(e) = gateway.report_alive().await {
            warn!("liveness report failed: {e}");
        }

        let settings = match gateway.settings().await {
            Ok(settings) => {
                self.alerts.clear("fetch_settings");
                settings
            }
            Err(e) => {
                self.absorb(e, "fetch_settings", "Fetching settings failed")?;
                return Ok(CycleOutcome::Skipped);
            }
        };
        self.init_schedules(&settings).await;
        self.email_addresses = settings.email_addresses.clone();

        let actuators = match gateway.actuators().await {
            Ok(actuators) => {
                self.alerts.clear("fetch_actuators");
                Some(actuators)
            }
            Err(e) => {
                self.absorb(e, "fetch_actuators", "Fetching actuators data failed")?;
                None
            }
        };

        if let Some(actuators) = actuators {
            let manual = settings.is_manual_mode;
            let cycle = Arc::new(self.cycle(gateway, settings, actuators));
            if manual {
                info!("running manual mode");
                self.manual(&cycle).await;
            } else {
                info!("running automated mode");
                self.automated(cycle).await?;
            }
        }

        if self.flush.take_due(self.clock.now()) {
            info!("scheduled alert flush");
            self.alerts.notify(&self.recipients(), true).await;
        }

        self.alerts.clear(CONNECTION_KEY);
        Ok(CycleOutcome::Completed)
    }

    /// Raise a HIGH alert for a bad response; escalate anything else.
    fn absorb(&self, err: GatewayError, key: &str, what: &str) -> Result<(), CycleError> {
        match err {
            GatewayError::Status { .. } => {
                let message = format!("{what}\n{err}");
                warn!("{message}");
                self.alerts.raise(Alert::new(Severity::High, message, key));
                Ok(())
            }
            GatewayError::Transport(_) => Err(CycleError::Connection(err)),
            GatewayError::Decode(_) => Err(CycleError::Fatal(anyhow!("{what}: {err}"))),
        }
    }

    async fn init_schedules(&mut self, settings: &Settings) {
        let now = self.clock.now();
        let mut watering = self.watering.lock().await;
        if watering.is_empty() {
            *watering = DailySchedule::starting(&settings.watering_times, now);
            debug!(slots = watering.moments().len(), "watering schedule set");
        }
        if self.flush.is_empty() {
            self.flush = DailySchedule::starting(&settings.error_flush_times, now);
            debug!(slots = self.flush.moments().len(), "flush schedule set");
        }
    }

    fn cycle(&self, gateway: Arc<dyn Gateway>, settings: Settings, actuators: Vec<Actuator>) -> Cycle {
        Cycle {
            gateway,
            alerts: Arc::clone(&self.alerts),
            dispatcher: Arc::clone(&self.dispatcher),
            config: Arc::clone(&self.config),
            settings,
            actuators,
            watering: Arc::clone(&self.watering),
            clock: self.clock,
        }
    }

    /// Re-apply the stored states to the hardware and check the fans.
    async fn manual(&self, cycle: &Cycle) {
        join_all(
            cycle
                .actuators
                .iter()
                .map(|a| self.dispatcher.apply(&self.alerts, a)),
        )
        .await;
        check_fans(cycle, &cycle.actuators, MANUAL_FAN_SETTLE).await;
        self.alerts.notify(&self.recipients(), false).await;
    }

    /// Run every decision module concurrently and wait for all of them.
    async fn automated(&self, cycle: Arc<Cycle>) -> Result<(), CycleError> {
        let mut modules = JoinSet::new();
        for module in Module::ALL {
            let cycle = Arc::clone(&cycle);
            modules.spawn(async move {
                module.run(&cycle).await;
                module
            });
        }
        // Join every module even after one has failed.
        let mut failure = None;
        while let Some(joined) = modules.join_next().await {
            match joined {
                Ok(module) => debug!(%module, "module finished"),
                Err(e) => {
                    error!("decision module failed: {e}");
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(anyhow!("decision module failed: {e}").into());
        }

        self.alerts.notify(&self.recipients(), false).await;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
