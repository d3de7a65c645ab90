//! The four per-cycle decision modules and the context they share.
//!
//! Every module fetches its own readings, raises or clears its own alerts
//! and pushes its own actuator changes. Modules never fail outward: any
//! expected failure becomes alert state and the module simply returns.

pub mod battery;
pub mod checks;
pub mod climate;
pub mod irrigation;
pub mod lighting;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::warn;

use crate::alerts::{Alert, AlertEngine, Severity};
use crate::config::Config;
use crate::directory::{group_by_sensor, ReadingsBySensor};
use crate::dispatch::Dispatcher;
use crate::gateway::Gateway;
use crate::model::{Actuator, ReadingKind, Settings};
use crate::schedule::{Clock, DailySchedule};

/// Everything one cycle's modules need, built fresh by the control loop.
pub struct Cycle {
    pub gateway: Arc<dyn Gateway>,
    pub alerts: Arc<AlertEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub config: Arc<Config>,
    pub settings: Settings,
    /// This cycle's actuator snapshot as fetched from the store.
    pub actuators: Vec<Actuator>,
    pub watering: Arc<tokio::sync::Mutex<DailySchedule>>,
    pub clock: Clock,
}

impl Cycle {
    /// Fetch readings of `kind` from the last `window`, grouped by sensor.
    /// A failed fetch raises the kind's fetch alert and yields `None`.
    pub async fn fetch(&self, kind: ReadingKind, window: Duration) -> Option<ReadingsBySensor> {
        let since = self.clock.now() - window;
        let key = kind.fetch_key();
        match self.gateway.readings(kind, since).await {
            Ok(readings) => {
                self.alerts.clear(&key);
                Some(group_by_sensor(readings))
            }
            Err(e) => {
                let message = format!("Fetching {} data failed\n{e}", kind.label());
                warn!(kind = kind.as_param(), "{message}");
                self.alerts.raise(Alert::new(Severity::Mid, message, key));
                None
            }
        }
    }

    /// Persist and drive one actuator's state; both run concurrently.
    pub async fn push_state(&self, actuator: &Actuator) {
        let persist = self.gateway.set_actuator_state(&actuator.name, actuator.state);
        let drive = self.dispatcher.apply(&self.alerts, actuator);
        let (persisted, ()) = tokio::join!(persist, drive);

        let key = format!("update_state_{}", actuator.name);
        match persisted {
            Ok(()) => self.alerts.clear(&key),
            Err(e) => {
                let message = format!("Updating the state of actuator {} failed\n{e}", actuator.name);
                warn!(actuator = %actuator.name, "{message}");
                self.alerts.raise(Alert::new(Severity::Mid, message, key));
            }
        }
    }

    /// Push every actuator concurrently and wait for all of them.
    pub async fn push_all<'a>(&self, actuators: impl IntoIterator<Item = &'a Actuator>) {
        join_all(actuators.into_iter().map(|a| self.push_state(a))).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Climate,
    Irrigation,
    Lighting,
    Battery,
}

impl Module {
    pub const ALL: [Module; 4] = [
        Module::Climate,
        Module::Irrigation,
        Module::Lighting,
        Module::Battery,
    ];

    pub async fn run(self, cycle: &Cycle) {
        match self {
            Self::Climate => climate::run(cycle).await,
            Self::Irrigation => irrigation::run(cycle).await,
            Self::Lighting => lighting::run(cycle).await,
            Self::Battery => battery::run(cycle).await,
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Climate => "climate",
            Self::Irrigation => "irrigation",
            Self::Lighting => "lighting",
            Self::Battery => "battery",
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::model::Category;
    use crate::testing::{
        actuator, reading, settings, test_config, FakeGateway, RecordingNotifier, RecordingSwitch,
    };
    use time::macros::datetime;
    use time::{OffsetDateTime, UtcOffset};

    /// A cycle over fakes. The dispatcher routes every category to `switch`.
    pub(crate) struct Harness {
        pub gateway: Arc<FakeGateway>,
        pub switch: Arc<RecordingSwitch>,
        pub notifier: Arc<RecordingNotifier>,
        pub cycle: Cycle,
    }

    impl Harness {
        pub fn new(config: Config, actuators: Vec<Actuator>, now: OffsetDateTime) -> Self {
            let gateway = Arc::new(FakeGateway::default());
            let switch = Arc::new(RecordingSwitch::default());
            let notifier = Arc::new(RecordingNotifier::default());
            let dispatcher = [Category::Fan, Category::Heater, Category::Lights, Category::Water]
                .into_iter()
                .fold(Dispatcher::new(), |d, c| d.with_peer(c, switch.clone()));
            let alerts = AlertEngine::new(
                notifier.clone(),
                config.email.error_stages,
                UtcOffset::UTC,
            );
            let cycle = Cycle {
                gateway: gateway.clone(),
                alerts: Arc::new(alerts),
                dispatcher: Arc::new(dispatcher),
                config: Arc::new(config),
                settings: settings(),
                actuators,
                watering: Arc::default(),
                clock: Clock::Fixed(now),
            };
            Self {
                gateway,
                switch,
                notifier,
                cycle,
            }
        }

        pub fn alerts(&self) -> &AlertEngine {
            &self.cycle.alerts
        }
    }

    fn harness() -> Harness {
        Harness::new(
            test_config(),
            vec![actuator("fan01", Category::Fan, false)],
            datetime!(2024-05-10 12:00 UTC),
        )
    }

    #[tokio::test]
    async fn fetch_queries_window_and_groups() {
        let h = harness();
        h.gateway.set_readings(
            ReadingKind::Temperature,
            Ok(vec![reading("t1", 20.0), reading("t2", 21.0), reading("t1", 22.0)]),
        );
        let grouped = h
            .cycle
            .fetch(ReadingKind::Temperature, Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(
            h.gateway.queries(),
            vec![(ReadingKind::Temperature, datetime!(2024-05-10 11:55 UTC))]
        );
    }

    #[tokio::test]
    async fn failed_fetch_raises_then_clears() {
        let h = harness();
        h.gateway.set_readings(
            ReadingKind::SoilMoisture,
            Err(GatewayError::Status {
                status: 500,
                body: "boom".into(),
            }),
        );
        assert!(h
            .cycle
            .fetch(ReadingKind::SoilMoisture, Duration::from_secs(60))
            .await
            .is_none());
        let msg = h.alerts().message("fetch_soil").unwrap();
        assert!(msg.contains("MID: Fetching soil moisture data failed\nStatus code: 500"));
        assert!(msg.ends_with("Response body: boom"));

        h.gateway.set_readings(ReadingKind::SoilMoisture, Ok(vec![]));
        assert!(h
            .cycle
            .fetch(ReadingKind::SoilMoisture, Duration::from_secs(60))
            .await
            .is_some());
        assert_eq!(h.alerts().stage_of("fetch_soil"), None);
    }

    #[tokio::test]
    async fn push_state_persists_and_drives() {
        let h = harness();
        h.cycle
            .push_state(&actuator("fan01", Category::Fan, true))
            .await;
        assert_eq!(h.gateway.pushes(), vec![("fan01".to_string(), true)]);
        assert_eq!(h.switch.calls(), vec![("fan01".to_string(), Category::Fan, true)]);
    }

    #[tokio::test]
    async fn failed_persist_raises_update_state() {
        let h = harness();
        h.gateway.fail_persist(GatewayError::Transport("refused".into()));
        h.cycle
            .push_state(&actuator("fan01", Category::Fan, true))
            .await;
        // Hardware is still driven.
        assert_eq!(h.switch.calls().len(), 1);
        assert!(h.alerts().is_pending("update_state_fan01"));
        assert_eq!(h.alerts().total_severity(), Severity::Mid.weight());
    }
}
