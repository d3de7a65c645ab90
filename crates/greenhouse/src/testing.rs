//! Hand-written fakes and fixtures shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use time::macros::time;
use time::OffsetDateTime;
use tokio::time::Instant;

use crate::alerts::Notifier;
use crate::config::{
    Config, ControlConfig, EmailConfig, IrrigationConfig, RangeConfig, RelayConfig, RestConfig,
    SensorConfig, SmartPlugEntry,
};
use crate::dispatch::{DriverError, Switch};
use crate::gateway::{Gateway, GatewayError, Uplink};
use crate::model::{Actuator, Bounds, Category, Health, LightWindow, Reading, ReadingKind, Settings};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn reading(sensor: &str, value: f64) -> Reading {
    Reading {
        sensor_id: sensor.to_string(),
        value,
        health: None,
    }
}

pub fn battery(sensor: &str, health: Health) -> Reading {
    Reading {
        sensor_id: sensor.to_string(),
        value: 3.3,
        health: Some(health),
    }
}

pub fn actuator(name: &str, category: Category, state: bool) -> Actuator {
    Actuator {
        name: name.to_string(),
        category,
        state,
    }
}

/// Readings for `count` sensors named `{prefix}1..={prefix}{count}`, all at `value`.
pub fn readings(prefix: &str, count: usize, value: f64) -> Vec<Reading> {
    (1..=count)
        .map(|i| reading(&format!("{prefix}{i}"), value))
        .collect()
}

pub fn settings() -> Settings {
    Settings {
        temperature: Bounds { min: 15.0, max: 30.0 },
        soil_moisture: Bounds { min: 20.0, max: 90.0 },
        lights: LightWindow {
            start_time: time!(22:00),
            end_time: time!(06:00),
        },
        email_addresses: vec!["grower@example.com".to_string()],
        watering_times: vec![],
        error_flush_times: vec![],
        is_manual_mode: false,
    }
}

pub fn test_config() -> Config {
    Config {
        rest: RestConfig {
            base_url: "http://primary:5000".into(),
            local_base_url: Some("http://local:5000".into()),
            probe_url: "http://probe".into(),
        },
        email: EmailConfig {
            smtp_server: "smtp.example.com".into(),
            tls_port: 587,
            username: "greenhouse@example.com".into(),
            password: "secret".into(),
            admin_email: "admin@example.com".into(),
            error_stages: 1,
        },
        control: ControlConfig {
            cycle_secs: 5,
            utc_offset: None,
        },
        sensors: SensorConfig {
            temperature: 2,
            humidity: None,
            soil: 1,
            battery: 1,
            fanspeed: 0,
            temperature_margin: 5.0,
            humidity_margin: 10.0,
        },
        ranges: RangeConfig {
            min_temperature: 0.0,
            max_temperature: 50.0,
            min_humidity: 0.0,
            max_humidity: 100.0,
            min_soil_moisture: 0.0,
            max_soil_moisture: 100.0,
            min_on_fanspeed: 500.0,
            max_off_fanspeed: 100.0,
        },
        irrigation: IrrigationConfig {
            solenoids: BTreeMap::from([("soil1".to_string(), "solenoid01".to_string())]),
            durations: BTreeMap::from([("solenoid01".to_string(), 30)]),
        },
        smartplugs: vec![SmartPlugEntry {
            name: "heater01".into(),
            host: "127.0.0.1".into(),
            port: 9999,
        }],
        relays: RelayConfig::default(),
    }
}

// ---------------------------------------------------------------------------
// Notification sink
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

/// Records every notification; optionally takes `delay` to "send" one.
#[derive(Default)]
pub struct RecordingNotifier {
    delay: Option<Duration>,
    sent: Mutex<Vec<Sent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingNotifier {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, subject: &str, body: &str, recipients: &[String]) -> anyhow::Result<()> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().push(Sent {
            subject: subject.to_string(),
            body: body.to_string(),
            recipients: recipients.to_vec(),
        });
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// In-memory data store. Reading kinds never configured return no readings.
pub struct FakeGateway {
    settings: Mutex<Result<Settings, GatewayError>>,
    actuators: Mutex<Result<Vec<Actuator>, GatewayError>>,
    readings: Mutex<HashMap<ReadingKind, Result<Vec<Reading>, GatewayError>>>,
    persist_error: Mutex<Option<GatewayError>>,
    alive_error: Mutex<Option<GatewayError>>,
    pushes: Mutex<Vec<(String, bool, Instant)>>,
    queries: Mutex<Vec<(ReadingKind, OffsetDateTime)>>,
    alive: AtomicUsize,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self {
            settings: Mutex::new(Ok(settings())),
            actuators: Mutex::new(Ok(vec![])),
            readings: Mutex::new(HashMap::new()),
            persist_error: Mutex::new(None),
            alive_error: Mutex::new(None),
            pushes: Mutex::new(vec![]),
            queries: Mutex::new(vec![]),
            alive: AtomicUsize::new(0),
        }
    }
}

impl FakeGateway {
    pub fn set_settings(&self, settings: Result<Settings, GatewayError>) {
        *self.settings.lock() = settings;
    }

    pub fn set_actuators(&self, actuators: Result<Vec<Actuator>, GatewayError>) {
        *self.actuators.lock() = actuators;
    }

    pub fn set_readings(&self, kind: ReadingKind, readings: Result<Vec<Reading>, GatewayError>) {
        self.readings.lock().insert(kind, readings);
    }

    pub fn fail_persist(&self, error: GatewayError) {
        *self.persist_error.lock() = Some(error);
    }

    pub fn fail_alive(&self, error: GatewayError) {
        *self.alive_error.lock() = Some(error);
    }

    /// Persisted state changes, in call order.
    pub fn pushes(&self) -> Vec<(String, bool)> {
        self.pushes
            .lock()
            .iter()
            .map(|(name, on, _)| (name.clone(), *on))
            .collect()
    }

    pub fn pushes_with_time(&self) -> Vec<(String, bool, Instant)> {
        self.pushes.lock().clone()
    }

    pub fn queries(&self) -> Vec<(ReadingKind, OffsetDateTime)> {
        self.queries.lock().clone()
    }

    pub fn alive_count(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    async fn settings(&self) -> Result<Settings, GatewayError> {
        self.settings.lock().clone()
    }

    async fn actuators(&self) -> Result<Vec<Actuator>, GatewayError> {
        self.actuators.lock().clone()
    }

    async fn readings(
        &self,
        kind: ReadingKind,
        since: OffsetDateTime,
    ) -> Result<Vec<Reading>, GatewayError> {
        self.queries.lock().push((kind, since));
        self.readings
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or(Ok(vec![]))
    }

    async fn set_actuator_state(&self, name: &str, on: bool) -> Result<(), GatewayError> {
        self.pushes
            .lock()
            .push((name.to_string(), on, Instant::now()));
        match self.persist_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn report_alive(&self) -> Result<(), GatewayError> {
        self.alive.fetch_add(1, Ordering::SeqCst);
        match self.alive_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Hands out the same fake gateway for any endpoint and remembers which
/// endpoints were asked for.
pub struct FakeUplink {
    online: AtomicBool,
    gateway: Arc<FakeGateway>,
    requested: Mutex<Vec<String>>,
}

impl FakeUplink {
    pub fn new(gateway: Arc<FakeGateway>) -> Self {
        Self {
            online: AtomicBool::new(true),
            gateway,
            requested: Mutex::new(vec![]),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().clone()
    }
}

#[async_trait]
impl Uplink for FakeUplink {
    async fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn gateway(&self, base_url: &str) -> Arc<dyn Gateway> {
        self.requested.lock().push(base_url.to_string());
        self.gateway.clone()
    }
}

// ---------------------------------------------------------------------------
// Switches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchFailure {
    Unreachable,
    Rejected,
}

#[derive(Default)]
pub struct RecordingSwitch {
    calls: Mutex<Vec<(String, Category, bool)>>,
    failure: Mutex<Option<SwitchFailure>>,
}

impl RecordingSwitch {
    pub fn fail_with(&self, failure: Option<SwitchFailure>) {
        *self.failure.lock() = failure;
    }

    pub fn calls(&self) -> Vec<(String, Category, bool)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Switch for RecordingSwitch {
    async fn set(&self, name: &str, category: Category, on: bool) -> Result<(), DriverError> {
        self.calls.lock().push((name.to_string(), category, on));
        match *self.failure.lock() {
            None => Ok(()),
            Some(SwitchFailure::Unreachable) => Err(DriverError::Unreachable {
                target: "test-switch".to_string(),
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }),
            Some(SwitchFailure::Rejected) => Err(DriverError::Rejected(
                "Error from the smartplug: {\"err_code\":-1}".to_string(),
            )),
        }
    }
}
