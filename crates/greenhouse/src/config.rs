//! TOML config file loading and validation.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use time::macros::format_description;
use time::UtcOffset;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub rest: RestConfig,
    pub email: EmailConfig,
    #[serde(default)]
    pub control: ControlConfig,
    pub sensors: SensorConfig,
    pub ranges: RangeConfig,
    #[serde(default)]
    pub irrigation: IrrigationConfig,
    #[serde(default)]
    pub smartplugs: Vec<SmartPlugEntry>,
    #[serde(default)]
    pub relays: RelayConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    pub base_url: String,
    #[serde(default)]
    pub local_base_url: Option<String>,
    #[serde(default = "default_probe_url")]
    pub probe_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_server: String,
    pub tls_port: u16,
    pub username: String,
    pub password: String,
    pub admin_email: String,
    /// Consecutive cycles a fault must persist before it can be e-mailed.
    pub error_stages: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    /// `±HH:MM`; the host's local offset when absent.
    #[serde(default)]
    pub utc_offset: Option<String>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            cycle_secs: default_cycle_secs(),
            utc_offset: None,
        }
    }
}

/// Expected sensor counts and how far sensors of one kind may disagree.
#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub temperature: usize,
    #[serde(default)]
    pub humidity: Option<usize>,
    pub soil: usize,
    pub battery: usize,
    pub fanspeed: usize,
    pub temperature_margin: f64,
    pub humidity_margin: f64,
}

impl SensorConfig {
    pub fn humidity(&self) -> usize {
        self.humidity.unwrap_or(self.temperature)
    }
}

/// Plausible reading ranges. Readings outside them point at a faulty sensor,
/// not at a condition to actuate on.
#[derive(Debug, Clone, Deserialize)]
pub struct RangeConfig {
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub min_humidity: f64,
    pub max_humidity: f64,
    pub min_soil_moisture: f64,
    pub max_soil_moisture: f64,
    pub min_on_fanspeed: f64,
    pub max_off_fanspeed: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IrrigationConfig {
    /// Soil sensor name -> solenoid actuator name.
    #[serde(default)]
    pub solenoids: BTreeMap<String, String>,
    /// Solenoid actuator name -> seconds to keep it open.
    #[serde(default)]
    pub durations: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmartPlugEntry {
    pub name: String,
    pub host: String,
    #[serde(default = "default_plug_port")]
    pub port: u16,
}

/// Relay peripherals, one host per actuator category.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default)]
    pub fan: Option<String>,
    #[serde(default)]
    pub lights: Option<String>,
    #[serde(default)]
    pub water: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_relay_port(),
            fan: None,
            lights: None,
            water: None,
        }
    }
}

fn default_probe_url() -> String {
    "http://www.google.com".to_string()
}

fn default_cycle_secs() -> u64 {
    5
}

fn default_plug_port() -> u16 {
    9999
}

fn default_relay_port() -> u16 {
    5005
}

pub fn parse_utc_offset(s: &str) -> Result<UtcOffset> {
    UtcOffset::parse(
        s.trim(),
        format_description!("[offset_hour sign:mandatory]:[offset_minute]"),
    )
    .with_context(|| format!("invalid utc_offset '{s}' (expected e.g. -05:00)"))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file, reporting every violation found.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_rest(&mut errors);
        self.validate_email(&mut errors);
        self.validate_control(&mut errors);
        self.validate_sensors(&mut errors);
        self.validate_irrigation(&mut errors);
        self.validate_actuators(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_rest(&self, errors: &mut Vec<String>) {
        let urls = [
            ("rest.base_url", Some(&self.rest.base_url)),
            ("rest.local_base_url", self.rest.local_base_url.as_ref()),
            ("rest.probe_url", Some(&self.rest.probe_url)),
        ];
        for (field, url) in urls {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    errors.push(format!("{field}: '{url}' is not an http(s) url"));
                }
            }
        }
    }

    fn validate_email(&self, errors: &mut Vec<String>) {
        let e = &self.email;
        if e.smtp_server.trim().is_empty() {
            errors.push("email.smtp_server is empty".to_string());
        }
        if e.tls_port == 0 {
            errors.push("email.tls_port must be non-zero".to_string());
        }
        for (field, addr) in [("email.username", &e.username), ("email.admin_email", &e.admin_email)] {
            if !addr.contains('@') {
                errors.push(format!("{field}: '{addr}' is not an e-mail address"));
            }
        }
        if e.error_stages == 0 {
            errors.push("email.error_stages must be at least 1".to_string());
        }
    }

    fn validate_control(&self, errors: &mut Vec<String>) {
        if self.control.cycle_secs == 0 {
            errors.push("control.cycle_secs must be positive".to_string());
        }
        if let Some(offset) = &self.control.utc_offset {
            if let Err(e) = parse_utc_offset(offset) {
                errors.push(format!("control.{e}"));
            }
        }
    }

    fn validate_sensors(&self, errors: &mut Vec<String>) {
        let s = &self.sensors;
        for (field, margin) in [
            ("sensors.temperature_margin", s.temperature_margin),
            ("sensors.humidity_margin", s.humidity_margin),
        ] {
            if !(margin >= 0.0) {
                errors.push(format!("{field} must be non-negative, got {margin}"));
            }
        }

        let r = &self.ranges;
        for (name, min, max) in [
            ("temperature", r.min_temperature, r.max_temperature),
            ("humidity", r.min_humidity, r.max_humidity),
            ("soil_moisture", r.min_soil_moisture, r.max_soil_moisture),
        ] {
            if !(min <= max) {
                errors.push(format!(
                    "ranges: min_{name} ({min}) must not exceed max_{name} ({max})"
                ));
            }
        }
        if !(r.max_off_fanspeed <= r.min_on_fanspeed) {
            errors.push(format!(
                "ranges: max_off_fanspeed ({}) must not exceed min_on_fanspeed ({})",
                r.max_off_fanspeed, r.min_on_fanspeed
            ));
        }
    }

    fn validate_irrigation(&self, errors: &mut Vec<String>) {
        for (sensor, solenoid) in &self.irrigation.solenoids {
            match self.irrigation.durations.get(solenoid) {
                None => errors.push(format!(
                    "irrigation: solenoid '{solenoid}' (for sensor '{sensor}') has no duration"
                )),
                Some(0) => errors.push(format!(
                    "irrigation: duration for solenoid '{solenoid}' must be positive"
                )),
                Some(_) => {}
            }
        }
    }

    fn validate_actuators(&self, errors: &mut Vec<String>) {
        let mut seen: HashSet<&str> = HashSet::new();
        for (i, plug) in self.smartplugs.iter().enumerate() {
            if plug.name.trim().is_empty() {
                errors.push(format!("smartplugs[{i}]: name is empty"));
            } else if !seen.insert(&plug.name) {
                errors.push(format!("smartplug '{}': duplicate name", plug.name));
            }
            if plug.host.trim().is_empty() {
                errors.push(format!("smartplugs[{i}]: host is empty"));
            }
        }

        let relays = &self.relays;
        let any_peer = relays.fan.is_some() || relays.lights.is_some() || relays.water.is_some();
        if any_peer && relays.port == 0 {
            errors.push("relays.port must be non-zero".to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================
