//! Wire types exchanged with the greenhouse REST API.

use std::fmt;

use serde::{Deserialize, Deserializer};
use time::Time;

use crate::schedule::{deserialize_time_of_day, deserialize_times_of_day};

// ---------------------------------------------------------------------------
// Actuators
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fan,
    Heater,
    Lights,
    #[serde(alias = "solenoid")]
    Water,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::Heater => "heater",
            Self::Lights => "lights",
            Self::Water => "water",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One actuator as stored by the API. The `state` field is the commanded
/// on/off state; it is mutated locally and pushed back within one cycle.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Actuator {
    pub name: String,
    #[serde(rename = "type")]
    pub category: Category,
    pub state: bool,
}

// ---------------------------------------------------------------------------
// Sensor readings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Critical,
    #[serde(other)]
    Normal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reading {
    #[serde(rename = "sensor", deserialize_with = "sensor_name")]
    pub sensor_id: String,
    #[serde(rename = "reading")]
    pub value: f64,
    #[serde(default)]
    pub health: Option<Health>,
}

#[derive(Deserialize)]
struct SensorRef {
    name: String,
}

fn sensor_name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    SensorRef::deserialize(deserializer).map(|s| s.name)
}

/// The `type` query parameter of `GET /data_readings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadingKind {
    Temperature,
    Humidity,
    SoilMoisture,
    Battery,
    FanSpeed,
}

impl ReadingKind {
    pub fn as_param(self) -> &'static str {
        match self {
            Self::Temperature => "temp",
            Self::Humidity => "humid",
            Self::SoilMoisture => "soil",
            Self::Battery => "batt",
            Self::FanSpeed => "fanspeed",
        }
    }

    /// Human-readable name used in alert messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::SoilMoisture => "soil moisture",
            Self::Battery => "battery",
            Self::FanSpeed => "fan speed",
        }
    }

    /// Alert key raised when fetching this kind of reading fails.
    pub fn fetch_key(self) -> String {
        format!("fetch_{}", self.as_param())
    }

    /// Alert key raised when fewer sensors than expected reported.
    pub fn missing_key(self) -> String {
        format!("missing_sensors_{}", self.as_param())
    }
}

// ---------------------------------------------------------------------------
// Runtime settings (GET /settings)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    pub temperature: Bounds,
    pub soil_moisture: Bounds,
    pub lights: LightWindow,
    #[serde(default)]
    pub email_addresses: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_times_of_day")]
    pub watering_times: Vec<Time>,
    #[serde(default, deserialize_with = "deserialize_times_of_day")]
    pub error_flush_times: Vec<Time>,
    #[serde(default)]
    pub is_manual_mode: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LightWindow {
    #[serde(deserialize_with = "deserialize_time_of_day")]
    pub start_time: Time,
    #[serde(deserialize_with = "deserialize_time_of_day")]
    pub end_time: Time,
}

// ===========================================================================
// Tests
// ===========================================================================
