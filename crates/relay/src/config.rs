//! `relay.toml` loading and validation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listener: ListenerConfig,
    #[serde(default)]
    pub relays: Vec<RelayEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Only commands from this address are honoured.
    pub allowed_peer: IpAddr,
    #[serde(default = "default_active_low")]
    pub active_low: bool,
    /// Water relay opened alongside any other water relay.
    #[serde(default)]
    pub master_valve: Option<String>,
}

fn default_port() -> u16 {
    5005
}

fn default_active_low() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fan,
    Heater,
    Lights,
    #[serde(alias = "solenoid")]
    Water,
}

impl Category {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fan" => Some(Self::Fan),
            "heater" => Some(Self::Heater),
            "lights" => Some(Self::Lights),
            "water" | "solenoid" => Some(Self::Water),
            _ => None,
        }
    }

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

#[derive(Debug, Clone, Deserialize)]
pub struct RelayEntry {
    pub name: String,
    pub category: Category,
    pub gpio_pin: i64,
}

// ---------------------------------------------------------------------------
// GPIO whitelist
// ---------------------------------------------------------------------------

/// BCM GPIO pins on the 40-pin header available for general use.
/// GPIO 0-1 belong to the ID EEPROM.
const VALID_GPIO_PINS: &[i64] = &[
    2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
];

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Check every entry and report all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.listener.port == 0 {
            errors.push("listener: port must be non-zero".to_string());
        }
        if self.relays.is_empty() {
            errors.push("at least one [[relays]] entry is required".to_string());
        }

        let mut seen_names = HashSet::new();
        let mut seen_pins = HashSet::new();
        for (i, r) in self.relays.iter().enumerate() {
            let ctx = || format!("relay[{i}] ({})", r.name);

            if r.name.trim().is_empty() {
                errors.push(format!("relay[{i}]: name must not be empty"));
            } else if !seen_names.insert(r.name.as_str()) {
                errors.push(format!("{}: duplicate relay name", ctx()));
            }

            if !VALID_GPIO_PINS.contains(&r.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is not a valid BCM GPIO pin (allowed: 2-27)",
                    ctx(),
                    r.gpio_pin
                ));
            } else if !seen_pins.insert(r.gpio_pin) {
                errors.push(format!(
                    "{}: gpio_pin {} is already used by another relay",
                    ctx(),
                    r.gpio_pin
                ));
            }
        }

        if let Some(master) = &self.listener.master_valve {
            match self.relays.iter().find(|r| &r.name == master) {
                None => errors.push(format!(
                    "listener: master_valve '{master}' is not a configured relay"
                )),
                Some(r) if r.category != Category::Water => errors.push(format!(
                    "listener: master_valve '{master}' must be a water relay, got {}",
                    r.category
                )),
                Some(_) => {}
            }
        }

        if !errors.is_empty() {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
        Ok(())
    }

    /// `(name, pin)` pairs for the board driver.
    pub fn pins(&self) -> Vec<(String, u8)> {
        self.relays
            .iter()
            .filter_map(|r| Some((r.name.clone(), u8::try_from(r.gpio_pin).ok()?)))
            .collect()
    }
}

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
