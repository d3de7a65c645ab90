//! Relay outputs. The `gpio` feature gates the rppal driver; without it a
//! mock keeps relay states in memory and logs every change.

use anyhow::Result;
use std::collections::HashMap;
use tracing::{info, warn};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

fn label(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

// ---------------------------------------------------------------------------
// GPIO relay board (requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------
#[cfg(feature = "gpio")]
pub(crate) struct RelayBoard {
    pins: HashMap<String, OutputPin>, // relay name -> GPIO pin
    active_low: bool,
}

#[cfg(feature = "gpio")]
impl RelayBoard {
    /// Claims every pin and drives it to OFF.
    pub(crate) fn new(relay_to_gpio: &[(String, u8)], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new()?;
        let mut pins = HashMap::new();
        for (name, pin_num) in relay_to_gpio {
            let pin = gpio.get(*pin_num)?.into_output();
            info!(relay = %name, gpio = pin_num, "relay registered");
            pins.insert(name.clone(), pin);
        }
        let mut board = Self { pins, active_low };
        board.all_off();
        Ok(board)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.pins.contains_key(name)
    }

    pub(crate) fn set(&mut self, name: &str, on: bool) {
        let Some(pin) = self.pins.get_mut(name) else {
            warn!(relay = %name, "unknown relay");
            return;
        };
        // Active-low boards energise the coil on LOW.
        if on != self.active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
        info!(relay = %name, "relay {}", label(on));
    }

    pub(crate) fn all_off(&mut self) {
        let names: Vec<String> = self.pins.keys().cloned().collect();
        for name in names {
            self.set(&name, false);
        }
    }
}

// ---------------------------------------------------------------------------
// Mock relay board (no hardware)
// ---------------------------------------------------------------------------
#[cfg(not(feature = "gpio"))]
pub(crate) struct RelayBoard {
    pub(super) relays: HashMap<String, bool>, // relay name -> on/off
}

#[cfg(not(feature = "gpio"))]
impl RelayBoard {
    pub(crate) fn new(relay_to_gpio: &[(String, u8)], _active_low: bool) -> Result<Self> {
        let mut relays = HashMap::new();
        for (name, pin_num) in relay_to_gpio {
            info!(relay = %name, gpio = pin_num, "[mock-gpio] relay registered (not wired)");
            relays.insert(name.clone(), false);
        }
        info!("[mock-gpio] relay board initialised (no hardware)");
        Ok(Self { relays })
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.relays.contains_key(name)
    }

    pub(crate) fn set(&mut self, name: &str, on: bool) {
        if let Some(state) = self.relays.get_mut(name) {
            *state = on;
            info!(relay = %name, "[mock-gpio] relay {}", label(on));
        } else {
            warn!(relay = %name, "[mock-gpio] unknown relay");
        }
    }

    pub(crate) fn all_off(&mut self) {
        let names: Vec<String> = self.relays.keys().cloned().collect();
        for name in names {
            self.set(&name, false);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
