//! Soil moisture checks and the scheduled watering of dry beds.

use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::alerts::{Alert, Severity};
use crate::directory::{find_actuator, ReadingsBySensor};
use crate::model::{Actuator, ReadingKind};

use super::checks::{check_range_and_margin, detect_missing_sensors, SensorLabel};
use super::Cycle;

const WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn run(cycle: &Cycle) {
    let Some(soil) = cycle.fetch(ReadingKind::SoilMoisture, WINDOW).await else {
        return;
    };

    let config = &cycle.config;
    detect_missing_sensors(
        &cycle.alerts,
        ReadingKind::SoilMoisture,
        &soil,
        config.sensors.soil,
        Severity::Mid,
        "24 hours",
    );
    check_for_leaks(cycle, &soil);
    check_range_and_margin(
        &cycle.alerts,
        ReadingKind::SoilMoisture,
        &soil,
        (config.ranges.min_soil_moisture, config.ranges.max_soil_moisture),
        None,
        SensorLabel {
            name: "Soil moisture",
            unit: "percent",
        },
    );

    let due = cycle.watering.lock().await.take_due(cycle.clock.now());
    if !due {
        return;
    }
    info!(sensors = soil.len(), "watering time reached");

    let jobs: Vec<(Actuator, Duration)> = soil
        .iter()
        .filter_map(|(sensor, readings)| plan_watering(cycle, sensor, readings.first()?.value))
        .collect();
    join_all(jobs.into_iter().map(|(solenoid, open_for)| water(cycle, solenoid, open_for))).await;
}

/// A bed wetter than the configured maximum most likely has a leak.
fn check_for_leaks(cycle: &Cycle, soil: &ReadingsBySensor) {
    let max = cycle.settings.soil_moisture.max;
    for (sensor, readings) in soil {
        let Some(latest) = readings.first() else {
            continue;
        };
        let key = format!("exceeds_max_soil_{sensor}");
        if latest.value > max {
            let message = format!(
                "Soil moisture sensor {sensor} reading above configured max\n\tYou may need to check if the water is leaking.\n\tReading: {:.2}",
                latest.value
            );
            warn!(sensor = %sensor, reading = latest.value, max, "soil above max");
            cycle.alerts.raise(Alert::new(Severity::Mid, message, key));
        } else {
            cycle.alerts.clear(&key);
        }
    }
}

/// The solenoid to open for `sensor`, and for how long, if the bed is dry.
fn plan_watering(cycle: &Cycle, sensor: &str, latest: f64) -> Option<(Actuator, Duration)> {
    if latest >= cycle.settings.soil_moisture.min {
        return None;
    }
    let irrigation = &cycle.config.irrigation;
    let solenoid = irrigation.solenoids.get(sensor)?;
    let Some(actuator) = find_actuator(&cycle.actuators, solenoid) else {
        warn!(sensor = %sensor, solenoid = %solenoid, "mapped solenoid is not a known actuator");
        return None;
    };
    let secs = irrigation.durations.get(solenoid)?;
    Some((actuator.clone(), Duration::from_secs(*secs)))
}

async fn water(cycle: &Cycle, mut solenoid: Actuator, open_for: Duration) {
    info!(solenoid = %solenoid.name, secs = open_for.as_secs(), "watering");
    solenoid.state = true;
    cycle.push_state(&solenoid).await;

    tokio::time::sleep(open_for).await;

    solenoid.state = false;
    cycle.push_state(&solenoid).await;
}

// ===========================================================================
// Tests
// ===========================================================================
