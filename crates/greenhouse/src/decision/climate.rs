//! Fans and heater from the mean greenhouse temperature.

use std::time::Duration;

use tracing::info;

use crate::alerts::Severity;
use crate::directory::overall_mean;
use crate::model::{Category, ReadingKind};

use super::checks::{check_fans, check_range_and_margin, detect_missing_sensors, SensorLabel};
use super::Cycle;

const WINDOW: Duration = Duration::from_secs(5 * 60);

/// Time the fan-speed sensors get to notice a state change.
pub const FAN_SETTLE: Duration = Duration::from_secs(3);

pub async fn run(cycle: &Cycle) {
    let (temperature, humidity) = tokio::join!(
        cycle.fetch(ReadingKind::Temperature, WINDOW),
        cycle.fetch(ReadingKind::Humidity, WINDOW),
    );
    let (Some(temperature), Some(humidity)) = (temperature, humidity) else {
        return;
    };

    let config = &cycle.config;
    detect_missing_sensors(
        &cycle.alerts,
        ReadingKind::Temperature,
        &temperature,
        config.sensors.temperature,
        Severity::Mid,
        "5 minutes",
    );
    detect_missing_sensors(
        &cycle.alerts,
        ReadingKind::Humidity,
        &humidity,
        config.sensors.humidity(),
        Severity::Mid,
        "5 minutes",
    );

    let mut actuators = cycle.actuators.clone();
    if let Some(avg) = overall_mean(&temperature) {
        let bounds = cycle.settings.temperature;
        let fans_on = avg > bounds.max;
        let heater_on = avg < bounds.min;
        info!(mean = avg, fans_on, heater_on, "climate decision");

        let mut changed = Vec::new();
        for actuator in actuators.iter_mut() {
            actuator.state = match actuator.category {
                Category::Fan => fans_on,
                Category::Heater => heater_on,
                _ => continue,
            };
            changed.push(actuator.clone());
        }
        cycle.push_all(&changed).await;
    }

    let ranges = &config.ranges;
    check_range_and_margin(
        &cycle.alerts,
        ReadingKind::Temperature,
        &temperature,
        (ranges.min_temperature, ranges.max_temperature),
        Some(config.sensors.temperature_margin),
        SensorLabel {
            name: "Temperature",
            unit: "degrees",
        },
    );
    check_range_and_margin(
        &cycle.alerts,
        ReadingKind::Humidity,
        &humidity,
        (ranges.min_humidity, ranges.max_humidity),
        Some(config.sensors.humidity_margin),
        SensorLabel {
            name: "Humidity",
            unit: "percent",
        },
    );

    check_fans(cycle, &actuators, FAN_SETTLE).await;
}

// ===========================================================================
// Tests
// ===========================================================================
