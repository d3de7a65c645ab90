//! Plausibility checks shared by the modules: missing sensors, reading
//! ranges, sensor disagreement and fan-speed consistency.

use std::time::Duration;

use tracing::{debug, warn};

use crate::alerts::{Alert, AlertEngine, Severity};
use crate::directory::{find_actuator, mean, ReadingsBySensor};
use crate::model::{Actuator, ReadingKind};

use super::Cycle;

const FANSPEED_WINDOW: Duration = Duration::from_secs(60);

/// Raise `kind`'s missing-sensor alert when fewer than `expected` distinct
/// sensors reported, clear it otherwise.
pub fn detect_missing_sensors(
    alerts: &AlertEngine,
    kind: ReadingKind,
    by_sensor: &ReadingsBySensor,
    expected: usize,
    severity: Severity,
    period: &str,
) {
    let key = kind.missing_key();
    if by_sensor.len() >= expected {
        alerts.clear(&key);
        return;
    }
    let received: Vec<&str> = by_sensor.keys().map(String::as_str).collect();
    let message = format!(
        "Not all {} sensors submitted data in the last {period}\n\tReceived data from: {}",
        kind.label(),
        received.join(",")
    );
    warn!(kind = kind.as_param(), received = received.len(), expected, "missing sensors");
    alerts.raise(Alert::new(severity, message, key));
}

/// How a reading kind is described in disagreement alerts.
pub struct SensorLabel<'a> {
    pub name: &'a str,
    pub unit: &'a str,
}

/// Check each sensor's mean against `[min, max]` and, when a margin is
/// given, the spread between the highest and lowest sensor means.
pub fn check_range_and_margin(
    alerts: &AlertEngine,
    kind: ReadingKind,
    by_sensor: &ReadingsBySensor,
    (min, max): (f64, f64),
    margin: Option<f64>,
    label: SensorLabel<'_>,
) {
    let mut lowest: Option<(&str, f64)> = None;
    let mut highest: Option<(&str, f64)> = None;

    for (sensor, readings) in by_sensor {
        let Some(avg) = mean(readings.iter().map(|r| r.value)) else {
            continue;
        };
        if lowest.map_or(true, |(_, v)| avg < v) {
            lowest = Some((sensor.as_str(), avg));
        }
        if highest.map_or(true, |(_, v)| avg > v) {
            highest = Some((sensor.as_str(), avg));
        }

        let key = format!("range_error_{sensor}");
        if (min..=max).contains(&avg) {
            alerts.clear(&key);
        } else {
            let message =
                format!("Sensor {sensor} reading outside of expected range\n\tReading: {avg:.2}");
            warn!(sensor = %sensor, reading = avg, "reading out of range");
            alerts.raise(Alert::new(Severity::Low, message, key));
        }
    }

    let (Some(margin), Some((lo_sensor, lo)), Some((hi_sensor, hi))) = (margin, lowest, highest)
    else {
        return;
    };
    let key = format!("margin_error_{}", kind.as_param());
    if hi - lo > margin {
        let message = format!(
            "{} sensors disagree by more than {margin} {} \n\tMax Sensor: {hi_sensor}, Reading: {hi:.2}\n\tMin Sensor: {lo_sensor}, Reading: {lo:.2}",
            label.name, label.unit
        );
        warn!(kind = kind.as_param(), spread = hi - lo, margin, "sensors disagree");
        alerts.raise(Alert::new(Severity::Low, message, key));
    } else {
        alerts.clear(&key);
    }
}

/// Compare each fan's commanded state with its fan-speed sensor, after
/// giving the sensors `settle` to report.
pub async fn check_fans(cycle: &Cycle, actuators: &[Actuator], settle: Duration) {
    tokio::time::sleep(settle).await;

    let Some(speeds) = cycle.fetch(ReadingKind::FanSpeed, FANSPEED_WINDOW).await else {
        return;
    };
    let alerts = &cycle.alerts;
    let sensors = &cycle.config.sensors;
    let ranges = &cycle.config.ranges;
    detect_missing_sensors(
        alerts,
        ReadingKind::FanSpeed,
        &speeds,
        sensors.fanspeed,
        Severity::Low,
        "minute",
    );

    for (name, readings) in &speeds {
        let Some(latest) = readings.first() else {
            continue;
        };
        let Some(fan) = find_actuator(actuators, name) else {
            debug!(sensor = %name, "fan speed sensor without matching actuator");
            continue;
        };

        let key = format!("state_{name}");
        let message = if fan.state && latest.value < ranges.min_on_fanspeed {
            Some(format!("Actuator {name} is supposed to be on, but is off."))
        } else if !fan.state && latest.value > ranges.max_off_fanspeed {
            Some(format!("Actuator {name} is supposed to be off, but is on."))
        } else {
            None
        };
        match message {
            Some(message) => {
                warn!(actuator = %name, speed = latest.value, on = fan.state, "{message}");
                alerts.raise(Alert::new(Severity::Mid, message, key));
            }
            None => alerts.clear(&key),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::tests::Harness;
    use crate::directory::group_by_sensor;
    use crate::model::Category;
    use crate::testing::{actuator, reading, readings, test_config, RecordingNotifier};
    use std::sync::Arc;
    use time::macros::datetime;
    use time::UtcOffset;

    fn alerts() -> AlertEngine {
        AlertEngine::new(Arc::new(RecordingNotifier::default()), 1, UtcOffset::UTC)
    }

    const TEMPERATURE: SensorLabel<'static> = SensorLabel {
        name: "Temperature",
        unit: "degrees",
    };

    // -- Missing sensors --------------------------------------------------

    #[test]
    fn three_of_five_sensors_raises_then_clears() {
        let alerts = alerts();
        let short = group_by_sensor(readings("t", 3, 20.0));
        detect_missing_sensors(&alerts, ReadingKind::Temperature, &short, 5, Severity::Mid, "5 minutes");

        assert!(alerts.is_pending("missing_sensors_temp"));
        assert_eq!(alerts.total_severity(), Severity::Mid.weight());
        let msg = alerts.message("missing_sensors_temp").unwrap();
        assert!(msg.contains(
            "MID: Not all temperature sensors submitted data in the last 5 minutes\n\tReceived data from: t1,t2,t3"
        ), "got {msg}");

        let full = group_by_sensor(readings("t", 5, 20.0));
        detect_missing_sensors(&alerts, ReadingKind::Temperature, &full, 5, Severity::Mid, "5 minutes");
        assert_eq!(alerts.stage_of("missing_sensors_temp"), None);
        assert_eq!(alerts.total_severity(), 0);
    }

    // -- Range & margin ---------------------------------------------------

    #[test]
    fn out_of_range_sensor_raises_low() {
        let alerts = alerts();
        let by_sensor = group_by_sensor(vec![
            reading("t1", 20.0),
            reading("t2", 55.0),
            reading("t2", 57.0),
        ]);
        check_range_and_margin(&alerts, ReadingKind::Temperature, &by_sensor, (0.0, 50.0), None, TEMPERATURE);

        assert_eq!(alerts.stage_of("range_error_t1"), None);
        let msg = alerts.message("range_error_t2").unwrap();
        assert!(msg.ends_with("LOW: Sensor t2 reading outside of expected range\n\tReading: 56.00"));
        // No margin given, no margin check.
        assert_eq!(alerts.stage_of("margin_error_temp"), None);
    }

    #[test]
    fn disagreeing_sensors_name_both_extremes() {
        let alerts = alerts();
        let by_sensor = group_by_sensor(vec![
            reading("t1", 20.0),
            reading("t2", 31.5),
            reading("t3", 25.0),
        ]);
        check_range_and_margin(&alerts, ReadingKind::Temperature, &by_sensor, (0.0, 50.0), Some(5.0), TEMPERATURE);

        let msg = alerts.message("margin_error_temp").unwrap();
        assert!(msg.ends_with(
            "LOW: Temperature sensors disagree by more than 5 degrees \n\tMax Sensor: t2, Reading: 31.50\n\tMin Sensor: t1, Reading: 20.00"
        ), "got {msg}");
    }

    #[test]
    fn agreeing_sensors_clear_margin() {
        let alerts = alerts();
        let by_sensor = group_by_sensor(vec![reading("h1", 40.0), reading("h2", 70.0)]);
        let label = SensorLabel { name: "Humidity", unit: "percent" };
        check_range_and_margin(&alerts, ReadingKind::Humidity, &by_sensor, (0.0, 100.0), Some(10.0), label);
        assert!(alerts.is_pending("margin_error_humid"));

        let by_sensor = group_by_sensor(vec![reading("h1", 60.0), reading("h2", 65.0)]);
        let label = SensorLabel { name: "Humidity", unit: "percent" };
        check_range_and_margin(&alerts, ReadingKind::Humidity, &by_sensor, (0.0, 100.0), Some(10.0), label);
        assert_eq!(alerts.stage_of("margin_error_humid"), None);
    }

    // -- Fan speed --------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn fan_state_mismatches_raise_mid() {
        let mut config = test_config();
        config.sensors.fanspeed = 3;
        let fans = vec![
            actuator("fan01", Category::Fan, true),
            actuator("fan02", Category::Fan, false),
            actuator("fan03", Category::Fan, true),
        ];
        let h = Harness::new(config, fans.clone(), datetime!(2024-05-10 12:00 UTC));
        h.gateway.set_readings(
            ReadingKind::FanSpeed,
            Ok(vec![
                reading("fan01", 50.0),   // on but stalled
                reading("fan02", 900.0),  // off but spinning
                reading("fan03", 1200.0), // fine
                reading("fan01", 1500.0), // older reading ignored
            ]),
        );

        let started = tokio::time::Instant::now();
        check_fans(&h.cycle, &fans, Duration::from_secs(3)).await;
        assert!(started.elapsed() >= Duration::from_secs(3));

        let on = h.alerts().message("state_fan01").unwrap();
        assert!(on.ends_with("MID: Actuator fan01 is supposed to be on, but is off."));
        let off = h.alerts().message("state_fan02").unwrap();
        assert!(off.ends_with("MID: Actuator fan02 is supposed to be off, but is on."));
        assert_eq!(h.alerts().stage_of("state_fan03"), None);
        assert_eq!(h.alerts().stage_of("missing_sensors_fanspeed"), None);
        assert_eq!(
            h.gateway.queries(),
            vec![(ReadingKind::FanSpeed, datetime!(2024-05-10 11:59 UTC))]
        );
    }

    #[tokio::test]
    async fn missing_fan_sensors_are_low() {
        let mut config = test_config();
        config.sensors.fanspeed = 2;
        let fans = vec![actuator("fan01", Category::Fan, false)];
        let h = Harness::new(config, fans.clone(), datetime!(2024-05-10 12:00 UTC));
        h.gateway
            .set_readings(ReadingKind::FanSpeed, Ok(vec![reading("fan01", 0.0)]));

        check_fans(&h.cycle, &fans, Duration::ZERO).await;
        let msg = h.alerts().message("missing_sensors_fanspeed").unwrap();
        assert!(msg.contains("LOW: Not all fan speed sensors submitted data in the last minute"));
        assert_eq!(h.alerts().total_severity(), Severity::Low.weight());
    }
}
