//! Battery health of the wireless sensor modules.

use std::time::Duration;

use tracing::warn;

use crate::alerts::{Alert, Severity};
use crate::model::{Health, ReadingKind};

use super::checks::detect_missing_sensors;
use super::Cycle;

const WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

pub async fn run(cycle: &Cycle) {
    let Some(batteries) = cycle.fetch(ReadingKind::Battery, WINDOW).await else {
        return;
    };
    detect_missing_sensors(
        &cycle.alerts,
        ReadingKind::Battery,
        &batteries,
        cycle.config.sensors.battery,
        Severity::Mid,
        "24 hours",
    );

    for (sensor, readings) in &batteries {
        let key = format!("low_battery_{sensor}");
        let critical = readings
            .first()
            .is_some_and(|r| r.health == Some(Health::Critical));
        if critical {
            let message = format!("Module {sensor} needs battery replacement");
            warn!(sensor = %sensor, "{message}");
            cycle.alerts.raise(Alert::new(Severity::Mid, message, key));
        } else {
            cycle.alerts.clear(&key);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
