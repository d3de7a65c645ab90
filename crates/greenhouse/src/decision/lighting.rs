//! Grow lights on a daily window that may span midnight.

use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::directory::group_actuators;
use crate::model::{Category, LightWindow};

use super::Cycle;

/// Whether `now` falls inside the light window. The start is inclusive. The
/// end is inclusive for a same-day window; a window wrapping midnight is
/// already over at its end time.
pub fn lights_on(window: &LightWindow, now: OffsetDateTime) -> bool {
    let mut start = now.replace_time(window.start_time);
    let mut end = now.replace_time(window.end_time);

    if end < start {
        if now < end {
            // Still inside last night's window.
            start -= Duration::days(1);
        } else {
            end += Duration::days(1);
        }
    }
    start <= now && now <= end
}

pub async fn run(cycle: &Cycle) {
    let on = lights_on(&cycle.settings.lights, cycle.clock.now());
    let mut lights = group_actuators(&cycle.actuators)
        .remove(&Category::Lights)
        .unwrap_or_default();
    for light in &mut lights {
        light.state = on;
    }
    info!(on, count = lights.len(), "lighting decision");
    cycle.push_all(&lights).await;
}

// ===========================================================================
// Tests
// ===========================================================================
