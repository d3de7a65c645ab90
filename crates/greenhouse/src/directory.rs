//! Data-shaping helpers over one cycle's readings and actuator snapshot.

use std::collections::{BTreeMap, HashMap};

use crate::model::{Actuator, Category, Reading};

/// Readings keyed by sensor id. Within one sensor the order is the order the
/// API returned them in, which is most recent first.
pub type ReadingsBySensor = BTreeMap<String, Vec<Reading>>;

pub fn group_by_sensor(readings: Vec<Reading>) -> ReadingsBySensor {
    let mut grouped = ReadingsBySensor::new();
    for reading in readings {
        grouped
            .entry(reading.sensor_id.clone())
            .or_default()
            .push(reading);
    }
    grouped
}

pub fn group_actuators(actuators: &[Actuator]) -> HashMap<Category, Vec<Actuator>> {
    let mut grouped: HashMap<Category, Vec<Actuator>> = HashMap::new();
    for actuator in actuators {
        grouped
            .entry(actuator.category)
            .or_default()
            .push(actuator.clone());
    }
    grouped
}

pub fn find_actuator<'a>(actuators: &'a [Actuator], name: &str) -> Option<&'a Actuator> {
    actuators.iter().find(|a| a.name == name)
}

/// Arithmetic mean, `None` for an empty input.
pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Mean of every reading in the window, across all sensors.
pub fn overall_mean(by_sensor: &ReadingsBySensor) -> Option<f64> {
    mean(by_sensor.values().flatten().map(|r| r.value))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{actuator, reading};

    #[test]
    fn group_by_sensor_keeps_arrival_order() {
        let grouped = group_by_sensor(vec![
            reading("t1", 20.0),
            reading("t2", 30.0),
            reading("t1", 22.0),
        ]);
        assert_eq!(grouped.len(), 2);
        let t1: Vec<f64> = grouped["t1"].iter().map(|r| r.value).collect();
        assert_eq!(t1, vec![20.0, 22.0]);
        assert_eq!(grouped["t2"].len(), 1);
    }

    #[test]
    fn group_by_sensor_empty() {
        assert!(group_by_sensor(vec![]).is_empty());
    }

    #[test]
    fn group_actuators_handles_unsorted_input() {
        let list = vec![
            actuator("fan01", Category::Fan, false),
            actuator("heater01", Category::Heater, false),
            actuator("fan02", Category::Fan, true),
        ];
        let grouped = group_actuators(&list);
        assert_eq!(grouped[&Category::Fan].len(), 2);
        assert_eq!(grouped[&Category::Heater].len(), 1);
        assert!(!grouped.contains_key(&Category::Lights));
    }

    #[test]
    fn find_actuator_by_name() {
        let list = vec![
            actuator("fan01", Category::Fan, false),
            actuator("solenoid01", Category::Water, true),
        ];
        assert_eq!(
            find_actuator(&list, "solenoid01").map(|a| a.category),
            Some(Category::Water)
        );
        assert!(find_actuator(&list, "missing").is_none());
    }

    #[test]
    fn mean_of_values() {
        assert_eq!(mean([1.0, 2.0, 3.0]), Some(2.0));
        assert_eq!(mean(std::iter::empty()), None);
    }

    #[test]
    fn overall_mean_spans_sensors() {
        let grouped = group_by_sensor(vec![
            reading("t1", 10.0),
            reading("t1", 20.0),
            reading("t2", 30.0),
        ]);
        assert_eq!(overall_mean(&grouped), Some(20.0));
    }
}
