//! Wall-clock helpers: time-of-day parsing, the daily repeating schedules
//! (watering times, alert flush times) and the clock the control loop reads.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::Deserialize;
use time::{Duration, OffsetDateTime, Time, UtcOffset};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" for one greenhouse. Local wall-clock time matters because
/// schedules and light windows are configured as times of day.
#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System(UtcOffset),
    #[cfg(test)]
    Fixed(OffsetDateTime),
}

impl Clock {
    pub fn system(offset: UtcOffset) -> Self {
        Self::System(offset)
    }

    pub fn now(&self) -> OffsetDateTime {
        match self {
            Self::System(offset) => OffsetDateTime::now_utc().to_offset(*offset),
            #[cfg(test)]
            Self::Fixed(at) => *at,
        }
    }
}

// ---------------------------------------------------------------------------
// Time-of-day parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeOfDayError(String);

impl fmt::Display for TimeOfDayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid time of day '{}' (expected HH:MM or HH:MM:SS)", self.0)
    }
}

impl std::error::Error for TimeOfDayError {}

/// Parse `HH:MM` or `HH:MM:SS` (24-hour clock, hour may be a single digit).
pub fn parse_time_of_day(s: &str) -> Result<Time, TimeOfDayError> {
    let err = || TimeOfDayError(s.to_string());
    let parts: Vec<&str> = s.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(err());
    }
    let mut fields = [0u8; 3];
    for (slot, part) in fields.iter_mut().zip(&parts) {
        if part.is_empty() || part.len() > 2 {
            return Err(err());
        }
        *slot = part.parse().map_err(|_| err())?;
    }
    Time::from_hms(fields[0], fields[1], fields[2]).map_err(|_| err())
}

pub(crate) fn deserialize_time_of_day<'de, D: Deserializer<'de>>(d: D) -> Result<Time, D::Error> {
    let raw = String::deserialize(d)?;
    parse_time_of_day(&raw).map_err(de::Error::custom)
}

pub(crate) fn deserialize_times_of_day<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Vec<Time>, D::Error> {
    let raw = Vec::<String>::deserialize(d)?;
    raw.iter()
        .map(|s| parse_time_of_day(s).map_err(de::Error::custom))
        .collect()
}

// ---------------------------------------------------------------------------
// Daily schedule
// ---------------------------------------------------------------------------

/// A set of moments that each repeat once per day. Every entry always holds
/// its next pending occurrence; once it has passed it is moved forward by
/// exactly one day.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailySchedule {
    moments: Vec<OffsetDateTime>,
}

impl DailySchedule {
    /// Anchor each time of day on `now`'s date, rolling any that already
    /// passed today over to tomorrow.
    pub fn starting(times: &[Time], now: OffsetDateTime) -> Self {
        let moments = times
            .iter()
            .map(|t| {
                let today = now.replace_time(*t);
                if today < now {
                    today + Duration::days(1)
                } else {
                    today
                }
            })
            .collect();
        Self { moments }
    }

    pub fn is_empty(&self) -> bool {
        self.moments.is_empty()
    }

    pub fn moments(&self) -> &[OffsetDateTime] {
        &self.moments
    }

    /// Advance the first entry whose moment has passed and report whether
    /// one was due. Later overdue entries wait for the next call.
    pub fn take_due(&mut self, now: OffsetDateTime) -> bool {
        match self.moments.iter_mut().find(|m| now >= **m) {
            Some(moment) => {
                *moment += Duration::days(1);
                true
            }
            None => false,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
