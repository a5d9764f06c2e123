//! Dates, half-hour slots and the daily slot grid.

use crate::constants::{DATE_FORMAT, SLOT_MINUTES, TIME_FORMAT};
use crate::error::{ClinicError, ClinicResult};
use chrono::{Duration, NaiveDate, NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;

/// A calendar date as stored in the tables (`YYYY-MM-DD`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClinicDate(NaiveDate);

impl ClinicDate {
    /// Parses a zero-padded `YYYY-MM-DD` date. Short years and unpadded fields are refused so
    /// that a date compares equal only to its one stored spelling.
    pub fn parse(input: &str) -> ClinicResult<Self> {
        let trimmed = input.trim();
        let date = NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
            .map(Self)
            .map_err(|e| ClinicError::InvalidInput(format!("invalid date {input:?}: {e}")))?;
        if date.to_string() != trimmed {
            return Err(ClinicError::InvalidInput(format!(
                "invalid date {input:?}: expected YYYY-MM-DD"
            )));
        }
        Ok(date)
    }

    pub fn from_naive(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for ClinicDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for ClinicDate {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for ClinicDate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// One half-hour interval, identified by its `HH:MM-HH:MM` string.
///
/// Slots always start on the hour or half hour and last exactly [`SLOT_MINUTES`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeSlot {
    start: NaiveTime,
}

impl TimeSlot {
    pub fn starting_at(start: NaiveTime) -> ClinicResult<Self> {
        if start.second() != 0 || start.minute() % SLOT_MINUTES as u32 != 0 {
            return Err(ClinicError::InvalidInput(format!(
                "slot must start on a half-hour boundary, got {}",
                start.format(TIME_FORMAT)
            )));
        }
        Ok(Self { start })
    }

    pub fn parse(input: &str) -> ClinicResult<Self> {
        let invalid = || ClinicError::InvalidInput(format!("invalid slot {input:?}"));

        let (start, end) = input.trim().split_once('-').ok_or_else(invalid)?;
        let start = NaiveTime::parse_from_str(start.trim(), TIME_FORMAT).map_err(|_| invalid())?;
        let end = NaiveTime::parse_from_str(end.trim(), TIME_FORMAT).map_err(|_| invalid())?;

        let slot = Self::starting_at(start)?;
        if slot.end() != end {
            return Err(ClinicError::InvalidInput(format!(
                "slot {input:?} must span exactly {SLOT_MINUTES} minutes"
            )));
        }
        if slot.to_string() != input.trim() {
            return Err(invalid());
        }
        Ok(slot)
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// End of the slot. The last slot of a day ending at midnight wraps to `00:00`.
    pub fn end(&self) -> NaiveTime {
        self.start + Duration::minutes(SLOT_MINUTES)
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format(TIME_FORMAT),
            self.end().format(TIME_FORMAT)
        )
    }
}

impl FromStr for TimeSlot {
    type Err = ClinicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for TimeSlot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

/// The fixed daily grid of bookable slots, `[start_hour, end_hour)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotGrid {
    start_hour: u32,
    end_hour: u32,
}

impl SlotGrid {
    pub fn new(start_hour: u32, end_hour: u32) -> ClinicResult<Self> {
        if end_hour > 24 || start_hour >= end_hour {
            return Err(ClinicError::InvalidInput(format!(
                "slot grid hours must satisfy start < end <= 24, got {start_hour}..{end_hour}"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    /// All slots of the day in chronological order.
    pub fn slots(&self) -> Vec<TimeSlot> {
        let minutes = SLOT_MINUTES as u32;
        let per_hour = 60 / minutes;
        (self.start_hour * per_hour..self.end_hour * per_hour)
            .filter_map(|n| NaiveTime::from_hms_opt(n / per_hour, (n % per_hour) * minutes, 0))
            .map(|start| TimeSlot { start })
            .collect()
    }

    pub fn contains(&self, slot: &TimeSlot) -> bool {
        let hour = slot.start.hour();
        hour >= self.start_hour && hour < self.end_hour
    }
}
