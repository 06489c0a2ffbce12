use std::str::FromStr;

use serde::Serialize;

use crate::error::EventError;

/// Unit of a Main event's polling interval (2 bits on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum IntervalUnit {
    Milliseconds = 0,
    #[default]
    Seconds = 1,
    Minutes = 2,
    Hours = 3,
}

impl IntervalUnit {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => Self::Milliseconds,
            1 => Self::Seconds,
            2 => Self::Minutes,
            _ => Self::Hours,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn millis(self) -> u64 {
        match self {
            Self::Milliseconds => 1,
            Self::Seconds => 1_000,
            Self::Minutes => 60_000,
            Self::Hours => 3_600_000,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Milliseconds => "milliseconds",
            Self::Seconds => "seconds",
            Self::Minutes => "minutes",
            Self::Hours => "hours",
        }
    }
}

/// Length of `interval` units in milliseconds.
pub fn interval_ms(unit: IntervalUnit, interval: u8) -> u64 {
    unit.millis() * u64::from(interval)
}

impl FromStr for IntervalUnit {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "milliseconds" | "millisecond" | "ms" => Ok(Self::Milliseconds),
            "seconds" | "second" | "s" => Ok(Self::Seconds),
            "minutes" | "minute" | "min" => Ok(Self::Minutes),
            "hours" | "hour" | "h" => Ok(Self::Hours),
            other => Err(EventError::InvalidIntervalUnit(other.to_string())),
        }
    }
}

impl std::fmt::Display for IntervalUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
