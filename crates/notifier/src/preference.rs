//! Per-user notification windows laid out on the 24-hour ring.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::daytime::{minutes_to_hhmm, parse_time_in_minutes, MINUTES_PER_DAY};

/// Chat-platform user id (a snowflake).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(UserId)
    }
}

/// Daily window `[start, end]`, both ends inclusive.
///
/// When `start > end` the window wraps through midnight: `22:00..02:00`
/// covers 22:00..=23:59 and 00:00..=02:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingInterval {
    start: u16,
    end: u16,
}

impl RingInterval {
    /// Both ends must already be minutes of the day (0..1440).
    pub fn new(start: u16, end: u16) -> Option<Self> {
        (start < MINUTES_PER_DAY && end < MINUTES_PER_DAY).then_some(Self { start, end })
    }

    /// Build from parsed `HH:MM` minutes, folding the `24:00` sentinel onto
    /// the last minute of the day.
    pub fn from_parsed(start: u16, end: u16) -> Option<Self> {
        let last = MINUTES_PER_DAY - 1;
        Self::new(
            if start == MINUTES_PER_DAY { last } else { start },
            if end == MINUTES_PER_DAY { last } else { end },
        )
    }

    pub fn from_hhmm(start: &str, end: &str) -> Option<Self> {
        Self::from_parsed(parse_time_in_minutes(start)?, parse_time_in_minutes(end)?)
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    pub fn contains(&self, minute: u16) -> bool {
        if self.wraps() {
            minute >= self.start || minute <= self.end
        } else {
            minute >= self.start && minute <= self.end
        }
    }

    /// Number of minutes covered.
    pub fn len(&self) -> usize {
        if self.wraps() {
            (MINUTES_PER_DAY - self.start) as usize + self.end as usize + 1
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// Covered minutes in ring order starting at `start`.
    pub fn minutes(&self) -> impl Iterator<Item = u16> {
        let (start, end) = (self.start, self.end);
        let (head, tail) = if self.wraps() {
            (start..MINUTES_PER_DAY, 0..end + 1)
        } else {
            (start..end + 1, 0..0)
        };
        head.chain(tail)
    }
}

impl fmt::Display for RingInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            minutes_to_hhmm(self.start),
            minutes_to_hhmm(self.end)
        )
    }
}

/// One user's notification preference, as read from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub owner: UserId,
    pub enabled: bool,
    pub window: RingInterval,
}

// ===========================================================================
// Tests
// ===========================================================================
