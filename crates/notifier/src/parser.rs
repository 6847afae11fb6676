//! Extracts the next watering from the tree status message.
//!
//! The status message is free text edited by another bot. Three pieces are
//! needed: the "growing" marker, the mention of whoever watered last, and a
//! relative timestamp token `<t:SECONDS:R>` for the next watering.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use time::OffsetDateTime;

use crate::preference::UserId;

/// Present only while the tree is growing and can be watered again later.
pub const GROWING_MARKER: &str = "It's growing right now";

static LAST_WATERING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Thanks <@!?(\d+)> for watering the tree!").expect("static regex")
});

static NEXT_WATERING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<t:(\d+):R>").expect("static regex"));

/// A future watering discovered in a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WateringEvent {
    pub last_actor: UserId,
    pub next_occurrence: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("tree is not growing")]
    NotGrowing,
    #[error("last watering user not found in message")]
    ActorUnresolvable,
    #[error("next watering timestamp not found in message")]
    TimestampUnresolvable,
    #[error("next watering timestamp {at} is in the past")]
    EventAlreadyPast { at: OffsetDateTime },
}

/// Parse a status description against a fixed `now`.
pub fn parse(description: &str, now: OffsetDateTime) -> Result<WateringEvent, ParseFailure> {
    if !description.contains(GROWING_MARKER) {
        return Err(ParseFailure::NotGrowing);
    }

    let last_actor = LAST_WATERING_RE
        .captures(description)
        .and_then(|c| c[1].parse::<u64>().ok())
        .map(UserId)
        .ok_or(ParseFailure::ActorUnresolvable)?;

    let next_occurrence = NEXT_WATERING_RE
        .captures(description)
        .and_then(|c| c[1].parse::<i64>().ok())
        .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        .ok_or(ParseFailure::TimestampUnresolvable)?;

    if next_occurrence <= now {
        return Err(ParseFailure::EventAlreadyPast {
            at: next_occurrence,
        });
    }

    Ok(WateringEvent {
        last_actor,
        next_occurrence,
    })
}

// ===========================================================================
// Tests
// ===========================================================================
