//! TOML config file loading, validation, and database seeding for the chat
//! ids, the scheduling knobs and optional preference seeds.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use time::UtcOffset;

use crate::daytime::{offset_from_minutes, validate_hhmm};
use crate::db::{Db, PreferenceRecord};
use crate::scheduler::DEFAULT_LEAD_TIME;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub chat: ChatSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub preferences: Vec<PreferenceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSection {
    /// The tree status message to watch.
    pub message_id: String,
    /// Channel holding the status message.
    pub message_channel_id: String,
    /// Channel the announcement goes to.
    pub channel_id: String,
    /// Notification role handed out before each watering.
    pub role_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleSection {
    #[serde(default = "default_lead_time_sec")]
    pub lead_time_sec: u64,
    /// Fixed offset east of UTC used to read the watering time of day.
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            lead_time_sec: default_lead_time_sec(),
            utc_offset_minutes: 0,
        }
    }
}

fn default_lead_time_sec() -> u64 {
    DEFAULT_LEAD_TIME.as_secs()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceEntry {
    pub owner_id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub start_time: String,
    pub end_time: String,
}

fn default_enabled() -> bool {
    true
}

const MAX_LEAD_TIME_SEC: u64 = 3600;
const MAX_OFFSET_MINUTES: i32 = 14 * 60;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate the whole file. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_chat(&mut errors);
        self.validate_schedule(&mut errors);
        self.validate_preferences(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_chat(&self, errors: &mut Vec<String>) {
        let ids = [
            ("message_id", &self.chat.message_id),
            ("message_channel_id", &self.chat.message_channel_id),
            ("channel_id", &self.chat.channel_id),
            ("role_id", &self.chat.role_id),
        ];
        for (field, value) in ids {
            if value.trim().is_empty() {
                errors.push(format!("chat: {field} is empty"));
            } else if value.parse::<u64>().is_err() {
                errors.push(format!("chat: {field} '{value}' is not a numeric id"));
            }
        }
    }

    fn validate_schedule(&self, errors: &mut Vec<String>) {
        let s = &self.schedule;
        if !(1..=MAX_LEAD_TIME_SEC).contains(&s.lead_time_sec) {
            errors.push(format!(
                "schedule: lead_time_sec {} out of range [1, {MAX_LEAD_TIME_SEC}]",
                s.lead_time_sec
            ));
        }
        if !(-MAX_OFFSET_MINUTES..=MAX_OFFSET_MINUTES).contains(&s.utc_offset_minutes) {
            errors.push(format!(
                "schedule: utc_offset_minutes {} out of range [-{MAX_OFFSET_MINUTES}, {MAX_OFFSET_MINUTES}]",
                s.utc_offset_minutes
            ));
        }
    }

    fn validate_preferences(&self, errors: &mut Vec<String>) {
        let mut seen_owners: HashSet<&str> = HashSet::new();

        for (i, p) in self.preferences.iter().enumerate() {
            let ctx = || {
                if p.owner_id.is_empty() {
                    format!("preferences[{i}]")
                } else {
                    format!("preference '{}'", p.owner_id)
                }
            };

            if p.owner_id.trim().is_empty() {
                errors.push(format!("{}: owner_id is empty", ctx()));
            } else if p.owner_id.parse::<u64>().is_err() {
                errors.push(format!("{}: owner_id is not a numeric id", ctx()));
            } else if !seen_owners.insert(&p.owner_id) {
                errors.push(format!("{}: duplicate owner_id", ctx()));
            }

            if let Err(e) = validate_hhmm(&p.start_time) {
                errors.push(format!("{}: start_time: {e}", ctx()));
            }
            if let Err(e) = validate_hhmm(&p.end_time) {
                errors.push(format!("{}: end_time: {e}", ctx()));
            }
        }
    }

    pub fn lead_time(&self) -> Duration {
        Duration::from_secs(self.schedule.lead_time_sec)
    }

    /// Falls back to UTC for an out-of-range offset; `validate` rejects those.
    pub fn utc_offset(&self) -> UtcOffset {
        offset_from_minutes(self.schedule.utc_offset_minutes).unwrap_or(UtcOffset::UTC)
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Upsert the seeded preferences into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for p in &config.preferences {
        db.upsert_preference(&PreferenceRecord {
            owner_id: p.owner_id.clone(),
            enabled: p.enabled,
            start_time: p.start_time.clone(),
            end_time: p.end_time.clone(),
        })
        .await
        .with_context(|| format!("failed to upsert preference '{}'", p.owner_id))?;
    }

    tracing::info!(
        preferences = config.preferences.len(),
        lead_time_sec = config.schedule.lead_time_sec,
        utc_offset_minutes = config.schedule.utc_offset_minutes,
        "config applied"
    );

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
