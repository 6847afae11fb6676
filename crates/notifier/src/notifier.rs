//! Runtime driver: feeds status updates and fired timers through the
//! scheduler and carries out the resulting effects against the clock, the
//! database and the chat platform.
//!
//! Only the driver task calls [`Notifier::handle_status`] and
//! [`Notifier::handle_timer`], so scheduler transitions never interleave.
//! The web handlers only read the shared state or go through
//! [`Notifier::update_preference`] / [`Notifier::coverage_report`].

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, TimerTag};
use crate::config::Config;
use crate::coverage::{analyze, CoverageAnalysis};
use crate::daytime::{format_remaining, validate_hhmm, InvalidTimeFormat};
use crate::db::{now_unix, Db, PreferenceRecord};
use crate::mqtt::StatusMsg;
use crate::parser::{parse, ParseFailure, WateringEvent};
use crate::platform::ChatPlatform;
use crate::preference::UserId;
use crate::roles::reconcile;
use crate::scheduler::{on_parsed_event, on_timer, Effect, SchedulingConflict};
use crate::state::SharedState;

/// Everything the driver needs from the config file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub message_channel_id: String,
    pub role_id: String,
    pub lead_time: Duration,
    pub utc_offset: UtcOffset,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            message_channel_id: config.chat.message_channel_id.clone(),
            role_id: config.chat.role_id.clone(),
            lead_time: config.lead_time(),
            utc_offset: config.utc_offset(),
        }
    }
}

/// What happened to one status update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    NoEmbeds,
    Rejected(ParseFailure),
    AlreadyScheduled(SchedulingConflict),
    Scheduled(WateringEvent),
}

impl StatusOutcome {
    /// Label stored in the status audit log.
    pub fn label(&self) -> &'static str {
        match self {
            StatusOutcome::NoEmbeds => "no-embeds",
            StatusOutcome::Rejected(ParseFailure::NotGrowing) => "not-growing",
            StatusOutcome::Rejected(ParseFailure::ActorUnresolvable) => "actor-unresolvable",
            StatusOutcome::Rejected(ParseFailure::TimestampUnresolvable) => {
                "timestamp-unresolvable"
            }
            StatusOutcome::Rejected(ParseFailure::EventAlreadyPast { .. }) => "already-past",
            StatusOutcome::AlreadyScheduled(_) => "already-scheduled",
            StatusOutcome::Scheduled(_) => "scheduled",
        }
    }
}

/// Body of a preference update.
#[derive(Debug, Clone, Deserialize)]
pub struct PreferenceUpdate {
    pub enabled: bool,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Error)]
pub enum PreferenceError {
    #[error(transparent)]
    InvalidTimeFormat(#[from] InvalidTimeFormat),
    #[error("failed to save preferences: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct NextWatering {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub remaining_secs: i64,
    /// `"Xh Ymin"`
    pub remaining: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageReport {
    #[serde(flatten)]
    pub analysis: CoverageAnalysis,
    pub next_watering: Option<NextWatering>,
}

pub struct Notifier {
    db: Db,
    shared: SharedState,
    clock: Arc<dyn Clock>,
    platform: Arc<dyn ChatPlatform>,
    settings: Settings,
}

impl Notifier {
    pub fn new(
        db: Db,
        shared: SharedState,
        clock: Arc<dyn Clock>,
        platform: Arc<dyn ChatPlatform>,
        settings: Settings,
    ) -> Self {
        Self {
            db,
            shared,
            clock,
            platform,
            settings,
        }
    }

    /// Driver loop. Runs until both inputs are closed.
    pub async fn run(
        &self,
        mut statuses: mpsc::Receiver<StatusMsg>,
        mut timers: mpsc::UnboundedReceiver<TimerTag>,
    ) {
        loop {
            tokio::select! {
                Some(msg) = statuses.recv() => {
                    self.handle_status(msg.description()).await;
                }
                Some(tag) = timers.recv() => {
                    self.handle_timer(tag).await;
                }
                else => break,
            }
        }
        info!("notifier driver stopped");
    }

    // -----------------------------------------------------------------------
    // Status updates
    // -----------------------------------------------------------------------

    /// Handle one edit of the status message. `description` is `None` when
    /// the message has no embed at all.
    pub async fn handle_status(&self, description: Option<&str>) -> StatusOutcome {
        let now = self.clock.now();
        let outcome = match description {
            None => StatusOutcome::NoEmbeds,
            Some(text) => match parse(text, now) {
                Err(failure) => StatusOutcome::Rejected(failure),
                Ok(event) => self.schedule(&event, now).await,
            },
        };

        match &outcome {
            StatusOutcome::NoEmbeds => {
                error!("tree message has no embeds");
                self.shared
                    .write()
                    .await
                    .record_error("tree message has no embeds".to_string());
            }
            StatusOutcome::Rejected(ParseFailure::NotGrowing) => {
                debug!("tree is not growing, nothing to schedule");
                self.shared
                    .write()
                    .await
                    .record_status("tree is not growing".to_string());
            }
            StatusOutcome::Rejected(failure) => {
                error!(%failure, "could not read status message");
                self.shared.write().await.record_status(failure.to_string());
            }
            StatusOutcome::AlreadyScheduled(conflict) => {
                debug!(%conflict, "watering already scheduled, skipping");
                self.shared.write().await.record_status(conflict.to_string());
            }
            StatusOutcome::Scheduled(event) => {
                info!(
                    last_actor = %event.last_actor,
                    at = %event.next_occurrence,
                    "next watering scheduled"
                );
                self.shared.write().await.record_status(format!(
                    "next watering at {} (last watered by {})",
                    event.next_occurrence, event.last_actor
                ));
            }
        }

        let (actor, at) = match &outcome {
            StatusOutcome::Scheduled(e) => {
                (Some(e.last_actor), Some(e.next_occurrence.unix_timestamp()))
            }
            _ => (None, None),
        };
        if let Err(e) = self
            .db
            .insert_status_event(now_unix(), actor, at, outcome.label())
            .await
        {
            warn!("db: insert_status_event failed: {e:#}");
        }

        outcome
    }

    async fn schedule(&self, event: &WateringEvent, now: OffsetDateTime) -> StatusOutcome {
        let effects = {
            let mut st = self.shared.write().await;
            match on_parsed_event(&st.watering, event, now, self.settings.lead_time) {
                Err(conflict) => return StatusOutcome::AlreadyScheduled(conflict),
                Ok(t) => {
                    st.watering = t.state;
                    t.effects
                }
            }
        };
        self.apply(effects).await;
        StatusOutcome::Scheduled(*event)
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    pub async fn handle_timer(&self, tag: TimerTag) {
        debug!(timer = tag.name(), "timer fired");
        let effects = {
            let mut st = self.shared.write().await;
            let t = on_timer(&st.watering, tag);
            st.watering = t.state;
            t.effects
        };
        self.apply(effects).await;
    }

    async fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Arm { tag, delay } => {
                    let handle = self.clock.after(delay, tag);
                    debug!(timer = tag.name(), due = %handle.due, "timer set");
                }
                Effect::ReconcileRoles {
                    next_occurrence,
                    last_actor,
                } => self.reconcile_roles(next_occurrence, last_actor).await,
                Effect::Announce => self.announce().await,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Effects
    // -----------------------------------------------------------------------

    async fn reconcile_roles(&self, next_occurrence: OffsetDateTime, last_actor: Option<UserId>) {
        let prefs = match self.db.load_preferences().await {
            Ok(p) => p,
            Err(e) => return self.fail(format!("roles: failed to load preferences: {e:#}")).await,
        };
        let holders = match self.platform.role_holders().await {
            Ok(h) => h,
            Err(e) => return self.fail(format!("roles: failed to load role holders: {e:#}")).await,
        };

        let delta = reconcile(
            next_occurrence,
            self.settings.utc_offset,
            last_actor,
            &prefs,
            &holders,
        );
        if delta.is_empty() {
            debug!("roles already up to date");
            return;
        }

        let (mut added, mut removed) = (0, 0);
        for &user in &delta.to_add {
            match self.platform.add_role(user).await {
                Ok(()) => added += 1,
                Err(e) => self.fail(format!("roles: failed to add role to {user}: {e:#}")).await,
            }
        }
        for &user in &delta.to_remove {
            match self.platform.remove_role(user).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    self.fail(format!("roles: failed to remove role from {user}: {e:#}"))
                        .await
                }
            }
        }

        info!(added, removed, "notification role reconciled");
        self.shared
            .write()
            .await
            .record_roles(format!("role reconciled: +{added} -{removed}"));
    }

    async fn announce(&self) {
        let text = format!(
            "The tree is ready to be watered! <@&{}> :arrow_right: <#{}>",
            self.settings.role_id, self.settings.message_channel_id
        );
        match self.platform.announce(&text).await {
            Ok(()) => {
                info!("watering announcement sent");
                self.shared
                    .write()
                    .await
                    .record_watering("tree ready, announcement sent".to_string());
            }
            Err(e) => self.fail(format!("failed to send announcement: {e:#}")).await,
        }
    }

    async fn fail(&self, detail: String) {
        error!("{detail}");
        self.shared.write().await.record_error(detail);
    }

    // -----------------------------------------------------------------------
    // User-facing queries
    // -----------------------------------------------------------------------

    /// Validate and store `owner`'s preference. Disabling notifications also
    /// takes the role away right now.
    pub async fn update_preference(
        &self,
        owner: UserId,
        update: PreferenceUpdate,
    ) -> Result<PreferenceRecord, PreferenceError> {
        validate_hhmm(&update.start_time)?;
        validate_hhmm(&update.end_time)?;

        let record = PreferenceRecord {
            owner_id: owner.to_string(),
            enabled: update.enabled,
            start_time: update.start_time,
            end_time: update.end_time,
        };
        self.db
            .upsert_preference(&record)
            .await
            .map_err(PreferenceError::Store)?;

        if !record.enabled {
            let holders = self
                .platform
                .role_holders()
                .await
                .map_err(PreferenceError::Store)?;
            if holders.contains(&owner) {
                self.platform
                    .remove_role(owner)
                    .await
                    .map_err(PreferenceError::Store)?;
                debug!(user = %owner, "role removed after notifications were disabled");
            }
        }

        info!(
            user = %owner,
            enabled = record.enabled,
            start = %record.start_time,
            end = %record.end_time,
            "preference saved"
        );
        self.shared.write().await.record_preference(format!(
            "{owner}: enabled={} {}-{}",
            record.enabled, record.start_time, record.end_time
        ));

        Ok(record)
    }

    pub async fn coverage_report(&self) -> Result<CoverageReport> {
        let prefs = self.db.load_preferences().await?;
        let analysis = analyze(&prefs);

        let now = self.clock.now();
        let next_watering = self
            .shared
            .read()
            .await
            .watering
            .next_occurrence
            .filter(|at| *at > now)
            .map(|at| {
                let remaining_secs = (at - now).whole_seconds();
                NextWatering {
                    at,
                    remaining_secs,
                    remaining: format_remaining(remaining_secs),
                }
            });

        Ok(CoverageReport {
            analysis,
            next_watering,
        })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
