//! Watering scheduler: turns a parsed status update into two deferred
//! actions and tracks the single pending watering.
//!
//! The scheduler is a pure decision engine. Every input produces a
//! [`Transition`]: the replacement [`SchedulerState`] plus the [`Effect`]s
//! the driver must carry out (arm a timer, reconcile roles, announce).
//! Nothing here touches the clock, the database or the chat platform.
//!
//! ## State machine
//!
//! ```text
//!          on_parsed_event                      on_watering_fire
//! Idle ───────────────────────▶ Scheduled ─────────────────────────▶ Idle
//!                                 │    ▲
//!  on_parsed_event (rejected:     │    │  on_role_reconcile_fire
//!  AlreadyScheduled) ─────────────┘    └──(T - lead, roles reconciled)
//! ```
//!
//! `Scheduled` means the watering timer is pending. The role timer is only
//! armed when more than `lead` remains; otherwise roles are reconciled
//! straight away.

use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::clock::TimerTag;
use crate::parser::WateringEvent;
use crate::preference::UserId;

/// How long before the watering the notification role is handed out.
pub const DEFAULT_LEAD_TIME: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerState {
    /// Whoever watered last. Survives the announcement so the next
    /// reconciliation can still leave them out.
    pub last_actor: Option<UserId>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_occurrence: Option<OffsetDateTime>,
    pub pending: BTreeSet<TimerTag>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Scheduled,
}

impl SchedulerState {
    pub fn phase(&self) -> Phase {
        if self.pending.contains(&TimerTag::Watering) {
            Phase::Scheduled
        } else {
            Phase::Idle
        }
    }

    pub fn is_scheduled(&self) -> bool {
        self.phase() == Phase::Scheduled
    }
}

// ---------------------------------------------------------------------------
// Transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Arm the timer `tag` to fire after `delay`.
    Arm { tag: TimerTag, delay: Duration },
    /// Reconcile the notification role for the given watering.
    ReconcileRoles {
        next_occurrence: OffsetDateTime,
        last_actor: Option<UserId>,
    },
    /// Tell the channel the tree can be watered.
    Announce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub state: SchedulerState,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulingConflict {
    #[error("a watering is already scheduled for {pending_at:?}")]
    AlreadyScheduled { pending_at: Option<OffsetDateTime> },
}

/// Schedule a freshly parsed watering.
///
/// While a watering is pending every new event is rejected, even one with a
/// different time; the pending timers are left untouched.
pub fn on_parsed_event(
    state: &SchedulerState,
    event: &WateringEvent,
    now: OffsetDateTime,
    lead: Duration,
) -> Result<Transition, SchedulingConflict> {
    if state.is_scheduled() {
        return Err(SchedulingConflict::AlreadyScheduled {
            pending_at: state.next_occurrence,
        });
    }

    let delay: Duration = (event.next_occurrence - now)
        .try_into()
        .unwrap_or(Duration::ZERO);

    let mut next = SchedulerState {
        last_actor: Some(event.last_actor),
        next_occurrence: Some(event.next_occurrence),
        pending: state.pending.clone(),
    };
    let mut effects = vec![Effect::Arm {
        tag: TimerTag::Watering,
        delay,
    }];
    next.pending.insert(TimerTag::Watering);

    if delay > lead {
        effects.push(Effect::Arm {
            tag: TimerTag::RoleReconcile,
            delay: delay - lead,
        });
        next.pending.insert(TimerTag::RoleReconcile);
    } else {
        effects.push(Effect::ReconcileRoles {
            next_occurrence: event.next_occurrence,
            last_actor: Some(event.last_actor),
        });
    }

    Ok(Transition {
        state: next,
        effects,
    })
}

/// The watering time has come: announce and go back to idle. A fire with no
/// pending watering leaves the state alone and announces nothing.
pub fn on_watering_fire(state: &SchedulerState) -> Transition {
    if !state.is_scheduled() {
        return Transition {
            state: state.clone(),
            effects: Vec::new(),
        };
    }

    let mut pending = state.pending.clone();
    pending.remove(&TimerTag::Watering);

    Transition {
        state: SchedulerState {
            last_actor: state.last_actor,
            next_occurrence: None,
            pending,
        },
        effects: vec![Effect::Announce],
    }
}

/// The lead time before watering has been reached: reconcile roles for the
/// pending watering, if there still is one.
pub fn on_role_reconcile_fire(state: &SchedulerState) -> Transition {
    let mut next = state.clone();
    next.pending.remove(&TimerTag::RoleReconcile);

    let effects = match state.next_occurrence {
        Some(next_occurrence) => vec![Effect::ReconcileRoles {
            next_occurrence,
            last_actor: state.last_actor,
        }],
        None => Vec::new(),
    };

    Transition {
        state: next,
        effects,
    }
}

/// Dispatch a fired timer to its transition.
pub fn on_timer(state: &SchedulerState, tag: TimerTag) -> Transition {
    match tag {
        TimerTag::Watering => on_watering_fire(state),
        TimerTag::RoleReconcile => on_role_reconcile_fire(state),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
