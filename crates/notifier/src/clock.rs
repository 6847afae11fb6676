//! Time source and one-shot timers for the watering scheduler.
//!
//! Timers are keyed by [`TimerTag`]; at most one timer per tag exists, and
//! arming a tag again replaces the previous timer. When a timer elapses the
//! tag is delivered to the driver task, which feeds it back into the
//! scheduler.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimerTag {
    /// Announce that the tree can be watered.
    Watering,
    /// Hand the notification role to the right people shortly before.
    RoleReconcile,
}

impl TimerTag {
    pub fn name(&self) -> &'static str {
        match self {
            TimerTag::Watering => "tree-watering",
            TimerTag::RoleReconcile => "tree-role-handling",
        }
    }
}

/// Returned by [`Clock::after`]; identifies the armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub tag: TimerTag,
    pub due: OffsetDateTime,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Arm (or re-arm) the timer for `tag` to fire after `delay`.
    fn after(&self, delay: Duration, tag: TimerTag) -> TimerHandle;

    /// Disarm the timer for `tag`. Returns whether one was pending.
    fn cancel(&self, tag: TimerTag) -> bool;
}

// ---------------------------------------------------------------------------
// Tokio-backed clock
// ---------------------------------------------------------------------------

/// Wall clock whose timers are tokio tasks. Fired tags are sent on `fired`.
pub struct TokioClock {
    fired: mpsc::UnboundedSender<TimerTag>,
    timers: Mutex<HashMap<TimerTag, AbortHandle>>,
}

impl TokioClock {
    pub fn new(fired: mpsc::UnboundedSender<TimerTag>) -> Self {
        Self {
            fired,
            timers: Mutex::new(HashMap::new()),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn after(&self, delay: Duration, tag: TimerTag) -> TimerHandle {
        let due = self.now() + delay;
        let fired = self.fired.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if fired.send(tag).is_err() {
                warn!(timer = tag.name(), "timer fired after the driver stopped");
            }
        });

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = timers.insert(tag, task.abort_handle()) {
            previous.abort();
        }
        debug!(timer = tag.name(), delay_ms = delay.as_millis() as u64, "timer armed");

        TimerHandle { tag, due }
    }

    fn cancel(&self, tag: TimerTag) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        match timers.remove(&tag) {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                true
            }
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Virtual clock (tests)
// ---------------------------------------------------------------------------

/// Deterministic clock: time only moves through [`ManualClock::advance`].
#[cfg(test)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
    pending: Mutex<Vec<TimerHandle>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward and return the tags that came due, earliest first.
    pub fn advance(&self, by: Duration) -> Vec<TimerTag> {
        let now = {
            let mut now = self.now.lock().unwrap();
            *now += by;
            *now
        };
        let mut pending = self.pending.lock().unwrap();
        let mut due: Vec<TimerHandle> = pending.iter().copied().filter(|t| t.due <= now).collect();
        pending.retain(|t| t.due > now);
        due.sort_by_key(|t| t.due);
        due.into_iter().map(|t| t.tag).collect()
    }

    pub fn pending(&self) -> Vec<TimerHandle> {
        let mut pending = self.pending.lock().unwrap().clone();
        pending.sort_by_key(|t| t.due);
        pending
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().unwrap()
    }

    fn after(&self, delay: Duration, tag: TimerTag) -> TimerHandle {
        let handle = TimerHandle {
            tag,
            due: self.now() + delay,
        };
        let mut pending = self.pending.lock().unwrap();
        pending.retain(|t| t.tag != tag);
        pending.push(handle);
        handle
    }

    fn cancel(&self, tag: TimerTag) -> bool {
        let mut pending = self.pending.lock().unwrap();
        let before = pending.len();
        pending.retain(|t| t.tag != tag);
        pending.len() < before
    }
}

// ===========================================================================
// Tests
// ===========================================================================
