//! Decides who should hold the notification role for the next watering.

use serde::Serialize;
use std::collections::BTreeSet;
use time::{OffsetDateTime, UtcOffset};

use crate::daytime::minute_of_day;
use crate::preference::{Preference, UserId};

/// Role changes needed so exactly the eligible users hold the role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoleDelta {
    pub to_add: BTreeSet<UserId>,
    pub to_remove: BTreeSet<UserId>,
}

impl RoleDelta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Enabled users whose window contains `minute`, minus whoever watered last.
pub fn eligible_users(
    minute: u16,
    last_actor: Option<UserId>,
    prefs: &[Preference],
) -> BTreeSet<UserId> {
    prefs
        .iter()
        .filter(|p| p.enabled)
        .filter(|p| Some(p.owner) != last_actor)
        .filter(|p| p.window.contains(minute))
        .map(|p| p.owner)
        .collect()
}

pub fn reconcile(
    next_occurrence: OffsetDateTime,
    offset: UtcOffset,
    last_actor: Option<UserId>,
    prefs: &[Preference],
    holders: &BTreeSet<UserId>,
) -> RoleDelta {
    let minute = minute_of_day(next_occurrence, offset);
    let eligible = eligible_users(minute, last_actor, prefs);

    RoleDelta {
        to_add: eligible.difference(holders).copied().collect(),
        to_remove: holders.difference(&eligible).copied().collect(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preference::RingInterval;
    use time::macros::{datetime, offset};

    fn pref(owner: u64, start: &str, end: &str, enabled: bool) -> Preference {
        Preference {
            owner: UserId(owner),
            enabled,
            window: RingInterval::from_hhmm(start, end).unwrap(),
        }
    }

    fn ids(v: &[u64]) -> BTreeSet<UserId> {
        v.iter().copied().map(UserId).collect()
    }

    #[test]
    fn overnight_window_matches_late_evening_and_early_morning() {
        let prefs = [pref(1, "22:00", "02:00", true)];
        assert_eq!(eligible_users(23 * 60 + 30, None, &prefs), ids(&[1]));
        assert_eq!(eligible_users(60, None, &prefs), ids(&[1]));
        assert!(eligible_users(12 * 60, None, &prefs).is_empty());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let prefs = [pref(1, "09:00", "17:00", true)];
        assert_eq!(eligible_users(540, None, &prefs), ids(&[1]));
        assert_eq!(eligible_users(1020, None, &prefs), ids(&[1]));
        assert!(eligible_users(1021, None, &prefs).is_empty());
    }

    #[test]
    fn disabled_and_last_actor_are_excluded() {
        let prefs = [
            pref(1, "00:00", "23:59", true),
            pref(2, "00:00", "23:59", false),
            pref(3, "00:00", "23:59", true),
        ];
        assert_eq!(eligible_users(600, Some(UserId(3)), &prefs), ids(&[1]));
    }

    #[test]
    fn delta_adds_missing_and_removes_extra() {
        let prefs = [
            pref(1, "09:00", "17:00", true),
            pref(2, "09:00", "17:00", true),
            pref(3, "18:00", "22:00", true),
        ];
        let at = datetime!(2025-06-01 10:15 UTC);
        let holders = ids(&[2, 3, 99]);

        let delta = reconcile(at, UtcOffset::UTC, None, &prefs, &holders);
        assert_eq!(delta.to_add, ids(&[1]));
        assert_eq!(delta.to_remove, ids(&[3, 99]));
    }

    #[test]
    fn last_actor_loses_the_role() {
        let prefs = [pref(1, "00:00", "23:59", true), pref(2, "00:00", "23:59", true)];
        let at = datetime!(2025-06-01 10:15 UTC);

        let delta = reconcile(at, UtcOffset::UTC, Some(UserId(1)), &prefs, &ids(&[1, 2]));
        assert!(delta.to_add.is_empty());
        assert_eq!(delta.to_remove, ids(&[1]));
    }

    #[test]
    fn nobody_eligible_clears_every_holder() {
        let prefs = [pref(1, "09:00", "10:00", true)];
        let at = datetime!(2025-06-01 20:00 UTC);

        let delta = reconcile(at, UtcOffset::UTC, None, &prefs, &ids(&[1, 2]));
        assert!(delta.to_add.is_empty());
        assert_eq!(delta.to_remove, ids(&[1, 2]));
    }

    #[test]
    fn already_reconciled_is_empty() {
        let prefs = [pref(1, "00:00", "23:59", true)];
        let at = datetime!(2025-06-01 08:00 UTC);
        assert!(reconcile(at, UtcOffset::UTC, None, &prefs, &ids(&[1])).is_empty());
    }

    #[test]
    fn occurrence_is_read_in_the_configured_offset() {
        // 21:30 UTC is 23:30 at +02:00, inside a 22:00-02:00 window.
        let prefs = [pref(1, "22:00", "02:00", true)];
        let at = datetime!(2025-06-01 21:30 UTC);

        assert_eq!(
            reconcile(at, offset!(+2), None, &prefs, &BTreeSet::new()).to_add,
            ids(&[1])
        );
        assert!(reconcile(at, UtcOffset::UTC, None, &prefs, &BTreeSet::new())
            .to_add
            .is_empty());
    }
}
