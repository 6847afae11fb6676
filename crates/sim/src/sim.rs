//! Tree status message simulator for local development.
//!
//! Produces the edits another bot makes to the tree status message:
//! - who watered last, as a user mention
//! - when the tree can be watered next, as a relative timestamp token
//! - the "growing" marker while the tree is growing

use serde::Serialize;
use std::fmt;

const GROWING_MARKER: &str = "It's growing right now";
const WATERER_POOL: usize = 6;

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO` env var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// A new waterer and a fresh ETA on every publish.
    Growing,
    /// Repeats the same status until its ETA has passed. Exercises the
    /// notifier's already-scheduled guard.
    Echo,
    /// ETAs that are already in the past.
    Stale,
    /// The tree is not growing; nothing should be scheduled.
    Dormant,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "echo" => Self::Echo,
            "stale" => Self::Stale,
            "dormant" => Self::Dormant,
            _ => Self::Growing, // default
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Growing => write!(f, "growing"),
            Self::Echo => write!(f, "echo"),
            Self::Stale => write!(f, "stale"),
            Self::Dormant => write!(f, "dormant"),
        }
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Embed {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusMsg {
    pub embeds: Vec<Embed>,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct TreeSim {
    scenario: Scenario,
    grow_s: i64,
    waterers: Vec<u64>,
    /// Last published `(waterer, next watering)`.
    current: Option<(u64, i64)>,
    rng: fastrand::Rng,
}

impl TreeSim {
    pub fn new(scenario: Scenario, grow_s: i64) -> Self {
        Self::with_rng(scenario, grow_s, fastrand::Rng::new())
    }

    pub fn with_rng(scenario: Scenario, grow_s: i64, mut rng: fastrand::Rng) -> Self {
        // Snowflake-sized ids.
        let waterers = (0..WATERER_POOL)
            .map(|_| rng.u64(100_000_000_000_000_000..1_000_000_000_000_000_000))
            .collect();
        Self {
            scenario,
            grow_s: grow_s.max(1),
            waterers,
            current: None,
            rng,
        }
    }

    pub fn waterers(&self) -> &[u64] {
        &self.waterers
    }

    /// Next status snapshot as seen at `now` (unix seconds).
    pub fn next_status(&mut self, now: i64) -> StatusMsg {
        let description = match self.scenario {
            Scenario::Dormant => "The tree is resting. Come back later!".to_string(),
            Scenario::Growing => {
                let next = now + self.grow_s + self.jitter();
                let actor = self.pick_waterer();
                self.describe(actor, next)
            }
            Scenario::Echo => {
                let (actor, next) = match self.current {
                    Some((actor, next)) if next > now => (actor, next),
                    _ => (self.pick_waterer(), now + self.grow_s + self.jitter()),
                };
                self.describe(actor, next)
            }
            Scenario::Stale => {
                let next = now - self.rng.i64(60..3600);
                let actor = self.pick_waterer();
                self.describe(actor, next)
            }
        };

        StatusMsg {
            embeds: vec![Embed {
                title: "Tree".to_string(),
                description,
            }],
        }
    }

    fn describe(&mut self, actor: u64, next: i64) -> String {
        self.current = Some((actor, next));
        // Mentions come in both forms depending on the client.
        let mention = if self.rng.bool() {
            format!("<@{actor}>")
        } else {
            format!("<@!{actor}>")
        };
        format!(
            "{GROWING_MARKER}\nThanks {mention} for watering the tree!\nNext watering: <t:{next}:R>"
        )
    }

    fn pick_waterer(&mut self) -> u64 {
        self.waterers[self.rng.usize(..self.waterers.len())]
    }

    /// Up to 10% of the growth time.
    fn jitter(&mut self) -> i64 {
        self.rng.i64(0..=self.grow_s / 10)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_750_000_000;

    fn sim(scenario: Scenario) -> TreeSim {
        TreeSim::with_rng(scenario, 600, fastrand::Rng::with_seed(7))
    }

    fn description(msg: &StatusMsg) -> &str {
        &msg.embeds[0].description
    }

    /// Pull `<t:SECONDS:R>` back out of a description.
    fn eta(desc: &str) -> i64 {
        let start = desc.find("<t:").unwrap() + 3;
        let end = desc[start..].find(":R>").unwrap() + start;
        desc[start..end].parse().unwrap()
    }

    #[test]
    fn scenario_from_str() {
        assert_eq!(Scenario::from_str_lossy("ECHO"), Scenario::Echo);
        assert_eq!(Scenario::from_str_lossy("stale"), Scenario::Stale);
        assert_eq!(Scenario::from_str_lossy("dormant"), Scenario::Dormant);
        assert_eq!(Scenario::from_str_lossy("whatever"), Scenario::Growing);
        assert_eq!(Scenario::Echo.to_string(), "echo");
    }

    #[test]
    fn growing_status_is_in_the_future() {
        let mut sim = sim(Scenario::Growing);
        let msg = sim.next_status(NOW);
        let desc = description(&msg);

        assert!(desc.contains(GROWING_MARKER));
        assert!(desc.contains("for watering the tree!"));
        let at = eta(desc);
        assert!((NOW + 600..=NOW + 660).contains(&at), "eta {at}");
    }

    #[test]
    fn growing_mentions_a_known_waterer() {
        let mut sim = sim(Scenario::Growing);
        let msg = sim.next_status(NOW);
        let desc = description(&msg);
        assert!(sim.waterers().iter().any(|id| desc.contains(&id.to_string())));
    }

    #[test]
    fn echo_repeats_until_due() {
        let mut sim = sim(Scenario::Echo);
        let first = eta(description(&sim.next_status(NOW)));
        let again = eta(description(&sim.next_status(NOW + 60)));
        assert_eq!(first, again);

        let later = eta(description(&sim.next_status(first + 1)));
        assert!(later > first);
    }

    #[test]
    fn stale_status_is_in_the_past() {
        let mut sim = sim(Scenario::Stale);
        for _ in 0..20 {
            assert!(eta(description(&sim.next_status(NOW))) < NOW);
        }
    }

    #[test]
    fn dormant_has_no_marker() {
        let mut sim = sim(Scenario::Dormant);
        let msg = sim.next_status(NOW);
        assert!(!description(&msg).contains(GROWING_MARKER));
        assert!(!description(&msg).contains("<t:"));
    }

    #[test]
    fn status_serializes_like_a_chat_message() {
        let msg = sim(Scenario::Growing).next_status(NOW);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["embeds"].as_array().unwrap().len(), 1);
        assert_eq!(json["embeds"][0]["title"], "Tree");
        assert!(json["embeds"][0]["description"].is_string());
    }
}
