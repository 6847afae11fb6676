//! Coverage of the day by enabled notification windows.
//!
//! Every enabled preference adds 1 to each minute of its window in a
//! 1440-slot histogram. Gaps are the maximal runs nobody covers; the
//! least-covered ranges are the maximal runs at the smallest non-zero count.
//!
//! Runs are reported as [`MinuteRange`]s on the ring: `end` is the first
//! minute *after* the run, so a run touching 23:59 ends at `00:00`. A run
//! that reaches the end of the array while minute 0 has the same property
//! is merged with the leading run into one range straddling midnight.

use serde::Serialize;
use std::fmt;
use std::ops::Index;

use crate::daytime::{minutes_to_hhmm, MINUTES_PER_DAY};
use crate::preference::Preference;

const DAY: usize = MINUTES_PER_DAY as usize;

/// Maximum number of least-covered ranges reported.
pub const MAX_LEAST_COVERED: usize = 3;

// ---------------------------------------------------------------------------
// Histogram
// ---------------------------------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
pub struct CoverageHistogram {
    counts: [u32; DAY],
}

impl CoverageHistogram {
    pub fn empty() -> Self {
        Self { counts: [0; DAY] }
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.counts
    }

    /// Smallest non-zero count, if any minute is covered at all.
    pub fn min_positive(&self) -> Option<u32> {
        self.counts.iter().copied().filter(|&c| c > 0).min()
    }
}

impl Index<u16> for CoverageHistogram {
    type Output = u32;

    fn index(&self, minute: u16) -> &u32 {
        &self.counts[minute as usize]
    }
}

impl fmt::Debug for CoverageHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoverageHistogram")
            .field("covered_minutes", &self.counts.iter().filter(|&&c| c > 0).count())
            .field("max", &self.counts.iter().max())
            .finish()
    }
}

pub fn build_histogram(prefs: &[Preference]) -> CoverageHistogram {
    let mut hist = CoverageHistogram::empty();
    for pref in prefs.iter().filter(|p| p.enabled) {
        for minute in pref.window.minutes() {
            hist.counts[minute as usize] += 1;
        }
    }
    hist
}

// ---------------------------------------------------------------------------
// Ranges
// ---------------------------------------------------------------------------

/// A maximal run on the ring. `start == end` means the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinuteRange {
    pub start: u16,
    pub end: u16,
}

impl MinuteRange {
    fn new(start: usize, end: usize) -> Self {
        Self {
            start: start as u16,
            end: (end % DAY) as u16,
        }
    }

    pub fn is_full_day(&self) -> bool {
        self.start == self.end
    }

    /// Length in minutes, wrap-aware.
    pub fn duration(&self) -> u16 {
        if self.is_full_day() {
            MINUTES_PER_DAY
        } else if self.end >= self.start {
            self.end - self.start
        } else {
            MINUTES_PER_DAY - self.start + self.end
        }
    }

    /// Minutes inside the run, in ring order.
    pub fn minutes(&self) -> impl Iterator<Item = u16> {
        let start = self.start;
        (0..self.duration()).map(move |i| (start + i) % MINUTES_PER_DAY)
    }
}

impl fmt::Display for MinuteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} → {}", minutes_to_hhmm(self.start), minutes_to_hhmm(self.end))
    }
}

impl Serialize for MinuteRange {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("MinuteRange", 3)?;
        s.serialize_field("start", &minutes_to_hhmm(self.start))?;
        s.serialize_field("end", &minutes_to_hhmm(self.end))?;
        s.serialize_field("minutes", &self.duration())?;
        s.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoveredRange {
    #[serde(flatten)]
    pub range: MinuteRange,
    pub count: u32,
}

/// Maximal runs of minutes whose count satisfies `pred`, in discovery order,
/// with the midnight-straddling run merged and placed last. The merged run
/// takes the position of its tail, not of the part found at 00:00.
fn runs_where(counts: &[u32], pred: impl Fn(u32) -> bool) -> Vec<MinuteRange> {
    let mut runs = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, &count) in counts.iter().enumerate() {
        match (pred(count), run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                runs.push(MinuteRange::new(start, i));
                run_start = None;
            }
            _ => {}
        }
    }

    // A run still open at 23:59 either spans the whole day, joins the run
    // that opened at 00:00, or simply ends at midnight.
    if let Some(start) = run_start {
        if start == 0 {
            runs.push(MinuteRange::new(0, 0));
        } else if runs.first().is_some_and(|r| r.start == 0) {
            let leading = runs.remove(0);
            runs.push(MinuteRange::new(start, leading.end as usize));
        } else {
            runs.push(MinuteRange::new(start, DAY));
        }
    }

    runs
}

/// Maximal uncovered runs.
pub fn find_gaps(hist: &CoverageHistogram) -> Vec<MinuteRange> {
    runs_where(hist.as_slice(), |c| c == 0)
}

/// Up to three longest runs at the global minimum non-zero count. Ties keep
/// discovery order, so a run straddling midnight ranks last among runs of
/// equal length.
pub fn find_least_covered_ranges(hist: &CoverageHistogram) -> Vec<CoveredRange> {
    let Some(min) = hist.min_positive() else {
        return Vec::new();
    };

    let mut ranges: Vec<CoveredRange> = runs_where(hist.as_slice(), |c| c == min)
        .into_iter()
        .map(|range| CoveredRange { range, count: min })
        .collect();

    // `sort_by` is stable.
    ranges.sort_by(|a, b| b.range.duration().cmp(&a.range.duration()));
    ranges.truncate(MAX_LEAST_COVERED);
    ranges
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageAnalysis {
    pub total: usize,
    pub enabled: usize,
    pub gaps: Vec<MinuteRange>,
    pub full_coverage: bool,
    pub least_covered: Vec<CoveredRange>,
}

/// Statistics over a snapshot of every stored preference. Least-covered
/// ranges are only computed once the whole day is covered.
pub fn analyze(prefs: &[Preference]) -> CoverageAnalysis {
    let enabled = prefs.iter().filter(|p| p.enabled).count();
    let hist = build_histogram(prefs);
    let gaps = find_gaps(&hist);
    let full_coverage = gaps.is_empty() && enabled > 0;
    let least_covered = if full_coverage {
        find_least_covered_ranges(&hist)
    } else {
        Vec::new()
    };

    CoverageAnalysis {
        total: prefs.len(),
        enabled,
        gaps,
        full_coverage,
        least_covered,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
