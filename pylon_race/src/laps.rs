//! Per-slot ordered lap store.
//!
//! Laps are keyed by a monotonically increasing integer assigned by the
//! processor and partitioned into primary laps (`timer_index == 0`) and
//! split laps (`timer_index > 0`), each kept sorted by `timedelta`.
//! Query results are memoized per argument set and invalidated on any
//! mutation.

use pylon_common::record::LapRecord;

/// Result of a fastest-consecutive query: how many laps the window
/// actually covers and their total time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsecutiveTime {
    /// Laps covered; less than the requested window until the pilot has
    /// completed enough laps.
    pub laps: usize,
    /// Total time of the window [s].
    pub time: f64,
}

/// Lap store for a single slot.
#[derive(Debug, Default)]
pub struct LapsManager {
    /// Primary-gate crossings, sorted by timedelta.
    primary: Vec<(u32, LapRecord)>,
    /// Split-gate crossings, sorted by timedelta.
    split: Vec<(u32, LapRecord)>,

    // Memoized last-query results, cleared on every mutation.
    fastest: Option<(bool, Option<f64>)>,
    consecutive: Option<(usize, bool, Option<ConsecutiveTime>)>,
}

impl LapsManager {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn invalidate(&mut self) {
        self.fastest = None;
        self.consecutive = None;
    }

    /// Insert a lap under `key`, keeping its partition sorted by
    /// timedelta.
    pub fn add_lap(&mut self, key: u32, record: LapRecord) {
        let partition = if record.is_primary() {
            &mut self.primary
        } else {
            &mut self.split
        };
        let at = partition.partition_point(|(_, r)| r.timedelta <= record.timedelta);
        partition.insert(at, (key, record));
        self.invalidate();
    }

    /// Remove the lap stored under `key`. Returns false when the key is
    /// unknown; callers treat that as an error.
    pub fn remove_lap(&mut self, key: u32) -> bool {
        if let Some(at) = self.primary.iter().position(|(k, _)| *k == key) {
            self.primary.remove(at);
            self.invalidate();
            return true;
        }
        if let Some(at) = self.split.iter().position(|(k, _)| *k == key) {
            self.split.remove(at);
            self.invalidate();
            return true;
        }
        false
    }

    /// Number of completed primary laps.
    #[inline]
    pub fn primary_count(&self) -> usize {
        self.primary.len()
    }

    /// True when no laps of any kind are stored.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.split.is_empty()
    }

    /// The primary lap with the greatest timedelta.
    pub fn get_last_primary_lap(&self) -> Option<&LapRecord> {
        self.primary.last().map(|(_, record)| record)
    }

    /// The split lap with the greatest timedelta.
    pub fn get_last_split_lap(&self) -> Option<&LapRecord> {
        self.split.last().map(|(_, record)| record)
    }

    /// All stored laps, primary first.
    pub fn iter_laps(&self) -> impl Iterator<Item = &LapRecord> {
        self.primary
            .iter()
            .chain(self.split.iter())
            .map(|(_, record)| record)
    }

    /// Fastest single lap time over primary laps.
    ///
    /// With `holeshot` false the interval from race start to the first
    /// crossing counts as a lap; with `holeshot` true only gaps between
    /// consecutive crossings count, requiring at least two primary laps.
    pub fn get_fastest_time(&mut self, holeshot: bool) -> Option<f64> {
        if let Some((args, result)) = self.fastest {
            if args == holeshot {
                return result;
            }
        }

        let result = self.compute_fastest(holeshot);
        self.fastest = Some((holeshot, result));
        result
    }

    fn compute_fastest(&self, holeshot: bool) -> Option<f64> {
        let times: Vec<f64> = self.primary.iter().map(|(_, r)| r.timedelta).collect();

        let min_gap = times
            .windows(2)
            .map(|w| w[1] - w[0])
            .min_by(|a, b| a.total_cmp(b));

        if holeshot {
            return min_gap;
        }

        let first = *times.first()?;
        Some(match min_gap {
            Some(gap) if gap < first => gap,
            _ => first,
        })
    }

    /// Fastest window of `window` consecutive primary laps.
    ///
    /// Until the pilot has completed `window` laps the partial
    /// `(total_laps, total_time)` is returned. With `holeshot` true the
    /// first lap is excluded from windows but still serves as a window's
    /// start boundary.
    pub fn get_fastest_consecutive_time(
        &mut self,
        window: usize,
        holeshot: bool,
    ) -> Option<ConsecutiveTime> {
        if let Some((w, h, result)) = self.consecutive {
            if w == window && h == holeshot {
                return result;
            }
        }

        let result = self.compute_fastest_consecutive(window, holeshot);
        self.consecutive = Some((window, holeshot, result));
        result
    }

    fn compute_fastest_consecutive(
        &self,
        window: usize,
        holeshot: bool,
    ) -> Option<ConsecutiveTime> {
        if window == 0 {
            return None;
        }

        let times: Vec<f64> = self.primary.iter().map(|(_, r)| r.timedelta).collect();
        let start_min = usize::from(holeshot);
        let available = times.len().checked_sub(start_min)?;
        if available == 0 {
            return None;
        }

        let boundary = |i: usize| if i == 0 { 0.0 } else { times[i - 1] };

        if available < window {
            return Some(ConsecutiveTime {
                laps: available,
                time: times[times.len() - 1] - boundary(start_min),
            });
        }

        let best = (start_min..=times.len() - window)
            .map(|i| times[i + window - 1] - boundary(i))
            .min_by(|a, b| a.total_cmp(b))?;

        Some(ConsecutiveTime {
            laps: window,
            time: best,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
