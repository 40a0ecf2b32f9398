//! Token-bucket statistics: a fixed-size ring of starvation samples.
//!
//! Each time a consume cannot be satisfied the bucket records how starved
//! it was and when. The control plane drains the ring periodically; a
//! garbage collector drops samples that have aged out of the sliding
//! window between collections.

use crate::options;

/// One starvation sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TbStatsEntry {
    /// Deficit at the failed consume, normalized by the bucket capacity.
    pub normalized_empty_bucket: f32,
    /// Tokens left in the bucket when the consume failed.
    pub tokens_left: f64,
    /// Wall-clock collection timestamp in microseconds.
    pub collection_timestamp: u64,
}

/// Raw statistics carrier handed to the control plane.
#[derive(Debug, Clone, Default)]
pub struct ObjectStatisticsRaw {
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub entries: Vec<TbStatsEntry>,
}

/// Ring buffer of at most `max_statistics` samples.
///
/// `collect` resets the counters but deliberately leaves the underlying
/// buffer contents in place; stale cells are unreachable because the
/// counters gate every read.
#[derive(Debug, Clone)]
pub struct TbStats {
    entries: Vec<TbStatsEntry>,
    total_stats: usize,
    position: usize,
    max_statistics: usize,
}

impl TbStats {
    pub fn new(max_statistics: usize) -> TbStats {
        TbStats {
            entries: vec![TbStatsEntry::default(); max_statistics],
            total_stats: 0,
            position: 0,
            max_statistics,
        }
    }

    fn now_micros() -> u64 {
        chrono::Utc::now().timestamp_micros().max(0) as u64
    }

    /// Record a failed consume at the rotating write index.
    pub fn store_stats_entry(&mut self, normalized_empty_bucket: f32, tokens_left: f64) {
        self.entries[self.position] = TbStatsEntry {
            normalized_empty_bucket,
            tokens_left,
            collection_timestamp: Self::now_micros(),
        };
        self.position = (self.position + 1) % self.max_statistics;
        if self.total_stats < self.max_statistics {
            self.total_stats += 1;
        }
    }

    /// Copy the valid samples into `raw`, oldest first, then reset the
    /// counters. Returns the number of samples collected.
    pub fn collect_stats(&mut self, raw: &mut ObjectStatisticsRaw) -> usize {
        let collected = self.total_stats;
        let oldest = (self.position + self.max_statistics - self.total_stats) % self.max_statistics;
        for offset in 0..self.total_stats {
            let index = (oldest + offset) % self.max_statistics;
            raw.entries.push(self.entries[index]);
        }
        self.total_stats = 0;
        self.position = 0;
        collected
    }

    pub fn total_stats(&self) -> usize {
        self.total_stats
    }

    /// Invalidate samples older than `now - sliding_window_us` so the next
    /// collection skips them. Returns the number invalidated.
    pub fn garbage_collection(&mut self, now_us: u64, sliding_window_us: u64) -> usize {
        let threshold = now_us.saturating_sub(sliding_window_us);
        let oldest = (self.position + self.max_statistics - self.total_stats) % self.max_statistics;
        let mut stale = 0;
        for offset in 0..self.total_stats {
            let index = (oldest + offset) % self.max_statistics;
            if self.entries[index].collection_timestamp < threshold {
                stale += 1;
            } else {
                // Samples are stored in time order; the first fresh one
                // ends the stale prefix.
                break;
            }
        }
        self.total_stats -= stale;
        stale
    }

    pub fn gc_now(&mut self, sliding_window_us: u64) -> usize {
        self.garbage_collection(Self::now_micros(), sliding_window_us)
    }
}

impl Default for TbStats {
    fn default() -> Self {
        TbStats::new(options::DEFAULT_MAX_STATISTICS)
    }
}

impl std::fmt::Display for TbStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TbStats {{{}, {}, {}}}",
            self.total_stats, self.position, self.max_statistics
        )
    }
}
