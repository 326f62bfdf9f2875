//! Running-average timing for ETA estimates.

use std::time::{Duration, Instant};

/// Tracks how long items take and estimates the time left.
///
/// Used per tile on the tile path and per feature on the feature path.
#[derive(Debug, Clone)]
pub struct TileTimer {
    total: u64,
    processed: u64,
    average: Duration,
    item_started: Option<Instant>,
}

impl TileTimer {
    /// `total` is the estimated number of items.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            processed: 0,
            average: Duration::ZERO,
            item_started: None,
        }
    }

    pub fn start_item(&mut self) {
        self.item_started = Some(Instant::now());
    }

    /// Ends the item started last and folds its duration into the average.
    pub fn finish_item(&mut self) {
        let elapsed = self
            .item_started
            .take()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        self.record(elapsed);
    }

    /// Folds one item duration into the running average.
    pub fn record(&mut self, elapsed: Duration) {
        self.processed += 1;
        // avg += (x - avg) / n, kept in nanoseconds.
        let avg = self.average.as_nanos() as f64;
        let x = elapsed.as_nanos() as f64;
        let next = avg + (x - avg) / self.processed as f64;
        self.average = Duration::from_nanos(next.max(0.0) as u64);
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn average(&self) -> Duration {
        self.average
    }

    /// Percent of the estimate processed so far.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.processed as f64 / self.total as f64 * 100.0).min(100.0)
    }

    /// Seconds left at the current average, `None` before the first item.
    pub fn eta_seconds(&self) -> Option<u64> {
        if self.processed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.processed);
        Some((self.average.as_secs_f64() * remaining as f64).ceil() as u64)
    }
}
