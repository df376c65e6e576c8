// Progress Module - Batch Progress Aggregation
// =======================================================
// This module folds per-task byte counts into a single 0-100 percentage for
// the whole batch. Progress is weighted by bytes rather than by file count,
// so one large file does not jump the bar from 0 to 50% on completion.
//
// Key features:
// - Byte-weighted global percentage across heterogeneous file sizes
// - A phase span, so the cipher phase can be mapped onto 0-60% when a
//   write-back phase follows
// - The percentage never reports the end of the phase before every task has
//   reached a terminal state
// - HH:MM:SS formatting for batch summaries

use std::time::Duration;

/// Tracks the last reported processed-byte count of every task in a batch.
pub struct ProgressTracker {
    sizes: Vec<u64>,                  // Source size of each task
    processed: Vec<u64>,              // Last reported processed bytes of each task
    done: Vec<bool>,                  // Whether each task reached a terminal state
    total_bytes: u64,                 // Sum of all task sizes
    finished: usize,                  // Number of terminal tasks
    span: (f64, f64),                 // Percent range this phase maps onto
}

impl ProgressTracker {
    /// Create a tracker for tasks of the given sizes, mapped onto the full
    /// 0-100 range.
    pub fn new(sizes: Vec<u64>) -> Self {
        Self::with_span(sizes, 0.0, 100.0)
    }

    /// Create a tracker whose percentage is mapped onto `start..end`.
    pub fn with_span(sizes: Vec<u64>, start: f64, end: f64) -> Self {
        let total_bytes = sizes.iter().sum();
        let count = sizes.len();
        Self {
            sizes,
            processed: vec![0; count],
            done: vec![false; count],
            total_bytes,
            finished: 0,
            span: (start, end),
        }
    }

    /// Record a progress report for one task.
    ///
    /// Reports are clamped to the task size and never move backwards, so late
    /// or out-of-order updates cannot make the bar regress.
    pub fn update(&mut self, index: usize, processed: u64) {
        if let (Some(slot), Some(&size)) = (self.processed.get_mut(index), self.sizes.get(index)) {
            *slot = (*slot).max(processed.min(size));
        }
    }

    /// Mark a task as terminal (succeeded, failed, stopped or skipped).
    ///
    /// Its full size counts as processed from here on.
    pub fn complete(&mut self, index: usize) {
        let Some(done) = self.done.get_mut(index) else {
            return;
        };
        if !*done {
            *done = true;
            self.finished += 1;
            self.processed[index] = self.sizes[index];
        }
    }

    /// Fraction of the batch processed, in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.sizes.is_empty() {
            return 1.0;
        }
        if self.total_bytes == 0 {
            return self.finished as f64 / self.sizes.len() as f64;
        }
        let processed: u64 = self.processed.iter().sum();
        processed as f64 / self.total_bytes as f64
    }

    /// Percentage within this tracker's span.
    ///
    /// Until every task is terminal the result stays strictly below the end of
    /// the span.
    pub fn percent(&self) -> u8 {
        let (start, end) = self.span;
        let mut value = start + (end - start) * self.fraction();
        if !self.is_complete() {
            value = value.min(end - 1.0);
        }
        value.floor().clamp(0.0, 100.0) as u8
    }

    /// Percentage of a single task, for status text.
    pub fn task_percent(&self, index: usize) -> u8 {
        match (self.processed.get(index), self.sizes.get(index)) {
            (Some(_), Some(0)) => 100,
            (Some(&done), Some(&size)) => ((done as f64 / size as f64) * 100.0).floor() as u8,
            _ => 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.finished == self.sizes.len()
    }

    pub fn finished_tasks(&self) -> usize {
        self.finished
    }

    pub fn total_tasks(&self) -> usize {
        self.sizes.len()
    }
}

/// Format a duration as HH:MM:SS
pub fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_weighted() {
        let mut tracker = ProgressTracker::new(vec![900, 100]);
        tracker.update(1, 100);
        assert_eq!(tracker.percent(), 10);
        tracker.update(0, 450);
        assert_eq!(tracker.percent(), 55);
    }

    #[test]
    fn never_reaches_end_before_all_terminal() {
        let mut tracker = ProgressTracker::new(vec![10, 10]);
        tracker.update(0, 10);
        tracker.update(1, 10);
        assert_eq!(tracker.percent(), 99);
        tracker.complete(0);
        tracker.complete(1);
        assert_eq!(tracker.percent(), 100);
    }

    #[test]
    fn updates_clamp_and_never_regress() {
        let mut tracker = ProgressTracker::new(vec![100]);
        tracker.update(0, 60);
        tracker.update(0, 30);
        assert_eq!(tracker.task_percent(0), 60);
        tracker.update(0, 5000);
        assert_eq!(tracker.task_percent(0), 100);
        tracker.update(7, 10);
    }

    #[test]
    fn span_maps_phase() {
        let mut tracker = ProgressTracker::with_span(vec![50, 50], 0.0, 60.0);
        tracker.update(0, 50);
        assert_eq!(tracker.percent(), 30);
        tracker.complete(0);
        tracker.complete(1);
        assert_eq!(tracker.percent(), 60);
    }

    #[test]
    fn empty_files_count_by_task() {
        let mut tracker = ProgressTracker::new(vec![0, 0, 0, 0]);
        assert_eq!(tracker.percent(), 0);
        tracker.complete(0);
        assert_eq!(tracker.percent(), 25);
        tracker.complete(0);
        assert_eq!(tracker.finished_tasks(), 1);
    }

    #[test]
    fn formats_duration() {
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }
}
