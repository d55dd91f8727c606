use log::{debug, trace};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Files at or above this percentage count as done.
pub const COMPLETE_THRESHOLD: f64 = 99.9;

/// Per-file progress as reported by the transfer loop, one per written chunk.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressSnapshot {
    /// 1-based position of the file in the manifest.
    pub file_index: usize,
    pub total_files: usize,
    pub file_name: String,
    pub percentage: f64,
}

/// Display-ready progress for the whole batch.
#[derive(Clone, Debug, PartialEq)]
pub struct InstallProgress {
    pub file_index: usize,
    pub total_files: usize,
    pub file_name: String,
    pub file_percent: f64,
    pub overall_percent: f64,
}

/// Folds the per-file percentage stream into an overall batch percentage.
///
/// `completed` only ever grows. It advances when a file reports at least
/// [`COMPLETE_THRESHOLD`], when the run marks a file done explicitly, and when a
/// later file starts reporting (files are fetched strictly in order, so every
/// earlier one must be finished by then).
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    completed: usize,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_files(&self) -> usize {
        self.completed
    }

    pub fn observe(&mut self, snapshot: &ProgressSnapshot) -> InstallProgress {
        let file_percent = clamp_percent(snapshot.percentage);
        let index = snapshot.file_index;
        self.completed = self.completed.max(index.saturating_sub(1));
        if file_percent >= COMPLETE_THRESHOLD && index > self.completed {
            self.completed = index;
        }
        self.snapshot_state(snapshot, file_percent)
    }

    /// Record that file `index` finished, whatever its last reported percentage was.
    pub fn mark_complete(&mut self, snapshot: &ProgressSnapshot) -> InstallProgress {
        self.completed = self.completed.max(snapshot.file_index);
        self.snapshot_state(snapshot, 100.0)
    }

    fn snapshot_state(&self, snapshot: &ProgressSnapshot, file_percent: f64) -> InstallProgress {
        InstallProgress {
            file_index: snapshot.file_index,
            total_files: snapshot.total_files,
            file_name: snapshot.file_name.clone(),
            file_percent,
            overall_percent: self.overall(snapshot.file_index, snapshot.total_files, file_percent),
        }
    }

    fn overall(&self, index: usize, total: usize, file_percent: f64) -> f64 {
        if total == 0 {
            return 100.0;
        }
        // A completed current file is already part of `completed`.
        let current = if index > self.completed {
            file_percent
        } else {
            0.0
        };
        clamp_percent((self.completed as f64 * 100.0 + current) / total as f64)
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

/// Worker-side end of the progress pipe.
///
/// Aggregates on the worker and hands finished frames to the consumer without
/// ever waiting: when the channel is full the frame is dropped, the next one
/// carries newer totals anyway.
pub struct ProgressReporter {
    aggregator: ProgressAggregator,
    tx: Option<mpsc::Sender<InstallProgress>>,
}

impl ProgressReporter {
    pub fn new(tx: Option<mpsc::Sender<InstallProgress>>) -> Self {
        Self {
            aggregator: ProgressAggregator::new(),
            tx,
        }
    }

    pub fn completed_files(&self) -> usize {
        self.aggregator.completed_files()
    }

    pub fn report(&mut self, snapshot: &ProgressSnapshot) {
        let update = self.aggregator.observe(snapshot);
        trace!(
            "progress: {}/{} {} {:.1}% overall {:.1}%",
            update.file_index,
            update.total_files,
            update.file_name,
            update.file_percent,
            update.overall_percent
        );
        self.send(update);
    }

    pub fn complete(&mut self, snapshot: &ProgressSnapshot) {
        let update = self.aggregator.mark_complete(snapshot);
        debug!(
            "progress: {} complete ({}/{}), overall {:.1}%",
            update.file_name, update.file_index, update.total_files, update.overall_percent
        );
        self.send(update);
    }

    fn send(&self, update: InstallProgress) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(update) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Closed(_)) => trace!("progress: consumer went away"),
        }
    }
}
