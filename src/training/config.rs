//! Training configuration.

use serde::{Deserialize, Serialize};

/// What to do with the rows left over when the batch size does not divide
/// the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialBatch {
    /// Train on the trailing undersized batch.
    #[default]
    Include,
    /// Skip the trailing rows.
    Drop,
}

/// Configuration for model training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of training epochs.
    pub epochs: usize,
    /// Batch size for training.
    pub batch_size: usize,
    /// Whether to log progress during training.
    pub verbose: bool,
    /// Handling of the trailing partial batch.
    pub partial_batch: PartialBatch,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            verbose: true,
            partial_batch: PartialBatch::Include,
        }
    }
}

impl TrainingConfig {
    /// Creates a new TrainingConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of epochs.
    pub fn epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets whether to log progress.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn partial_batch(mut self, partial_batch: PartialBatch) -> Self {
        self.partial_batch = partial_batch;
        self
    }

    /// Row windows `(start, len)` covering `rows` for one epoch.
    ///
    /// Windows are contiguous and do not overlap. Every full window is kept,
    /// including one ending exactly at `rows`.
    pub fn batch_windows(&self, rows: usize) -> Vec<(usize, usize)> {
        if self.batch_size == 0 {
            return vec![];
        }
        let full = rows / self.batch_size;
        let mut windows: Vec<(usize, usize)> = (0..full)
            .map(|i| (i * self.batch_size, self.batch_size))
            .collect();
        let remainder = rows % self.batch_size;
        if remainder > 0 && self.partial_batch == PartialBatch::Include {
            windows.push((full * self.batch_size, remainder));
        }
        windows
    }
}
