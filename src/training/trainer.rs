//! ExecutableModel - compiled train, predict and evaluate entry points.

use std::collections::HashMap;

use super::{PartialBatch, TrainingConfig};
use crate::backend::{Backend, BackendFunction, Node, Value};
use crate::errors::ModelError;

/// Loss values recorded while training.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingHistory {
    /// Mean aggregate loss per epoch.
    pub loss_history: Vec<f32>,
}

impl TrainingHistory {
    pub fn final_loss(&self) -> Option<f32> {
        self.loss_history.last().copied()
    }
}

/// Mean value of every loss and metric over an evaluated dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    pub losses: Vec<f32>,
    pub metrics: Vec<f32>,
}

/// Nodes captured by `Model::compile`, used to slice function results.
#[derive(Debug, Clone)]
pub(crate) struct ModelNodes {
    pub(crate) inputs: Vec<Node>,
    pub(crate) outputs: Vec<Node>,
    pub(crate) targets: Vec<Node>,
    pub(crate) losses: Vec<Node>,
    pub(crate) metrics: Vec<Node>,
    pub(crate) loss: Node,
}

/// A model bound to the backend it was compiled against.
///
/// Values passed to the entry points are positional: one feature value per
/// model input and one target value per model output, each with the batch
/// on the leading axis.
pub struct ExecutableModel<'b> {
    backend: &'b mut dyn Backend,
    train_function: BackendFunction,
    predict_function: BackendFunction,
    evaluate_function: BackendFunction,
    nodes: ModelNodes,
}

impl<'b> ExecutableModel<'b> {
    pub(crate) fn new(
        backend: &'b mut dyn Backend,
        train_function: BackendFunction,
        predict_function: BackendFunction,
        evaluate_function: BackendFunction,
        nodes: ModelNodes,
    ) -> Self {
        Self {
            backend,
            train_function,
            predict_function,
            evaluate_function,
            nodes,
        }
    }

    /// Runs one training step over exactly one batch.
    ///
    /// Returns one loss value per output, computed with the weights as they
    /// were before this step's updates.
    pub fn train_mini_batch(
        &mut self,
        features: &[Value],
        targets: &[Value],
    ) -> Result<Vec<Value>, ModelError> {
        let overrides = self.feeds(features, Some(targets))?;
        let mut results = self.train_function.execute(&mut *self.backend, overrides)?;
        let losses = results.split_off(self.nodes.outputs.len());
        Ok(losses.into_iter().take(self.nodes.losses.len()).collect())
    }

    /// Trains for `epochs` passes over the data in batches of `batch_size`.
    pub fn train(
        &mut self,
        features: &[Value],
        targets: &[Value],
        epochs: usize,
        batch_size: usize,
    ) -> Result<TrainingHistory, ModelError> {
        let config = TrainingConfig::new()
            .epochs(epochs)
            .batch_size(batch_size)
            .verbose(false);
        self.train_with(features, targets, &config)
    }

    /// Trains according to `config`.
    pub fn train_with(
        &mut self,
        features: &[Value],
        targets: &[Value],
        config: &TrainingConfig,
    ) -> Result<TrainingHistory, ModelError> {
        self.check_arity(features, Some(targets))?;
        let rows = row_count(features.iter().chain(targets))?;
        if config.epochs == 0 {
            return Err(ModelError::invalid_argument(
                "epochs",
                "training needs at least one epoch",
            ));
        }
        if config.batch_size == 0 {
            return Err(ModelError::invalid_argument(
                "batch_size",
                "training needs a batch size of at least one",
            ));
        }

        let windows = config.batch_windows(rows);
        if windows.is_empty() {
            return Err(ModelError::invalid_data(format!(
                "no batch of {} rows fits in {} rows",
                config.batch_size, rows
            )));
        }
        let dropped = rows - windows.iter().map(|&(_, len)| len).sum::<usize>();
        if dropped > 0 && config.partial_batch == PartialBatch::Drop {
            log::warn!("Dropping {} trailing rows each epoch", dropped);
        }

        let mut loss_history = Vec::with_capacity(config.epochs);
        for epoch in 0..config.epochs {
            let mut total = 0.0;
            for &(start, len) in &windows {
                let batch_features = slice_all(features, start, len)?;
                let batch_targets = slice_all(targets, start, len)?;
                let losses = self.train_mini_batch(&batch_features, &batch_targets)?;
                total += losses.iter().filter_map(Value::mean).sum::<f32>();
            }
            let epoch_loss = total / windows.len() as f32;
            loss_history.push(epoch_loss);

            if config.verbose && (epoch % 10 == 0 || epoch == config.epochs - 1) {
                log::info!(
                    "Epoch {}/{}: loss = {:.6}",
                    epoch + 1,
                    config.epochs,
                    epoch_loss
                );
            }
        }

        Ok(TrainingHistory { loss_history })
    }

    /// Computes the model outputs for `features`.
    pub fn predict(&mut self, features: &[Value]) -> Result<Vec<Value>, ModelError> {
        let overrides = self.feeds(features, None)?;
        self.predict_function.execute(&mut *self.backend, overrides)
    }

    /// Computes the mean of every loss and metric without training.
    pub fn evaluate(
        &mut self,
        features: &[Value],
        targets: &[Value],
    ) -> Result<Evaluation, ModelError> {
        let overrides = self.feeds(features, Some(targets))?;
        let mut results = self
            .evaluate_function
            .execute(&mut *self.backend, overrides)?;
        let metrics = results.split_off(self.nodes.losses.len());
        let mean = |values: Vec<Value>| -> Vec<f32> { values.iter().filter_map(Value::mean).collect() };
        Ok(Evaluation {
            losses: mean(results),
            metrics: mean(metrics),
        })
    }

    fn check_arity(&self, features: &[Value], targets: Option<&[Value]>) -> Result<(), ModelError> {
        if features.len() != self.nodes.inputs.len() {
            return Err(ModelError::invalid_argument(
                "features",
                format!(
                    "expected {} feature values, got {}",
                    self.nodes.inputs.len(),
                    features.len()
                ),
            ));
        }
        if let Some(targets) = targets {
            if targets.len() != self.nodes.targets.len() {
                return Err(ModelError::invalid_argument(
                    "targets",
                    format!(
                        "expected {} target values, got {}",
                        self.nodes.targets.len(),
                        targets.len()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn feeds(
        &self,
        features: &[Value],
        targets: Option<&[Value]>,
    ) -> Result<HashMap<Node, Value>, ModelError> {
        self.check_arity(features, targets)?;
        let mut overrides: HashMap<Node, Value> =
            self.nodes.inputs.iter().copied().zip(features.iter().cloned()).collect();
        if let Some(targets) = targets {
            row_count(features.iter().chain(targets))?;
            overrides.extend(self.nodes.targets.iter().copied().zip(targets.iter().cloned()));
        }
        Ok(overrides)
    }

    pub fn inputs(&self) -> &[Node] {
        &self.nodes.inputs
    }

    pub fn outputs(&self) -> &[Node] {
        &self.nodes.outputs
    }

    pub fn targets(&self) -> &[Node] {
        &self.nodes.targets
    }

    pub fn losses(&self) -> &[Node] {
        &self.nodes.losses
    }

    pub fn metrics(&self) -> &[Node] {
        &self.nodes.metrics
    }

    /// The aggregate training objective.
    pub fn loss(&self) -> Node {
        self.nodes.loss
    }

    pub fn train_function(&self) -> &BackendFunction {
        &self.train_function
    }

    pub fn predict_function(&self) -> &BackendFunction {
        &self.predict_function
    }

    pub fn backend(&self) -> &dyn Backend {
        &*self.backend
    }

    pub fn backend_mut(&mut self) -> &mut dyn Backend {
        &mut *self.backend
    }

    /// Disposes the backend. Every later call fails with
    /// [`ModelError::Disposed`].
    pub fn dispose(&mut self) {
        self.backend.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.backend.is_disposed()
    }
}

/// Common leading-axis length of `values`.
fn row_count<'v>(values: impl Iterator<Item = &'v Value>) -> Result<usize, ModelError> {
    let mut rows = None;
    for value in values {
        let count = value
            .rows()
            .ok_or_else(|| ModelError::invalid_data("batched values need a leading axis"))?;
        match rows {
            None => rows = Some(count),
            Some(expected) if expected != count => {
                return Err(ModelError::invalid_data(format!(
                    "row counts differ: {} and {}",
                    expected, count
                )));
            }
            Some(_) => {}
        }
    }
    Ok(rows.unwrap_or(0))
}

fn slice_all(values: &[Value], start: usize, len: usize) -> Result<Vec<Value>, ModelError> {
    values.iter().map(|v| v.slice_rows(start, len)).collect()
}
