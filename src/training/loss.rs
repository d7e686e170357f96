//! Loss functions for training.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Node, Value};
use crate::errors::ModelError;

/// Clipping bound for cross-entropy losses computed from probabilities.
pub const EPSILON: f32 = 1e-7;

/// Supported loss functions.
///
/// Each compiles a `(predictions, targets)` node pair into the node holding
/// the loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loss {
    /// `mean(square(predictions - targets))` over the last axis.
    MeanSquaredError,
    /// Sigmoid cross entropy on the logit of the clipped predictions.
    BinaryCrossEntropy,
    /// Softmax cross entropy, treating predictions as logits.
    CategoricalCrossEntropy,
    /// `-sum(targets * log(clip(predictions, epsilon, 1 - epsilon)))`
    NegativeLogLikelihood { epsilon: f32 },
}

impl Loss {
    /// Negative log likelihood with the default epsilon.
    pub fn negative_log_likelihood() -> Self {
        Loss::NegativeLogLikelihood { epsilon: EPSILON }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "MeanSquaredError",
            Loss::BinaryCrossEntropy => "BinaryCrossEntropy",
            Loss::CategoricalCrossEntropy => "CategoricalCrossEntropy",
            Loss::NegativeLogLikelihood { .. } => "NegativeLogLikelihood",
        }
    }

    /// Builds the loss between `predictions` and `targets`.
    pub fn compile(
        &self,
        predictions: Node,
        targets: Node,
        backend: &mut dyn Backend,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        match *self {
            Loss::MeanSquaredError => {
                let diff = backend.subtract(predictions, targets, None)?;
                let squared = backend.square(diff, None)?;
                backend.mean(squared, name)
            }
            Loss::BinaryCrossEntropy => {
                let clipped = backend.clip_by_value(predictions, EPSILON, 1.0 - EPSILON, None)?;
                let one = backend.constant(Value::scalar(1.0), None)?;
                let complement = backend.subtract(one, clipped, None)?;
                let odds = backend.divide(clipped, complement, None)?;
                let logits = backend.log(odds, None)?;
                backend.sigmoid_cross_entropy_with_logits(targets, logits, name)
            }
            Loss::CategoricalCrossEntropy => {
                backend.softmax_cross_entropy_with_logits(predictions, targets, name)
            }
            Loss::NegativeLogLikelihood { epsilon } => {
                if !(epsilon > 0.0 && epsilon < 0.5) {
                    return Err(ModelError::invalid_argument(
                        "epsilon",
                        format!("must be in (0, 0.5), got {}", epsilon),
                    ));
                }
                let clipped = backend.clip_by_value(predictions, epsilon, 1.0 - epsilon, None)?;
                let log = backend.log(clipped, None)?;
                let weighted = backend.multiply(targets, log, None)?;
                let total = backend.reduce_sum(weighted, None)?;
                backend.negate(total, name)
            }
        }
    }
}
