//! Optimizers turning a loss into weight updates.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Node, Value};
use crate::errors::ModelError;
use crate::layers::Initializer;

/// Builds the update nodes that train `weights` against `loss`.
///
/// Any state the optimizer keeps across calls (counters, accumulators) must be
/// registered with the backend here, so it lives as long as the backend.
pub trait Optimizer: std::fmt::Debug {
    /// Returns the update nodes, to be run as side effects of training.
    fn compile(
        &self,
        loss: Node,
        weights: &[Node],
        backend: &mut dyn Backend,
    ) -> Result<Vec<Node>, ModelError>;
}

/// Stochastic gradient descent with momentum.
///
/// Per weight `w` with gradient `g` and accumulator `v` (initially zero):
///
/// ```text
/// v = momentum * v - learning_rate * g
/// w = w + v
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SgdConfig")]
pub struct Sgd {
    learning_rate: f32,
    momentum: f32,
}

#[derive(Deserialize)]
#[serde(default)]
struct SgdConfig {
    learning_rate: f32,
    momentum: f32,
}

impl Default for SgdConfig {
    fn default() -> Self {
        let sgd = Sgd::default();
        Self {
            learning_rate: sgd.learning_rate,
            momentum: sgd.momentum,
        }
    }
}

impl TryFrom<SgdConfig> for Sgd {
    type Error = ModelError;

    fn try_from(config: SgdConfig) -> Result<Self, Self::Error> {
        Sgd::new(config.learning_rate)?.with_momentum(config.momentum)
    }
}

impl Default for Sgd {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.0,
        }
    }
}

impl Sgd {
    /// Creates plain SGD with the given learning rate.
    pub fn new(learning_rate: f32) -> Result<Self, ModelError> {
        Self::default().with_learning_rate(learning_rate)
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Result<Self, ModelError> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(ModelError::invalid_argument(
                "learning_rate",
                format!("must be positive and finite, got {}", learning_rate),
            ));
        }
        self.learning_rate = learning_rate;
        Ok(self)
    }

    pub fn with_momentum(mut self, momentum: f32) -> Result<Self, ModelError> {
        if !(momentum.is_finite() && momentum >= 0.0) {
            return Err(ModelError::invalid_argument(
                "momentum",
                format!("must be non-negative and finite, got {}", momentum),
            ));
        }
        self.momentum = momentum;
        Ok(self)
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Optimizer for Sgd {
    fn compile(
        &self,
        loss: Node,
        weights: &[Node],
        backend: &mut dyn Backend,
    ) -> Result<Vec<Node>, ModelError> {
        let iterations = backend.variable(0, "SGD_Iterations")?;
        let learning_rate =
            backend.constant(Value::scalar(self.learning_rate), Some("SGD_LearningRate"))?;
        let momentum = backend.constant(Value::scalar(self.momentum), Some("SGD_Momentum"))?;
        let one = backend.constant(Value::scalar_i64(1), None)?;

        let accumulators = weights
            .iter()
            .enumerate()
            .map(|(i, &weight)| {
                let shape = backend.shape(weight)?;
                backend.state_variable(&shape, &Initializer::Zeros, &format!("SGD_Momentum_{}", i))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let gradients = backend.gradients(loss, weights)?;

        if gradients.len() != weights.len() || accumulators.len() != weights.len() {
            return Err(ModelError::compilation(format!(
                "SGD got {} weights, {} gradients and {} accumulators",
                weights.len(),
                gradients.len(),
                accumulators.len()
            )));
        }

        let mut updates = Vec::with_capacity(1 + 2 * weights.len());
        updates.push(backend.update_add(iterations, one)?);

        for ((&weight, &gradient), &accumulator) in
            weights.iter().zip(&gradients).zip(&accumulators)
        {
            let step = backend.multiply(learning_rate, gradient, None)?;
            let decayed = backend.multiply(momentum, accumulator, None)?;
            let velocity = backend.subtract(decayed, step, None)?;
            updates.push(backend.update(accumulator, velocity)?);

            let new_weight = backend.add(weight, velocity, None)?;
            updates.push(backend.update(weight, new_weight)?);
        }

        log::debug!(
            "SGD compiled {} updates for {} weights",
            updates.len(),
            weights.len()
        );
        Ok(updates)
    }
}
