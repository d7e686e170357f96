//! Training: losses, metrics, optimizers and the training loop.
//!
//! This module provides:
//! - Loss functions and metrics compiled into backend nodes
//! - The [`Optimizer`] trait and SGD with momentum
//! - Training configuration
//! - [`ExecutableModel`], the compiled model with its training loop

mod config;
mod loss;
mod metric;
mod optimizer;
mod trainer;

pub use config::{PartialBatch, TrainingConfig};
pub use loss::{EPSILON, Loss};
pub use metric::Metric;
pub use optimizer::{Optimizer, Sgd};
pub use trainer::{Evaluation, ExecutableModel, TrainingHistory};

pub(crate) use trainer::ModelNodes;
