//! Activation functions for layers.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Node};
use crate::errors::ModelError;

/// Supported activation functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Activation {
    /// Identity: f(x) = x
    Linear,
    /// Rectified Linear Unit: f(x) = max(0, x)
    Relu,
    /// Sigmoid: f(x) = 1 / (1 + exp(-x))
    #[default]
    Sigmoid,
    /// Hyperbolic tangent: f(x) = tanh(x)
    Tanh,
    /// Softmax normalization (across last dimension)
    Softmax,
}

impl Activation {
    /// Materializes the activation of `input` as a graph node.
    pub fn compile(
        &self,
        input: Node,
        backend: &mut dyn Backend,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        match self {
            Activation::Linear => backend.identity(input, name),
            Activation::Relu => backend.relu(input, name),
            Activation::Sigmoid => backend.sigmoid(input, name),
            Activation::Tanh => backend.tanh(input, name),
            Activation::Softmax => backend.softmax(input, name),
        }
    }

    /// Returns the upper-case name used in graph summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Activation::Linear => "LINEAR",
            Activation::Relu => "RELU",
            Activation::Sigmoid => "SIGMOID",
            Activation::Tanh => "TANH",
            Activation::Softmax => "SOFTMAX",
        }
    }

    /// Creates an Activation from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().as_str() {
            "LINEAR" | "NONE" => Some(Activation::Linear),
            "RELU" => Some(Activation::Relu),
            "SIGMOID" => Some(Activation::Sigmoid),
            "TANH" => Some(Activation::Tanh),
            "SOFTMAX" => Some(Activation::Softmax),
            _ => None,
        }
    }
}
