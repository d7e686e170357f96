//! Dense (fully connected) layer implementation.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Node};
use crate::errors::ModelError;
use crate::layers::{Activation, Initializer, LayerConfiguration};

/// A dense (fully connected) layer with optional activation.
///
/// It performs: output = activation(input @ weights + bias)
///
/// Initializers and activation left unset resolve at compile time to
/// [`Initializer::default`] for both parameters and [`Activation::Sigmoid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DenseConfig")]
pub struct Dense {
    units: usize,
    #[serde(default)]
    activation: Option<Activation>,
    #[serde(default)]
    weights_initializer: Option<Initializer>,
    #[serde(default)]
    bias_initializer: Option<Initializer>,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

/// Serialized form of [`Dense`], validated through [`Dense::new`].
#[derive(Deserialize)]
struct DenseConfig {
    units: usize,
    #[serde(default)]
    activation: Option<Activation>,
    #[serde(default)]
    weights_initializer: Option<Initializer>,
    #[serde(default)]
    bias_initializer: Option<Initializer>,
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<DenseConfig> for Dense {
    type Error = ModelError;

    fn try_from(config: DenseConfig) -> Result<Self, Self::Error> {
        let mut dense = Dense::new(config.units)?;
        dense.activation = config.activation;
        dense.weights_initializer = config.weights_initializer;
        dense.bias_initializer = config.bias_initializer;
        dense.name = config.name;
        Ok(dense)
    }
}

impl Dense {
    /// Creates a dense layer with `units` outputs.
    pub fn new(units: usize) -> Result<Self, ModelError> {
        if units == 0 {
            return Err(ModelError::invalid_argument(
                "units",
                "a dense layer needs at least one unit",
            ));
        }
        Ok(Self {
            units,
            activation: None,
            weights_initializer: None,
            bias_initializer: None,
            name: None,
        })
    }

    /// Sets the activation function.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn with_weights_initializer(mut self, initializer: Initializer) -> Self {
        self.weights_initializer = Some(initializer);
        self
    }

    pub fn with_bias_initializer(mut self, initializer: Initializer) -> Self {
        self.bias_initializer = Some(initializer);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the number of output units.
    pub fn units(&self) -> usize {
        self.units
    }

    /// Returns the activation function, resolving the default.
    pub fn activation(&self) -> Activation {
        self.activation.unwrap_or_default()
    }

    /// Output shape for a given upstream shape: the last axis becomes `units`.
    pub fn output_shape(&self, upstream: &[i64]) -> Vec<i64> {
        let mut shape = upstream.to_vec();
        match shape.last_mut() {
            Some(last) => *last = self.units as i64,
            None => shape.push(self.units as i64),
        }
        shape
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        input: Node,
        upstream_shape: &[i64],
        backend: &mut dyn Backend,
    ) -> Result<LayerConfiguration, ModelError> {
        let input_size = match upstream_shape.last() {
            Some(&size) if size > 0 => size,
            _ => {
                return Err(ModelError::compilation(format!(
                    "dense layer `{}` needs a known input size, upstream shape is {:?}",
                    name, upstream_shape
                )));
            }
        };
        let units = self.units as i64;

        let weights = backend.weights(
            &[input_size, units],
            &self.weights_initializer.unwrap_or_default(),
            &format!("{}/weights", name),
        )?;
        let bias = backend.weights(
            &[units],
            &self.bias_initializer.unwrap_or_default(),
            &format!("{}/bias", name),
        )?;

        let projected = backend.dot(input, weights, None)?;
        let biased = backend.bias_add(projected, bias, None)?;
        let output = self.activation().compile(biased, backend, Some(name))?;

        let initializers = [weights, bias]
            .iter()
            .filter_map(|&w| backend.initializer(w).transpose())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(LayerConfiguration {
            output,
            parameters: vec![weights, bias],
            initializers,
        })
    }
}
