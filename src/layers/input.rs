//! Input layer: the fed entry point of a model.

use crate::backend::{BATCH, Backend};
use crate::errors::ModelError;
use crate::layers::LayerConfiguration;

/// Declares the per-example shape of one model input.
///
/// The layer's full shape is `[-1, d1, ...]`: the leading batch axis is left
/// unbound until values are fed.
#[derive(Debug, Clone, PartialEq)]
pub struct Input {
    dims: Vec<i64>,
    pub(crate) name: Option<String>,
}

impl Input {
    /// Creates an input with the given per-example dimensions.
    pub fn new(dims: &[i64]) -> Result<Self, ModelError> {
        if let Some(dim) = dims.iter().find(|&&d| d <= 0) {
            return Err(ModelError::invalid_argument(
                "dims",
                format!("input dimensions must be positive, got {} in {:?}", dim, dims),
            ));
        }
        Ok(Self {
            dims: dims.to_vec(),
            name: None,
        })
    }

    /// Sets the layer name. The placeholder is registered under it.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Per-example dimensions, without the batch axis.
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    pub fn shape(&self) -> Vec<i64> {
        std::iter::once(BATCH).chain(self.dims.iter().copied()).collect()
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        backend: &mut dyn Backend,
    ) -> Result<LayerConfiguration, ModelError> {
        if self.dims.is_empty() {
            return Err(ModelError::compilation(format!(
                "input `{}` declares no dimensions",
                name
            )));
        }
        let output = backend.placeholder(name, &self.shape())?;
        Ok(LayerConfiguration {
            output,
            parameters: vec![],
            initializers: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_shape() {
        let input = Input::new(&[10]).unwrap();
        assert_eq!(input.shape(), vec![-1, 10]);
        assert_eq!(input.dims(), &[10]);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let err = Input::new(&[4, 0]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidArgument { .. }));
    }
}
