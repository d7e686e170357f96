//! Dropout layer.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Node};
use crate::errors::ModelError;
use crate::layers::LayerConfiguration;

/// Randomly zeroes a fraction `rate` of its input while training.
///
/// Surviving values are scaled by `1 / (1 - rate)`, so inference needs no
/// rescaling and passes values through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "DropoutConfig")]
pub struct Dropout {
    rate: f32,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    pub(crate) name: Option<String>,
}

#[derive(Deserialize)]
struct DropoutConfig {
    rate: f32,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    name: Option<String>,
}

impl TryFrom<DropoutConfig> for Dropout {
    type Error = ModelError;

    fn try_from(config: DropoutConfig) -> Result<Self, Self::Error> {
        let mut dropout = Dropout::new(config.rate)?;
        dropout.seed = config.seed;
        dropout.name = config.name;
        Ok(dropout)
    }
}

impl Dropout {
    pub fn new(rate: f32) -> Result<Self, ModelError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(ModelError::invalid_argument(
                "rate",
                format!("must be in [0, 1), got {}", rate),
            ));
        }
        Ok(Self {
            rate,
            seed: None,
            name: None,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub(crate) fn compile(
        &self,
        name: &str,
        input: Node,
        backend: &mut dyn Backend,
    ) -> Result<LayerConfiguration, ModelError> {
        let output = backend.dropout(input, self.rate, self.seed, Some(name))?;
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
    fn test_rate_validation() {
        assert!(Dropout::new(0.0).is_ok());
        assert!(Dropout::new(0.5).is_ok());
        assert!(Dropout::new(1.0).is_err());
        assert!(Dropout::new(-0.1).is_err());
        assert!(Dropout::new(f32::NAN).is_err());
    }

    #[test]
    fn test_deserialize_validates_rate() {
        assert!(serde_json::from_str::<Dropout>(r#"{"rate":1.0}"#).is_err());

        let dropout: Dropout = serde_json::from_str(r#"{"rate":0.25,"seed":3}"#).unwrap();
        assert_eq!(dropout, Dropout::new(0.25).unwrap().with_seed(3));
    }
}
