//! Initial-value strategies for variables.

use serde::{Deserialize, Serialize};

use crate::backend::{Backend, Node, Value};
use crate::errors::ModelError;

/// Produces the initial value of a variable.
///
/// Compiling an initializer creates a node that samples or fills a tensor of
/// the requested shape. A `seed` makes sampling reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Initializer {
    RandomNormal {
        mean: f32,
        stddev: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
    RandomUniform {
        min: f32,
        max: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
    /// Normal samples further than two standard deviations from the mean are
    /// drawn again.
    TruncatedNormal {
        mean: f32,
        stddev: f32,
        #[serde(default)]
        seed: Option<u64>,
    },
    Zeros,
    Ones,
    Constant(f32),
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::RandomNormal {
            mean: 0.0,
            stddev: 0.05,
            seed: None,
        }
    }
}

impl Initializer {
    pub fn random_normal(mean: f32, stddev: f32) -> Self {
        Initializer::RandomNormal {
            mean,
            stddev,
            seed: None,
        }
    }

    pub fn random_uniform(min: f32, max: f32) -> Self {
        Initializer::RandomUniform {
            min,
            max,
            seed: None,
        }
    }

    pub fn truncated_normal(mean: f32, stddev: f32) -> Self {
        Initializer::TruncatedNormal {
            mean,
            stddev,
            seed: None,
        }
    }

    /// Fixes the sampling seed. No effect on deterministic initializers.
    pub fn with_seed(self, seed: u64) -> Self {
        match self {
            Initializer::RandomNormal { mean, stddev, .. } => Initializer::RandomNormal {
                mean,
                stddev,
                seed: Some(seed),
            },
            Initializer::RandomUniform { min, max, .. } => Initializer::RandomUniform {
                min,
                max,
                seed: Some(seed),
            },
            Initializer::TruncatedNormal { mean, stddev, .. } => Initializer::TruncatedNormal {
                mean,
                stddev,
                seed: Some(seed),
            },
            other => other,
        }
    }

    /// Creates the node producing an initial value of `shape`.
    pub fn compile(&self, shape: &[i64], backend: &mut dyn Backend) -> Result<Node, ModelError> {
        match *self {
            Initializer::RandomNormal { mean, stddev, seed } => {
                backend.random_normal(shape, mean, stddev, seed)
            }
            Initializer::RandomUniform { min, max, seed } => {
                backend.random_uniform(shape, min, max, seed)
            }
            Initializer::TruncatedNormal { mean, stddev, seed } => {
                backend.truncated_normal(shape, mean, stddev, seed)
            }
            Initializer::Zeros => backend.zeros(shape),
            Initializer::Ones => backend.ones(shape),
            Initializer::Constant(value) => {
                let dims = shape
                    .iter()
                    .map(|&d| usize::try_from(d).ok().filter(|&d| d > 0))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        ModelError::compilation(format!(
                            "constant initializer needs a fully known shape, got {:?}",
                            shape
                        ))
                    })?;
                backend.constant(Value::full(dims, value), None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::BurnModelBackend;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = BurnModelBackend<Autodiff<NdArray>>;

    fn initial_value(initializer: Initializer, shape: &[i64]) -> Vec<f32> {
        let mut backend = TestBackend::new(Default::default());
        let w = backend.weights(shape, &initializer, "w").unwrap();
        backend.read_variable(w).unwrap().to_f32_vec()
    }

    #[test]
    fn test_default_initializer() {
        assert_eq!(Initializer::default(), Initializer::random_normal(0.0, 0.05));
    }

    #[test]
    fn test_fill_initializers() {
        assert_eq!(initial_value(Initializer::Zeros, &[2, 2]), vec![0.0; 4]);
        assert_eq!(initial_value(Initializer::Ones, &[3]), vec![1.0; 3]);
        assert_eq!(initial_value(Initializer::Constant(0.5), &[2]), vec![0.5; 2]);
    }

    #[test]
    fn test_seeded_initializers_repeat() {
        let init = Initializer::random_uniform(-1.0, 1.0).with_seed(42);
        let a = initial_value(init, &[4, 3]);
        let b = initial_value(init, &[4, 3]);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (-1.0..1.0).contains(v)));
    }

    #[test]
    fn test_truncated_normal_range() {
        let init = Initializer::truncated_normal(0.0, 0.1).with_seed(1);
        let values = initial_value(init, &[10, 10]);
        assert!(values.iter().all(|v| v.abs() <= 0.2 + 1e-6));
    }

    #[test]
    fn test_initializer_records_node() {
        let mut backend = TestBackend::new(Default::default());
        let w = backend.weights(&[2], &Initializer::Ones, "w").unwrap();
        let init = backend.initializer(w).unwrap().unwrap();
        assert_eq!(backend.shape(init).unwrap(), vec![2]);
    }

    #[test]
    fn test_invalid_uniform_range() {
        let mut backend = TestBackend::new(Default::default());
        let err = backend
            .weights(&[2], &Initializer::random_uniform(1.0, 1.0), "w")
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidArgument { .. }));
    }

    #[test]
    fn test_serialization() {
        let init = Initializer::random_normal(0.0, 1.0).with_seed(3);
        let json = serde_json::to_string(&init).unwrap();
        let parsed: Initializer = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, init);
    }
}
