//! Metrics reported alongside the losses.

use serde::{Deserialize, Serialize};

use super::Loss;
use crate::backend::{Backend, Node};
use crate::errors::ModelError;

/// A quantity measured on `(predictions, targets)` that is not optimized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    MeanSquaredError,
    MeanAbsoluteError,
    /// Reports a loss function without training on it.
    Loss(Loss),
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::MeanSquaredError => "MeanSquaredError",
            Metric::MeanAbsoluteError => "MeanAbsoluteError",
            Metric::Loss(loss) => loss.name(),
        }
    }

    pub fn compile(
        &self,
        predictions: Node,
        targets: Node,
        backend: &mut dyn Backend,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        match self {
            Metric::MeanSquaredError => {
                Loss::MeanSquaredError.compile(predictions, targets, backend, name)
            }
            Metric::MeanAbsoluteError => {
                let diff = backend.subtract(predictions, targets, None)?;
                let abs = backend.abs(diff, None)?;
                backend.mean(abs, name)
            }
            Metric::Loss(loss) => loss.compile(predictions, targets, backend, name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Value;
    use crate::graph::BurnModelBackend;
    use burn::backend::{Autodiff, NdArray};

    #[test]
    fn test_mean_absolute_error() {
        let mut backend = BurnModelBackend::<Autodiff<NdArray>>::new(Default::default());
        let p = backend.placeholder("p", &[-1, 2]).unwrap();
        let t = backend.placeholder("t", &[-1, 2]).unwrap();
        let mae = Metric::MeanAbsoluteError
            .compile(p, t, &mut backend, None)
            .unwrap();
        let function = backend.function(&[p, t], &[mae], &[]).unwrap();
        let out = function
            .execute_positional(
                &mut backend,
                vec![
                    Value::from_rows(&[vec![1.0, -1.0]]).unwrap(),
                    Value::from_rows(&[vec![0.0, 1.0]]).unwrap(),
                ],
            )
            .unwrap();
        assert_eq!(out[0].to_f32_vec(), vec![1.5]);
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(Metric::MeanAbsoluteError.name(), "MeanAbsoluteError");
        assert_eq!(
            Metric::Loss(Loss::BinaryCrossEntropy).name(),
            "BinaryCrossEntropy"
        );
    }
}
