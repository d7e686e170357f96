//! Model - the declarative assembly compiled into an [`ExecutableModel`].
//!
//! A model pairs each output layer with one loss (and optionally one metric)
//! and holds the optimizer. Compiling it against a backend builds the whole
//! training graph in one deterministic pass.

use std::fmt;

use crate::backend::{Backend, Node, Phase};
use crate::errors::ModelError;
use crate::layers::{CompileContext, Layer, LayerGraph, LayerId};
use crate::training::{ExecutableModel, Loss, Metric, ModelNodes, Optimizer};

/// Inputs, outputs, losses, metrics and optimizer of a trainable model.
pub struct Model {
    layers: LayerGraph,
    inputs: Vec<LayerId>,
    outputs: Vec<LayerId>,
    losses: Vec<Loss>,
    metrics: Vec<Metric>,
    optimizer: Box<dyn Optimizer>,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("layers", &self.layers.len())
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("losses", &self.losses)
            .field("metrics", &self.metrics)
            .field("optimizer", &self.optimizer)
            .finish()
    }
}

impl Model {
    /// Creates a model, validating its structure.
    ///
    /// `losses` pairs with `outputs` by position. `metrics` is either empty or
    /// pairs with `outputs` the same way. Every input layer an output depends
    /// on must be listed in `inputs`.
    pub fn new(
        layers: LayerGraph,
        inputs: Vec<LayerId>,
        outputs: Vec<LayerId>,
        losses: Vec<Loss>,
        optimizer: impl Optimizer + 'static,
        metrics: Vec<Metric>,
    ) -> Result<Self, ModelError> {
        if inputs.is_empty() {
            return Err(ModelError::invalid_argument("inputs", "a model needs at least one input"));
        }
        if outputs.is_empty() {
            return Err(ModelError::invalid_argument("outputs", "a model needs at least one output"));
        }
        if losses.len() != outputs.len() {
            return Err(ModelError::invalid_argument(
                "losses",
                format!("expected one loss per output ({}), got {}", outputs.len(), losses.len()),
            ));
        }
        if !metrics.is_empty() && metrics.len() != outputs.len() {
            return Err(ModelError::invalid_argument(
                "metrics",
                format!("expected one metric per output ({}), got {}", outputs.len(), metrics.len()),
            ));
        }

        for &input in &inputs {
            if !matches!(layers.layer(input)?, Layer::Input(_)) {
                return Err(ModelError::invalid_argument(
                    "inputs",
                    format!("layer `{}` is not an input layer", layers.name(input)?),
                ));
            }
        }
        for &output in &outputs {
            for required in layers.inputs_of(output)? {
                if !inputs.contains(&required) {
                    return Err(ModelError::invalid_argument(
                        "inputs",
                        format!(
                            "output `{}` depends on input `{}` which is not a model input",
                            layers.name(output)?,
                            layers.name(required)?
                        ),
                    ));
                }
            }
        }

        Ok(Self {
            layers,
            inputs,
            outputs,
            losses,
            metrics,
            optimizer: Box::new(optimizer),
        })
    }

    pub fn layers(&self) -> &LayerGraph {
        &self.layers
    }

    pub fn inputs(&self) -> &[LayerId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[LayerId] {
        &self.outputs
    }

    pub fn losses(&self) -> &[Loss] {
        &self.losses
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Builds the training graph on `backend` and binds its functions.
    ///
    /// Targets are placeholders named `{output}_Target` shaped like their
    /// output. Losses are summed into one objective, which the optimizer
    /// minimizes over every trainable weight of the backend.
    pub fn compile<'b>(
        &self,
        backend: &'b mut dyn Backend,
    ) -> Result<ExecutableModel<'b>, ModelError> {
        let mut context = CompileContext::new(&*backend);

        let mut inputs = Vec::with_capacity(self.inputs.len());
        for &input in &self.inputs {
            inputs.push(context.compile(&self.layers, input, backend)?);
        }
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for &output in &self.outputs {
            outputs.push(context.compile(&self.layers, output, backend)?);
        }

        let mut targets = Vec::with_capacity(outputs.len());
        for (&layer, &output) in self.outputs.iter().zip(&outputs) {
            let shape = backend.shape(output)?;
            let name = format!("{}_Target", self.layers.name(layer)?);
            targets.push(backend.placeholder(&name, &shape)?);
        }

        let mut losses = Vec::with_capacity(outputs.len());
        for (i, loss) in self.losses.iter().enumerate() {
            let name = format!("{}_Loss", self.layers.name(self.outputs[i])?);
            losses.push(loss.compile(outputs[i], targets[i], backend, Some(&name))?);
        }
        let loss = aggregate_losses(&losses, backend)?;
        log::debug!("Aggregated {} losses into the training objective", losses.len());

        let mut metrics = Vec::with_capacity(self.metrics.len());
        for (i, metric) in self.metrics.iter().enumerate() {
            let name = format!("{}_{}", self.layers.name(self.outputs[i])?, metric.name());
            metrics.push(metric.compile(outputs[i], targets[i], backend, Some(&name))?);
        }

        let weights = backend.trainable_weights().to_vec();
        let updates = self.optimizer.compile(loss, &weights, backend)?;

        let fed: Vec<Node> = inputs.iter().chain(&targets).copied().collect();
        let fetched: Vec<Node> = outputs.iter().chain(&losses).copied().collect();
        let train_function = backend
            .function(&fed, &fetched, &updates)?
            .with_phase(Phase::Train);
        let predict_function = backend.function(&inputs, &outputs, &[])?;
        let scored: Vec<Node> = losses.iter().chain(&metrics).copied().collect();
        let evaluate_function = backend.function(&fed, &scored, &[])?;

        log::debug!(
            "Compiled model with {} inputs, {} outputs and {} trainable weights",
            inputs.len(),
            outputs.len(),
            weights.len()
        );

        let nodes = ModelNodes {
            inputs,
            outputs,
            targets,
            losses,
            metrics,
            loss,
        };
        Ok(ExecutableModel::new(
            backend,
            train_function,
            predict_function,
            evaluate_function,
            nodes,
        ))
    }
}

/// Sums losses left to right. A single loss is returned as is.
pub fn aggregate_losses(losses: &[Node], backend: &mut dyn Backend) -> Result<Node, ModelError> {
    let (&first, rest) = losses
        .split_first()
        .ok_or_else(|| ModelError::compilation("no losses to aggregate"))?;
    rest.iter()
        .try_fold(first, |total, &loss| backend.add(total, loss, None))
}
