//! Execution session and graph interpreter.
//!
//! Every runtime tensor is held as a rank-2 burn tensor: scalars become
//! `[1, 1]`, vectors of length `n` become `[1, n]`. The logical shape is
//! tracked next to the tensor so fetched values keep their declared rank.

use std::collections::HashMap;

use burn::tensor::backend::AutodiffBackend;
use burn::tensor::{Shape, Tensor, TensorData, activation};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

use super::operation::{BinaryOp, GraphNode, Op, Sampler, Slot, UnaryOp, broadcast_concrete};
use crate::backend::{DType, Phase, Value, ValueData};
use crate::errors::ModelError;

/// Rank-2 dimensions holding a tensor of the given logical shape.
pub(crate) fn canonical_dims(shape: &[usize]) -> [usize; 2] {
    match shape {
        [] => [1, 1],
        [n] => [1, *n],
        [rows, columns] => [*rows, *columns],
        _ => [shape.iter().product(), 1],
    }
}

/// A tensor produced while executing a function.
#[derive(Clone, Debug)]
pub(crate) struct Evaluated<B: AutodiffBackend> {
    pub(crate) tensor: Tensor<B, 2>,
    pub(crate) shape: Vec<usize>,
}

impl<B: AutodiffBackend> Evaluated<B> {
    fn new(tensor: Tensor<B, 2>, shape: Vec<usize>) -> Self {
        Self { tensor, shape }
    }
}

/// Device-side state that outlives a single function call.
pub(crate) struct Session<B: AutodiffBackend> {
    device: B::Device,
    variables: HashMap<Slot, Tensor<B, 2>>,
    rngs: HashMap<Slot, StdRng>,
}

impl<B: AutodiffBackend> Session<B> {
    pub(crate) fn new(device: B::Device) -> Self {
        Self {
            device,
            variables: HashMap::new(),
            rngs: HashMap::new(),
        }
    }

    pub(crate) fn device(&self) -> &B::Device {
        &self.device
    }

    pub(crate) fn set_variable(&mut self, slot: Slot, tensor: Tensor<B, 2>) {
        self.variables.insert(slot, tensor.detach());
    }

    /// Applies pending assignments in the order they were recorded.
    pub(crate) fn commit(&mut self, assignments: Vec<(Slot, Tensor<B, 2>)>) {
        for (slot, tensor) in assignments {
            self.set_variable(slot, tensor);
        }
    }

    fn rng(&mut self, slot: Slot, seed: Option<u64>) -> &mut StdRng {
        self.rngs.entry(slot).or_insert_with(|| match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        })
    }

    pub(crate) fn tensor_from_value(&self, value: &Value) -> Tensor<B, 2> {
        let data = value.to_f32_vec();
        let dims = canonical_dims(value.shape());
        Tensor::from_data(TensorData::new(data, dims), &self.device)
    }
}

/// Converts an evaluated tensor back into a host value of the node's dtype.
pub(crate) fn to_value<B: AutodiffBackend>(
    node: &GraphNode,
    evaluated: Evaluated<B>,
) -> Result<Value, ModelError> {
    let data: Vec<f32> = evaluated
        .tensor
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| ModelError::Engine {
            message: format!("failed to read tensor data: {:?}", e),
        })?;
    match node.dtype {
        DType::F32 => Value::new(evaluated.shape, data),
        DType::I64 => Value::new_i64(
            evaluated.shape,
            data.iter().map(|v| v.round() as i64).collect(),
        ),
    }
}

/// Draws `len` samples from `sampler`.
fn sample(sampler: Sampler, len: usize, rng: &mut StdRng) -> Result<Vec<f32>, ModelError> {
    let invalid = |e: rand_distr::NormalError| ModelError::Engine {
        message: format!("invalid normal distribution: {}", e),
    };
    match sampler {
        Sampler::Normal { mean, stddev } => {
            let normal = Normal::new(mean, stddev).map_err(invalid)?;
            Ok((0..len).map(|_| normal.sample(rng)).collect())
        }
        Sampler::Uniform { min, max } => {
            let uniform = Uniform::new(min, max);
            Ok((0..len).map(|_| uniform.sample(rng)).collect())
        }
        Sampler::TruncatedNormal { mean, stddev } => {
            let normal = Normal::new(mean, stddev).map_err(invalid)?;
            let bound = 2.0 * stddev;
            Ok((0..len)
                .map(|_| loop {
                    let v = normal.sample(rng);
                    if (v - mean).abs() <= bound {
                        break v;
                    }
                })
                .collect())
        }
    }
}

fn to_shape(dims: [usize; 2]) -> Shape {
    Shape::new(dims)
}

/// Interprets graph nodes for one function call.
///
/// Results are memoized per call, so a node shared by several outputs is
/// computed once. Variable assignments are collected and only applied by the
/// caller after every fetch and update has been evaluated.
pub(crate) struct Executor<'a, B: AutodiffBackend> {
    nodes: &'a [GraphNode],
    session: &'a mut Session<B>,
    feeds: HashMap<Slot, Value>,
    phase: Phase,
    memo: HashMap<Slot, Evaluated<B>>,
    gradients: HashMap<Slot, B::Gradients>,
    assignments: Vec<(Slot, Tensor<B, 2>)>,
}

impl<'a, B: AutodiffBackend> Executor<'a, B> {
    pub(crate) fn new(
        nodes: &'a [GraphNode],
        session: &'a mut Session<B>,
        feeds: HashMap<Slot, Value>,
        phase: Phase,
    ) -> Self {
        Self {
            nodes,
            session,
            feeds,
            phase,
            memo: HashMap::new(),
            gradients: HashMap::new(),
            assignments: Vec::new(),
        }
    }

    /// Returns the assignments recorded during evaluation.
    pub(crate) fn into_assignments(self) -> Vec<(Slot, Tensor<B, 2>)> {
        self.assignments
    }

    pub(crate) fn eval(&mut self, slot: Slot) -> Result<Evaluated<B>, ModelError> {
        if let Some(evaluated) = self.memo.get(&slot) {
            return Ok(evaluated.clone());
        }

        let nodes = self.nodes;
        let node = &nodes[slot];
        let evaluated = match &node.op {
            Op::Placeholder => {
                let value = self
                    .feeds
                    .get(&slot)
                    .ok_or_else(|| ModelError::UnresolvedInput {
                        node: node.label(slot),
                    })?;
                Evaluated::new(
                    self.session.tensor_from_value(value),
                    value.shape().to_vec(),
                )
            }
            Op::Constant(value) => Evaluated::new(
                self.session.tensor_from_value(value),
                value.shape().to_vec(),
            ),
            Op::Variable { .. } => {
                let tensor = self
                    .session
                    .variables
                    .get(&slot)
                    .cloned()
                    .ok_or_else(|| ModelError::Engine {
                        message: format!("variable {} has no value", node.label(slot)),
                    })?;
                let tensor = match node.dtype {
                    DType::F32 => tensor.require_grad(),
                    DType::I64 => tensor,
                };
                Evaluated::new(tensor, self.static_shape(slot)?)
            }
            Op::Random { sampler, seed } => {
                let shape = self.static_shape(slot)?;
                let len = shape.iter().product();
                let data = sample(*sampler, len, self.session.rng(slot, *seed))?;
                let tensor =
                    Tensor::from_data(TensorData::new(data, canonical_dims(&shape)), self.session.device());
                Evaluated::new(tensor, shape)
            }
            Op::Fill(value) => {
                let shape = self.static_shape(slot)?;
                let tensor = Tensor::full(canonical_dims(&shape), *value, self.session.device());
                Evaluated::new(tensor, shape)
            }
            Op::Dot { left, right } => {
                let l = self.eval(*left)?;
                let r = self.eval(*right)?;
                if l.shape[1] != r.shape[0] {
                    return Err(ModelError::ShapeMismatch {
                        node: node.label(slot),
                        expected: vec![l.shape[1] as i64, r.shape[1] as i64],
                        actual: r.shape.clone(),
                    });
                }
                let shape = vec![l.shape[0], r.shape[1]];
                Evaluated::new(l.tensor.matmul(r.tensor), shape)
            }
            Op::BiasAdd { input, bias } => {
                let x = self.eval(*input)?;
                let b = self.eval(*bias)?;
                if x.shape.last() != b.shape.first() {
                    return Err(ModelError::ShapeMismatch {
                        node: node.label(slot),
                        expected: x.shape.last().map(|&d| vec![d as i64]).unwrap_or_default(),
                        actual: b.shape.clone(),
                    });
                }
                let dims = canonical_dims(&x.shape);
                let bias: Tensor<B, 2> = b.tensor.expand(to_shape(dims));
                let tensor = x.tensor + bias;
                Evaluated::new(tensor, x.shape)
            }
            Op::Binary { op, a, b } => {
                let a = self.eval(*a)?;
                let b = self.eval(*b)?;
                let shape = self.broadcast(slot, &a.shape, &b.shape)?;
                let dims = to_shape(canonical_dims(&shape));
                let x: Tensor<B, 2> = a.tensor.expand(dims.clone());
                let y: Tensor<B, 2> = b.tensor.expand(dims);
                let tensor = match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Subtract => x - y,
                    BinaryOp::Multiply => x * y,
                    BinaryOp::Divide => x / y,
                };
                Evaluated::new(tensor, shape)
            }
            Op::Unary { op, input } => {
                let x = self.eval(*input)?;
                let tensor = match op {
                    UnaryOp::Identity => x.tensor,
                    UnaryOp::Negate => x.tensor.neg(),
                    UnaryOp::Square => x.tensor.clone() * x.tensor,
                    UnaryOp::Abs => x.tensor.abs(),
                    UnaryOp::Log => x.tensor.log(),
                    UnaryOp::Sigmoid => activation::sigmoid(x.tensor),
                    UnaryOp::Relu => activation::relu(x.tensor),
                    UnaryOp::Tanh => x.tensor.tanh(),
                    UnaryOp::Softmax => activation::softmax(x.tensor, 1),
                };
                Evaluated::new(tensor, x.shape)
            }
            Op::Clip { input, min, max } => {
                let x = self.eval(*input)?;
                Evaluated::new(x.tensor.clamp(*min, *max), x.shape)
            }
            Op::Cast { input } => self.eval(*input)?,
            Op::Dropout { input, rate, seed } => {
                let x = self.eval(*input)?;
                if self.phase == Phase::Train && *rate > 0.0 {
                    let keep = 1.0 - *rate;
                    let len = x.shape.iter().product();
                    let rng = self.session.rng(slot, *seed);
                    let mask: Vec<f32> = (0..len)
                        .map(|_| if rng.gen_bool(keep as f64) { 1.0 / keep } else { 0.0 })
                        .collect();
                    let mask = Tensor::from_data(
                        TensorData::new(mask, canonical_dims(&x.shape)),
                        self.session.device(),
                    );
                    Evaluated::new(x.tensor * mask, x.shape)
                } else {
                    x
                }
            }
            Op::Mean { input } => {
                let x = self.eval(*input)?;
                let shape = x.shape[..x.shape.len() - 1].to_vec();
                let tensor = x.tensor.mean_dim(1).reshape(to_shape(canonical_dims(&shape)));
                Evaluated::new(tensor, shape)
            }
            Op::ReduceSum { input } => {
                let x = self.eval(*input)?;
                Evaluated::new(x.tensor.sum().reshape(to_shape([1, 1])), vec![])
            }
            Op::SigmoidCrossEntropy { targets, logits } => {
                let z = self.eval(*targets)?;
                let x = self.eval(*logits)?;
                let shape = self.broadcast(slot, &z.shape, &x.shape)?;
                let dims = to_shape(canonical_dims(&shape));
                let z: Tensor<B, 2> = z.tensor.expand(dims.clone());
                let x: Tensor<B, 2> = x.tensor.expand(dims);
                let tensor = x.clone().clamp_min(0.0) - x.clone() * z
                    + x.abs().neg().exp().add_scalar(1.0).log();
                Evaluated::new(tensor, shape)
            }
            Op::SoftmaxCrossEntropy { logits, labels } => {
                let x = self.eval(*logits)?;
                let z = self.eval(*labels)?;
                if x.shape != z.shape {
                    return Err(ModelError::ShapeMismatch {
                        node: node.label(slot),
                        expected: x.shape.iter().map(|&d| d as i64).collect(),
                        actual: z.shape,
                    });
                }
                let shape = x.shape[..x.shape.len() - 1].to_vec();
                let tensor = (z.tensor * activation::log_softmax(x.tensor, 1))
                    .sum_dim(1)
                    .neg()
                    .reshape(to_shape(canonical_dims(&shape)));
                Evaluated::new(tensor, shape)
            }
            Op::Gradient { loss, variable } => self.gradient(*loss, *variable)?,
            Op::Assign { variable, value } => {
                let v = self.eval(*value)?;
                let target = self.static_shape(*variable)?;
                let tensor: Tensor<B, 2> = v.tensor.expand(to_shape(canonical_dims(&target)));
                let tensor = tensor.detach();
                self.assignments.push((*variable, tensor.clone()));
                Evaluated::new(tensor, target)
            }
            Op::AssignAdd { variable, delta } => {
                let current = self.eval(*variable)?;
                let d = self.eval(*delta)?;
                let dims = to_shape(canonical_dims(&current.shape));
                let delta: Tensor<B, 2> = d.tensor.expand(dims);
                let tensor = (current.tensor + delta).detach();
                self.assignments.push((*variable, tensor.clone()));
                Evaluated::new(tensor, current.shape)
            }
        };

        self.memo.insert(slot, evaluated.clone());
        Ok(evaluated)
    }

    fn gradient(&mut self, loss: Slot, variable: Slot) -> Result<Evaluated<B>, ModelError> {
        let loss_value = self.eval(loss)?;
        let var = self.eval(variable)?;
        if !self.gradients.contains_key(&loss) {
            let grads = loss_value.tensor.sum().backward();
            self.gradients.insert(loss, grads);
        }
        let grad = match self
            .gradients
            .get(&loss)
            .and_then(|grads| var.tensor.grad(grads))
        {
            Some(grad) => Tensor::from_inner(grad),
            None => {
                // The loss does not depend on this variable.
                log::trace!(
                    "No gradient from {} reaches {}, using zeros",
                    self.nodes[loss].label(loss),
                    self.nodes[variable].label(variable)
                );
                Tensor::zeros(canonical_dims(&var.shape), self.session.device())
            }
        };
        Ok(Evaluated::new(grad, var.shape))
    }

    fn static_shape(&self, slot: Slot) -> Result<Vec<usize>, ModelError> {
        let node = &self.nodes[slot];
        super::operation::concrete(&node.shape).ok_or_else(|| ModelError::Engine {
            message: format!(
                "node {} has unbound shape {:?}",
                node.label(slot),
                node.shape
            ),
        })
    }

    fn broadcast(&self, slot: Slot, a: &[usize], b: &[usize]) -> Result<Vec<usize>, ModelError> {
        broadcast_concrete(a, b).ok_or_else(|| ModelError::ShapeMismatch {
            node: self.nodes[slot].label(slot),
            expected: a.iter().map(|&d| d as i64).collect(),
            actual: b.to_vec(),
        })
    }
}

/// Checks that `value` can be fed into the placeholder `node`.
pub(crate) fn validate_feed(node: &GraphNode, slot: Slot, value: &Value) -> Result<(), ModelError> {
    if value.dtype() != node.dtype {
        return Err(ModelError::DTypeMismatch {
            node: node.label(slot),
            expected: node.dtype,
            actual: value.dtype(),
        });
    }
    if !value.matches_shape(&node.shape) {
        return Err(ModelError::ShapeMismatch {
            node: node.label(slot),
            expected: node.shape.clone(),
            actual: value.shape().to_vec(),
        });
    }
    if value.shape().contains(&0) {
        return Err(ModelError::invalid_data(format!(
            "value fed into {} has an empty axis: {:?}",
            node.label(slot),
            value.shape()
        )));
    }
    if matches!(value.data(), ValueData::F32(data) if data.iter().any(|v| !v.is_finite())) {
        log::warn!("Non-finite value fed into {}", node.label(slot));
    }
    Ok(())
}
