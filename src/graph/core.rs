//! BurnModelBackend - the reference engine behind the [`Backend`] trait.
//!
//! Graph construction only records [`GraphNode`]s in an arena. Values exist
//! in the [`Session`], which holds variable state on a burn device until the
//! backend is disposed.

use std::collections::HashMap;

use burn::tensor::Tensor;
use burn::tensor::backend::AutodiffBackend;

use super::operation::{
    BinaryOp, GraphNode, Op, Sampler, Slot, UnaryOp, broadcast_declared, concrete,
    dims_compatible,
};
use super::session::{Executor, Session, to_value, validate_feed};
use crate::backend::{
    BATCH, Backend, BackendFunction, DType, GraphId, Node, Value, next_graph_id,
};
use crate::errors::ModelError;
use crate::layers::Initializer;

/// Executes layer graphs on any burn autodiff backend.
///
/// # Example
///
/// ```
/// use layergraph::backend::Backend;
/// use layergraph::graph::BurnModelBackend;
/// use layergraph::DefaultEngine;
///
/// let mut backend = BurnModelBackend::<DefaultEngine>::new(Default::default());
/// let x = backend.placeholder("x", &[-1, 4]).unwrap();
/// assert_eq!(backend.shape(x).unwrap(), vec![-1, 4]);
/// assert_eq!(backend.node("x"), Some(x));
/// ```
pub struct BurnModelBackend<B: AutodiffBackend> {
    id: GraphId,
    pub(crate) nodes: Vec<GraphNode>,
    names: HashMap<String, Slot>,
    trainable: Vec<Node>,
    session: Option<Session<B>>,
}

impl<B: AutodiffBackend> BurnModelBackend<B> {
    /// Creates an empty graph with a live session on `device`.
    pub fn new(device: B::Device) -> Self {
        Self {
            id: next_graph_id(),
            nodes: Vec::new(),
            names: HashMap::new(),
            trainable: Vec::new(),
            session: Some(Session::new(device)),
        }
    }

    /// Number of nodes recorded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reads the current value of a variable.
    pub fn read_variable(&mut self, node: Node) -> Result<Value, ModelError> {
        let slot = self.slot(node)?;
        self.expect_variable(slot)?;
        let session = self.session.as_mut().ok_or(ModelError::Disposed)?;
        let mut executor = Executor::new(&self.nodes, session, HashMap::new(), Default::default());
        let evaluated = executor.eval(slot)?;
        to_value(&self.nodes[slot], evaluated)
    }

    fn check_active(&self) -> Result<(), ModelError> {
        if self.session.is_none() {
            return Err(ModelError::Disposed);
        }
        Ok(())
    }

    pub(crate) fn slot(&self, node: Node) -> Result<Slot, ModelError> {
        if node.graph() != self.id || node.index() >= self.nodes.len() {
            return Err(ModelError::UnknownNode {
                node: node.to_string(),
            });
        }
        Ok(node.index())
    }

    fn label(&self, slot: Slot) -> String {
        self.nodes[slot].label(slot)
    }

    fn register(&mut self, mut node: GraphNode, name: Option<&str>) -> Result<Node, ModelError> {
        self.check_active()?;
        let slot = self.nodes.len();
        if let Some(name) = name {
            if self.names.contains_key(name) {
                return Err(ModelError::DuplicateName {
                    name: name.to_string(),
                });
            }
            self.names.insert(name.to_string(), slot);
            node.name = Some(name.to_string());
        }
        self.nodes.push(node);
        Ok(Node::new(self.id, slot))
    }

    fn expect_variable(&self, slot: Slot) -> Result<(), ModelError> {
        let op = &self.nodes[slot].op;
        if !op.is_variable() {
            return Err(ModelError::InvalidNodeKind {
                node: self.label(slot),
                expected: "VARIABLE",
                actual: op.name(),
            });
        }
        Ok(())
    }

    fn expect_float(&self, slot: Slot, operation: &str) -> Result<(), ModelError> {
        if self.nodes[slot].dtype != DType::F32 {
            return Err(ModelError::compilation(format!(
                "{} expects f32 input, {} is {:?}",
                operation,
                self.label(slot),
                self.nodes[slot].dtype
            )));
        }
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        let input = self.slot(input)?;
        if !op.accepts_integers() {
            self.expect_float(input, op.name())?;
        }
        let source = &self.nodes[input];
        let node = GraphNode::new(Op::Unary { op, input }, source.shape.clone(), source.dtype);
        self.register(node, name)
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        a: Node,
        b: Node,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        let (a, b) = (self.slot(a)?, self.slot(b)?);
        let (left, right) = (&self.nodes[a], &self.nodes[b]);
        if left.dtype != right.dtype {
            return Err(ModelError::compilation(format!(
                "{} mixes {:?} and {:?} operands",
                op.name(),
                left.dtype,
                right.dtype
            )));
        }
        if op == BinaryOp::Divide {
            self.expect_float(a, op.name())?;
        }
        let shape = broadcast_declared(&left.shape, &right.shape).ok_or_else(|| {
            ModelError::compilation(format!(
                "{} cannot broadcast {:?} with {:?}",
                op.name(),
                left.shape,
                right.shape
            ))
        })?;
        let node = GraphNode::new(Op::Binary { op, a, b }, shape, left.dtype);
        self.register(node, name)
    }

    fn random(
        &mut self,
        shape: &[i64],
        sampler: Sampler,
        seed: Option<u64>,
    ) -> Result<Node, ModelError> {
        check_static_shape(shape)?;
        let node = GraphNode::new(Op::Random { sampler, seed }, shape.to_vec(), DType::F32);
        self.register(node, None)
    }

    fn fill(&mut self, shape: &[i64], value: f32) -> Result<Node, ModelError> {
        check_static_shape(shape)?;
        let node = GraphNode::new(Op::Fill(value), shape.to_vec(), DType::F32);
        self.register(node, None)
    }

    fn create_variable(
        &mut self,
        shape: &[i64],
        initializer: &Initializer,
        name: &str,
        trainable: bool,
    ) -> Result<Node, ModelError> {
        self.check_active()?;
        check_static_shape(shape)?;
        if self.names.contains_key(name) {
            return Err(ModelError::DuplicateName {
                name: name.to_string(),
            });
        }

        let init = initializer.compile(shape, self)?;
        let init = self.slot(init)?;
        if self.nodes[init].shape != shape {
            return Err(ModelError::compilation(format!(
                "initializer for `{}` produced shape {:?}, expected {:?}",
                name, self.nodes[init].shape, shape
            )));
        }

        let value = {
            let session = self.session.as_mut().ok_or(ModelError::Disposed)?;
            let mut executor =
                Executor::new(&self.nodes, session, HashMap::new(), Default::default());
            executor.eval(init)?.tensor
        };

        let op = Op::Variable {
            trainable,
            initializer: Some(init),
        };
        let node = self.register(GraphNode::new(op, shape.to_vec(), DType::F32), Some(name))?;
        if let Some(session) = self.session.as_mut() {
            session.set_variable(node.index(), value);
        }
        if trainable {
            self.trainable.push(node);
        }
        log::debug!("Created variable `{}` with shape {:?}", name, shape);
        Ok(node)
    }

    fn assignment(&mut self, variable: Node, value: Node, add: bool) -> Result<Node, ModelError> {
        let (variable, value) = (self.slot(variable)?, self.slot(value)?);
        self.expect_variable(variable)?;
        let (target, source) = (&self.nodes[variable], &self.nodes[value]);
        if target.dtype != source.dtype {
            return Err(ModelError::compilation(format!(
                "cannot update {:?} variable {} with a {:?} value",
                target.dtype,
                self.label(variable),
                source.dtype
            )));
        }
        if broadcast_declared(&target.shape, &source.shape).as_deref() != Some(&target.shape[..]) {
            return Err(ModelError::compilation(format!(
                "cannot update variable {} of shape {:?} with a value of shape {:?}",
                self.label(variable),
                target.shape,
                source.shape
            )));
        }
        let op = if add {
            Op::AssignAdd {
                variable,
                delta: value,
            }
        } else {
            Op::Assign { variable, value }
        };
        let node = GraphNode::new(op, target.shape.clone(), target.dtype);
        self.register(node, None)
    }
}

impl<B: AutodiffBackend> Default for BurnModelBackend<B> {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

impl<B: AutodiffBackend> Drop for BurnModelBackend<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<B: AutodiffBackend> std::fmt::Debug for BurnModelBackend<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BurnModelBackend")
            .field("id", &self.id)
            .field("nodes", &self.nodes.len())
            .field("trainable", &self.trainable)
            .field("disposed", &self.session.is_none())
            .finish()
    }
}

/// Rejects shapes the engine cannot hold: rank above two or empty axes.
fn check_shape(shape: &[i64], allow_batch: bool) -> Result<(), ModelError> {
    if shape.len() > 2 {
        return Err(ModelError::compilation(format!(
            "shape {:?} has rank {}, at most 2 is supported",
            shape,
            shape.len()
        )));
    }
    if let Some(dim) = shape
        .iter()
        .find(|&&d| d <= 0 && !(allow_batch && d == BATCH))
    {
        return Err(ModelError::compilation(format!(
            "shape {:?} has invalid dimension {}",
            shape, dim
        )));
    }
    Ok(())
}

fn check_static_shape(shape: &[i64]) -> Result<(), ModelError> {
    check_shape(shape, false)
}

impl<B: AutodiffBackend> Backend for BurnModelBackend<B> {
    fn graph_id(&self) -> GraphId {
        self.id
    }

    fn node(&self, name: &str) -> Option<Node> {
        self.names.get(name).map(|&slot| Node::new(self.id, slot))
    }

    fn shape(&self, node: Node) -> Result<Vec<i64>, ModelError> {
        self.check_active()?;
        Ok(self.nodes[self.slot(node)?].shape.clone())
    }

    fn dtype(&self, node: Node) -> Result<DType, ModelError> {
        self.check_active()?;
        Ok(self.nodes[self.slot(node)?].dtype)
    }

    fn trainable_weights(&self) -> &[Node] {
        &self.trainable
    }

    fn initializer(&self, variable: Node) -> Result<Option<Node>, ModelError> {
        self.check_active()?;
        let slot = self.slot(variable)?;
        match self.nodes[slot].op {
            Op::Variable { initializer, .. } => Ok(initializer.map(|i| Node::new(self.id, i))),
            ref op => Err(ModelError::InvalidNodeKind {
                node: self.label(slot),
                expected: "VARIABLE",
                actual: op.name(),
            }),
        }
    }

    fn placeholder(&mut self, name: &str, shape: &[i64]) -> Result<Node, ModelError> {
        self.check_active()?;
        check_shape(shape, true)?;
        if let Some(&slot) = self.names.get(name) {
            let existing = &self.nodes[slot];
            if matches!(existing.op, Op::Placeholder) && existing.shape == shape {
                return Ok(Node::new(self.id, slot));
            }
            return Err(ModelError::DuplicateName {
                name: name.to_string(),
            });
        }
        let node = GraphNode::new(Op::Placeholder, shape.to_vec(), DType::F32);
        self.register(node, Some(name))
    }

    fn constant(&mut self, value: Value, name: Option<&str>) -> Result<Node, ModelError> {
        let shape: Vec<i64> = value.shape().iter().map(|&d| d as i64).collect();
        check_shape(&shape, false)?;
        let dtype = value.dtype();
        self.register(GraphNode::new(Op::Constant(value), shape, dtype), name)
    }

    fn weights(
        &mut self,
        shape: &[i64],
        initializer: &Initializer,
        name: &str,
    ) -> Result<Node, ModelError> {
        self.create_variable(shape, initializer, name, true)
    }

    fn state_variable(
        &mut self,
        shape: &[i64],
        initializer: &Initializer,
        name: &str,
    ) -> Result<Node, ModelError> {
        self.create_variable(shape, initializer, name, false)
    }

    fn variable(&mut self, initial: i64, name: &str) -> Result<Node, ModelError> {
        let op = Op::Variable {
            trainable: false,
            initializer: None,
        };
        let node = self.register(GraphNode::new(op, vec![], DType::I64), Some(name))?;
        if let Some(session) = self.session.as_mut() {
            let value = Tensor::full([1, 1], initial as f32, session.device());
            session.set_variable(node.index(), value);
        }
        Ok(node)
    }

    fn update(&mut self, variable: Node, value: Node) -> Result<Node, ModelError> {
        self.assignment(variable, value, false)
    }

    fn update_add(&mut self, variable: Node, delta: Node) -> Result<Node, ModelError> {
        self.assignment(variable, delta, true)
    }

    fn random_normal(
        &mut self,
        shape: &[i64],
        mean: f32,
        stddev: f32,
        seed: Option<u64>,
    ) -> Result<Node, ModelError> {
        if !(stddev.is_finite() && stddev >= 0.0) {
            return Err(ModelError::invalid_argument(
                "stddev",
                format!("must be finite and non-negative, got {}", stddev),
            ));
        }
        self.random(shape, Sampler::Normal { mean, stddev }, seed)
    }

    fn random_uniform(
        &mut self,
        shape: &[i64],
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> Result<Node, ModelError> {
        if !(min < max) {
            return Err(ModelError::invalid_argument(
                "max",
                format!("must be greater than min ({} >= {})", min, max),
            ));
        }
        self.random(shape, Sampler::Uniform { min, max }, seed)
    }

    fn truncated_normal(
        &mut self,
        shape: &[i64],
        mean: f32,
        stddev: f32,
        seed: Option<u64>,
    ) -> Result<Node, ModelError> {
        if !(stddev.is_finite() && stddev >= 0.0) {
            return Err(ModelError::invalid_argument(
                "stddev",
                format!("must be finite and non-negative, got {}", stddev),
            ));
        }
        self.random(shape, Sampler::TruncatedNormal { mean, stddev }, seed)
    }

    fn zeros(&mut self, shape: &[i64]) -> Result<Node, ModelError> {
        self.fill(shape, 0.0)
    }

    fn ones(&mut self, shape: &[i64]) -> Result<Node, ModelError> {
        self.fill(shape, 1.0)
    }

    fn dot(&mut self, left: Node, right: Node, name: Option<&str>) -> Result<Node, ModelError> {
        let (l, r) = (self.slot(left)?, self.slot(right)?);
        self.expect_float(l, "DOT")?;
        self.expect_float(r, "DOT")?;
        let (ls, rs) = (&self.nodes[l].shape, &self.nodes[r].shape);
        if ls.len() != 2 || rs.len() != 2 || !dims_compatible(ls[1], rs[0]) {
            return Err(ModelError::compilation(format!(
                "DOT cannot multiply {:?} by {:?}",
                ls, rs
            )));
        }
        let shape = vec![ls[0], rs[1]];
        let node = GraphNode::new(Op::Dot { left: l, right: r }, shape, DType::F32);
        self.register(node, name)
    }

    fn bias_add(
        &mut self,
        input: Node,
        bias: Node,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        let (x, b) = (self.slot(input)?, self.slot(bias)?);
        self.expect_float(x, "BIAS_ADD")?;
        self.expect_float(b, "BIAS_ADD")?;
        let (xs, bs) = (&self.nodes[x].shape, &self.nodes[b].shape);
        let compatible = match (xs.last(), bs.as_slice()) {
            (Some(&last), [len]) => dims_compatible(last, *len),
            _ => false,
        };
        if !compatible {
            return Err(ModelError::compilation(format!(
                "BIAS_ADD cannot add bias {:?} to {:?}",
                bs, xs
            )));
        }
        let shape = xs.clone();
        let node = GraphNode::new(Op::BiasAdd { input: x, bias: b }, shape, DType::F32);
        self.register(node, name)
    }

    fn add(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.binary(BinaryOp::Add, a, b, name)
    }

    fn subtract(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.binary(BinaryOp::Subtract, a, b, name)
    }

    fn multiply(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.binary(BinaryOp::Multiply, a, b, name)
    }

    fn divide(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.binary(BinaryOp::Divide, a, b, name)
    }

    fn negate(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Negate, input, name)
    }

    fn square(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Square, input, name)
    }

    fn abs(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Abs, input, name)
    }

    fn log(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Log, input, name)
    }

    fn clip_by_value(
        &mut self,
        input: Node,
        min: f32,
        max: f32,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        if min > max {
            return Err(ModelError::invalid_argument(
                "max",
                format!("must not be below min ({} > {})", min, max),
            ));
        }
        let x = self.slot(input)?;
        self.expect_float(x, "CLIP_BY_VALUE")?;
        let shape = self.nodes[x].shape.clone();
        let node = GraphNode::new(Op::Clip { input: x, min, max }, shape, DType::F32);
        self.register(node, name)
    }

    fn float(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        let x = self.slot(input)?;
        let shape = self.nodes[x].shape.clone();
        self.register(GraphNode::new(Op::Cast { input: x }, shape, DType::F32), name)
    }

    fn identity(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Identity, input, name)
    }

    fn sigmoid(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Sigmoid, input, name)
    }

    fn relu(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Relu, input, name)
    }

    fn tanh(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Tanh, input, name)
    }

    fn softmax(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        self.unary(UnaryOp::Softmax, input, name)
    }

    fn dropout(
        &mut self,
        input: Node,
        rate: f32,
        seed: Option<u64>,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        if !(0.0..1.0).contains(&rate) {
            return Err(ModelError::invalid_argument(
                "rate",
                format!("must be in [0, 1), got {}", rate),
            ));
        }
        let x = self.slot(input)?;
        self.expect_float(x, "DROPOUT")?;
        let shape = self.nodes[x].shape.clone();
        let op = Op::Dropout {
            input: x,
            rate,
            seed,
        };
        self.register(GraphNode::new(op, shape, DType::F32), name)
    }

    fn mean(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        let x = self.slot(input)?;
        self.expect_float(x, "MEAN")?;
        let shape = &self.nodes[x].shape;
        if shape.is_empty() {
            return Err(ModelError::compilation(format!(
                "MEAN needs at least one axis, {} is a scalar",
                self.label(x)
            )));
        }
        let shape = shape[..shape.len() - 1].to_vec();
        self.register(GraphNode::new(Op::Mean { input: x }, shape, DType::F32), name)
    }

    fn reduce_sum(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError> {
        let x = self.slot(input)?;
        let dtype = self.nodes[x].dtype;
        self.register(GraphNode::new(Op::ReduceSum { input: x }, vec![], dtype), name)
    }

    fn sigmoid_cross_entropy_with_logits(
        &mut self,
        targets: Node,
        logits: Node,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        let (z, x) = (self.slot(targets)?, self.slot(logits)?);
        self.expect_float(z, "SIGMOID_CROSS_ENTROPY_WITH_LOGITS")?;
        self.expect_float(x, "SIGMOID_CROSS_ENTROPY_WITH_LOGITS")?;
        let (zs, xs) = (&self.nodes[z].shape, &self.nodes[x].shape);
        let shape = broadcast_declared(zs, xs).ok_or_else(|| {
            ModelError::compilation(format!(
                "targets {:?} do not match logits {:?}",
                zs, xs
            ))
        })?;
        let op = Op::SigmoidCrossEntropy {
            targets: z,
            logits: x,
        };
        self.register(GraphNode::new(op, shape, DType::F32), name)
    }

    fn softmax_cross_entropy_with_logits(
        &mut self,
        logits: Node,
        labels: Node,
        name: Option<&str>,
    ) -> Result<Node, ModelError> {
        let (x, z) = (self.slot(logits)?, self.slot(labels)?);
        self.expect_float(x, "SOFTMAX_CROSS_ENTROPY_WITH_LOGITS")?;
        self.expect_float(z, "SOFTMAX_CROSS_ENTROPY_WITH_LOGITS")?;
        let (xs, zs) = (&self.nodes[x].shape, &self.nodes[z].shape);
        let compatible = !xs.is_empty()
            && xs.len() == zs.len()
            && xs.iter().zip(zs).all(|(&a, &b)| dims_compatible(a, b));
        if !compatible {
            return Err(ModelError::compilation(format!(
                "labels {:?} do not match logits {:?}",
                zs, xs
            )));
        }
        let shape = xs[..xs.len() - 1].to_vec();
        let op = Op::SoftmaxCrossEntropy {
            logits: x,
            labels: z,
        };
        self.register(GraphNode::new(op, shape, DType::F32), name)
    }

    fn gradients(&mut self, loss: Node, variables: &[Node]) -> Result<Vec<Node>, ModelError> {
        let loss = self.slot(loss)?;
        self.expect_float(loss, "GRADIENT")?;
        variables
            .iter()
            .map(|&variable| {
                let variable = self.slot(variable)?;
                self.expect_variable(variable)?;
                self.expect_float(variable, "GRADIENT")?;
                let shape = self.nodes[variable].shape.clone();
                let op = Op::Gradient { loss, variable };
                self.register(GraphNode::new(op, shape, DType::F32), None)
            })
            .collect()
    }

    fn function(
        &mut self,
        inputs: &[Node],
        outputs: &[Node],
        updates: &[Node],
    ) -> Result<BackendFunction, ModelError> {
        self.check_active()?;
        for &input in inputs {
            let slot = self.slot(input)?;
            if !matches!(self.nodes[slot].op, Op::Placeholder) {
                return Err(ModelError::InvalidNodeKind {
                    node: self.label(slot),
                    expected: "PLACEHOLDER",
                    actual: self.nodes[slot].op.name(),
                });
            }
        }
        for &output in outputs {
            self.slot(output)?;
        }
        for &update in updates {
            let slot = self.slot(update)?;
            if !matches!(self.nodes[slot].op, Op::Assign { .. } | Op::AssignAdd { .. }) {
                return Err(ModelError::InvalidNodeKind {
                    node: self.label(slot),
                    expected: "UPDATE",
                    actual: self.nodes[slot].op.name(),
                });
            }
        }
        Ok(BackendFunction::new(
            self.id,
            inputs.to_vec(),
            outputs.to_vec(),
            updates.to_vec(),
        ))
    }

    fn run(
        &mut self,
        function: &BackendFunction,
        feeds: Vec<(Node, Value)>,
    ) -> Result<Vec<Value>, ModelError> {
        self.check_active()?;
        if function.graph() != self.id {
            return Err(ModelError::UnknownNode {
                node: format!("function over graph {}", function.graph()),
            });
        }

        let mut feed_map = HashMap::with_capacity(feeds.len());
        for (node, value) in feeds {
            let slot = self.slot(node)?;
            validate_feed(&self.nodes[slot], slot, &value)?;
            feed_map.insert(slot, value);
        }

        let outputs = function
            .outputs()
            .iter()
            .map(|&node| self.slot(node))
            .collect::<Result<Vec<_>, _>>()?;
        let updates = function
            .updates()
            .iter()
            .map(|&node| self.slot(node))
            .collect::<Result<Vec<_>, _>>()?;

        log::trace!(
            "Running {} outputs and {} updates in {:?} phase",
            outputs.len(),
            updates.len(),
            function.phase()
        );
        let session = self.session.as_mut().ok_or(ModelError::Disposed)?;
        let mut executor = Executor::new(&self.nodes, &mut *session, feed_map, function.phase());
        let mut values = Vec::with_capacity(outputs.len());
        for slot in outputs {
            let evaluated = executor.eval(slot)?;
            values.push(to_value(&self.nodes[slot], evaluated)?);
        }
        for slot in updates {
            executor.eval(slot)?;
        }
        let assignments = executor.into_assignments();
        session.commit(assignments);
        Ok(values)
    }

    fn dispose(&mut self) {
        if self.session.take().is_some() {
            log::debug!("Disposed session of graph {}", self.id);
        }
    }

    fn is_disposed(&self) -> bool {
        self.session.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = BurnModelBackend<Autodiff<NdArray>>;

    fn backend() -> TestBackend {
        TestBackend::new(Default::default())
    }

    #[test]
    fn test_placeholder_reuse() {
        let mut backend = backend();
        let a = backend.placeholder("x", &[-1, 2]).unwrap();
        let b = backend.placeholder("x", &[-1, 2]).unwrap();
        assert_eq!(a, b);

        let err = backend.placeholder("x", &[-1, 3]).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut backend = backend();
        let a = backend.placeholder("a", &[1]).unwrap();
        backend.identity(a, Some("out")).unwrap();
        let err = backend.identity(a, Some("out")).unwrap_err();
        assert!(matches!(err, ModelError::DuplicateName { .. }));
    }

    #[test]
    fn test_foreign_node_rejected() {
        let mut first = backend();
        let mut second = backend();
        let a = first.placeholder("a", &[1]).unwrap();
        let err = second.identity(a, None).unwrap_err();
        assert!(matches!(err, ModelError::UnknownNode { .. }));
    }

    #[test]
    fn test_dense_shapes() {
        let mut backend = backend();
        let x = backend.placeholder("x", &[-1, 3]).unwrap();
        let w = backend
            .weights(&[3, 2], &Initializer::Ones, "w")
            .unwrap();
        let b = backend.weights(&[2], &Initializer::Zeros, "b").unwrap();
        let y = backend.dot(x, w, None).unwrap();
        let y = backend.bias_add(y, b, Some("y")).unwrap();

        assert_eq!(backend.shape(y).unwrap(), vec![-1, 2]);
        assert_eq!(backend.trainable_weights(), &[w, b]);

        let function = backend.function(&[x], &[y], &[]).unwrap();
        let input = Value::from_rows(&[vec![1.0, 2.0, 3.0], vec![0.0, 0.0, 1.0]]).unwrap();
        let out = function.execute_positional(&mut backend, vec![input]).unwrap();
        assert_eq!(out[0].shape(), &[2, 2]);
        assert_eq!(out[0].as_f32().unwrap(), &[6.0, 6.0, 1.0, 1.0]);
    }

    #[test]
    fn test_dot_rejects_incompatible_shapes() {
        let mut backend = backend();
        let x = backend.placeholder("x", &[-1, 3]).unwrap();
        let w = backend.weights(&[2, 2], &Initializer::Ones, "w").unwrap();
        assert!(matches!(
            backend.dot(x, w, None),
            Err(ModelError::Compilation { .. })
        ));
    }

    #[test]
    fn test_gradient_of_square() {
        let mut backend = backend();
        let w = backend
            .weights(&[2], &Initializer::Constant(3.0), "w")
            .unwrap();
        let loss = backend.square(w, None).unwrap();
        let loss = backend.reduce_sum(loss, None).unwrap();
        let grads = backend.gradients(loss, &[w]).unwrap();

        let function = backend.function(&[], &[loss, grads[0]], &[]).unwrap();
        let out = function.execute_positional(&mut backend, vec![]).unwrap();
        assert_eq!(out[0].to_scalar(), Some(18.0));
        assert_eq!(out[1].as_f32().unwrap(), &[6.0, 6.0]);
    }

    #[test]
    fn test_gradient_of_unused_weight_is_zero() {
        let mut backend = backend();
        let w = backend
            .weights(&[2], &Initializer::Constant(3.0), "w")
            .unwrap();
        let unused = backend
            .weights(&[3], &Initializer::Ones, "unused")
            .unwrap();
        let loss = backend.reduce_sum(w, None).unwrap();
        let grads = backend.gradients(loss, &[w, unused]).unwrap();

        let function = backend.function(&[], &grads, &[]).unwrap();
        let out = function.execute_positional(&mut backend, vec![]).unwrap();
        assert_eq!(out[0].as_f32().unwrap(), &[1.0, 1.0]);
        assert_eq!(out[1].as_f32().unwrap(), &[0.0, 0.0, 0.0]);
        assert_eq!(out[1].shape(), &[3]);
    }

    #[test]
    fn test_updates_apply_after_fetches() {
        let mut backend = backend();
        let counter = backend.variable(0, "counter").unwrap();
        let one = backend.constant(Value::scalar_i64(1), None).unwrap();
        let step = backend.update_add(counter, one).unwrap();

        let function = backend.function(&[], &[counter], &[step]).unwrap();
        let first = function.execute_positional(&mut backend, vec![]).unwrap();
        let second = function.execute_positional(&mut backend, vec![]).unwrap();
        assert_eq!(first[0].as_i64().unwrap(), &[0]);
        assert_eq!(second[0].as_i64().unwrap(), &[1]);
        assert_eq!(
            backend.read_variable(counter).unwrap().as_i64().unwrap(),
            &[2]
        );
    }

    #[test]
    fn test_update_requires_variable() {
        let mut backend = backend();
        let x = backend.placeholder("x", &[1]).unwrap();
        let y = backend.identity(x, None).unwrap();
        let err = backend.update(y, x).unwrap_err();
        assert!(matches!(err, ModelError::InvalidNodeKind { .. }));
    }

    #[test]
    fn test_feed_dtype_mismatch() {
        let mut backend = backend();
        let x = backend.placeholder("x", &[1]).unwrap();
        let y = backend.identity(x, None).unwrap();
        let function = backend.function(&[x], &[y], &[]).unwrap();
        let value = Value::new_i64(vec![1], vec![4]).unwrap();
        let err = function
            .execute_positional(&mut backend, vec![value])
            .unwrap_err();
        assert!(matches!(err, ModelError::DTypeMismatch { .. }));
    }

    #[test]
    fn test_feed_shape_mismatch() {
        let mut backend = backend();
        let x = backend.placeholder("x", &[-1, 2]).unwrap();
        let y = backend.identity(x, None).unwrap();
        let function = backend.function(&[x], &[y], &[]).unwrap();
        let err = function
            .execute_positional(&mut backend, vec![Value::vector(vec![1.0, 2.0])])
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_sigmoid_cross_entropy() {
        let mut backend = backend();
        let z = backend.placeholder("z", &[2]).unwrap();
        let x = backend.placeholder("x", &[2]).unwrap();
        let ce = backend.sigmoid_cross_entropy_with_logits(z, x, None).unwrap();
        let function = backend.function(&[z, x], &[ce], &[]).unwrap();
        let out = function
            .execute_positional(
                &mut backend,
                vec![Value::vector(vec![1.0, 0.0]), Value::vector(vec![0.0, 0.0])],
            )
            .unwrap();
        let ln2 = 2.0f32.ln();
        for v in out[0].as_f32().unwrap() {
            assert!((v - ln2).abs() < 1e-5);
        }
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut backend = backend();
        let x = backend.placeholder("x", &[1]).unwrap();
        backend.dispose();
        backend.dispose();
        assert!(backend.is_disposed());
        assert!(matches!(backend.shape(x), Err(ModelError::Disposed)));
        assert!(matches!(
            backend.placeholder("y", &[1]),
            Err(ModelError::Disposed)
        ));
    }

    #[test]
    fn test_rank_above_two_rejected() {
        let mut backend = backend();
        assert!(matches!(
            backend.placeholder("x", &[-1, 2, 2]),
            Err(ModelError::Compilation { .. })
        ));
    }
}
