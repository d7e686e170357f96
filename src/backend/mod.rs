//! The backend contract: every execution engine implements [`Backend`].
//!
//! Layers, losses and optimizers only ever talk to an engine through this
//! trait. They receive opaque [`Node`] handles back and never look inside
//! them; interpreting a node is the job of the backend that created it.
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use layergraph::backend::{Backend, Value};
//! use layergraph::graph::BurnModelBackend;
//! use layergraph::DefaultEngine;
//!
//! let mut backend = BurnModelBackend::<DefaultEngine>::new(Default::default());
//! let a = backend.placeholder("A", &[1]).unwrap();
//! let b = backend.placeholder("B", &[1]).unwrap();
//! let sum = backend.add(a, b, Some("Add")).unwrap();
//!
//! let function = backend.function(&[a, b], &[sum], &[]).unwrap();
//! let result = function
//!     .execute_positional(&mut backend, vec![Value::vector(vec![2.0]), Value::vector(vec![3.0])])
//!     .unwrap();
//! assert_eq!(result[0].as_f32().unwrap(), &[5.0]);
//! ```

mod function;
mod node;
mod value;

pub use function::{BackendFunction, Phase};
pub use node::{GraphId, Node, next_graph_id};
pub use value::{BATCH, DType, Value, ValueData};

use crate::errors::ModelError;
use crate::layers::Initializer;

/// Capability set an execution engine provides to the compiler.
///
/// Graph-construction operations return a fresh node and register it under
/// `name` only when a name is given; unnamed intermediate nodes cannot be
/// looked up. Registering a name twice is a [`ModelError::DuplicateName`]
/// error, except for [`Backend::placeholder`] which returns the existing node.
///
/// Passing a node created by another backend, or a node of the wrong kind
/// (for example assigning to something that is not a variable), fails with
/// [`ModelError::UnknownNode`] or [`ModelError::InvalidNodeKind`].
///
/// Every fallible method of a disposed backend fails with
/// [`ModelError::Disposed`].
pub trait Backend {
    /// Identifies the graph this backend owns.
    fn graph_id(&self) -> GraphId;

    /// Looks up a named node. `None` is a normal outcome.
    fn node(&self, name: &str) -> Option<Node>;

    /// Declared shape of a node. [`BATCH`] marks the unbound batch axis.
    fn shape(&self, node: Node) -> Result<Vec<i64>, ModelError>;

    fn dtype(&self, node: Node) -> Result<DType, ModelError>;

    /// Trainable weights in registration order.
    fn trainable_weights(&self) -> &[Node];

    /// Node that produced the initial value of `variable`, if any.
    fn initializer(&self, variable: Node) -> Result<Option<Node>, ModelError>;

    //  Inputs and state

    /// Returns the placeholder registered as `name`, or creates one.
    fn placeholder(&mut self, name: &str, shape: &[i64]) -> Result<Node, ModelError>;

    fn constant(&mut self, value: Value, name: Option<&str>) -> Result<Node, ModelError>;

    /// Creates a trainable variable initialized by `initializer` and appends
    /// it to [`Backend::trainable_weights`].
    fn weights(
        &mut self,
        shape: &[i64],
        initializer: &Initializer,
        name: &str,
    ) -> Result<Node, ModelError>;

    /// Creates a persistent variable that is not trained, such as an
    /// optimizer accumulator.
    fn state_variable(
        &mut self,
        shape: &[i64],
        initializer: &Initializer,
        name: &str,
    ) -> Result<Node, ModelError>;

    /// Creates a scalar integer variable.
    fn variable(&mut self, initial: i64, name: &str) -> Result<Node, ModelError>;

    /// Assigns `value` to `variable` when executed as an update.
    fn update(&mut self, variable: Node, value: Node) -> Result<Node, ModelError>;

    /// Adds `delta` to `variable` when executed as an update.
    fn update_add(&mut self, variable: Node, delta: Node) -> Result<Node, ModelError>;

    //  Initializer sampling

    fn random_normal(
        &mut self,
        shape: &[i64],
        mean: f32,
        stddev: f32,
        seed: Option<u64>,
    ) -> Result<Node, ModelError>;

    fn random_uniform(
        &mut self,
        shape: &[i64],
        min: f32,
        max: f32,
        seed: Option<u64>,
    ) -> Result<Node, ModelError>;

    fn truncated_normal(
        &mut self,
        shape: &[i64],
        mean: f32,
        stddev: f32,
        seed: Option<u64>,
    ) -> Result<Node, ModelError>;

    fn zeros(&mut self, shape: &[i64]) -> Result<Node, ModelError>;

    fn ones(&mut self, shape: &[i64]) -> Result<Node, ModelError>;

    //  Linear algebra and element-wise arithmetic

    /// Matrix product of two rank-2 nodes.
    fn dot(&mut self, left: Node, right: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Adds a rank-1 bias along the last axis of `input`.
    fn bias_add(&mut self, input: Node, bias: Node, name: Option<&str>)
    -> Result<Node, ModelError>;

    fn add(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn subtract(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Element-wise product.
    fn multiply(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn divide(&mut self, a: Node, b: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn negate(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn square(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn abs(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Natural logarithm.
    fn log(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn clip_by_value(
        &mut self,
        input: Node,
        min: f32,
        max: f32,
        name: Option<&str>,
    ) -> Result<Node, ModelError>;

    /// Casts an integer node to `f32`.
    fn float(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    //  Activations

    fn identity(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn sigmoid(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn relu(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    fn tanh(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Softmax over the last axis.
    fn softmax(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Drops elements with probability `rate` in the [`Phase::Train`] phase,
    /// scaling survivors by `1 / (1 - rate)`. Identity otherwise.
    fn dropout(
        &mut self,
        input: Node,
        rate: f32,
        seed: Option<u64>,
        name: Option<&str>,
    ) -> Result<Node, ModelError>;

    //  Reductions and losses

    /// Mean over the last axis, which is removed from the shape.
    fn mean(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Sum over all elements, producing a scalar.
    fn reduce_sum(&mut self, input: Node, name: Option<&str>) -> Result<Node, ModelError>;

    /// Element-wise `max(x, 0) - x * z + log(1 + exp(-|x|))` for logits `x`
    /// and targets `z`.
    fn sigmoid_cross_entropy_with_logits(
        &mut self,
        targets: Node,
        logits: Node,
        name: Option<&str>,
    ) -> Result<Node, ModelError>;

    /// `-sum(labels * log_softmax(logits))` over the last axis.
    fn softmax_cross_entropy_with_logits(
        &mut self,
        logits: Node,
        labels: Node,
        name: Option<&str>,
    ) -> Result<Node, ModelError>;

    //  Differentiation

    /// Symbolic gradients of `loss` with respect to each of `variables`, in
    /// the same order. A non-scalar loss is summed first.
    fn gradients(&mut self, loss: Node, variables: &[Node]) -> Result<Vec<Node>, ModelError>;

    //  Execution

    /// Binds a function over this backend's graph.
    fn function(
        &mut self,
        inputs: &[Node],
        outputs: &[Node],
        updates: &[Node],
    ) -> Result<BackendFunction, ModelError>;

    /// Runs `function` with one resolved value per input.
    ///
    /// Callers normally go through [`BackendFunction::execute`], which merges
    /// defaults and overrides first.
    fn run(
        &mut self,
        function: &BackendFunction,
        feeds: Vec<(Node, Value)>,
    ) -> Result<Vec<Value>, ModelError>;

    /// Releases the execution session. Calling it again is a no-op.
    fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}
