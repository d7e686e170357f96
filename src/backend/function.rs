//! BackendFunction - a bound, repeatedly-callable unit of execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::{Backend, GraphId, Node, Value};
use crate::errors::ModelError;

/// Execution phase of a function.
///
/// Phase-dependent nodes such as dropout only alter values during `Train`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    #[default]
    Inference,
}

/// A fixed set of inputs, fetched outputs and side-effecting updates.
///
/// Executing a function never mutates it. Fetched outputs observe the state of
/// every variable as it was at the start of the call; updates run in the same
/// call and only become visible to later calls.
#[derive(Debug, Clone)]
pub struct BackendFunction {
    graph: GraphId,
    inputs: Vec<Node>,
    outputs: Vec<Node>,
    updates: Vec<Node>,
    defaults: HashMap<Node, Value>,
    phase: Phase,
}

impl BackendFunction {
    /// Creates a function. Backends call this from [`Backend::function`].
    pub fn new(graph: GraphId, inputs: Vec<Node>, outputs: Vec<Node>, updates: Vec<Node>) -> Self {
        Self {
            graph,
            inputs,
            outputs,
            updates,
            defaults: HashMap::new(),
            phase: Phase::Inference,
        }
    }

    /// Sets the value used for `input` when a call does not override it.
    pub fn with_default(mut self, input: Node, value: Value) -> Result<Self, ModelError> {
        if !self.inputs.contains(&input) {
            return Err(ModelError::invalid_argument(
                "input",
                format!("{} is not an input of this function", input),
            ));
        }
        self.defaults.insert(input, value);
        Ok(self)
    }

    /// Sets the phase this function executes in.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn graph(&self) -> GraphId {
        self.graph
    }

    pub fn inputs(&self) -> &[Node] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[Node] {
        &self.outputs
    }

    pub fn updates(&self) -> &[Node] {
        &self.updates
    }

    pub fn defaults(&self) -> &HashMap<Node, Value> {
        &self.defaults
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Merges call-time overrides with the defaults, one value per input.
    ///
    /// An override wins over a default. An input with neither is unresolved
    /// and fails the call, as does an override for a node that is not an input.
    pub fn resolve_feeds(
        &self,
        mut overrides: HashMap<Node, Value>,
    ) -> Result<Vec<(Node, Value)>, ModelError> {
        if let Some(node) = overrides.keys().find(|n| !self.inputs.contains(n)) {
            return Err(ModelError::invalid_argument(
                "overrides",
                format!("{} is not an input of this function", node),
            ));
        }

        self.inputs
            .iter()
            .map(|input| {
                let value = match overrides.remove(input) {
                    Some(value) => value,
                    None => self
                        .defaults
                        .get(input)
                        .cloned()
                        .ok_or_else(|| ModelError::UnresolvedInput {
                            node: input.to_string(),
                        })?,
                };
                Ok((*input, value))
            })
            .collect()
    }

    /// Executes the function with values keyed by input node.
    ///
    /// Returns one value per declared output, in declared order.
    pub fn execute(
        &self,
        backend: &mut dyn Backend,
        overrides: HashMap<Node, Value>,
    ) -> Result<Vec<Value>, ModelError> {
        let feeds = self.resolve_feeds(overrides)?;
        backend.run(self, feeds)
    }

    /// Executes the function with one value per input, in input order.
    pub fn execute_positional(
        &self,
        backend: &mut dyn Backend,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, ModelError> {
        if values.len() != self.inputs.len() {
            return Err(ModelError::invalid_argument(
                "values",
                format!(
                    "expected {} input values, got {}",
                    self.inputs.len(),
                    values.len()
                ),
            ));
        }
        let overrides = self.inputs.iter().copied().zip(values).collect();
        self.execute(backend, overrides)
    }
}
