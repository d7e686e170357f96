//! Layers and the per-backend compile protocol.
//!
//! Layers live in a [`LayerGraph`] arena and refer to their upstream layer by
//! [`LayerId`], so two layers can share one upstream without shared
//! ownership. A [`CompileContext`] turns layers into backend nodes, compiling
//! each layer at most once per backend.
//!
//! # Example
//!
//! ```
//! use layergraph::backend::Backend;
//! use layergraph::graph::BurnModelBackend;
//! use layergraph::layers::{Activation, CompileContext, Dense, Input, LayerGraph};
//! use layergraph::DefaultEngine;
//!
//! let mut layers = LayerGraph::new();
//! let input = layers.input(Input::new(&[4]).unwrap()).unwrap();
//! let hidden = layers
//!     .dense(Dense::new(8).unwrap().with_activation(Activation::Relu), input)
//!     .unwrap();
//! assert_eq!(layers.shape(hidden).unwrap(), vec![-1, 8]);
//!
//! let mut backend = BurnModelBackend::<DefaultEngine>::new(Default::default());
//! let mut context = CompileContext::new(&backend);
//! let node = context.compile(&layers, hidden, &mut backend).unwrap();
//! assert_eq!(backend.shape(node).unwrap(), vec![-1, 8]);
//! assert_eq!(backend.trainable_weights().len(), 2);
//! ```

pub mod activation;
pub mod dense;
pub mod dropout;
pub mod initializer;
pub mod input;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

pub use activation::Activation;
pub use dense::Dense;
pub use dropout::Dropout;
pub use initializer::Initializer;
pub use input::Input;

use crate::backend::{Backend, GraphId, Node};
use crate::errors::ModelError;

/// Global counter for unique layer graph IDs.
static LAYER_GRAPH_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn next_layer_graph_id() -> usize {
    LAYER_GRAPH_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Handle to a layer inside a [`LayerGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId {
    graph: usize,
    index: usize,
}

/// The kinds of layer a model can be built from.
#[derive(Debug, Clone, PartialEq)]
pub enum Layer {
    Input(Input),
    Dense(Dense),
    Dropout(Dropout),
}

impl Layer {
    fn kind(&self) -> &'static str {
        match self {
            Layer::Input(_) => "input",
            Layer::Dense(_) => "dense",
            Layer::Dropout(_) => "dropout",
        }
    }
}

#[derive(Debug, Clone)]
struct LayerRecord {
    name: String,
    layer: Layer,
    upstream: Option<LayerId>,
}

/// Arena of layers forming an acyclic dependency graph.
///
/// Every layer has a unique name: the one it was given, or one generated from
/// its kind (`dense_1`, `dense_2`, ...).
#[derive(Debug, Clone)]
pub struct LayerGraph {
    id: usize,
    layers: Vec<LayerRecord>,
    names: HashSet<String>,
    counters: HashMap<&'static str, usize>,
}

impl Default for LayerGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerGraph {
    pub fn new() -> Self {
        Self {
            id: next_layer_graph_id(),
            layers: Vec::new(),
            names: HashSet::new(),
            counters: HashMap::new(),
        }
    }

    /// Adds an input layer.
    pub fn input(&mut self, mut input: Input) -> Result<LayerId, ModelError> {
        let name = input.name.take();
        self.add(Layer::Input(input), name, None)
    }

    /// Adds a dense layer fed by `upstream`.
    pub fn dense(&mut self, mut dense: Dense, upstream: LayerId) -> Result<LayerId, ModelError> {
        let name = dense.name.take();
        self.add(Layer::Dense(dense), name, Some(upstream))
    }

    /// Adds a dropout layer fed by `upstream`.
    pub fn dropout(
        &mut self,
        mut dropout: Dropout,
        upstream: LayerId,
    ) -> Result<LayerId, ModelError> {
        let name = dropout.name.take();
        self.add(Layer::Dropout(dropout), name, Some(upstream))
    }

    fn add(
        &mut self,
        layer: Layer,
        name: Option<String>,
        upstream: Option<LayerId>,
    ) -> Result<LayerId, ModelError> {
        if let Some(upstream) = upstream {
            self.record(upstream).map_err(|_| {
                ModelError::invalid_argument("upstream", "layer is not part of this graph")
            })?;
        }

        let name = match name {
            Some(name) => name,
            None => self.generate_name(layer.kind()),
        };
        if !self.names.insert(name.clone()) {
            return Err(ModelError::invalid_argument(
                "name",
                format!("a layer named `{}` already exists", name),
            ));
        }

        self.layers.push(LayerRecord {
            name,
            layer,
            upstream,
        });
        Ok(LayerId {
            graph: self.id,
            index: self.layers.len() - 1,
        })
    }

    fn generate_name(&mut self, kind: &'static str) -> String {
        loop {
            let counter = self.counters.entry(kind).or_insert(0);
            *counter += 1;
            let name = format!("{}_{}", kind, counter);
            if !self.names.contains(&name) {
                return name;
            }
        }
    }

    fn record(&self, id: LayerId) -> Result<&LayerRecord, ModelError> {
        if id.graph != self.id {
            return Err(ModelError::invalid_argument(
                "layer",
                "layer is not part of this graph",
            ));
        }
        self.layers.get(id.index).ok_or_else(|| {
            ModelError::invalid_argument("layer", "layer is not part of this graph")
        })
    }

    pub fn contains(&self, id: LayerId) -> bool {
        self.record(id).is_ok()
    }

    pub fn layer(&self, id: LayerId) -> Result<&Layer, ModelError> {
        Ok(&self.record(id)?.layer)
    }

    pub fn name(&self, id: LayerId) -> Result<&str, ModelError> {
        Ok(&self.record(id)?.name)
    }

    pub fn upstream(&self, id: LayerId) -> Result<Option<LayerId>, ModelError> {
        Ok(self.record(id)?.upstream)
    }

    /// Output shape of a layer. `-1` marks the unbound batch axis.
    pub fn shape(&self, id: LayerId) -> Result<Vec<i64>, ModelError> {
        let record = self.record(id)?;
        match (&record.layer, record.upstream) {
            (Layer::Input(input), _) => Ok(input.shape()),
            (Layer::Dense(dense), Some(upstream)) => Ok(dense.output_shape(&self.shape(upstream)?)),
            (Layer::Dropout(_), Some(upstream)) => self.shape(upstream),
            (_, None) => Err(missing_upstream(&record.name)),
        }
    }

    /// Input layers that `id` depends on, including itself.
    pub fn inputs_of(&self, id: LayerId) -> Result<Vec<LayerId>, ModelError> {
        let mut current = Some(id);
        let mut inputs = Vec::new();
        while let Some(id) = current {
            let record = self.record(id)?;
            if matches!(record.layer, Layer::Input(_)) {
                inputs.push(id);
            }
            current = record.upstream;
        }
        Ok(inputs)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

fn missing_upstream(name: &str) -> ModelError {
    ModelError::compilation(format!("layer `{}` has no upstream layer", name))
}

/// What compiling a layer produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfiguration {
    /// Node holding the layer output.
    pub output: Node,
    /// Trainable weights the layer registered.
    pub parameters: Vec<Node>,
    /// Nodes producing the initial values of `parameters`.
    pub initializers: Vec<Node>,
}

/// Compiles layers against one backend, memoizing by [`LayerId`].
///
/// A layer reached along several paths is compiled once; later requests
/// return the stored configuration without touching the backend.
#[derive(Debug)]
pub struct CompileContext {
    backend: GraphId,
    configurations: HashMap<LayerId, LayerConfiguration>,
}

impl CompileContext {
    /// Creates a context bound to `backend`.
    pub fn new(backend: &dyn Backend) -> Self {
        Self {
            backend: backend.graph_id(),
            configurations: HashMap::new(),
        }
    }

    /// Compiles `id` and its upstream layers, returning the output node.
    pub fn compile(
        &mut self,
        layers: &LayerGraph,
        id: LayerId,
        backend: &mut dyn Backend,
    ) -> Result<Node, ModelError> {
        if backend.graph_id() != self.backend {
            return Err(ModelError::invalid_argument(
                "backend",
                "compile context is bound to another backend",
            ));
        }
        if let Some(configuration) = self.configurations.get(&id) {
            return Ok(configuration.output);
        }

        let record = layers.record(id)?;
        let configuration = match (&record.layer, record.upstream) {
            (Layer::Input(input), _) => input.compile(&record.name, backend)?,
            (Layer::Dense(dense), Some(upstream)) => {
                let input = self.compile(layers, upstream, backend)?;
                let shape = layers.shape(upstream)?;
                dense.compile(&record.name, input, &shape, backend)?
            }
            (Layer::Dropout(dropout), Some(upstream)) => {
                let input = self.compile(layers, upstream, backend)?;
                dropout.compile(&record.name, input, backend)?
            }
            (_, None) => return Err(missing_upstream(&record.name)),
        };
        log::debug!(
            "Compiled layer `{}` with {} parameters",
            record.name,
            configuration.parameters.len()
        );

        let output = configuration.output;
        self.configurations.insert(id, configuration);
        Ok(output)
    }

    /// Configuration stored for a compiled layer.
    pub fn configuration(&self, id: LayerId) -> Option<&LayerConfiguration> {
        self.configurations.get(&id)
    }

    pub fn is_compiled(&self, id: LayerId) -> bool {
        self.configurations.contains_key(&id)
    }
}
