//! Node - opaque handle to a value-producing point in a backend graph.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Global counter for unique graph IDs.
static GRAPH_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier for a backend graph.
pub type GraphId = usize;

/// Generates a new unique graph ID. Backends call this once on creation.
pub fn next_graph_id() -> GraphId {
    GRAPH_ID_COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// Handle to a node owned by a backend.
///
/// A node only identifies a point in the graph of the backend that created it.
/// Equality is identity: two handles are equal when they refer to the same
/// slot of the same graph. Values are never compared.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    graph: GraphId,
    index: usize,
}

impl Node {
    /// Creates a handle. Only backend implementations should call this.
    pub fn new(graph: GraphId, index: usize) -> Self {
        Self { graph, index }
    }

    /// Returns the ID of the graph that owns this node.
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Returns the slot of this node inside its graph.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}:{})", self.graph, self.index)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}@{}", self.index, self.graph)
    }
}
