//! Serializable description of a recorded graph.

use burn::tensor::backend::AutodiffBackend;

use super::core::BurnModelBackend;
use super::operation::Op;
use crate::backend::{Backend, DType};
use crate::errors::ModelError;

/// One node of a [`GraphSummary`].
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct NodeSummary {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub op: &'static str,
    pub shape: Vec<i64>,
    pub dtype: DType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f32>,
}

/// Structure of a graph: nodes in creation order plus the trainable weights.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GraphSummary {
    pub graph: usize,
    pub nodes: Vec<NodeSummary>,
    pub trainable_weights: Vec<usize>,
}

impl GraphSummary {
    /// Nodes carrying a given operation name, such as `"DOT"`.
    pub fn count(&self, op: &str) -> usize {
        self.nodes.iter().filter(|n| n.op == op).count()
    }
}

impl<B: AutodiffBackend> BurnModelBackend<B> {
    /// Describes every node recorded so far.
    pub fn summary(&self) -> GraphSummary {
        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(index, node)| NodeSummary {
                index,
                name: node.name.clone(),
                op: node.op.name(),
                shape: node.shape.clone(),
                dtype: node.dtype,
                inputs: node.op.inputs(),
                rate: match node.op {
                    Op::Dropout { rate, .. } => Some(rate),
                    _ => None,
                },
            })
            .collect();

        GraphSummary {
            graph: self.graph_id(),
            nodes,
            trainable_weights: self.trainable_weights().iter().map(|n| n.index()).collect(),
        }
    }

    /// Exports the graph summary as pretty-printed JSON.
    pub fn export_summary(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(&self.summary())?)
    }
}
