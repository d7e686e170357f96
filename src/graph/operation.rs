//! Operations recorded in the symbolic graph.
//!
//! Uses a closed enum: only [`BurnModelBackend`](super::BurnModelBackend)
//! creates and interprets these, callers only ever see node handles.

use crate::backend::{BATCH, DType, Value};

/// Index of a node inside the graph arena.
pub(crate) type Slot = usize;

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Identity,
    Negate,
    Square,
    Abs,
    Log,
    Sigmoid,
    Relu,
    Tanh,
    Softmax,
}

impl UnaryOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            UnaryOp::Identity => "IDENTITY",
            UnaryOp::Negate => "NEGATE",
            UnaryOp::Square => "SQUARE",
            UnaryOp::Abs => "ABS",
            UnaryOp::Log => "LOG",
            UnaryOp::Sigmoid => "SIGMOID",
            UnaryOp::Relu => "RELU",
            UnaryOp::Tanh => "TANH",
            UnaryOp::Softmax => "SOFTMAX",
        }
    }

    /// Whether the operation is defined on integer inputs.
    pub(crate) fn accepts_integers(&self) -> bool {
        matches!(
            self,
            UnaryOp::Identity | UnaryOp::Negate | UnaryOp::Square | UnaryOp::Abs
        )
    }
}

/// Element-wise binary operations with broadcasting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl BinaryOp {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "ADD",
            BinaryOp::Subtract => "SUBTRACT",
            BinaryOp::Multiply => "MULTIPLY",
            BinaryOp::Divide => "DIVIDE",
        }
    }
}

/// Distribution sampled by a random initializer node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Sampler {
    Normal { mean: f32, stddev: f32 },
    Uniform { min: f32, max: f32 },
    TruncatedNormal { mean: f32, stddev: f32 },
}

/// A computation recorded in the graph.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Placeholder,
    Constant(Value),
    Variable {
        trainable: bool,
        initializer: Option<Slot>,
    },
    Random {
        sampler: Sampler,
        seed: Option<u64>,
    },
    Fill(f32),
    Dot {
        left: Slot,
        right: Slot,
    },
    BiasAdd {
        input: Slot,
        bias: Slot,
    },
    Binary {
        op: BinaryOp,
        a: Slot,
        b: Slot,
    },
    Unary {
        op: UnaryOp,
        input: Slot,
    },
    Clip {
        input: Slot,
        min: f32,
        max: f32,
    },
    Cast {
        input: Slot,
    },
    Dropout {
        input: Slot,
        rate: f32,
        seed: Option<u64>,
    },
    Mean {
        input: Slot,
    },
    ReduceSum {
        input: Slot,
    },
    SigmoidCrossEntropy {
        targets: Slot,
        logits: Slot,
    },
    SoftmaxCrossEntropy {
        logits: Slot,
        labels: Slot,
    },
    Gradient {
        loss: Slot,
        variable: Slot,
    },
    Assign {
        variable: Slot,
        value: Slot,
    },
    AssignAdd {
        variable: Slot,
        delta: Slot,
    },
}

impl Op {
    /// Short upper-case name used in summaries and error messages.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Op::Placeholder => "PLACEHOLDER",
            Op::Constant(_) => "CONSTANT",
            Op::Variable {
                trainable: true, ..
            } => "WEIGHTS",
            Op::Variable { .. } => "VARIABLE",
            Op::Random { sampler, .. } => match sampler {
                Sampler::Normal { .. } => "RANDOM_NORMAL",
                Sampler::Uniform { .. } => "RANDOM_UNIFORM",
                Sampler::TruncatedNormal { .. } => "TRUNCATED_NORMAL",
            },
            Op::Fill(_) => "FILL",
            Op::Dot { .. } => "DOT",
            Op::BiasAdd { .. } => "BIAS_ADD",
            Op::Binary { op, .. } => op.name(),
            Op::Unary { op, .. } => op.name(),
            Op::Clip { .. } => "CLIP_BY_VALUE",
            Op::Cast { .. } => "FLOAT",
            Op::Dropout { .. } => "DROPOUT",
            Op::Mean { .. } => "MEAN",
            Op::ReduceSum { .. } => "REDUCE_SUM",
            Op::SigmoidCrossEntropy { .. } => "SIGMOID_CROSS_ENTROPY_WITH_LOGITS",
            Op::SoftmaxCrossEntropy { .. } => "SOFTMAX_CROSS_ENTROPY_WITH_LOGITS",
            Op::Gradient { .. } => "GRADIENT",
            Op::Assign { .. } => "UPDATE",
            Op::AssignAdd { .. } => "UPDATE_ADD",
        }
    }

    /// Slots this operation reads from.
    pub(crate) fn inputs(&self) -> Vec<Slot> {
        match self {
            Op::Placeholder | Op::Constant(_) | Op::Random { .. } | Op::Fill(_) => vec![],
            Op::Variable { initializer, .. } => initializer.iter().copied().collect(),
            Op::Dot { left, right } => vec![*left, *right],
            Op::BiasAdd { input, bias } => vec![*input, *bias],
            Op::Binary { a, b, .. } => vec![*a, *b],
            Op::Unary { input, .. }
            | Op::Clip { input, .. }
            | Op::Cast { input }
            | Op::Dropout { input, .. }
            | Op::Mean { input }
            | Op::ReduceSum { input } => vec![*input],
            Op::SigmoidCrossEntropy { targets, logits } => vec![*targets, *logits],
            Op::SoftmaxCrossEntropy { logits, labels } => vec![*logits, *labels],
            Op::Gradient { loss, variable } => vec![*loss, *variable],
            Op::Assign { variable, value } => vec![*variable, *value],
            Op::AssignAdd { variable, delta } => vec![*variable, *delta],
        }
    }

    pub(crate) fn is_variable(&self) -> bool {
        matches!(self, Op::Variable { .. })
    }
}

/// A node in the graph arena.
#[derive(Debug, Clone)]
pub(crate) struct GraphNode {
    pub(crate) op: Op,
    pub(crate) shape: Vec<i64>,
    pub(crate) dtype: DType,
    pub(crate) name: Option<String>,
}

impl GraphNode {
    pub(crate) fn new(op: Op, shape: Vec<i64>, dtype: DType) -> Self {
        Self {
            op,
            shape,
            dtype,
            name: None,
        }
    }

    /// Name used in error messages.
    pub(crate) fn label(&self, slot: Slot) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("#{} ({})", slot, self.op.name()),
        }
    }
}

/// Broadcasts two declared shapes, aligning trailing axes.
///
/// [`BATCH`] stays unbound unless the other side fixes it to a size other
/// than one.
pub(crate) fn broadcast_declared(a: &[i64], b: &[i64]) -> Option<Vec<i64>> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for axis in 0..rank {
        let da = dim_from_end(a, rank - 1 - axis).unwrap_or(1);
        let db = dim_from_end(b, rank - 1 - axis).unwrap_or(1);
        shape[axis] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            (BATCH, y) => y,
            (x, BATCH) => x,
            _ => return None,
        };
    }
    Some(shape)
}

/// Broadcasts two concrete shapes, aligning trailing axes.
pub(crate) fn broadcast_concrete(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let mut shape = vec![0; rank];
    for axis in 0..rank {
        let da = dim_from_end(a, rank - 1 - axis).unwrap_or(1);
        let db = dim_from_end(b, rank - 1 - axis).unwrap_or(1);
        shape[axis] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => return None,
        };
    }
    Some(shape)
}

fn dim_from_end<T: Copy>(shape: &[T], offset: usize) -> Option<T> {
    shape.len().checked_sub(offset + 1).map(|i| shape[i])
}

/// Two declared dimensions agree when equal or when either is unbound.
pub(crate) fn dims_compatible(a: i64, b: i64) -> bool {
    a == b || a == BATCH || b == BATCH
}

/// Converts a fully bound declared shape into concrete sizes.
pub(crate) fn concrete(shape: &[i64]) -> Option<Vec<usize>> {
    shape
        .iter()
        .map(|&d| if d > 0 { Some(d as usize) } else { None })
        .collect()
}
