//! Model-related error types.

use thiserror::Error;

use crate::backend::DType;

/// Broad class of a [`ModelError`].
///
/// Construction errors are raised when an object is built, compilation errors
/// once it is connected to a backend, execution errors when values are fed or
/// fetched, and invalid-state errors when a disposed backend is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Construction,
    Compilation,
    Execution,
    InvalidState,
}

/// Errors that can occur while building, compiling or running a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid argument `{argument}`: {message}")]
    InvalidArgument {
        argument: &'static str,
        message: String,
    },

    #[error("Compilation failed: {message}")]
    Compilation { message: String },

    #[error("A node named `{name}` is already registered")]
    DuplicateName { name: String },

    #[error("Node {node} is not part of this graph")]
    UnknownNode { node: String },

    #[error("Invalid node kind for {node}: expected {expected}, got {actual}")]
    InvalidNodeKind {
        node: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Shape mismatch for `{node}`: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        node: String,
        expected: Vec<i64>,
        actual: Vec<usize>,
    },

    #[error("DType mismatch for `{node}`: expected {expected:?}, got {actual:?}")]
    DTypeMismatch {
        node: String,
        expected: DType,
        actual: DType,
    },

    #[error("No value provided for input `{node}`")]
    UnresolvedInput { node: String },

    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Execution engine error: {message}")]
    Engine { message: String },

    #[error("The backend has been disposed")]
    Disposed,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl ModelError {
    pub(crate) fn invalid_argument(argument: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            message: message.into(),
        }
    }

    pub(crate) fn compilation(message: impl Into<String>) -> Self {
        Self::Compilation {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::Construction,
            Self::Compilation { .. }
            | Self::DuplicateName { .. }
            | Self::UnknownNode { .. }
            | Self::InvalidNodeKind { .. }
            | Self::SerializationError(_) => ErrorKind::Compilation,
            Self::ShapeMismatch { .. }
            | Self::DTypeMismatch { .. }
            | Self::UnresolvedInput { .. }
            | Self::InvalidData { .. }
            | Self::Engine { .. } => ErrorKind::Execution,
            Self::Disposed => ErrorKind::InvalidState,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ModelError::invalid_argument("units", "must be positive").kind(),
            ErrorKind::Construction
        );
        assert_eq!(
            ModelError::compilation("empty shape").kind(),
            ErrorKind::Compilation
        );
        assert_eq!(
            ModelError::UnresolvedInput {
                node: "x".to_string()
            }
            .kind(),
            ErrorKind::Execution
        );
        assert_eq!(ModelError::Disposed.kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn test_error_messages() {
        let err = ModelError::ShapeMismatch {
            node: "x".to_string(),
            expected: vec![-1, 2],
            actual: vec![3, 4],
        };
        assert_eq!(
            err.to_string(),
            "Shape mismatch for `x`: expected [-1, 2], got [3, 4]"
        );
    }
}
