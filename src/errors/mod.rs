//! Error types for model construction, compilation and execution.

mod model_error;

pub use model_error::{ErrorKind, ModelError};
