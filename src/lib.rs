//! # layergraph
//!
//! A backend-agnostic compiler and execution orchestrator for small layered
//! computation models.
//!
//! A [`Model`] is described declaratively: input layers, output layers, one
//! loss per output and an optimizer. Compiling it against a
//! [`Backend`](backend::Backend) builds a symbolic graph and binds three
//! functions: one that trains on a minibatch, one that predicts and one that
//! evaluates losses and metrics.
//!
//! ## Features
//!
//! - **Backend contract**: layers, losses and optimizers only use the
//!   [`backend::Backend`] trait and opaque [`backend::Node`] handles.
//! - **Burn engine**: [`graph::BurnModelBackend`] runs graphs on any burn
//!   autodiff backend, NdArray by default, WGPU with the `wgpu` feature.
//! - **Compile once**: layers shared by several outputs compile to one set of
//!   nodes and weights.
//!
//! ## Example
//!
//! ```
//! use layergraph::prelude::*;
//!
//! let mut layers = LayerGraph::new();
//! let input = layers.input(Input::new(&[2]).unwrap()).unwrap();
//! let output = layers
//!     .dense(Dense::new(1).unwrap().with_activation(Activation::Linear), input)
//!     .unwrap();
//!
//! let model = Model::new(
//!     layers,
//!     vec![input],
//!     vec![output],
//!     vec![Loss::MeanSquaredError],
//!     Sgd::new(0.01).unwrap(),
//!     vec![],
//! )
//! .unwrap();
//!
//! let mut backend = BurnModelBackend::<DefaultEngine>::new(Default::default());
//! let mut executable = model.compile(&mut backend).unwrap();
//!
//! let features = Value::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
//! let targets = Value::from_rows(&[vec![1.0], vec![-1.0]]).unwrap();
//! let history = executable.train(&[features.clone()], &[targets], 5, 2).unwrap();
//! assert_eq!(history.loss_history.len(), 5);
//!
//! let predictions = executable.predict(&[features]).unwrap();
//! assert_eq!(predictions[0].shape(), &[2, 1]);
//! ```

pub mod backend;
pub mod errors;
pub mod graph;
pub mod layers;
pub mod model;
pub mod training;

// Re-exports for convenience
pub use errors::{ErrorKind, ModelError};
pub use layers::activation::Activation;
pub use model::Model;
pub use training::{Loss, TrainingConfig};

/// Default burn backend for the reference engine: NdArray with autodiff.
pub type DefaultEngine = burn::backend::Autodiff<burn::backend::NdArray>;

/// WGPU backend with autodiff support.
#[cfg(feature = "wgpu")]
pub type WgpuEngine = burn::backend::Autodiff<burn::backend::Wgpu>;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::DefaultEngine;
    pub use crate::backend::{Backend, BackendFunction, DType, Node, Phase, Value};
    pub use crate::errors::{ErrorKind, ModelError};
    pub use crate::graph::BurnModelBackend;
    pub use crate::layers::{
        Activation, CompileContext, Dense, Dropout, Initializer, Input, LayerGraph, LayerId,
    };
    pub use crate::model::Model;
    pub use crate::training::{
        Evaluation, ExecutableModel, Loss, Metric, Optimizer, PartialBatch, Sgd,
        TrainingConfig, TrainingHistory,
    };
}
