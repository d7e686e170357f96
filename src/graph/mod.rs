//! Reference execution engine built on burn.
//!
//! [`BurnModelBackend`] records graph operations symbolically and interprets
//! them on any burn autodiff backend. Gradients come from burn's autodiff, so
//! a `GRADIENT` node is evaluated by running the backward pass of its loss
//! inside the same call.
//!
//! # Example
//!
//! ```
//! use layergraph::backend::{Backend, Value};
//! use layergraph::graph::BurnModelBackend;
//! use layergraph::layers::Initializer;
//! use layergraph::DefaultEngine;
//!
//! let mut backend = BurnModelBackend::<DefaultEngine>::new(Default::default());
//! let x = backend.placeholder("x", &[-1, 2]).unwrap();
//! let w = backend.weights(&[2, 1], &Initializer::Ones, "w").unwrap();
//! let y = backend.dot(x, w, Some("y")).unwrap();
//!
//! let predict = backend.function(&[x], &[y], &[]).unwrap();
//! let out = predict
//!     .execute_positional(&mut backend, vec![Value::from_rows(&[vec![1.0, 2.0]]).unwrap()])
//!     .unwrap();
//! assert_eq!(out[0].as_f32().unwrap(), &[3.0]);
//! ```

mod core;
mod operation;
mod session;
mod summary;

pub use core::BurnModelBackend;
pub use summary::{GraphSummary, NodeSummary};
