//! End-to-end tests: building models, compiling them against the burn engine,
//! training and predicting.

use std::collections::HashMap;

use burn::backend::{Autodiff, NdArray};
use layergraph::backend::{Backend, Phase, Value};
use layergraph::graph::BurnModelBackend;
use layergraph::layers::{
    Activation, CompileContext, Dense, Dropout, Initializer, Input, LayerGraph, LayerId,
};
use layergraph::model::{Model, aggregate_losses};
use layergraph::training::{Loss, Metric, PartialBatch, Sgd, TrainingConfig};
use layergraph::{ErrorKind, ModelError};

type TestBackend = BurnModelBackend<Autodiff<NdArray>>;

const TOLERANCE: f32 = 1e-5;

fn backend() -> TestBackend {
    TestBackend::new(Default::default())
}

fn deterministic_dense(units: usize, activation: Activation) -> Dense {
    Dense::new(units)
        .unwrap()
        .with_activation(activation)
        .with_weights_initializer(Initializer::Zeros)
        .with_bias_initializer(Initializer::Zeros)
}

fn linear_regression(learning_rate: f32) -> Model {
    let mut layers = LayerGraph::new();
    let input = layers.input(Input::new(&[2]).unwrap()).unwrap();
    let output = layers
        .dense(deterministic_dense(1, Activation::Linear), input)
        .unwrap();
    Model::new(
        layers,
        vec![input],
        vec![output],
        vec![Loss::MeanSquaredError],
        Sgd::new(learning_rate).unwrap(),
        vec![Metric::MeanAbsoluteError],
    )
    .unwrap()
}

fn regression_data() -> (Value, Value) {
    (
        Value::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap(),
        Value::from_rows(&[vec![1.0], vec![2.0]]).unwrap(),
    )
}

#[test]
fn test_dense_output_shape_leaves_batch_unbound() {
    let mut layers = LayerGraph::new();
    let input = layers.input(Input::new(&[10]).unwrap()).unwrap();
    let dense = layers.dense(Dense::new(2).unwrap(), input).unwrap();
    assert_eq!(layers.shape(dense).unwrap(), vec![-1, 2]);

    let model = Model::new(
        layers,
        vec![input],
        vec![dense],
        vec![Loss::MeanSquaredError],
        Sgd::default(),
        vec![],
    )
    .unwrap();
    let mut backend = backend();
    let executable = model.compile(&mut backend).unwrap();
    let output = executable.outputs()[0];
    assert_eq!(executable.backend().shape(output).unwrap(), vec![-1, 2]);
}

#[test]
fn test_loss_aggregation() {
    let mut backend = backend();
    let l1 = backend.constant(Value::scalar(3.0), None).unwrap();
    let l2 = backend.constant(Value::scalar(4.0), None).unwrap();
    let total = aggregate_losses(&[l1, l2], &mut backend).unwrap();
    let single = aggregate_losses(&[l1], &mut backend).unwrap();

    let function = backend.function(&[], &[total, single], &[]).unwrap();
    let out = function.execute_positional(&mut backend, vec![]).unwrap();
    assert_eq!(out[0].to_scalar(), Some(7.0));
    assert_eq!(out[1].to_scalar(), Some(3.0));
    assert_eq!(single, l1);
}

#[test]
fn test_execute_override_precedence() {
    let mut backend = backend();
    let a = backend.placeholder("a", &[]).unwrap();
    let b = backend.placeholder("b", &[]).unwrap();
    let sum = backend.add(a, b, Some("sum")).unwrap();

    let function = backend
        .function(&[a, b], &[sum], &[])
        .unwrap()
        .with_default(a, Value::scalar(2.0))
        .unwrap()
        .with_default(b, Value::scalar(3.0))
        .unwrap();

    let defaults = function.execute(&mut backend, HashMap::new()).unwrap();
    assert_eq!(defaults[0].to_scalar(), Some(5.0));

    let overridden = function
        .execute(&mut backend, HashMap::from([(b, Value::scalar(20.0))]))
        .unwrap();
    assert_eq!(overridden[0].to_scalar(), Some(22.0));
}

#[test]
fn test_unresolved_input_is_reported() {
    let mut backend = backend();
    let a = backend.placeholder("a", &[]).unwrap();
    let doubled = backend.add(a, a, None).unwrap();
    let function = backend.function(&[a], &[doubled], &[]).unwrap();

    let err = function.execute(&mut backend, HashMap::new()).unwrap_err();
    assert!(matches!(err, ModelError::UnresolvedInput { .. }));
    assert_eq!(err.kind(), ErrorKind::Execution);

    // The backend stays usable after a data error.
    let out = function
        .execute_positional(&mut backend, vec![Value::scalar(1.5)])
        .unwrap();
    assert_eq!(out[0].to_scalar(), Some(3.0));
}

#[test]
fn test_row_count_mismatch_fails_before_training() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();

    let features = Value::from_rows(&vec![vec![1.0, 1.0]; 5]).unwrap();
    let targets = Value::from_rows(&vec![vec![1.0]; 4]).unwrap();
    let err = executable.train(&[features], &[targets], 1, 2).unwrap_err();
    assert!(matches!(err, ModelError::InvalidData { .. }));

    let iterations = backend.node("SGD_Iterations").unwrap();
    let counter = backend.read_variable(iterations).unwrap();
    assert_eq!(counter.as_i64().unwrap(), &[0]);
}

#[test]
fn test_zero_epochs_is_an_argument_error() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let (features, targets) = regression_data();

    let err = executable
        .train(&[features.clone()], &[targets.clone()], 0, 1)
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidArgument { argument: "epochs", .. }));
    assert_eq!(err.kind(), ErrorKind::Construction);

    let err = executable.train(&[features], &[targets], 1, 0).unwrap_err();
    assert!(matches!(err, ModelError::InvalidArgument { argument: "batch_size", .. }));
}

#[test]
fn test_training_reduces_convex_loss() {
    let model = linear_regression(0.001);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let (features, targets) = regression_data();

    let history = executable
        .train(&[features.clone()], &[targets.clone()], 5, 2)
        .unwrap();
    assert_eq!(history.loss_history.len(), 5);
    for pair in history.loss_history.windows(2) {
        assert!(pair[1] <= pair[0] + TOLERANCE, "loss increased: {:?}", pair);
    }

    // First epoch starts from zero weights: mean of (1^2, 2^2).
    assert!((history.loss_history[0] - 2.5).abs() < TOLERANCE);

    let after = executable
        .train_mini_batch(&[features.clone()], &[targets.clone()])
        .unwrap();
    assert_eq!(after.len(), 1);
    let after = after[0].mean().unwrap();
    assert!(after < history.loss_history[0]);

    let first = executable.predict(&[features.clone()]).unwrap();
    let second = executable.predict(&[features]).unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].shape(), &[2, 1]);
}

#[test]
fn test_binary_classifier_learns() {
    let mut layers = LayerGraph::new();
    let input = layers.input(Input::new(&[2]).unwrap()).unwrap();
    let output = layers
        .dense(deterministic_dense(1, Activation::Sigmoid), input)
        .unwrap();
    let model = Model::new(
        layers,
        vec![input],
        vec![output],
        vec![Loss::BinaryCrossEntropy],
        Sgd::new(0.5).unwrap(),
        vec![],
    )
    .unwrap();

    let features = Value::from_rows(&[
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ])
    .unwrap();
    let targets = Value::from_rows(&[vec![0.0], vec![1.0], vec![1.0], vec![1.0]]).unwrap();

    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let config = TrainingConfig::new().epochs(50).batch_size(4).verbose(false);
    let history = executable
        .train_with(&[features.clone()], &[targets], &config)
        .unwrap();

    let initial = history.loss_history[0];
    let last = history.final_loss().unwrap();
    assert!(last < initial, "loss did not decrease: {} -> {}", initial, last);

    let predictions = executable.predict(&[features]).unwrap();
    let values = predictions[0].to_f32_vec();
    assert!(values[0] < 0.5);
    assert!(values[3] > 0.5);
}

#[test]
fn test_momentum_training_runs() {
    let mut layers = LayerGraph::new();
    let input = layers.input(Input::new(&[2]).unwrap()).unwrap();
    let output = layers
        .dense(deterministic_dense(1, Activation::Linear), input)
        .unwrap();
    let sgd = Sgd::new(0.001).unwrap().with_momentum(0.9).unwrap();
    let model = Model::new(
        layers,
        vec![input],
        vec![output],
        vec![Loss::MeanSquaredError],
        sgd,
        vec![],
    )
    .unwrap();

    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let (features, targets) = regression_data();
    let history = executable.train(&[features], &[targets], 3, 1).unwrap();
    assert!(history.final_loss().unwrap() < history.loss_history[0]);

    let iterations = backend.node("SGD_Iterations").unwrap();
    assert_eq!(backend.read_variable(iterations).unwrap().as_i64().unwrap(), &[6]);
    let accumulator = backend.node("SGD_Momentum_0").unwrap();
    let velocity = backend.read_variable(accumulator).unwrap();
    assert!(velocity.to_f32_vec().iter().any(|v| *v != 0.0));
}

#[test]
fn test_shared_upstream_with_two_outputs() {
    let mut layers = LayerGraph::new();
    let input = layers.input(Input::new(&[3]).unwrap()).unwrap();
    let hidden = layers
        .dense(Dense::new(4).unwrap().with_activation(Activation::Relu), input)
        .unwrap();
    let first = layers
        .dense(Dense::new(1).unwrap().with_activation(Activation::Linear), hidden)
        .unwrap();
    let second = layers
        .dense(Dense::new(1).unwrap().with_activation(Activation::Linear), hidden)
        .unwrap();

    let model = Model::new(
        layers,
        vec![input],
        vec![first, second],
        vec![Loss::MeanSquaredError, Loss::MeanSquaredError],
        Sgd::default(),
        vec![],
    )
    .unwrap();

    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    assert_eq!(executable.backend().trainable_weights().len(), 6);
    assert_eq!(executable.targets().len(), 2);

    let features = Value::from_rows(&[vec![1.0, 0.0, 1.0], vec![0.0, 1.0, 0.0]]).unwrap();
    let a = Value::from_rows(&[vec![1.0], vec![0.0]]).unwrap();
    let b = Value::from_rows(&[vec![0.0], vec![1.0]]).unwrap();
    let losses = executable
        .train_mini_batch(&[features.clone()], &[a, b])
        .unwrap();
    assert_eq!(losses.len(), 2);
    assert!(losses.iter().all(|l| l.shape() == &[2]));

    let predictions = executable.predict(&[features]).unwrap();
    assert_eq!(predictions.len(), 2);
}

#[test]
fn test_evaluate_reports_losses_and_metrics() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let (features, targets) = regression_data();

    let evaluation = executable.evaluate(&[features], &[targets]).unwrap();
    // Zero weights predict zero: MSE is mean(1, 4), MAE is mean(1, 2).
    assert!((evaluation.losses[0] - 2.5).abs() < TOLERANCE);
    assert!((evaluation.metrics[0] - 1.5).abs() < TOLERANCE);
}

#[test]
fn test_partial_batch_policy() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let features = Value::from_rows(&vec![vec![1.0, 1.0]; 3]).unwrap();
    let targets = Value::from_rows(&vec![vec![1.0]; 3]).unwrap();

    let include = TrainingConfig::new().epochs(1).batch_size(2).verbose(false);
    executable
        .train_with(&[features.clone()], &[targets.clone()], &include)
        .unwrap();

    let drop_all = include.clone().batch_size(4).partial_batch(PartialBatch::Drop);
    let err = executable
        .train_with(&[features], &[targets], &drop_all)
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidData { .. }));

    let iterations = backend.node("SGD_Iterations").unwrap();
    assert_eq!(backend.read_variable(iterations).unwrap().as_i64().unwrap(), &[2]);
}

#[test]
fn test_named_placeholder_reuse() {
    let mut backend = backend();
    let first = backend.placeholder("X", &[-1, 3]).unwrap();
    let nodes = backend.len();
    let second = backend.placeholder("X", &[-1, 3]).unwrap();
    assert_eq!(first, second);
    assert_eq!(backend.len(), nodes);
    assert_eq!(backend.node("X"), Some(first));
}

#[test]
fn test_feed_dtype_and_shape_validation() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();

    let wrong_width = Value::from_rows(&[vec![1.0, 2.0, 3.0]]).unwrap();
    let err = executable.predict(&[wrong_width]).unwrap_err();
    assert!(matches!(err, ModelError::ShapeMismatch { .. }));

    let integers = Value::new_i64(vec![1, 2], vec![1, 2]).unwrap();
    let err = executable.predict(&[integers]).unwrap_err();
    assert!(matches!(err, ModelError::DTypeMismatch { .. }));

    let (features, _) = regression_data();
    assert!(executable.predict(&[features]).is_ok());
}

#[test]
fn test_empty_batch_is_rejected() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();

    let empty = Value::new(vec![0, 2], vec![]).unwrap();
    let err = executable.predict(&[empty.clone()]).unwrap_err();
    assert!(matches!(err, ModelError::InvalidData { .. }));
    assert_eq!(err.kind(), ErrorKind::Execution);

    let targets = Value::new(vec![0, 1], vec![]).unwrap();
    let err = executable.train_mini_batch(&[empty], &[targets]).unwrap_err();
    assert!(matches!(err, ModelError::InvalidData { .. }));

    let (features, _) = regression_data();
    assert!(executable.predict(&[features]).is_ok());
}

#[test]
fn test_dropout_only_applies_while_training() {
    let mut layers = LayerGraph::new();
    let input = layers.input(Input::new(&[100]).unwrap()).unwrap();
    let dropout = layers
        .dropout(Dropout::new(0.5).unwrap().with_seed(7), input)
        .unwrap();

    let mut backend = backend();
    let mut context = CompileContext::new(&backend);
    let x = context.compile(&layers, input, &mut backend).unwrap();
    let y = context.compile(&layers, dropout, &mut backend).unwrap();

    let ones = Value::full(vec![1, 100], 1.0);
    let inference = backend.function(&[x], &[y], &[]).unwrap();
    let out = inference
        .execute_positional(&mut backend, vec![ones.clone()])
        .unwrap();
    assert_eq!(out[0].to_f32_vec(), vec![1.0; 100]);

    let train = backend
        .function(&[x], &[y], &[])
        .unwrap()
        .with_phase(Phase::Train);
    let out = train.execute_positional(&mut backend, vec![ones]).unwrap();
    let values = out[0].to_f32_vec();
    assert!(values.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < TOLERANCE));
    assert!(values.iter().any(|v| *v == 0.0));
    assert!(values.iter().any(|v| *v > 0.0));
}

#[test]
fn test_dispose_invalidates_model() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();
    let (features, _) = regression_data();

    executable.dispose();
    executable.dispose();
    assert!(executable.is_disposed());

    let err = executable.predict(&[features]).unwrap_err();
    assert!(matches!(err, ModelError::Disposed));
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn test_summary_after_compile() {
    let model = linear_regression(0.01);
    let mut backend = backend();
    model.compile(&mut backend).unwrap();

    let summary = backend.summary();
    assert_eq!(summary.trainable_weights.len(), 2);
    assert_eq!(summary.count("GRADIENT"), 2);
    let json = backend.export_summary().unwrap();
    assert!(json.contains("SGD_Iterations"));
    assert!(json.contains("dense_1_Target"));
}

fn two_input_model() -> (Model, LayerId, LayerId) {
    let mut layers = LayerGraph::new();
    let left = layers.input(Input::new(&[1]).unwrap().with_name("left")).unwrap();
    let right = layers.input(Input::new(&[1]).unwrap().with_name("right")).unwrap();
    let a = layers
        .dense(deterministic_dense(1, Activation::Linear), left)
        .unwrap();
    let b = layers
        .dense(deterministic_dense(1, Activation::Linear), right)
        .unwrap();
    let model = Model::new(
        layers,
        vec![left, right],
        vec![a, b],
        vec![Loss::MeanSquaredError, Loss::MeanSquaredError],
        Sgd::default(),
        vec![],
    )
    .unwrap();
    (model, left, right)
}

#[test]
fn test_missing_model_input_rejected() {
    let mut layers = LayerGraph::new();
    let left = layers.input(Input::new(&[1]).unwrap()).unwrap();
    let right = layers.input(Input::new(&[1]).unwrap()).unwrap();
    let output = layers.dense(Dense::new(1).unwrap(), right).unwrap();
    let err = Model::new(
        layers,
        vec![left],
        vec![output],
        vec![Loss::MeanSquaredError],
        Sgd::default(),
        vec![],
    )
    .unwrap_err();
    assert!(matches!(err, ModelError::InvalidArgument { argument: "inputs", .. }));
}

#[test]
fn test_two_inputs_train_and_predict() {
    let (model, _, _) = two_input_model();
    let mut backend = backend();
    let mut executable = model.compile(&mut backend).unwrap();

    let left = Value::from_rows(&[vec![1.0], vec![2.0]]).unwrap();
    let right = Value::from_rows(&[vec![3.0], vec![4.0]]).unwrap();
    let targets = vec![
        Value::from_rows(&[vec![1.0], vec![1.0]]).unwrap(),
        Value::from_rows(&[vec![0.0], vec![0.0]]).unwrap(),
    ];

    let err = executable
        .train(&[left.clone()], &targets, 1, 1)
        .unwrap_err();
    assert!(matches!(err, ModelError::InvalidArgument { argument: "features", .. }));

    executable
        .train(&[left.clone(), right.clone()], &targets, 2, 2)
        .unwrap();
    let predictions = executable.predict(&[left, right]).unwrap();
    assert_eq!(predictions.len(), 2);
    // The second output only ever saw zero targets from zero weights.
    assert_eq!(predictions[1].to_f32_vec(), vec![0.0, 0.0]);
}
