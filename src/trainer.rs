//! Model training
//!
//! Fits a [`ContextModel`] to the windows of a conversation corpus and
//! reports cost on a held-out hash split.

use crate::samples::{SampleError, SampleSet};
use crate::stepper::{ContextModel, ModelError};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("samples: {0}")]
    Samples(#[from] SampleError),
    #[error("model: {0}")]
    Model(#[from] ModelError),
    #[error("validation ratio must be in [0, 1), got {0}")]
    InvalidRatio(f64),
}

/// Knobs for one training run
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainOptions {
    /// Character budget for one training window
    pub max_chars: usize,
    /// Share of windows held out for validation
    pub validation_ratio: f64,
    /// Context length for a newly created model
    pub order: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            max_chars: 400,
            validation_ratio: 0.1,
            order: 4,
        }
    }
}

/// Outcome of a training run
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub training_examples: usize,
    pub validation_examples: usize,
    /// Mean cross entropy per step, `None` for an empty split
    pub training_cost: Option<f64>,
    pub validation_cost: Option<f64>,
    pub contexts: usize,
}

/// Continue from an existing model file, or start a new model
pub fn load_or_create(path: impl AsRef<Path>, order: usize) -> Result<ContextModel, ModelError> {
    let path = path.as_ref();
    match ContextModel::load(path) {
        Ok(model) => {
            tracing::info!(path = %path.display(), order = model.order(), "Loaded existing model");
            if model.order() != order {
                tracing::warn!(
                    requested = order,
                    order = model.order(),
                    "Keeping the order of the existing model"
                );
            }
            Ok(model)
        }
        Err(e) if e.is_not_found() => {
            tracing::info!(path = %path.display(), order, "Creating new model");
            ContextModel::new(order)
        }
        Err(e) => Err(e),
    }
}

/// Fit `model` on the training share of `samples`
pub fn train(
    model: &mut ContextModel,
    samples: SampleSet,
    validation_ratio: f64,
) -> Result<TrainReport, TrainError> {
    if !(0.0..1.0).contains(&validation_ratio) {
        return Err(TrainError::InvalidRatio(validation_ratio));
    }
    let (training, validation) = samples.hash_split(1.0 - validation_ratio);
    tracing::info!(
        training = training.len(),
        validation = validation.len(),
        "Split samples"
    );

    for example in training.examples() {
        model.fit(&example);
    }

    let report = TrainReport {
        training_examples: training.len(),
        validation_examples: validation.len(),
        training_cost: mean_cost(model, &training),
        validation_cost: mean_cost(model, &validation),
        contexts: model.context_count(),
    };
    tracing::info!(
        training_cost = ?report.training_cost,
        validation_cost = ?report.validation_cost,
        contexts = report.contexts,
        "Training finished"
    );
    Ok(report)
}

fn mean_cost(model: &ContextModel, samples: &SampleSet) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples.examples().map(|e| model.cost(&e)).sum();
    #[allow(clippy::cast_precision_loss)]
    let count = samples.len() as f64;
    Some(total / count)
}

/// Load samples, train, and save the model to `output`
pub fn run(
    samples_path: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: TrainOptions,
) -> Result<TrainReport, TrainError> {
    let samples_path = samples_path.as_ref();
    let output = output.as_ref();

    tracing::info!(path = %samples_path.display(), max_chars = options.max_chars, "Loading samples");
    let samples = SampleSet::load(samples_path, options.max_chars)?.non_empty()?;

    let mut model = load_or_create(output, options.order)?;
    let report = train(&mut model, samples, options.validation_ratio)?;

    model.save(output)?;
    tracing::info!(path = %output.display(), "Saved model");
    Ok(report)
}
