//! Smoothed byte-context count model
//!
//! A reference stepper: next-symbol distributions are additive-smoothed
//! counts conditioned on the longest previously seen suffix of the last
//! `order` symbols. It learns from the same next-symbol examples a
//! neural stepper would, which keeps the CLI usable end to end.

use super::{SequenceStepper, StepperFactory};
use crate::samples::TrainingExample;
use crate::vocab::{EncodedVector, VOCAB_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Largest supported context length
pub const MAX_ORDER: usize = 16;

const DEFAULT_SMOOTHING: f64 = 0.05;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Context order {0} out of range (1..=16)")]
    InvalidOrder(usize),
    #[error("Corrupt model: {0}")]
    Corrupt(String),
}

impl ModelError {
    /// True when the model file simply does not exist yet
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Count tables keyed by context suffix
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "ModelFile", try_from = "ModelFile")]
pub struct ContextModel {
    order: usize,
    smoothing: f64,
    tables: HashMap<Vec<u16>, Vec<f64>>,
}

impl ContextModel {
    pub fn new(order: usize) -> Result<Self, ModelError> {
        if order == 0 || order > MAX_ORDER {
            return Err(ModelError::InvalidOrder(order));
        }
        Ok(Self {
            order,
            smoothing: DEFAULT_SMOOTHING,
            tables: HashMap::new(),
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of distinct contexts with recorded counts
    pub fn context_count(&self) -> usize {
        self.tables.len()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let data = serde_json::to_vec(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Add target mass for every suffix of `context` up to `order` symbols
    pub fn observe(&mut self, context: &[u16], target: &[f64]) {
        let longest = context.len().min(self.order);
        for k in 0..=longest {
            let key = &context[context.len() - k..];
            let counts = self
                .tables
                .entry(key.to_vec())
                .or_insert_with(|| vec![0.0; VOCAB_SIZE]);
            for (count, mass) in counts.iter_mut().zip(target) {
                *count += mass;
            }
        }
    }

    /// Accumulate one next-symbol example
    pub fn fit(&mut self, example: &TrainingExample) {
        let mut history: Vec<u16> = Vec::with_capacity(example.len());
        for (input, target) in example.inputs.iter().zip(&example.targets) {
            let Some(symbol) = input.decode() else {
                history.clear();
                continue;
            };
            history.push(symbol.code());
            let start = history.len().saturating_sub(self.order);
            self.observe(&history[start..], target);
        }
    }

    /// Log-probabilities of the next symbol after `context`
    pub fn log_probs(&self, context: &[u16]) -> Vec<f64> {
        let longest = context.len().min(self.order);
        for k in (0..=longest).rev() {
            if let Some(counts) = self.tables.get(&context[context.len() - k..]) {
                return self.smoothed(counts);
            }
        }
        #[allow(clippy::cast_precision_loss)]
        let uniform = -(VOCAB_SIZE as f64).ln();
        vec![uniform; VOCAB_SIZE]
    }

    /// Mean per-step cross entropy of `example` under this model
    pub fn cost(&self, example: &TrainingExample) -> f64 {
        let mut history: Vec<u16> = Vec::with_capacity(example.len());
        let mut total = 0.0;
        for (input, target) in example.inputs.iter().zip(&example.targets) {
            if let Some(symbol) = input.decode() {
                history.push(symbol.code());
            }
            let start = history.len().saturating_sub(self.order);
            let predicted = self.log_probs(&history[start..]);
            total -= target
                .iter()
                .zip(&predicted)
                .filter(|(mass, _)| **mass > 0.0)
                .map(|(mass, log_p)| mass * log_p)
                .sum::<f64>();
        }
        if example.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let steps = example.len() as f64;
            total / steps
        }
    }

    fn smoothed(&self, counts: &[f64]) -> Vec<f64> {
        #[allow(clippy::cast_precision_loss)]
        let denom = counts.iter().sum::<f64>() + self.smoothing * VOCAB_SIZE as f64;
        counts
            .iter()
            .map(|c| ((c + self.smoothing) / denom).ln())
            .collect()
    }
}

impl StepperFactory for Arc<ContextModel> {
    type Stepper = ContextStepper;

    fn new_stepper(&self) -> ContextStepper {
        ContextStepper {
            model: Arc::clone(self),
            history: VecDeque::with_capacity(self.order),
        }
    }
}

/// Per-conversation view over a shared [`ContextModel`]
pub struct ContextStepper {
    model: Arc<ContextModel>,
    history: VecDeque<u16>,
}

impl SequenceStepper for ContextStepper {
    fn step(&mut self, input: &EncodedVector) -> Vec<f64> {
        match input.decode() {
            Some(symbol) => {
                if self.history.len() == self.model.order {
                    self.history.pop_front();
                }
                self.history.push_back(symbol.code());
            }
            None => self.history.clear(),
        }
        self.model.log_probs(self.history.make_contiguous())
    }
}

// ============================================================================
// On-disk representation
// ============================================================================

#[derive(Serialize, Deserialize)]
struct ModelFile {
    order: usize,
    smoothing: f64,
    contexts: Vec<ContextCounts>,
}

/// Sparse counts for one context
#[derive(Serialize, Deserialize)]
struct ContextCounts {
    context: Vec<u16>,
    counts: Vec<(u16, f64)>,
}

impl From<ContextModel> for ModelFile {
    fn from(model: ContextModel) -> Self {
        let mut contexts: Vec<ContextCounts> = model
            .tables
            .into_iter()
            .map(|(context, counts)| ContextCounts {
                context,
                counts: counts
                    .into_iter()
                    .enumerate()
                    .filter(|(_, c)| *c > 0.0)
                    .filter_map(|(i, c)| u16::try_from(i).ok().map(|i| (i, c)))
                    .collect(),
            })
            .collect();
        contexts.sort_by(|a, b| a.context.cmp(&b.context));
        ModelFile {
            order: model.order,
            smoothing: model.smoothing,
            contexts,
        }
    }
}

impl TryFrom<ModelFile> for ContextModel {
    type Error = ModelError;

    fn try_from(file: ModelFile) -> Result<Self, Self::Error> {
        let mut model = ContextModel::new(file.order)?;
        if file.smoothing <= 0.0 || !file.smoothing.is_finite() {
            return Err(ModelError::Corrupt(format!(
                "smoothing must be positive, got {}",
                file.smoothing
            )));
        }
        model.smoothing = file.smoothing;
        for entry in file.contexts {
            if entry.context.len() > file.order {
                return Err(ModelError::Corrupt(format!(
                    "context of length {} exceeds order {}",
                    entry.context.len(),
                    file.order
                )));
            }
            let mut counts = vec![0.0; VOCAB_SIZE];
            for (index, count) in entry.counts {
                let slot = counts
                    .get_mut(usize::from(index))
                    .ok_or_else(|| ModelError::Corrupt(format!("symbol {index} out of range")))?;
                *slot = count;
            }
            model.tables.insert(entry.context, counts);
        }
        Ok(model)
    }
}
