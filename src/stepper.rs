//! Sequence stepper abstraction
//!
//! A stepper consumes one encoded symbol per call and returns log-probabilities
//! over the vocabulary for the next symbol. It carries hidden state between
//! calls, so each conversation owns its own instance.

mod context_model;

pub use context_model::{ContextModel, ContextStepper, ModelError};

use crate::vocab::EncodedVector;

/// Stateful one-step-at-a-time model interface
pub trait SequenceStepper {
    /// Advance by one time step.
    ///
    /// The returned vector has `VOCAB_SIZE` entries of natural-log
    /// probabilities. Callers must feed exactly one vector per step, in order.
    fn step(&mut self, input: &EncodedVector) -> Vec<f64>;
}

impl<T: SequenceStepper + ?Sized> SequenceStepper for Box<T> {
    fn step(&mut self, input: &EncodedVector) -> Vec<f64> {
        (**self).step(input)
    }
}

/// Shared, immutable trained parameters that mint fresh steppers
///
/// Implementations are typically an `Arc` around the parameters so every
/// stepper can read them without copying.
pub trait StepperFactory: Send + Sync {
    type Stepper: SequenceStepper + Send + 'static;

    /// A stepper with empty hidden state
    fn new_stepper(&self) -> Self::Stepper;
}
