//! Turntaker - turn-taking chat over byte-level sequence models
//!
//! A conversation is a stream of bytes with two control symbols marking
//! whose turn begins. The same encoding drives training windows, an
//! interactive session, and a timed live driver for chat threads.

pub mod config;
pub mod runtime;
pub mod samples;
pub mod session;
pub mod state_machine;
pub mod stepper;
pub mod trainer;
pub mod vocab;
