//! Live session state machine
//!
//! Pure transitions in the Elm Architecture style: the executor feeds events
//! in, applies the returned effects, and routes session results back as
//! events.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::Event;
pub use state::{Phase, SessionState};
pub use transition::{transition, TransitionError, TransitionResult};
