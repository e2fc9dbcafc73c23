//! Pure state transition function
//!
//! Every transition that changes phase also arms or cancels the deadline,
//! so a timer can never outlive the state that armed it.

use super::{Effect, Event, Phase, SessionState};
use crate::config::LiveConfig;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs, with no I/O.
pub fn transition(
    state: &SessionState,
    config: &LiveConfig,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let idle = Effect::arm(config.idle_timeout);
    let typing = Effect::arm(config.typing_delay);

    match (state.phase, event) {
        // ============================================================
        // Timers
        // ============================================================

        // Quiet for too long: the bot starts a turn of its own
        (Phase::AwaitingHuman, Event::TimerElapsed)
            if state.may_speak_unprompted(config.max_unprompted_turns) =>
        {
            Ok(TransitionResult::new(state.with_phase(Phase::BotTyping))
                .with_effect(Effect::typing_on())
                .with_effect(typing))
        }

        // Budget spent: wait for the human indefinitely
        (Phase::AwaitingHuman, Event::TimerElapsed) => {
            Ok(TransitionResult::new(*state).with_effect(Effect::CancelTimer))
        }

        (Phase::BotTyping, Event::TimerElapsed) => {
            Ok(TransitionResult::new(*state).with_effect(Effect::GenerateReply))
        }

        // ============================================================
        // Typing indicators
        // ============================================================
        (Phase::AwaitingHuman, Event::TypingStarted) => {
            Ok(TransitionResult::new(state.with_phase(Phase::HumanTyping))
                .with_effect(Effect::CancelTimer))
        }

        // The human interrupts the bot's turn
        (Phase::BotTyping, Event::TypingStarted) => {
            Ok(TransitionResult::new(state.with_phase(Phase::HumanTyping))
                .with_effect(Effect::typing_off())
                .with_effect(Effect::CancelTimer))
        }

        (Phase::HumanTyping, Event::TypingStopped) => {
            Ok(TransitionResult::new(state.with_phase(Phase::AwaitingHuman)).with_effect(idle))
        }

        (Phase::HumanTyping, Event::TypingStarted)
        | (Phase::AwaitingHuman | Phase::BotTyping, Event::TypingStopped) => {
            Ok(TransitionResult::new(*state))
        }

        // ============================================================
        // Human messages
        // ============================================================
        (Phase::AwaitingHuman | Phase::HumanTyping, Event::MessageReceived { text }) => {
            let new_state = SessionState {
                no_response_count: 0,
                ..*state
            };
            Ok(TransitionResult::new(new_state)
                .with_effect(Effect::MarkRead)
                .with_effect(Effect::FeedHumanMessage { text }))
        }

        (Phase::BotTyping, Event::MessageReceived { text }) => {
            Ok(TransitionResult::new(*state).with_effect(Effect::FeedHumanMessage { text }))
        }

        (Phase::AwaitingHuman | Phase::HumanTyping, Event::HumanMessageFed { more: true }) => {
            Ok(TransitionResult::new(state.with_phase(Phase::AwaitingHuman)).with_effect(idle))
        }

        (Phase::AwaitingHuman | Phase::HumanTyping, Event::HumanMessageFed { more: false }) => {
            Ok(TransitionResult::new(state.with_phase(Phase::BotTyping))
                .with_effects([Effect::typing_on(), typing]))
        }

        // The message settles it: the human has more to say
        (Phase::BotTyping, Event::HumanMessageFed { more: true }) => {
            Ok(TransitionResult::new(state.with_phase(Phase::AwaitingHuman))
                .with_effects([Effect::typing_off(), idle]))
        }

        // Still the bot's turn; it now has more context, so restart the delay
        (Phase::BotTyping, Event::HumanMessageFed { more: false }) => {
            Ok(TransitionResult::new(*state).with_effect(typing))
        }

        // ============================================================
        // Bot replies
        // ============================================================
        (Phase::BotTyping, Event::ReplyGenerated { body, more }) => {
            let counted = SessionState {
                no_response_count: state.no_response_count.saturating_add(1),
                ..*state
            };
            let result = TransitionResult::new(counted).with_effect(Effect::SendText { body });
            if more {
                Ok(result.with_effects([Effect::typing_on(), typing]))
            } else {
                Ok(TransitionResult {
                    new_state: counted.with_phase(Phase::AwaitingHuman),
                    ..result
                }
                .with_effects([Effect::typing_off(), idle]))
            }
        }

        // ============================================================
        // Invalid transitions
        // ============================================================
        (phase, event) => Err(TransitionError::InvalidTransition(format!(
            "{} in {}",
            event.kind(),
            phase.as_str()
        ))),
    }
}
