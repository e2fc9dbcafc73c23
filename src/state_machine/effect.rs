//! Effects produced by state transitions

use std::time::Duration;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a read receipt for the thread
    MarkRead,

    /// Show or hide the bot's typing indicator
    SendTyping { on: bool },

    /// Deliver a generated message
    SendText { body: Vec<u8> },

    /// Feed a human message into the session (yields `HumanMessageFed`)
    FeedHumanMessage { text: Vec<u8> },

    /// Generate a bot message (yields `ReplyGenerated`)
    GenerateReply,

    /// Replace any pending deadline with one `delay` from now
    ArmTimer { delay: Duration },

    /// Drop any pending deadline
    CancelTimer,
}

impl Effect {
    pub fn typing_on() -> Self {
        Effect::SendTyping { on: true }
    }

    pub fn typing_off() -> Self {
        Effect::SendTyping { on: false }
    }

    pub fn arm(delay: Duration) -> Self {
        Effect::ArmTimer { delay }
    }

    /// True for effects that touch the deadline
    pub fn is_timer(&self) -> bool {
        matches!(self, Effect::ArmTimer { .. } | Effect::CancelTimer)
    }
}
