//! Events that can occur in a live conversation

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    // Inbound events
    MessageReceived {
        text: Vec<u8>,
    },
    TypingStarted,
    TypingStopped,

    /// The deadline armed on the last state entry passed
    TimerElapsed,

    // Session results
    /// `send` finished; `more` means the human is expected to keep talking
    HumanMessageFed {
        more: bool,
    },
    /// `receive` produced a message; `more` means the bot wants another turn
    ReplyGenerated {
        body: Vec<u8>,
        more: bool,
    },
}

impl Event {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Event::MessageReceived { .. } => "message_received",
            Event::TypingStarted => "typing_started",
            Event::TypingStopped => "typing_stopped",
            Event::TimerElapsed => "timer_elapsed",
            Event::HumanMessageFed { .. } => "human_message_fed",
            Event::ReplyGenerated { .. } => "reply_generated",
        }
    }
}
