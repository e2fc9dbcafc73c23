//! Live session state types

/// Whose move it is in a live conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Phase {
    /// Nobody is typing; the bot may speak unprompted after the idle timeout
    #[default]
    AwaitingHuman,
    /// The human is typing; no timer runs
    HumanTyping,
    /// The bot shows a typing indicator and will send after the typing delay
    BotTyping,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::AwaitingHuman => "awaiting_human",
            Phase::HumanTyping => "human_typing",
            Phase::BotTyping => "bot_typing",
        }
    }
}

/// Machine state for one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionState {
    pub phase: Phase,
    /// Bot messages sent since the human last wrote
    pub no_response_count: u32,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_phase(self, phase: Phase) -> Self {
        Self { phase, ..self }
    }

    /// Whether the bot may still start a turn without being prompted
    pub fn may_speak_unprompted(&self, max_unprompted_turns: u32) -> bool {
        self.no_response_count < max_unprompted_turns
    }
}
