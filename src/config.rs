//! Runtime configuration
//!
//! Values come from `TURNTAKER_*` environment variables, falling back to the
//! defaults the live driver has always used.

use std::time::Duration;

/// How generation decides to end a bot message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopRule {
    /// Pick each body byte with control symbols masked, then draw once more
    /// from the unmasked output to decide whether the turn ends.
    #[default]
    SeparateDraw,
    /// Only the first byte is forced; every later unmasked draw either
    /// emits a byte or ends the turn.
    SingleDraw,
}

impl StopRule {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "separate" | "separate_draw" => Some(StopRule::SeparateDraw),
            "single" | "single_draw" => Some(StopRule::SingleDraw),
            _ => None,
        }
    }
}

/// Per-session generation settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub stop_rule: StopRule,
    /// Longest message `receive` will generate before forcing the turn over
    pub max_reply_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_rule: StopRule::default(),
            max_reply_bytes: 2048,
        }
    }
}

/// Live session timing and queueing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// How long the bot waits for a human before speaking unprompted
    pub idle_timeout: Duration,
    /// How long the bot shows a typing indicator before sending
    pub typing_delay: Duration,
    /// Unprompted bot turns allowed before waiting indefinitely
    pub max_unprompted_turns: u32,
    /// Per-thread event queue capacity
    pub event_backlog: usize,
    /// Messages of history replayed when a thread starts
    pub history_limit: usize,
    /// Text fed to the session for messages without a body (attachments)
    pub attachment_placeholder: String,
    pub session: SessionConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(20),
            typing_delay: Duration::from_secs(10),
            max_unprompted_turns: 3,
            event_backlog: 10,
            history_limit: 20,
            attachment_placeholder: "attachment".to_string(),
            session: SessionConfig::default(),
        }
    }
}

impl LiveConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unparsable values keep defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        Self {
            idle_timeout: parsed("TURNTAKER_IDLE_TIMEOUT_SECS")
                .map_or(defaults.idle_timeout, Duration::from_secs),
            typing_delay: parsed("TURNTAKER_TYPING_DELAY_SECS")
                .map_or(defaults.typing_delay, Duration::from_secs),
            max_unprompted_turns: parsed("TURNTAKER_MAX_UNPROMPTED")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.max_unprompted_turns),
            event_backlog: parsed("TURNTAKER_EVENT_BACKLOG")
                .and_then(|v| usize::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.event_backlog),
            history_limit: parsed("TURNTAKER_HISTORY_LIMIT")
                .and_then(|v| usize::try_from(v).ok())
                .unwrap_or(defaults.history_limit),
            attachment_placeholder: lookup("TURNTAKER_ATTACHMENT_TEXT")
                .unwrap_or(defaults.attachment_placeholder),
            session: SessionConfig {
                stop_rule: lookup("TURNTAKER_STOP_RULE")
                    .and_then(|v| StopRule::parse(v.trim()))
                    .unwrap_or(defaults.session.stop_rule),
                max_reply_bytes: parsed("TURNTAKER_MAX_REPLY_BYTES")
                    .and_then(|v| usize::try_from(v).ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(defaults.session.max_reply_bytes),
            },
        }
    }
}
