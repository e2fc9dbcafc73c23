//! Conversation session over a sequence stepper
//!
//! A `Chat` feeds turns into its stepper and reads the two control-symbol
//! log-probabilities to decide who speaks next. The same decision rule
//! produced the training targets in `samples`.

use crate::config::{SessionConfig, StopRule};
use crate::samples::{Message, Speaker};
use crate::stepper::SequenceStepper;
use crate::vocab::{Symbol, BYTE_COUNT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A message generated by the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub body: Vec<u8>,
    /// The bot wants to send another message right after this one
    pub more: bool,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Stateful conversation between an external speaker and the bot.
///
/// Owns the stepper, so hidden state is never shared between conversations.
pub struct Chat<S, R = StdRng> {
    stepper: S,
    rng: R,
    config: SessionConfig,
}

impl<S: SequenceStepper> Chat<S, StdRng> {
    pub fn new(stepper: S) -> Self {
        Self::with_rng(stepper, StdRng::from_entropy())
    }

    /// Deterministic sampling for reproducible conversations
    pub fn seeded(stepper: S, seed: u64) -> Self {
        Self::with_rng(stepper, StdRng::seed_from_u64(seed))
    }
}

impl<S: SequenceStepper, R: Rng> Chat<S, R> {
    pub fn with_rng(stepper: S, rng: R) -> Self {
        Self {
            stepper,
            rng,
            config: SessionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Feed a message from the external speaker.
    ///
    /// Returns true if the human is expected to send more before the bot
    /// replies.
    pub fn send(&mut self, text: impl AsRef<[u8]>) -> bool {
        let out = self.feed_turn(Symbol::BEGIN_EXTERNAL_TURN, text.as_ref());
        log_prob(&out, Symbol::BEGIN_BOT_TURN) < log_prob(&out, Symbol::BEGIN_EXTERNAL_TURN)
    }

    /// Tell the bot it sent `text` (used when replaying history).
    ///
    /// Returns true if the bot is expected to send another message.
    pub fn receive_message(&mut self, text: impl AsRef<[u8]>) -> bool {
        let out = self.feed_turn(Symbol::BEGIN_BOT_TURN, text.as_ref());
        log_prob(&out, Symbol::BEGIN_BOT_TURN) > log_prob(&out, Symbol::BEGIN_EXTERNAL_TURN)
    }

    /// Generate one bot message
    pub fn receive(&mut self) -> Reply {
        match self.config.stop_rule {
            StopRule::SeparateDraw => self.receive_separate_draw(),
            StopRule::SingleDraw => self.receive_single_draw(),
        }
    }

    /// Rebuild hidden state from past messages without generating anything.
    ///
    /// Messages with empty bodies are skipped. Returns true if the bot
    /// would speak next.
    pub fn replay(&mut self, history: &[Message]) -> bool {
        let mut bot_next = false;
        for msg in history.iter().filter(|m| !m.body.is_empty()) {
            bot_next = match msg.speaker {
                Speaker::Human => !self.send(&msg.body),
                Speaker::Bot => self.receive_message(&msg.body),
            };
        }
        tracing::debug!(messages = history.len(), bot_next, "Replayed history");
        bot_next
    }

    fn feed_turn(&mut self, start: Symbol, text: &[u8]) -> Vec<f64> {
        let mut out = self.step(start);
        for &b in text {
            out = self.step(Symbol::byte(b));
        }
        out
    }

    fn step(&mut self, symbol: Symbol) -> Vec<f64> {
        self.stepper.step(&symbol.one_hot())
    }

    fn receive_separate_draw(&mut self) -> Reply {
        let mut out = self.step(Symbol::BEGIN_BOT_TURN);
        let mut body = Vec::new();
        loop {
            let b = match self.sample_body_byte(&out) {
                Ok(b) => b,
                Err(more) => return Reply { body, more },
            };
            body.push(b);
            out = self.step(Symbol::byte(b));
            if body.len() >= self.config.max_reply_bytes {
                return Reply { body, more: false };
            }
            // The stop decision is its own draw; a byte drawn here is discarded.
            let drawn = sample_index(&out, &mut self.rng);
            if drawn >= BYTE_COUNT {
                let more = drawn == Symbol::BEGIN_BOT_TURN.index();
                return Reply { body, more };
            }
        }
    }

    fn receive_single_draw(&mut self) -> Reply {
        let out = self.step(Symbol::BEGIN_BOT_TURN);
        let mut body = Vec::new();
        let mut b = match self.sample_body_byte(&out) {
            Ok(b) => b,
            Err(more) => return Reply { body, more },
        };
        loop {
            body.push(b);
            let out = self.step(Symbol::byte(b));
            if body.len() >= self.config.max_reply_bytes {
                return Reply { body, more: false };
            }
            let drawn = sample_index(&out, &mut self.rng);
            match Symbol::new(drawn).ok().and_then(Symbol::as_byte) {
                Some(next) => b = next,
                None => {
                    let more = drawn == Symbol::BEGIN_BOT_TURN.index();
                    return Reply { body, more };
                }
            }
        }
    }

    /// Draw a byte with control symbols masked out.
    ///
    /// When no byte has probability the turn ends instead, and the error
    /// carries `more` from an unmasked draw.
    fn sample_body_byte(&mut self, out: &[f64]) -> Result<u8, bool> {
        // Control symbols sit after the bytes, so the byte prefix is the masked distribution.
        let bytes = out.get(..BYTE_COUNT).unwrap_or(out);
        match sample_masked_index(bytes, &mut self.rng).and_then(|i| u8::try_from(i).ok()) {
            Some(b) => Ok(b),
            None => Err(sample_index(out, &mut self.rng) == Symbol::BEGIN_BOT_TURN.index()),
        }
    }
}

fn log_prob(out: &[f64], symbol: Symbol) -> f64 {
    out.get(symbol.index()).copied().unwrap_or(f64::NEG_INFINITY)
}

/// Inversion sampling over a vector of natural-log probabilities.
///
/// Walks indices in order subtracting each probability from a uniform draw.
/// If rounding leaves mass unused, the last index is returned, which is also
/// where malformed vectors end up.
pub fn sample_index(log_probs: &[f64], rng: &mut impl Rng) -> usize {
    let mut remaining: f64 = rng.gen();
    for (i, log_p) in log_probs.iter().enumerate() {
        remaining -= log_p.exp();
        if remaining < 0.0 {
            return i;
        }
    }
    log_probs.len().saturating_sub(1)
}

/// Inversion sampling renormalized over a truncated distribution.
///
/// Only indices with positive probability can be returned. `None` when the
/// slice holds no usable mass.
fn sample_masked_index(log_probs: &[f64], rng: &mut impl Rng) -> Option<usize> {
    let mass: f64 = log_probs.iter().map(|p| p.exp()).filter(|p| *p > 0.0).sum();
    if !(mass.is_finite() && mass > 0.0) {
        return None;
    }
    let mut remaining = rng.gen::<f64>() * mass;
    let mut last = None;
    for (i, log_p) in log_probs.iter().enumerate() {
        let p = log_p.exp();
        if p.is_nan() || p <= 0.0 {
            continue;
        }
        last = Some(i);
        remaining -= p;
        if remaining < 0.0 {
            return last;
        }
    }
    last
}
