//! Symbol vocabulary shared by training and inference
//!
//! The alphabet is every raw byte plus two control symbols marking the start
//! of a turn. Training targets and live turn decisions both index into this
//! same space, so the constants here are the protocol.

use thiserror::Error;

/// Number of raw byte symbols
pub const BYTE_COUNT: usize = 256;

/// Number of control symbols
pub const CONTROL_COUNT: usize = 2;

/// Width of every encoded vector and log-probability vector
pub const VOCAB_SIZE: usize = BYTE_COUNT + CONTROL_COUNT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VocabError {
    #[error("Invalid symbol index {0} (vocabulary has 258 symbols)")]
    InvalidSymbol(usize),
}

/// One entry of the vocabulary, stored as its index in `[0, VOCAB_SIZE)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u16);

impl Symbol {
    /// Marks the start of a turn by the external (human) speaker
    pub const BEGIN_EXTERNAL_TURN: Symbol = Symbol(256);
    /// Marks the start of a turn by the bot
    pub const BEGIN_BOT_TURN: Symbol = Symbol(257);

    /// Validate a raw index
    pub fn new(index: usize) -> Result<Self, VocabError> {
        match u16::try_from(index) {
            Ok(code) if index < VOCAB_SIZE => Ok(Symbol(code)),
            _ => Err(VocabError::InvalidSymbol(index)),
        }
    }

    pub fn byte(b: u8) -> Self {
        Symbol(u16::from(b))
    }

    /// Control symbol that opens a turn for the given speaker
    pub fn turn_start(from_bot: bool) -> Self {
        if from_bot {
            Self::BEGIN_BOT_TURN
        } else {
            Self::BEGIN_EXTERNAL_TURN
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.0)
    }

    /// Compact code, identical to `index` but sized for storage
    pub fn code(self) -> u16 {
        self.0
    }

    pub fn is_control(self) -> bool {
        self.index() >= BYTE_COUNT
    }

    /// The raw byte, or `None` for control symbols
    pub fn as_byte(self) -> Option<u8> {
        u8::try_from(self.0).ok()
    }

    /// One-hot projection of this symbol
    pub fn one_hot(self) -> EncodedVector {
        let mut values = vec![0.0; VOCAB_SIZE];
        values[self.index()] = 1.0;
        EncodedVector(values)
    }
}

/// A one-hot vector over the vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedVector(Vec<f64>);

impl EncodedVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Recover the symbol whose component is set.
    ///
    /// Returns `None` when the vector is not one-hot.
    pub fn decode(&self) -> Option<Symbol> {
        let mut hot = self
            .0
            .iter()
            .enumerate()
            .filter(|(_, v)| **v != 0.0);
        let (index, value) = hot.next()?;
        if hot.next().is_some() || (*value - 1.0).abs() > f64::EPSILON {
            return None;
        }
        Symbol::new(index).ok()
    }
}

/// Encode a raw symbol index as a one-hot vector
pub fn encode(index: usize) -> Result<EncodedVector, VocabError> {
    Symbol::new(index).map(Symbol::one_hot)
}
