//! Training sample windowing
//!
//! Conversation logs are cut into bounded windows that end at every message.
//! Each window becomes a next-symbol example whose final target says who
//! speaks next, using the same control symbols the live session reads.

mod loader;

pub use loader::{load_conversations, read_conversation, read_conversation_file};

use crate::vocab::{EncodedVector, Symbol, VOCAB_SIZE};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::iter;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("record {record}: {reason}")]
    MalformedLogEntry { record: usize, reason: String },
    #[error("load {}: {source}", path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<SampleError>,
    },
    #[error("No samples loaded")]
    EmptySampleSet,
}

/// Who sent a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Speaker {
    Human,
    Bot,
}

impl Speaker {
    pub fn is_bot(self) -> bool {
        matches!(self, Speaker::Bot)
    }

    /// Control symbol that opens a turn by this speaker
    pub fn turn_symbol(self) -> Symbol {
        Symbol::turn_start(self.is_bot())
    }
}

/// One recorded chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub speaker: Speaker,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(speaker: Speaker, body: impl Into<Vec<u8>>) -> Self {
        Self {
            speaker,
            body: body.into(),
        }
    }

    pub fn human(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Speaker::Human, body)
    }

    pub fn bot(body: impl Into<Vec<u8>>) -> Self {
        Self::new(Speaker::Bot, body)
    }

    /// Body as text, replacing invalid UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A contiguous window of a conversation log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snippet {
    pub messages: Vec<Message>,
    /// The window ends at the last message of the log
    pub end_of_chat: bool,
    /// Speaker of the message following the window (meaningless at end of chat)
    pub next_speaker_is_bot: bool,
}

/// Build one snippet per message that fits in `max_chars`.
///
/// Windows grow backward from each message until the budget would reach
/// zero or an empty message is hit. Empty messages are never included.
pub fn build_snippets(log: &[Message], max_chars: usize) -> Vec<Snippet> {
    (0..log.len())
        .filter_map(|index| snippet_ending_at(log, index, max_chars))
        .collect()
}

fn snippet_ending_at(log: &[Message], index: usize, max_chars: usize) -> Option<Snippet> {
    let mut remaining = max_chars;
    let mut count = 0;
    for msg in log[..=index].iter().rev() {
        let len = msg.body.len();
        if len == 0 || len >= remaining {
            break;
        }
        remaining -= len;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(Snippet {
        messages: log[index + 1 - count..=index].to_vec(),
        end_of_chat: index + 1 == log.len(),
        next_speaker_is_bot: log.get(index + 1).is_some_and(|m| m.speaker.is_bot()),
    })
}

/// Input and target sequences of equal length
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingExample {
    pub inputs: Vec<EncodedVector>,
    pub targets: Vec<Vec<f64>>,
}

impl TrainingExample {
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Content hash over inputs and targets
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for input in &self.inputs {
            let code = input.decode().map_or(u16::MAX, Symbol::code);
            hasher.update(code.to_le_bytes());
        }
        for target in &self.targets {
            for mass in target {
                hasher.update(mass.to_le_bytes());
            }
        }
        hasher.finalize().into()
    }
}

/// Encode a snippet as a next-symbol training example
pub fn to_training_example(snippet: &Snippet) -> TrainingExample {
    let inputs: Vec<EncodedVector> = snippet
        .messages
        .iter()
        .flat_map(|msg| {
            iter::once(msg.speaker.turn_symbol()).chain(msg.body.iter().copied().map(Symbol::byte))
        })
        .map(Symbol::one_hot)
        .collect();

    let mut targets: Vec<Vec<f64>> = inputs
        .iter()
        .skip(1)
        .map(|v| v.as_slice().to_vec())
        .collect();
    targets.push(final_target(snippet));

    TrainingExample { inputs, targets }
}

fn final_target(snippet: &Snippet) -> Vec<f64> {
    if snippet.end_of_chat {
        let mut target = vec![0.0; VOCAB_SIZE];
        target[Symbol::BEGIN_EXTERNAL_TURN.index()] = 0.5;
        target[Symbol::BEGIN_BOT_TURN.index()] = 0.5;
        target
    } else {
        Symbol::turn_start(snippet.next_speaker_is_bot)
            .one_hot()
            .as_slice()
            .to_vec()
    }
}

/// Snippets drawn from one or more conversation logs
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    snippets: Vec<Snippet>,
}

impl SampleSet {
    pub fn from_logs(logs: &[Vec<Message>], max_chars: usize) -> Self {
        let snippets = logs
            .iter()
            .flat_map(|log| build_snippets(log, max_chars))
            .collect();
        Self { snippets }
    }

    /// Load a single conversation file or a directory of them
    pub fn load(path: impl AsRef<Path>, max_chars: usize) -> Result<Self, SampleError> {
        let logs = load_conversations(path)?;
        Ok(Self::from_logs(&logs, max_chars))
    }

    /// Load the contents of one conversation file
    pub fn from_reader(reader: impl Read, max_chars: usize) -> Result<Self, SampleError> {
        let log = read_conversation(reader)?;
        Ok(Self::from_logs(&[log], max_chars))
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Fail with [`SampleError::EmptySampleSet`] when nothing was produced
    pub fn non_empty(self) -> Result<Self, SampleError> {
        if self.is_empty() {
            Err(SampleError::EmptySampleSet)
        } else {
            Ok(self)
        }
    }

    pub fn snippets(&self) -> &[Snippet] {
        &self.snippets
    }

    pub fn example(&self, index: usize) -> Option<TrainingExample> {
        self.snippets.get(index).map(to_training_example)
    }

    pub fn examples(&self) -> impl Iterator<Item = TrainingExample> + '_ {
        self.snippets.iter().map(to_training_example)
    }

    /// Partition by example hash.
    ///
    /// An example lands in the first set when its hash falls in the lowest
    /// `ratio` share of the hash space, so assignment does not depend on
    /// which other samples are present.
    pub fn hash_split(self, ratio: f64) -> (SampleSet, SampleSet) {
        let (first, second) = self
            .snippets
            .into_iter()
            .partition(|snippet| hash_fraction(&to_training_example(snippet)) < ratio);
        (SampleSet { snippets: first }, SampleSet { snippets: second })
    }
}

#[allow(clippy::cast_precision_loss)]
fn hash_fraction(example: &TrainingExample) -> f64 {
    let digest = example.digest();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head) as f64 / u64::MAX as f64
}
