//! Conversation log files
//!
//! A conversation file is CSV with two columns per record: the sender
//! (`bot` or `human`) and the message body.

use super::{Message, SampleError, Speaker};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Parse one conversation from CSV records
pub fn read_conversation(reader: impl Read) -> Result<Vec<Message>, SampleError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut log = Vec::new();
    for (record_index, record) in csv_reader.byte_records().enumerate() {
        let record = record?;
        if record.len() != 2 {
            return Err(SampleError::MalformedLogEntry {
                record: record_index,
                reason: format!("expected exactly two columns, found {}", record.len()),
            });
        }
        let speaker = match &record[0] {
            b"bot" => Speaker::Bot,
            b"human" => Speaker::Human,
            other => {
                return Err(SampleError::MalformedLogEntry {
                    record: record_index,
                    reason: format!("unknown sender {}", String::from_utf8_lossy(other)),
                })
            }
        };
        log.push(Message::new(speaker, &record[1]));
    }
    Ok(log)
}

pub fn read_conversation_file(path: impl AsRef<Path>) -> Result<Vec<Message>, SampleError> {
    let file = File::open(path)?;
    read_conversation(file)
}

/// Load one conversation file, or every visible file in a directory.
///
/// Directory entries are read in sorted-name order so repeated loads see
/// conversations in the same order.
pub fn load_conversations(path: impl AsRef<Path>) -> Result<Vec<Vec<Message>>, SampleError> {
    let path = path.as_ref();
    if !std::fs::metadata(path)?.is_dir() {
        return Ok(vec![read_conversation_file(path)?]);
    }

    let mut entries: Vec<PathBuf> = std::fs::read_dir(path)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.retain(|p| {
        p.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| !n.starts_with('.'))
    });
    entries.sort();

    let mut logs = Vec::with_capacity(entries.len());
    for entry in entries {
        let log = read_conversation_file(&entry).map_err(|e| SampleError::InFile {
            path: entry.clone(),
            source: Box::new(e),
        })?;
        tracing::debug!(path = %entry.display(), messages = log.len(), "Loaded conversation");
        logs.push(log);
    }
    Ok(logs)
}
