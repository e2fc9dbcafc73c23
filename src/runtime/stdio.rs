//! JSON-lines transport for the `live` command
//!
//! Inbound, one object per line:
//! `{"type":"message","thread":"t1","text":"hi"}`,
//! `{"type":"typing_started","thread":"t1"}` or
//! `{"type":"typing_stopped","thread":"t1"}`.
//! Outbound actions use the same shape with types `text`, `typing` and `read`.

use super::traits::{EventSource, HistorySource, InboundEvent, InboundKind, Outbound};
use super::LiveError;
use crate::samples::{read_conversation, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Message {
        thread: String,
        #[serde(default)]
        text: String,
    },
    TypingStarted {
        thread: String,
    },
    TypingStopped {
        thread: String,
    },
}

impl From<WireEvent> for InboundEvent {
    fn from(event: WireEvent) -> Self {
        match event {
            WireEvent::Message { thread, text } => InboundEvent::message(thread, text),
            WireEvent::TypingStarted { thread } => InboundEvent {
                thread_id: thread,
                kind: InboundKind::TypingStarted,
            },
            WireEvent::TypingStopped { thread } => InboundEvent {
                thread_id: thread,
                kind: InboundKind::TypingStopped,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireAction<'a> {
    Text { thread: &'a str, text: &'a str },
    Typing { thread: &'a str, on: bool },
    Read { thread: &'a str },
}

/// Inbound events parsed from JSON lines
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, LiveError> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| LiveError::EventSource(e.to_string()))?;
            let Some(line) = line else {
                return Ok(None);
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<WireEvent>(&line) {
                Ok(event) => return Ok(Some(event.into())),
                Err(e) => tracing::warn!(error = %e, "Skipping malformed event line"),
            }
        }
    }
}

/// Outbound actions written as JSON lines
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    async fn write(&self, action: &WireAction<'_>) -> Result<(), String> {
        let mut line = serde_json::to_vec(action).map_err(|e| e.to_string())?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await.map_err(|e| e.to_string())?;
        writer.flush().await.map_err(|e| e.to_string())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> Outbound for JsonLinesSink<W> {
    async fn send_text(&self, thread_id: &str, text: &str) -> Result<(), String> {
        self.write(&WireAction::Text {
            thread: thread_id,
            text,
        })
        .await
    }

    async fn send_typing(&self, thread_id: &str, on: bool) -> Result<(), String> {
        self.write(&WireAction::Typing {
            thread: thread_id,
            on,
        })
        .await
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), String> {
        self.write(&WireAction::Read { thread: thread_id }).await
    }
}

/// History stored as `<thread>.csv` conversation files in one directory
#[derive(Debug, Clone, Default)]
pub struct CsvHistoryDir {
    dir: Option<PathBuf>,
}

impl CsvHistoryDir {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }
}

/// Thread ids that are safe to use as a file stem
fn is_plain_name(thread_id: &str) -> bool {
    !thread_id.is_empty()
        && !thread_id.starts_with('.')
        && thread_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[async_trait]
impl HistorySource for CsvHistoryDir {
    async fn history(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>, LiveError> {
        let Some(dir) = &self.dir else {
            return Ok(Vec::new());
        };
        if !is_plain_name(thread_id) {
            tracing::warn!(thread_id = %thread_id, "Thread id is not a file name, starting without history");
            return Ok(Vec::new());
        }

        let path = dir.join(format!("{thread_id}.csv"));
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LiveError::History {
                    thread: thread_id.to_string(),
                    message: e.to_string(),
                })
            }
        };

        let mut log = read_conversation(data.as_slice()).map_err(|e| LiveError::History {
            thread: thread_id.to_string(),
            message: e.to_string(),
        })?;
        let skip = log.len().saturating_sub(limit);
        log.drain(..skip);
        Ok(log)
    }
}
