//! Trait abstractions for live I/O
//!
//! These traits let the router and executor run against mock transports.

use super::LiveError;
use crate::samples::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound platform event for one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub thread_id: String,
    pub kind: InboundKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundKind {
    /// An empty body stands for a message with no text (an attachment)
    MessageReceived { body: Vec<u8> },
    TypingStarted,
    TypingStopped,
}

impl InboundEvent {
    pub fn message(thread_id: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind: InboundKind::MessageReceived { body: body.into() },
        }
    }

    pub fn typing(thread_id: impl Into<String>, started: bool) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind: if started {
                InboundKind::TypingStarted
            } else {
                InboundKind::TypingStopped
            },
        }
    }
}

/// Actions toward the chat platform
///
/// Calls are fire-and-forget from the session's point of view: failures are
/// logged by the caller and never retried.
#[async_trait]
pub trait Outbound: Send + Sync {
    async fn send_text(&self, thread_id: &str, text: &str) -> Result<(), String>;

    async fn send_typing(&self, thread_id: &str, on: bool) -> Result<(), String>;

    async fn mark_read(&self, thread_id: &str) -> Result<(), String>;
}

/// Ordered stream of inbound events
#[async_trait]
pub trait EventSource: Send {
    /// Next event, or `None` once the stream has ended
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, LiveError>;
}

/// Past messages of a thread, used to warm up a new session
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Up to `limit` most recent messages, oldest first
    async fn history(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>, LiveError>;
}

// ============================================================================
// Blanket implementations
// ============================================================================

#[async_trait]
impl<T: Outbound + ?Sized> Outbound for Arc<T> {
    async fn send_text(&self, thread_id: &str, text: &str) -> Result<(), String> {
        (**self).send_text(thread_id, text).await
    }

    async fn send_typing(&self, thread_id: &str, on: bool) -> Result<(), String> {
        (**self).send_typing(thread_id, on).await
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), String> {
        (**self).mark_read(thread_id).await
    }
}

#[async_trait]
impl<T: HistorySource + ?Sized> HistorySource for Arc<T> {
    async fn history(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>, LiveError> {
        (**self).history(thread_id, limit).await
    }
}

/// A channel is an event source that ends when every sender is dropped
#[async_trait]
impl EventSource for mpsc::Receiver<InboundEvent> {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, LiveError> {
        Ok(self.recv().await)
    }
}

/// Threads with no stored history
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

#[async_trait]
impl HistorySource for NoHistory {
    async fn history(&self, _thread_id: &str, _limit: usize) -> Result<Vec<Message>, LiveError> {
        Ok(Vec::new())
    }
}
