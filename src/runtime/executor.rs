//! Per-thread session executor

use super::traits::Outbound;
use crate::config::LiveConfig;
use crate::samples::Message;
use crate::session::Chat;
use crate::state_machine::{transition, Effect, Event, SessionState};
use crate::stepper::SequenceStepper;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Drives one conversation: owns its session, its machine state and its
/// single deadline
pub struct SessionRuntime<S, O>
where
    S: SequenceStepper,
    O: Outbound + 'static,
{
    thread_id: String,
    chat: Chat<S>,
    state: SessionState,
    config: LiveConfig,
    outbound: Arc<O>,
    event_rx: mpsc::Receiver<Event>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl<S, O> SessionRuntime<S, O>
where
    S: SequenceStepper,
    O: Outbound + 'static,
{
    pub fn new(
        thread_id: impl Into<String>,
        chat: Chat<S>,
        outbound: Arc<O>,
        config: LiveConfig,
        event_rx: mpsc::Receiver<Event>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            chat,
            state: SessionState::new(),
            config,
            outbound,
            event_rx,
            cancel,
            deadline: None,
        }
    }

    /// Warm up hidden state from past messages; sends nothing
    pub fn replay(&mut self, history: &[Message]) {
        let bot_next = self.chat.replay(history);
        tracing::debug!(
            thread_id = %self.thread_id,
            messages = history.len(),
            bot_next,
            "Replayed history"
        );
    }

    pub async fn run(mut self) {
        tracing::info!(thread_id = %self.thread_id, "Starting session runtime");

        // Entering AwaitingHuman arms the idle timer
        self.deadline = Some(Instant::now() + self.config.idle_timeout);

        loop {
            let deadline = self.deadline;
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => break,

                event = self.event_rx.recv() => match event {
                    Some(event) => self.process_event(event).await,
                    None => break,
                },

                () = wait_until(deadline) => {
                    self.deadline = None;
                    self.process_event(Event::TimerElapsed).await;
                }
            }
        }

        self.deadline = None;
        self.event_rx.close();
        let mut dropped = 0usize;
        while self.event_rx.try_recv().is_ok() {
            dropped += 1;
        }
        tracing::info!(thread_id = %self.thread_id, dropped, "Session runtime stopped");
    }

    /// Run an event and every event its effects chain into
    async fn process_event(&mut self, event: Event) {
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let kind = current_event.kind();
            let result = match transition(&self.state, &self.config, current_event) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(thread_id = %self.thread_id, error = %e, "Ignoring event");
                    continue;
                }
            };

            let old_state = std::mem::replace(&mut self.state, result.new_state);
            if old_state.phase != self.state.phase {
                tracing::info!(
                    thread_id = %self.thread_id,
                    event = kind,
                    from = old_state.phase.as_str(),
                    phase = self.state.phase.as_str(),
                    no_response_count = self.state.no_response_count,
                    "Phase change"
                );
            }

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect).await {
                    events_to_process.push(generated_event);
                }
            }
        }
    }

    /// Execute an effect and optionally return a generated event
    async fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::MarkRead => {
                if let Err(e) = self.outbound.mark_read(&self.thread_id).await {
                    tracing::warn!(thread_id = %self.thread_id, error = %e, "Failed to mark read");
                }
                None
            }

            Effect::SendTyping { on } => {
                if let Err(e) = self.outbound.send_typing(&self.thread_id, on).await {
                    tracing::warn!(thread_id = %self.thread_id, on, error = %e, "Failed to set typing");
                }
                None
            }

            Effect::SendText { body } => {
                if body.is_empty() {
                    tracing::debug!(thread_id = %self.thread_id, "Skipping empty reply");
                    return None;
                }
                let text = String::from_utf8_lossy(&body);
                if let Err(e) = self.outbound.send_text(&self.thread_id, &text).await {
                    tracing::warn!(thread_id = %self.thread_id, error = %e, "Failed to send message");
                }
                None
            }

            Effect::FeedHumanMessage { text } => {
                let more = self.chat.send(&text);
                tracing::debug!(thread_id = %self.thread_id, bytes = text.len(), more, "Fed human message");
                Some(Event::HumanMessageFed { more })
            }

            Effect::GenerateReply => {
                let reply = self.chat.receive();
                tracing::debug!(
                    thread_id = %self.thread_id,
                    bytes = reply.body.len(),
                    more = reply.more,
                    "Generated reply"
                );
                Some(Event::ReplyGenerated {
                    body: reply.body,
                    more: reply.more,
                })
            }

            Effect::ArmTimer { delay } => {
                self.deadline = Some(Instant::now() + delay);
                None
            }

            Effect::CancelTimer => {
                self.deadline = None;
                None
            }
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
