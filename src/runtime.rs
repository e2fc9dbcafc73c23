//! Live conversation runtime
//!
//! A `ThreadRouter` reads one inbound event stream and hands each thread's
//! events to its own `SessionRuntime` task. Threads share nothing but the
//! trained parameters behind the stepper factory.

mod executor;
pub mod stdio;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::config::LiveConfig;
use crate::session::Chat;
use crate::state_machine::Event;
use crate::stepper::StepperFactory;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Failures that stop the whole router
#[derive(Debug, Error)]
pub enum LiveError {
    #[error("event source failed: {0}")]
    EventSource(String),

    #[error("history for thread {thread} unavailable: {message}")]
    History { thread: String, message: String },
}

/// Handle to interact with a running thread
struct ThreadHandle {
    event_tx: mpsc::Sender<Event>,
    task: JoinHandle<()>,
}

/// Demultiplexes inbound events into per-thread session runtimes
pub struct ThreadRouter<F, O, H>
where
    F: StepperFactory,
    O: Outbound + 'static,
    H: HistorySource + 'static,
{
    factory: F,
    outbound: Arc<O>,
    history: Arc<H>,
    config: LiveConfig,
    threads: HashMap<String, ThreadHandle>,
    shutdown: CancellationToken,
    fatal_tx: mpsc::UnboundedSender<LiveError>,
    fatal_rx: mpsc::UnboundedReceiver<LiveError>,
}

impl<F, O, H> ThreadRouter<F, O, H>
where
    F: StepperFactory,
    O: Outbound + 'static,
    H: HistorySource + 'static,
{
    pub fn new(factory: F, outbound: Arc<O>, history: Arc<H>, config: LiveConfig) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            factory,
            outbound,
            history,
            config,
            threads: HashMap::new(),
            shutdown: CancellationToken::new(),
            fatal_tx,
            fatal_rx,
        }
    }

    /// Number of threads that have been started
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Route events until the source ends or a fatal error occurs.
    ///
    /// Every thread is cancelled and awaited before this returns.
    pub async fn run<E: EventSource>(&mut self, source: &mut E) -> Result<(), LiveError> {
        tracing::info!("Starting thread router");

        let outcome = loop {
            tokio::select! {
                biased;

                Some(err) = self.fatal_rx.recv() => break Err(err),

                next = source.next_event() => match next {
                    Ok(Some(event)) => self.dispatch(event),
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                },
            }
        };

        if let Err(e) = &outcome {
            tracing::error!(error = %e, "Thread router failed");
        }
        self.shutdown().await;
        outcome
    }

    /// Queue an inbound event on its thread, starting the thread if needed.
    ///
    /// Never blocks: a full queue drops the event.
    pub fn dispatch(&mut self, event: InboundEvent) {
        let InboundEvent { thread_id, kind } = event;
        let event = self.machine_event(kind);

        if !self.threads.contains_key(&thread_id) {
            let handle = self.spawn_thread(&thread_id);
            self.threads.insert(thread_id.clone(), handle);
        }
        let Some(handle) = self.threads.get(&thread_id) else {
            return;
        };

        match handle.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(thread_id = %thread_id, event = event.kind(), "Event queue full, dropping event");
            }
            Err(TrySendError::Closed(event)) => {
                tracing::warn!(thread_id = %thread_id, event = event.kind(), "Thread stopped, dropping event");
            }
        }
    }

    fn machine_event(&self, kind: InboundKind) -> Event {
        match kind {
            InboundKind::MessageReceived { body } if body.is_empty() => Event::MessageReceived {
                text: self.config.attachment_placeholder.clone().into_bytes(),
            },
            InboundKind::MessageReceived { body } => Event::MessageReceived { text: body },
            InboundKind::TypingStarted => Event::TypingStarted,
            InboundKind::TypingStopped => Event::TypingStopped,
        }
    }

    fn spawn_thread(&self, thread_id: &str) -> ThreadHandle {
        let (event_tx, event_rx) = mpsc::channel(self.config.event_backlog);
        let chat = Chat::new(self.factory.new_stepper()).with_config(self.config.session.clone());
        let mut runtime = SessionRuntime::new(
            thread_id,
            chat,
            self.outbound.clone(),
            self.config.clone(),
            event_rx,
            self.shutdown.child_token(),
        );

        let history = self.history.clone();
        let limit = self.config.history_limit;
        let fatal_tx = self.fatal_tx.clone();
        let thread_id = thread_id.to_string();

        tracing::info!(thread_id = %thread_id, "Starting thread");
        let task = tokio::spawn(async move {
            match history.history(&thread_id, limit).await {
                Ok(log) => runtime.replay(&log),
                Err(e) => {
                    let _ = fatal_tx.send(e);
                    return;
                }
            }
            runtime.run().await;
        });

        ThreadHandle { event_tx, task }
    }

    /// Cancel every thread and wait for them to finish
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        for (thread_id, handle) in self.threads.drain() {
            drop(handle.event_tx);
            if let Err(e) = handle.task.await {
                tracing::warn!(thread_id = %thread_id, error = %e, "Thread task panicked");
            }
        }
    }
}
