//! Mock implementations for testing
//!
//! These mocks drive the router and executor without real I/O. Tests run on
//! a paused clock, so the 20s and 10s deadlines elapse instantly.

use super::traits::*;
use super::{LiveError, SessionRuntime, ThreadRouter};
use crate::config::LiveConfig;
use crate::samples::Message;
use crate::session::Chat;
use crate::stepper::{SequenceStepper, StepperFactory};
use crate::vocab::{EncodedVector, Symbol, VOCAB_SIZE};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Outbound
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text { thread: String, text: String },
    Typing { thread: String, on: bool },
    Read { thread: String },
}

/// Records every outbound action in order
#[derive(Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<Sent>>,
    fail: bool,
}

impl RecordingOutbound {
    /// Records actions but reports every call as failed
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, sent: Sent) -> Result<(), String> {
        self.sent.lock().unwrap().push(sent);
        if self.fail {
            Err("platform unavailable".to_string())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Outbound for RecordingOutbound {
    async fn send_text(&self, thread_id: &str, text: &str) -> Result<(), String> {
        self.record(Sent::Text {
            thread: thread_id.to_string(),
            text: text.to_string(),
        })
    }

    async fn send_typing(&self, thread_id: &str, on: bool) -> Result<(), String> {
        self.record(Sent::Typing {
            thread: thread_id.to_string(),
            on,
        })
    }

    async fn mark_read(&self, thread_id: &str) -> Result<(), String> {
        self.record(Sent::Read {
            thread: thread_id.to_string(),
        })
    }
}

// ============================================================================
// Mock Stepper
// ============================================================================

/// Turn-taking script shared by every stepper a factory makes.
///
/// Bot messages are always the single byte `k`. After a human message the
/// stepper predicts `after_human`; after a bot byte it predicts `after_bot`.
#[derive(Clone)]
pub struct ScriptedFactory {
    pub after_human: Symbol,
    pub after_bot: Symbol,
    /// How many times a bot turn was opened across all steppers
    pub bot_turns: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new(after_human: Symbol, after_bot: Symbol) -> Self {
        Self {
            after_human,
            after_bot,
            bot_turns: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Human messages hand the turn to the bot, and the bot stops after one message
    pub fn bot_answers() -> Self {
        Self::new(Symbol::BEGIN_BOT_TURN, Symbol::BEGIN_EXTERNAL_TURN)
    }

    pub fn bot_turns(&self) -> usize {
        self.bot_turns.load(Ordering::SeqCst)
    }
}

pub struct ScriptedStepper {
    script: ScriptedFactory,
    in_bot_turn: bool,
}

fn certain(symbol: Symbol) -> Vec<f64> {
    let mut out = vec![f64::NEG_INFINITY; VOCAB_SIZE];
    out[symbol.index()] = 0.0;
    out
}

impl SequenceStepper for ScriptedStepper {
    fn step(&mut self, input: &EncodedVector) -> Vec<f64> {
        match input.decode() {
            Some(Symbol::BEGIN_BOT_TURN) => {
                self.in_bot_turn = true;
                self.script.bot_turns.fetch_add(1, Ordering::SeqCst);
                return certain(Symbol::byte(b'k'));
            }
            Some(Symbol::BEGIN_EXTERNAL_TURN) => self.in_bot_turn = false,
            _ => {}
        }
        if self.in_bot_turn {
            certain(self.script.after_bot)
        } else {
            certain(self.script.after_human)
        }
    }
}

impl StepperFactory for ScriptedFactory {
    type Stepper = ScriptedStepper;

    fn new_stepper(&self) -> ScriptedStepper {
        ScriptedStepper {
            script: self.clone(),
            in_bot_turn: false,
        }
    }
}

// ============================================================================
// Mock History
// ============================================================================

/// In-memory history, optionally failing for chosen threads
#[derive(Default)]
pub struct InMemoryHistory {
    logs: HashMap<String, Vec<Message>>,
    broken: Vec<String>,
    pub requests: Mutex<Vec<(String, usize)>>,
}

impl InMemoryHistory {
    pub fn with_log(mut self, thread_id: &str, log: Vec<Message>) -> Self {
        self.logs.insert(thread_id.to_string(), log);
        self
    }

    pub fn with_broken(mut self, thread_id: &str) -> Self {
        self.broken.push(thread_id.to_string());
        self
    }
}

#[async_trait]
impl HistorySource for InMemoryHistory {
    async fn history(&self, thread_id: &str, limit: usize) -> Result<Vec<Message>, LiveError> {
        self.requests
            .lock()
            .unwrap()
            .push((thread_id.to_string(), limit));
        if self.broken.iter().any(|t| t == thread_id) {
            return Err(LiveError::History {
                thread: thread_id.to_string(),
                message: "store offline".to_string(),
            });
        }
        let log = self.logs.get(thread_id).cloned().unwrap_or_default();
        let skip = log.len().saturating_sub(limit);
        Ok(log[skip..].to_vec())
    }
}

/// Event source that fails after its scripted events run out
pub struct BrokenSource {
    events: Vec<InboundEvent>,
}

#[async_trait]
impl EventSource for BrokenSource {
    async fn next_event(&mut self) -> Result<Option<InboundEvent>, LiveError> {
        if self.events.is_empty() {
            Err(LiveError::EventSource("connection reset".to_string()))
        } else {
            Ok(Some(self.events.remove(0)))
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct Harness {
    outbound: Arc<RecordingOutbound>,
    factory: ScriptedFactory,
    event_tx: mpsc::Sender<crate::state_machine::Event>,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn start_session(factory: ScriptedFactory, history: &[Message]) -> Harness {
    start_session_with(factory, history, RecordingOutbound::default())
}

fn start_session_with(
    factory: ScriptedFactory,
    history: &[Message],
    outbound: RecordingOutbound,
) -> Harness {
    let outbound = Arc::new(outbound);
    let config = LiveConfig::default();
    let (event_tx, event_rx) = mpsc::channel(config.event_backlog);
    let cancel = CancellationToken::new();
    let chat = Chat::seeded(factory.new_stepper(), 7);
    let mut runtime = SessionRuntime::new(
        "t1",
        chat,
        outbound.clone(),
        config,
        event_rx,
        cancel.clone(),
    );
    runtime.replay(history);
    let task = tokio::spawn(runtime.run());
    Harness {
        outbound,
        factory,
        event_tx,
        cancel,
        task,
    }
}

fn human(text: &str) -> crate::state_machine::Event {
    crate::state_machine::Event::MessageReceived {
        text: text.as_bytes().to_vec(),
    }
}

fn text(thread: &str, text: &str) -> Sent {
    Sent::Text {
        thread: thread.to_string(),
        text: text.to_string(),
    }
}

fn typing(thread: &str, on: bool) -> Sent {
    Sent::Typing {
        thread: thread.to_string(),
        on,
    }
}

fn read(thread: &str) -> Sent {
    Sent::Read {
        thread: thread.to_string(),
    }
}

async fn advance(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

// ============================================================================
// Executor Tests
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_message_hands_turn_to_bot_after_typing_delay() {
    let h = start_session(ScriptedFactory::bot_answers(), &[]);
    h.event_tx.send(human("hello")).await.unwrap();

    advance(9).await;
    assert_eq!(h.outbound.sent(), vec![read("t1"), typing("t1", true)]);
    assert_eq!(h.factory.bot_turns(), 0);

    advance(2).await;
    assert_eq!(h.factory.bot_turns(), 1);
    assert_eq!(
        h.outbound.sent(),
        vec![
            read("t1"),
            typing("t1", true),
            text("t1", "k"),
            typing("t1", false)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_human_with_more_to_say_keeps_bot_waiting() {
    let factory = ScriptedFactory::new(Symbol::BEGIN_EXTERNAL_TURN, Symbol::BEGIN_EXTERNAL_TURN);
    let h = start_session(factory, &[]);
    h.event_tx.send(human("so")).await.unwrap();

    advance(15).await;
    assert_eq!(h.outbound.sent(), vec![read("t1")]);

    // The message re-armed the idle timer, so the bot speaks 20s after it
    advance(6).await;
    assert_eq!(h.outbound.sent(), vec![read("t1"), typing("t1", true)]);
}

#[tokio::test(start_paused = true)]
async fn test_silence_exhausts_unprompted_budget() {
    let h = start_session(ScriptedFactory::bot_answers(), &[]);

    // Each unprompted turn is 20s of idle plus 10s of typing
    advance(30 * 5).await;
    assert_eq!(h.outbound.texts(), vec!["k", "k", "k"]);

    advance(600).await;
    assert_eq!(h.outbound.texts().len(), 3);

    // A human message resets the budget
    h.event_tx.send(human("still there?")).await.unwrap();
    advance(11).await;
    assert_eq!(h.outbound.texts().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_bot_keeps_talking_while_it_wants_more() {
    let factory = ScriptedFactory::new(Symbol::BEGIN_BOT_TURN, Symbol::BEGIN_BOT_TURN);
    let h = start_session(factory, &[]);
    h.event_tx.send(human("tell me more")).await.unwrap();

    advance(10 * 4 + 1).await;
    assert_eq!(h.outbound.texts().len(), 4);
    assert!(!h.outbound.sent().contains(&typing("t1", false)));
}

#[tokio::test(start_paused = true)]
async fn test_typing_interrupts_bot_turn() {
    let h = start_session(ScriptedFactory::bot_answers(), &[]);
    h.event_tx.send(human("hi")).await.unwrap();
    advance(5).await;
    h.event_tx
        .send(crate::state_machine::Event::TypingStarted)
        .await
        .unwrap();

    // No deadline runs while the human types
    advance(120).await;
    assert!(h.outbound.texts().is_empty());
    assert_eq!(h.outbound.sent().last(), Some(&typing("t1", false)));

    h.event_tx
        .send(crate::state_machine::Event::TypingStopped)
        .await
        .unwrap();
    advance(19).await;
    assert!(h.outbound.texts().is_empty());
    advance(12).await;
    assert_eq!(h.outbound.texts(), vec!["k"]);
}

#[tokio::test(start_paused = true)]
async fn test_message_during_bot_turn_restarts_delay() {
    let h = start_session(ScriptedFactory::bot_answers(), &[]);
    h.event_tx.send(human("one")).await.unwrap();
    advance(8).await;
    h.event_tx.send(human("two")).await.unwrap();

    advance(8).await;
    assert!(h.outbound.texts().is_empty());
    // Read receipts only go out while the human holds the turn
    assert_eq!(
        h.outbound
            .sent()
            .iter()
            .filter(|s| matches!(s, Sent::Read { .. }))
            .count(),
        1
    );

    advance(3).await;
    assert_eq!(h.outbound.texts(), vec!["k"]);
}

#[tokio::test(start_paused = true)]
async fn test_replay_emits_nothing() {
    let history = vec![Message::human("hi"), Message::bot("hello"), Message::human("")];
    let h = start_session(ScriptedFactory::bot_answers(), &history);

    tokio::task::yield_now().await;
    assert!(h.outbound.sent().is_empty());
    // Replaying the bot message opened one bot turn without generating
    assert_eq!(h.factory.bot_turns(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_outbound_failures_do_not_stop_session() {
    let h = start_session_with(
        ScriptedFactory::bot_answers(),
        &[],
        RecordingOutbound::failing(),
    );
    h.event_tx.send(human("hello")).await.unwrap();
    advance(11).await;
    assert_eq!(h.outbound.texts(), vec!["k"]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_timers_and_drains_queue() {
    let h = start_session(ScriptedFactory::bot_answers(), &[]);
    h.cancel.cancel();
    h.task.await.unwrap();

    assert!(h.event_tx.send(human("late")).await.is_err());
    advance(60).await;
    assert!(h.outbound.sent().is_empty());
}

// ============================================================================
// Router Tests
// ============================================================================

fn router(
    factory: ScriptedFactory,
    history: InMemoryHistory,
) -> (
    ThreadRouter<ScriptedFactory, RecordingOutbound, InMemoryHistory>,
    Arc<RecordingOutbound>,
    Arc<InMemoryHistory>,
) {
    let outbound = Arc::new(RecordingOutbound::default());
    let history = Arc::new(history);
    let router = ThreadRouter::new(
        factory,
        outbound.clone(),
        history.clone(),
        LiveConfig::default(),
    );
    (router, outbound, history)
}

#[tokio::test(start_paused = true)]
async fn test_router_runs_threads_independently() {
    let (mut router, outbound, history) =
        router(ScriptedFactory::bot_answers(), InMemoryHistory::default());
    let (tx, mut rx) = mpsc::channel(16);

    let driver = tokio::spawn(async move {
        let result = router.run(&mut rx).await;
        (router.thread_count(), result)
    });

    tx.send(InboundEvent::message("a", "hi")).await.unwrap();
    advance(5).await;
    tx.send(InboundEvent::message("b", "yo")).await.unwrap();
    advance(6).await;

    assert_eq!(outbound.texts(), vec!["k"]);
    advance(5).await;
    assert_eq!(outbound.texts(), vec!["k", "k"]);
    assert!(outbound.sent().contains(&text("a", "k")));
    assert!(outbound.sent().contains(&text("b", "k")));

    drop(tx);
    let (threads, result) = driver.await.unwrap();
    assert!(result.is_ok());
    assert_eq!(threads, 0);

    let requests = history.requests.lock().unwrap().clone();
    assert_eq!(requests, vec![("a".to_string(), 20), ("b".to_string(), 20)]);
}

#[tokio::test(start_paused = true)]
async fn test_router_feeds_placeholder_for_empty_message() {
    let factory = ScriptedFactory::new(Symbol::BEGIN_EXTERNAL_TURN, Symbol::BEGIN_EXTERNAL_TURN);
    let (mut router, outbound, _) = router(factory, InMemoryHistory::default());

    assert_eq!(
        router.machine_event(InboundKind::MessageReceived { body: vec![] }),
        human("attachment")
    );

    router.dispatch(InboundEvent::message("a", ""));
    tokio::task::yield_now().await;
    advance(1).await;
    assert_eq!(outbound.sent(), vec![read("a")]);
    assert_eq!(router.thread_count(), 1);
    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_router_drops_events_beyond_backlog() {
    let (mut router, outbound, _) = router(
        ScriptedFactory::new(Symbol::BEGIN_EXTERNAL_TURN, Symbol::BEGIN_EXTERNAL_TURN),
        InMemoryHistory::default(),
    );

    // Nothing runs between dispatches, so only the first 10 fit in the queue
    for i in 0..15 {
        router.dispatch(InboundEvent::message("a", format!("m{i}")));
    }
    advance(1).await;
    assert_eq!(outbound.sent().len(), 10);
    router.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_router_history_failure_is_fatal() {
    let (mut router, _, _) = router(
        ScriptedFactory::bot_answers(),
        InMemoryHistory::default().with_broken("bad"),
    );
    let (tx, mut rx) = mpsc::channel(16);
    tx.send(InboundEvent::message("bad", "hi")).await.unwrap();

    let err = router.run(&mut rx).await.unwrap_err();
    assert!(matches!(err, LiveError::History { ref thread, .. } if thread == "bad"));
    drop(tx);
}

#[tokio::test(start_paused = true)]
async fn test_router_source_failure_is_fatal() {
    let (mut router, _, _) = router(ScriptedFactory::bot_answers(), InMemoryHistory::default());
    let mut source = BrokenSource {
        events: vec![InboundEvent::typing("a", true)],
    };

    let err = router.run(&mut source).await.unwrap_err();
    assert!(matches!(err, LiveError::EventSource(_)));
    assert_eq!(router.thread_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_router_replays_history_before_events() {
    let history = InMemoryHistory::default().with_log(
        "a",
        vec![Message::human("hey"), Message::bot("hi there")],
    );
    let factory = ScriptedFactory::bot_answers();
    let (mut router, outbound, _) = router(factory.clone(), history);

    router.dispatch(InboundEvent::typing("a", true));
    advance(1).await;
    assert_eq!(factory.bot_turns(), 1);
    assert!(outbound.sent().is_empty());
    router.shutdown().await;
}
