//! Conversation state machine
//!
//! One [`Assistant`] owns the frame loop. Every frame is routed by state:
//!
//! ```text
//!   Idle ──start──▶ ListeningForWakeWord ──wake──▶ ListeningForCommand
//!                          ▲                             │ utterance
//!                          │                             ▼
//!                          └────── done ─── Speaking ◀── ProcessingCommand
//!                                             │ barge-in
//!                                             ▼
//!                                      ListeningForCommand
//! ```
//!
//! Transcription and dispatch run on a worker thread and report back through
//! the event mailbox, as do speak tasks when they finish. All transitions
//! happen on the frame thread.

mod notify;
mod session;
mod speaker;
mod state;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;

pub use notify::{AssistantEvent, DEFAULT_CAPACITY, Notifier};
pub use session::{ConversationSession, FunctionCall, Message, Role, SessionId, ToolCall};
pub use speaker::{SpeechCompletion, SpeechOutputController, TaskHandle};
pub use state::{
    AssistantState, EmptyTranscriptPolicy, Event, ProcessedTurn, RunExit, TurnOutcome,
};

use crate::llm::{Dispatch, Dispatcher};
use crate::voice::{
    BargeInDetector, Frame, FrameFormat, FrameSource, RecorderSettings, SegmentEvent,
    SegmentRecorder, SpeechDetector, SpeechSink, Transcriber, Utterance, WakeWordDetector,
    transcribe_or_empty,
};
use crate::{Error, Result};

/// Behavior knobs for the state machine
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub format: FrameFormat,
    pub recorder: RecorderSettings,
    /// Listen for the wake word between commands; otherwise listen for
    /// commands continuously
    pub wake_enabled: bool,
    pub barge_in_enabled: bool,
    /// Keep listening after a reply that ends in a question
    pub follow_up_on_question: bool,
    pub empty_transcript: EmptyTranscriptPolicy,
    /// Spoken when dispatch fails; silence if unset
    pub apology: Option<String>,
    pub system_prompt: String,
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self {
            format: FrameFormat::default(),
            recorder: RecorderSettings::default(),
            wake_enabled: true,
            barge_in_enabled: true,
            follow_up_on_question: false,
            empty_transcript: EmptyTranscriptPolicy::default(),
            apology: None,
            system_prompt: "You are a helpful voice assistant. Keep replies short.".to_string(),
        }
    }
}

/// Engines the state machine drives
pub struct Collaborators {
    pub wake_word: Box<dyn WakeWordDetector>,
    /// Gate and classifier for command capture
    pub command_detector: SpeechDetector,
    pub barge_in: BargeInDetector,
    pub transcriber: Arc<dyn Transcriber>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub speech: Arc<dyn SpeechSink>,
}

/// Sends control events to a running assistant from any thread
#[derive(Debug, Clone)]
pub struct AssistantHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl AssistantHandle {
    /// Queue an event; false if the assistant is gone
    pub fn send(&self, event: Event) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn start(&self) -> bool {
        self.send(Event::Start)
    }

    pub fn activate(&self) -> bool {
        self.send(Event::Activate)
    }

    pub fn stop(&self) -> bool {
        self.send(Event::Stop)
    }

    pub fn shutdown(&self) -> bool {
        self.send(Event::Shutdown)
    }
}

/// Receiving side of the event queue, consumed by [`Assistant::new`]
#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

/// Create a connected handle and mailbox
///
/// The handle can be given out before the assistant exists.
#[must_use]
pub fn mailbox() -> (AssistantHandle, Mailbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (AssistantHandle { tx: tx.clone() }, Mailbox { tx, rx })
}

/// The voice assistant
pub struct Assistant {
    settings: AssistantSettings,
    state: AssistantState,
    session: Option<ConversationSession>,
    recorder: SegmentRecorder,
    wake_word: Box<dyn WakeWordDetector>,
    command_detector: SpeechDetector,
    barge_in: BargeInDetector,
    transcriber: Arc<dyn Transcriber>,
    dispatcher: Arc<dyn Dispatcher>,
    speaker: SpeechOutputController,
    speak_task: Option<TaskHandle>,
    last_reply: String,
    notifier: Notifier,
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    turn: u64,
    exit: Option<RunExit>,
}

impl Assistant {
    /// Assemble an idle assistant
    #[must_use]
    pub fn new(
        settings: AssistantSettings,
        collaborators: Collaborators,
        notifier: Notifier,
        mailbox: Mailbox,
    ) -> Self {
        let Mailbox { tx, rx } = mailbox;

        let completions = tx.clone();
        let speaker = SpeechOutputController::new(collaborators.speech).on_complete(move |done| {
            // Receiver gone means the assistant was dropped
            let _ = completions.send(Event::SpeechFinished(done));
        });

        tracing::debug!(
            wake = settings.wake_enabled,
            barge_in = settings.barge_in_enabled,
            start_frames = settings.recorder.start_frames,
            end_silence_frames = settings.recorder.end_silence_frames,
            max_wait_frames = settings.recorder.max_wait_frames,
            "assistant initialized"
        );

        Self {
            recorder: SegmentRecorder::new(settings.recorder, settings.format),
            settings,
            state: AssistantState::Idle,
            session: None,
            wake_word: collaborators.wake_word,
            command_detector: collaborators.command_detector,
            barge_in: collaborators.barge_in,
            transcriber: collaborators.transcriber,
            dispatcher: collaborators.dispatcher,
            speaker,
            speak_task: None,
            last_reply: String::new(),
            notifier,
            tx,
            rx,
            turn: 0,
            exit: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> AssistantState {
        self.state
    }

    /// The active session, if any
    #[must_use]
    pub const fn session(&self) -> Option<&ConversationSession> {
        self.session.as_ref()
    }

    /// The speak task for the reply being played
    #[must_use]
    pub const fn speech_task(&self) -> Option<&TaskHandle> {
        self.speak_task.as_ref()
    }

    #[must_use]
    pub const fn speaker(&self) -> &SpeechOutputController {
        &self.speaker
    }

    #[must_use]
    pub fn handle(&self) -> AssistantHandle {
        AssistantHandle {
            tx: self.tx.clone(),
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &AssistantSettings {
        &self.settings
    }

    /// Pending exit request, if any
    #[must_use]
    pub const fn exit_requested(&self) -> Option<RunExit> {
        self.exit
    }

    /// Run the frame loop until shutdown, restart or end of input
    ///
    /// # Errors
    ///
    /// Returns a fatal error (bad frame shape or configuration); transient
    /// errors are logged and absorbed
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<RunExit> {
        if source.format() != self.settings.format {
            return Err(Error::Config(format!(
                "source delivers {:?}, assistant expects {:?}",
                source.format(),
                self.settings.format
            )));
        }

        tracing::info!(state = %self.state, "assistant running");

        loop {
            self.process_pending();
            if let Some(exit) = self.exit.take() {
                self.speaker.shutdown();
                tracing::info!(?exit, "assistant exiting");
                return Ok(exit);
            }

            match source.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(e) = self.on_frame(frame) {
                        if e.is_fatal() {
                            self.enter(AssistantState::Idle);
                            return Err(e);
                        }
                        tracing::warn!(error = %e, state = %self.state, "frame handling failed");
                        self.recover();
                    }
                }
                Ok(None) => {
                    tracing::info!("audio source closed");
                    self.enter(AssistantState::Idle);
                    self.speaker.shutdown();
                    return Ok(RunExit::SourceClosed);
                }
                Err(e) if e.is_fatal() => {
                    self.enter(AssistantState::Idle);
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "audio source error");
                    std::thread::sleep(self.settings.format.frame_duration());
                }
            }
        }
    }

    /// Handle every queued event without blocking; returns how many
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Apply one control event
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::Start => self.start(),
            Event::Activate => self.activate(),
            Event::Stop => self.stop(),
            Event::Shutdown => {
                self.stop();
                self.exit = Some(RunExit::Shutdown);
            }
            Event::Processed(turn) => self.on_processed(turn),
            Event::SpeechFinished(done) => self.on_speech_finished(&done),
        }
    }

    /// Feed one captured frame
    ///
    /// # Errors
    ///
    /// A frame of the wrong size is fatal; engine failures are returned as
    /// transient errors
    pub fn on_frame(&mut self, frame: Frame) -> Result<()> {
        let expected = self.settings.format.frame_len();
        if frame.len() != expected {
            return Err(Error::Config(format!(
                "frame has {} samples, expected {expected}",
                frame.len()
            )));
        }

        match self.state {
            AssistantState::Idle | AssistantState::ProcessingCommand => {}
            AssistantState::ListeningForWakeWord => {
                if self.wake_word.process(&frame)? {
                    self.on_wake();
                }
            }
            AssistantState::ListeningForCommand => {
                let is_speech = self.command_detector.classify(&frame)?;
                match self.recorder.observe(frame, is_speech) {
                    SegmentEvent::Pending | SegmentEvent::Interrupted => {}
                    SegmentEvent::Started => tracing::debug!("command started"),
                    SegmentEvent::Utterance(utterance) => self.begin_processing(utterance),
                    SegmentEvent::Timeout => {
                        tracing::info!("no command heard");
                        self.enter(self.rest_state());
                    }
                }
            }
            AssistantState::Speaking => {
                if self.settings.barge_in_enabled && self.barge_in.detect_any_speech(&frame)? {
                    tracing::info!("barge-in detected");
                    self.interrupt_speech();
                }
            }
        }

        Ok(())
    }

    fn start(&mut self) {
        if self.state != AssistantState::Idle {
            tracing::debug!(state = %self.state, "already started");
            return;
        }
        if self.settings.wake_enabled {
            self.enter(AssistantState::ListeningForWakeWord);
        } else {
            self.ensure_session();
            self.enter(AssistantState::ListeningForCommand);
        }
    }

    fn activate(&mut self) {
        match self.state {
            AssistantState::Idle | AssistantState::ListeningForWakeWord => {
                tracing::info!("activated");
                self.ensure_session();
                self.enter(AssistantState::ListeningForCommand);
            }
            AssistantState::Speaking => self.interrupt_speech(),
            AssistantState::ListeningForCommand | AssistantState::ProcessingCommand => {
                tracing::debug!(state = %self.state, "activate ignored");
            }
        }
    }

    fn stop(&mut self) {
        self.speaker.cancel_current();
        self.enter(AssistantState::Idle);
    }

    fn on_wake(&mut self) {
        self.ensure_session();
        self.enter(AssistantState::ListeningForCommand);
    }

    fn interrupt_speech(&mut self) {
        self.speaker.cancel_current();
        self.enter(AssistantState::ListeningForCommand);
    }

    /// Where the loop waits between commands
    const fn rest_state(&self) -> AssistantState {
        if self.settings.wake_enabled {
            AssistantState::ListeningForWakeWord
        } else {
            AssistantState::ListeningForCommand
        }
    }

    fn recover(&mut self) {
        if self.state == AssistantState::Idle {
            return;
        }
        self.speaker.cancel_current();
        self.recorder.reset();
        self.barge_in.reset();
        self.enter(self.rest_state());
    }

    fn ensure_session(&mut self) -> &ConversationSession {
        let notifier = &self.notifier;
        let system_prompt = &self.settings.system_prompt;
        self.session.get_or_insert_with(|| {
            let session = ConversationSession::new(system_prompt);
            tracing::info!(session = %session.id(), "session started");
            notifier.emit(AssistantEvent::SessionStarted { id: session.id() });
            session
        })
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(
                session = %session.id(),
                turns = session.user_turns(),
                "session ended"
            );
            self.notifier
                .emit(AssistantEvent::SessionEnded { id: session.id() });
        }
    }

    fn enter(&mut self, next: AssistantState) {
        let prev = self.state;
        if prev == next {
            return;
        }

        match prev {
            AssistantState::ListeningForWakeWord => self.wake_word.stop(),
            AssistantState::ListeningForCommand => {
                self.recorder.interrupt();
            }
            AssistantState::Speaking => {
                self.speaker.cancel_current();
                self.speak_task = None;
            }
            AssistantState::Idle | AssistantState::ProcessingCommand => {}
        }

        self.state = next;
        tracing::info!(from = %prev, to = %next, "state changed");
        self.notifier
            .emit(AssistantEvent::StateChanged { from: prev, to: next });

        match next {
            AssistantState::Idle => {
                // Results from in-flight processing are now stale
                self.turn += 1;
                self.recorder.reset();
                self.end_session();
            }
            AssistantState::ListeningForWakeWord => {
                if let Err(e) = self.wake_word.start() {
                    tracing::error!(error = %e, "failed to start wake word detector");
                }
            }
            AssistantState::ListeningForCommand => self.recorder.reset(),
            AssistantState::Speaking => self.barge_in.reset(),
            AssistantState::ProcessingCommand => {}
        }
    }

    fn begin_processing(&mut self, utterance: Utterance) {
        tracing::info!(
            frames = utterance.frame_count(),
            duration = ?utterance.duration(),
            "utterance captured"
        );
        self.notifier.emit(AssistantEvent::UtteranceCaptured {
            frames: utterance.frame_count(),
        });

        let history = self.ensure_session().history().to_vec();
        self.enter(AssistantState::ProcessingCommand);
        self.turn += 1;

        let turn = self.turn;
        let transcriber = Arc::clone(&self.transcriber);
        let dispatcher = Arc::clone(&self.dispatcher);
        let apology = self.settings.apology.clone();
        let tx = self.tx.clone();

        let spawned = std::thread::Builder::new()
            .name("aerion-turn".to_string())
            .spawn(move || {
                let fallback = history.clone();
                let processed = catch_unwind(AssertUnwindSafe(|| {
                    process_turn(
                        turn,
                        &utterance,
                        history,
                        transcriber.as_ref(),
                        dispatcher.as_ref(),
                        apology.clone(),
                    )
                }))
                .unwrap_or_else(|_| {
                    tracing::error!(turn, "command processing panicked");
                    ProcessedTurn {
                        turn,
                        transcript: String::new(),
                        outcome: apology.map_or(TurnOutcome::NoReply, TurnOutcome::Apology),
                        history: fallback,
                    }
                });
                // Receiver gone means the assistant was dropped
                let _ = tx.send(Event::Processed(processed));
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "failed to spawn processing thread");
            self.enter(self.rest_state());
        }
    }

    fn on_processed(&mut self, processed: ProcessedTurn) {
        if self.state != AssistantState::ProcessingCommand || processed.turn != self.turn {
            tracing::debug!(
                turn = processed.turn,
                current = self.turn,
                state = %self.state,
                "discarding stale result"
            );
            return;
        }

        if !processed.transcript.is_empty() {
            self.notifier.emit(AssistantEvent::Transcript {
                text: processed.transcript.clone(),
            });
        }
        if let Some(session) = self.session.as_mut() {
            session.replace_history(processed.history);
        }

        match processed.outcome {
            TurnOutcome::EmptyTranscript => {
                tracing::info!("no speech recognized");
                let next = match self.settings.empty_transcript {
                    EmptyTranscriptPolicy::WakeWord => self.rest_state(),
                    EmptyTranscriptPolicy::Command => AssistantState::ListeningForCommand,
                };
                self.enter(next);
            }
            TurnOutcome::NoReply => self.enter(self.rest_state()),
            TurnOutcome::Restart => {
                tracing::info!("restart requested");
                self.enter(AssistantState::Idle);
                self.exit = Some(RunExit::Restart);
            }
            TurnOutcome::Reply(text) | TurnOutcome::Apology(text) => self.speak(text),
        }
    }

    fn speak(&mut self, text: String) {
        tracing::info!(reply = %text, "replying");
        if let Some(session) = self.session.as_mut() {
            session.push_assistant(text.clone());
        }
        self.notifier
            .emit(AssistantEvent::Reply { text: text.clone() });
        self.enter(AssistantState::Speaking);
        self.speak_task = Some(self.speaker.speak(&text));
        self.last_reply = text;
    }

    fn on_speech_finished(&mut self, done: &SpeechCompletion) {
        let current = self.speak_task.as_ref().map(TaskHandle::id);
        if self.state != AssistantState::Speaking || current != Some(done.task_id) {
            tracing::debug!(task = done.task_id, "ignoring finished speech");
            return;
        }

        tracing::debug!(task = done.task_id, "finished speaking");
        let follow_up =
            self.settings.follow_up_on_question && self.last_reply.trim_end().ends_with('?');
        if follow_up {
            self.enter(AssistantState::ListeningForCommand);
        } else {
            self.enter(self.rest_state());
        }
    }
}

/// Transcribe an utterance and dispatch it against `history`
///
/// Runs on the processing thread. Dispatch errors become the apology (or
/// silence); they never escape.
#[must_use]
pub fn process_turn(
    turn: u64,
    utterance: &Utterance,
    mut history: Vec<Message>,
    transcriber: &dyn Transcriber,
    dispatcher: &dyn Dispatcher,
    apology: Option<String>,
) -> ProcessedTurn {
    let transcript = transcribe_or_empty(transcriber, utterance);
    if transcript.is_empty() {
        return ProcessedTurn {
            turn,
            transcript,
            outcome: TurnOutcome::EmptyTranscript,
            history,
        };
    }

    tracing::info!(command = %transcript, "command received");
    history.push(Message::user(transcript.clone()));

    let outcome = match dispatcher.respond(&mut history) {
        Ok(Dispatch::Reply(text)) if text.trim().is_empty() => TurnOutcome::NoReply,
        Ok(Dispatch::Reply(text)) => TurnOutcome::Reply(text.trim().to_string()),
        Ok(Dispatch::Restart) => TurnOutcome::Restart,
        Err(e) => {
            tracing::error!(error = %e, "command handling failed");
            apology.map_or(TurnOutcome::NoReply, TurnOutcome::Apology)
        }
    };

    ProcessedTurn {
        turn,
        transcript,
        outcome,
        history,
    }
}
