//! Shared test utilities
//!
//! Fakes for every collaborator the assistant drives, plus synthetic audio.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use aerion::assistant::{
    Assistant, AssistantSettings, Collaborators, DEFAULT_CAPACITY, Message, Notifier, mailbox,
};
use aerion::llm::{Dispatch, Dispatcher};
use aerion::voice::{
    BargeInDetector, EnergyGate, EnergyOnly, Frame, FrameFormat, FrameSource, RecorderSettings,
    SpeechDetector, SpeechSink, Transcriber, WakeWordDetector,
};
use aerion::{Error, Result};

/// Sample value that marks a frame as "the wake word"
pub const WAKE_MARKER: i16 = 7777;

/// Frame format used throughout the tests (16 kHz, 30 ms)
#[must_use]
pub fn format() -> FrameFormat {
    FrameFormat::default()
}

/// Generate sine wave samples
#[must_use]
pub fn generate_sine_samples(format: FrameFormat, frequency: f32, amplitude: f32) -> Vec<i16> {
    let rate = format.sample_rate() as f32;
    (0..format.frame_len())
        .map(|i| {
            let t = i as f32 / rate;
            (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin() * 32767.0) as i16
        })
        .collect()
}

/// A loud tone frame
#[must_use]
pub fn speech_frame() -> Frame {
    Frame::new(generate_sine_samples(format(), 440.0, 0.3), format()).unwrap()
}

/// An all-zero frame
#[must_use]
pub fn silence_frame() -> Frame {
    Frame::silence(format())
}

/// A frame the fake wake word detector fires on
#[must_use]
pub fn wake_frame() -> Frame {
    Frame::new(vec![WAKE_MARKER; format().frame_len()], format()).unwrap()
}

/// `n` frames made by `make`
pub fn frames(n: usize, make: fn() -> Frame) -> Vec<Frame> {
    (0..n).map(|_| make()).collect()
}

/// Transcriber that replays scripted results, then a fallback
pub struct ScriptedTranscriber {
    script: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new(script: impl IntoIterator<Item = Result<String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: String::new(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always return `text`
    pub fn always(text: &str) -> Self {
        Self::new([]).with_fallback(text)
    }

    #[must_use]
    pub fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = text.to_string();
        self
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, _pcm: &[i16], _sample_rate: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Dispatcher that replays scripted results, then a fallback reply
pub struct ScriptedDispatcher {
    script: Mutex<VecDeque<Result<Dispatch>>>,
    fallback: String,
    tool_result: Option<String>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedDispatcher {
    pub fn new(script: impl IntoIterator<Item = Result<Dispatch>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: "ok".to_string(),
            tool_result: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Always reply with `text`
    pub fn replying(text: &str) -> Self {
        let mut dispatcher = Self::new([]);
        dispatcher.fallback = text.to_string();
        dispatcher
    }

    /// Append a tool result to history before replying, like a tool round
    #[must_use]
    pub fn with_tool_result(mut self, content: &str) -> Self {
        self.tool_result = Some(content.to_string());
        self
    }

    /// Histories passed to `respond`, in call order
    pub fn seen(&self) -> Vec<Vec<Message>> {
        self.seen.lock().unwrap().clone()
    }
}

impl Dispatcher for ScriptedDispatcher {
    fn respond(&self, history: &mut Vec<Message>) -> Result<Dispatch> {
        self.seen.lock().unwrap().push(history.clone());
        if let Some(content) = &self.tool_result {
            history.push(Message::tool_result("call_1", content.clone()));
        }
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Dispatch::Reply(self.fallback.clone())))
    }
}

/// Speech sink that "plays" for a fixed time and tracks overlap
pub struct FakeSpeech {
    duration: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    spoken: Mutex<Vec<String>>,
    cancelled: AtomicUsize,
}

impl FakeSpeech {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            spoken: Mutex::new(Vec::new()),
            cancelled: AtomicUsize::new(0),
        }
    }

    /// Texts passed to `speak`
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    /// Most tasks ever playing at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks that stopped early
    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl SpeechSink for FakeSpeech {
    fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        self.spoken.lock().unwrap().push(text.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let started = Instant::now();
        while started.elapsed() < self.duration {
            if cancel.is_cancelled() {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Wake word detector that fires on [`WAKE_MARKER`] frames
#[derive(Clone, Default)]
pub struct FakeWakeWord {
    running: Arc<AtomicBool>,
    starts: Arc<AtomicUsize>,
}

impl FakeWakeWord {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

impl WakeWordDetector for FakeWakeWord {
    fn start(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn process(&mut self, frame: &Frame) -> Result<bool> {
        if !self.is_running() {
            return Err(Error::WakeWord("detector not started".to_string()));
        }
        Ok(frame.samples().first() == Some(&WAKE_MARKER))
    }

    fn keyword(&self) -> &str {
        "computer"
    }
}

/// Scripted frames, then paced silence up to a limit, then end of input
pub struct ScriptedSource {
    frames: VecDeque<Frame>,
    idle_left: usize,
    pace: Duration,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
            idle_left: 0,
            pace: Duration::from_millis(2),
        }
    }

    /// After the script, yield up to `n` silent frames before closing
    #[must_use]
    pub fn then_silence(mut self, n: usize) -> Self {
        self.idle_left = n;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn format(&self) -> FrameFormat {
        format()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.frames.pop_front() {
            return Ok(Some(frame));
        }
        if self.idle_left == 0 {
            return Ok(None);
        }
        self.idle_left -= 1;
        std::thread::sleep(self.pace);
        Ok(Some(silence_frame()))
    }
}

/// Small thresholds: K=3, M=5, wait 40 frames, pre-roll 2
#[must_use]
pub fn recorder_settings() -> RecorderSettings {
    RecorderSettings {
        start_frames: 3,
        end_silence_frames: 5,
        max_wait_frames: 40,
        pre_roll_frames: 2,
        ..RecorderSettings::default()
    }
}

#[must_use]
pub fn settings() -> AssistantSettings {
    AssistantSettings {
        format: format(),
        recorder: recorder_settings(),
        apology: Some("Sorry, something went wrong.".to_string()),
        system_prompt: "You are a test assistant.".to_string(),
        ..AssistantSettings::default()
    }
}

/// Everything a test needs to poke at the assistant's collaborators
pub struct Fakes {
    pub wake_word: FakeWakeWord,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub dispatcher: Arc<dyn Dispatcher>,
    pub speech: Arc<FakeSpeech>,
}

impl Fakes {
    pub fn new(transcriber: ScriptedTranscriber, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            wake_word: FakeWakeWord::default(),
            transcriber: Arc::new(transcriber),
            dispatcher,
            speech: Arc::new(FakeSpeech::new(Duration::from_secs(10))),
        }
    }

    #[must_use]
    pub fn with_speech(mut self, speech: FakeSpeech) -> Self {
        self.speech = Arc::new(speech);
        self
    }

    fn collaborators(&self) -> Collaborators {
        let detector = || SpeechDetector::new(EnergyGate::new(0.01), Box::new(EnergyOnly));
        Collaborators {
            wake_word: Box::new(self.wake_word.clone()),
            command_detector: detector(),
            barge_in: BargeInDetector::new(detector(), 1),
            transcriber: Arc::clone(&self.transcriber) as Arc<dyn Transcriber>,
            dispatcher: Arc::clone(&self.dispatcher),
            speech: Arc::clone(&self.speech) as Arc<dyn SpeechSink>,
        }
    }
}

/// Build an idle assistant over `fakes`
pub fn build_assistant(settings: AssistantSettings, fakes: &Fakes) -> (Assistant, Notifier) {
    let notifier = Notifier::new(DEFAULT_CAPACITY);
    let (_handle, mailbox) = mailbox();
    let assistant = Assistant::new(settings, fakes.collaborators(), notifier.clone(), mailbox);
    (assistant, notifier)
}

/// Feed frames one at a time
pub fn feed(assistant: &mut Assistant, frames: Vec<Frame>) {
    for frame in frames {
        assistant.on_frame(frame).unwrap();
    }
}

/// Handle events until `done` holds or `timeout` passes; true if it held
pub fn pump_until(
    assistant: &mut Assistant,
    timeout: Duration,
    done: impl Fn(&Assistant) -> bool,
) -> bool {
    let started = Instant::now();
    loop {
        assistant.process_pending();
        if done(assistant) {
            return true;
        }
        if started.elapsed() > timeout {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Feed the frames that make one complete command: K speech + M silence
pub fn say_command(assistant: &mut Assistant) {
    let recorder = assistant.settings().recorder;
    feed(assistant, frames(recorder.start_frames, speech_frame));
    feed(assistant, frames(recorder.end_silence_frames, silence_frame));
}
