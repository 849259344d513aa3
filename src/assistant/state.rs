//! States, control events and turn results

use std::fmt;

use serde::Deserialize;

use super::{Message, SpeechCompletion};

/// Where the conversation loop is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssistantState {
    /// Not listening; no session
    Idle,
    /// Feeding frames to the wake word detector
    ListeningForWakeWord,
    /// Segmenting the user's command
    ListeningForCommand,
    /// Transcribing and generating a reply off the frame thread
    ProcessingCommand,
    /// Playing the reply; listening only for barge-in
    Speaking,
}

impl AssistantState {
    /// Short label for logs and status lines
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ListeningForWakeWord => "listening for wake word",
            Self::ListeningForCommand => "listening for command",
            Self::ProcessingCommand => "processing",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for AssistantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to go when a command transcribes to nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyTranscriptPolicy {
    /// Back to waiting for the wake word
    #[default]
    WakeWord,
    /// Keep listening for a command
    Command,
}

/// Input to the state machine other than audio frames
#[derive(Debug)]
pub enum Event {
    /// Begin listening
    Start,
    /// Skip the wake word and listen for a command now
    Activate,
    /// Stop everything and return to idle
    Stop,
    /// Stop and leave the run loop
    Shutdown,
    /// A processing job finished
    Processed(ProcessedTurn),
    /// A speak task ended
    SpeechFinished(SpeechCompletion),
}

/// Result of one processing job
#[derive(Debug)]
pub struct ProcessedTurn {
    /// Turn this job was started for; stale turns are ignored
    pub turn: u64,
    /// What the user said (empty if nothing)
    pub transcript: String,
    /// What to do next
    pub outcome: TurnOutcome,
    /// Session history after dispatch
    pub history: Vec<Message>,
}

/// What processing decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing intelligible was said
    EmptyTranscript,
    /// Speak this reply
    Reply(String),
    /// Dispatch failed; speak this apology
    Apology(String),
    /// Dispatch produced nothing to say
    NoReply,
    /// The user asked for a restart
    Restart,
}

/// Why [`Assistant::run`](super::Assistant::run) returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// Shutdown was requested
    Shutdown,
    /// The user asked for a restart; the caller should rebuild and rerun
    Restart,
    /// The frame source ended
    SourceClosed,
}
