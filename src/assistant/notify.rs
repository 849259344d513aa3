//! Observer notifications
//!
//! Fire-and-forget fan-out to UI sinks. Slow or absent subscribers never
//! block the frame loop.

use tokio::sync::broadcast;

use super::{AssistantState, SessionId};

/// Default subscriber buffer
pub const DEFAULT_CAPACITY: usize = 256;

/// Something an observer may want to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantEvent {
    /// The state machine moved
    StateChanged {
        from: AssistantState,
        to: AssistantState,
    },
    /// A conversation session began
    SessionStarted { id: SessionId },
    /// A conversation session ended
    SessionEnded { id: SessionId },
    /// An utterance was captured and handed to processing
    UtteranceCaptured { frames: usize },
    /// What the user said
    Transcript { text: String },
    /// What the assistant will say
    Reply { text: String },
}

/// Broadcasts [`AssistantEvent`]s
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<AssistantEvent>,
}

impl Notifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive events from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; dropped if nobody listens
    pub fn emit(&self, event: AssistantEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("no observers");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
