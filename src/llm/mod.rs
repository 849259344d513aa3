//! Command dispatch
//!
//! A [`Dispatcher`] turns the conversation history (ending with the user's
//! latest command) into a reply. [`CommandHandler`] intercepts restart
//! requests before anything reaches the model.

mod openai;
mod tools;

pub use openai::OpenAiChat;
pub use tools::{CurrentTime, Tool, ToolRegistry};

use crate::Result;
use crate::assistant::{Message, Role};

/// What to do with a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Say this
    Reply(String),
    /// Tear down and recreate the assistant
    Restart,
}

/// Produces replies from conversation history
pub trait Dispatcher: Send + Sync {
    /// Respond to the last user turn in `history`
    ///
    /// Implementations may append intermediate turns (tool requests and
    /// results) to `history`. The final reply is returned, not appended.
    ///
    /// # Errors
    ///
    /// Returns error if the model or a tool fails
    fn respond(&self, history: &mut Vec<Message>) -> Result<Dispatch>;
}

/// Phrases that request a restart, matched against the whole command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPhrases(Vec<String>);

impl RestartPhrases {
    #[must_use]
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            phrases
                .into_iter()
                .map(|p| normalize_command(p.as_ref()))
                .filter(|p| !p.is_empty())
                .collect(),
        )
    }

    /// Whether `command` is exactly one of the phrases
    ///
    /// Case, surrounding whitespace and trailing punctuation are ignored.
    #[must_use]
    pub fn matches(&self, command: &str) -> bool {
        let command = normalize_command(command);
        self.0.iter().any(|p| *p == command)
    }
}

impl Default for RestartPhrases {
    fn default() -> Self {
        Self::new(["restart", "restart yourself"])
    }
}

fn normalize_command(text: &str) -> String {
    text.trim()
        .trim_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase()
}

/// Restart detection in front of another dispatcher
pub struct CommandHandler<D> {
    restart: RestartPhrases,
    inner: D,
}

impl<D: Dispatcher> CommandHandler<D> {
    #[must_use]
    pub const fn new(restart: RestartPhrases, inner: D) -> Self {
        Self { restart, inner }
    }
}

impl<D: Dispatcher> Dispatcher for CommandHandler<D> {
    fn respond(&self, history: &mut Vec<Message>) -> Result<Dispatch> {
        let command = history
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::content)
            .unwrap_or_default();

        if self.restart.matches(command) {
            tracing::info!(command, "restart phrase recognized");
            return Ok(Dispatch::Restart);
        }

        self.inner.respond(history)
    }
}
