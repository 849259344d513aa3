//! Aerion - wake-word voice assistant
//!
//! This library provides the conversation loop of a local voice assistant:
//! - Frame classification (energy gate + VAD) and command segmentation
//! - Wake word detection, STT and TTS behind swappable traits
//! - The conversation state machine with barge-in
//! - Cancellable speech output
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Microphone frames                   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Assistant                         │
//! │  Wake Word │ SegmentRecorder │ Barge-in │ Speaker    │
//! └────────────────────┬────────────────────────────────┘
//!                      │ worker threads
//! ┌────────────────────▼────────────────────────────────┐
//! │          Collaborators (OpenAI-compatible)           │
//! │        STT  │  Chat + tools  │  TTS                  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod assistant;
pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
