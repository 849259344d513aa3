//! Text-to-speech (TTS) processing
//!
//! A [`SpeechSink`] synthesizes and plays text, blocking the calling thread
//! until playback ends or its cancellation token fires.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio_util::sync::CancellationToken;

use super::playback::{AudioPlayback, PlaybackOutcome, decode_mp3};
use crate::{Error, Result};

/// How often a pending synthesis or speaking command checks for cancellation
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Speaks text aloud
pub trait SpeechSink: Send + Sync {
    /// Synthesize and play `text`
    ///
    /// Blocks until playback completes or `cancel` is triggered; on
    /// cancellation it must return promptly.
    ///
    /// # Errors
    ///
    /// Returns error if synthesis or playback fails
    fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()>;
}

/// `OpenAI` speech synthesis played through the default output device
pub struct CloudSpeech {
    client: reqwest::blocking::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    voice: String,
    speed: f32,
}

impl CloudSpeech {
    /// Create a new `OpenAI` TTS sink
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the HTTP client cannot be built
    pub fn new(
        api_key: SecretString,
        base_url: String,
        model: String,
        voice: String,
        speed: f32,
    ) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            voice,
            speed,
        })
    }

    /// Synthesize text to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        fetch_speech(self.request(text))
    }

    /// Synthesize on a fetch thread, giving up as soon as `cancel` fires
    ///
    /// Returns `None` when cancelled. An abandoned request runs out on its
    /// own thread, bounded by the client timeout.
    fn synthesize_cancellable(
        &self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Vec<u8>>> {
        let request = self.request(text);
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("aerion-tts-fetch".to_string())
            .spawn(move || {
                // The receiver is gone if speech was cancelled meanwhile
                let _ = tx.send(fetch_speech(request));
            })?;

        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return result.map(Some),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Tts("synthesis thread exited".to_string()));
                }
            }
        }
    }

    fn request(&self, text: &str) -> reqwest::blocking::RequestBuilder {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
        };

        self.client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
    }
}

fn fetch_speech(request: reqwest::blocking::RequestBuilder) -> Result<Vec<u8>> {
    let response = request.send()?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().unwrap_or_default();
        return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
    }

    Ok(response.bytes()?.to_vec())
}

impl SpeechSink for CloudSpeech {
    fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let Some(mp3) = self.synthesize_cancellable(text, cancel)? else {
            tracing::debug!("speech cancelled during synthesis");
            return Ok(());
        };
        if cancel.is_cancelled() {
            tracing::debug!("speech cancelled before playback");
            return Ok(());
        }

        let audio = decode_mp3(&mp3)?;
        tracing::debug!(duration = ?audio.duration(), "playing synthesized speech");

        let playback = AudioPlayback::new(audio.sample_rate)?;
        if playback.play(audio.samples, cancel)? == PlaybackOutcome::Cancelled {
            tracing::debug!("speech cancelled during playback");
        }
        Ok(())
    }
}

/// Local speech command (`say` or `espeak`) run as a child process
pub struct CommandSpeech {
    program: PathBuf,
    voice: Option<String>,
}

impl CommandSpeech {
    /// Use a specific program
    #[must_use]
    pub const fn new(program: PathBuf, voice: Option<String>) -> Self {
        Self { program, voice }
    }

    /// Find a speech command on `PATH`
    ///
    /// # Errors
    ///
    /// Returns error if neither `say` nor `espeak` is installed
    pub fn detect(voice: Option<String>) -> Result<Self> {
        ["say", "espeak-ng", "espeak"]
            .iter()
            .find_map(|name| which::which(name).ok())
            .map(|program| {
                tracing::debug!(program = %program.display(), "using local speech command");
                Self::new(program, voice)
            })
            .ok_or_else(|| {
                Error::Config("no local speech command found (install say or espeak)".to_string())
            })
    }

    fn spawn(&self, text: &str) -> Result<Child> {
        let mut command = Command::new(&self.program);
        if let Some(voice) = &self.voice {
            command.arg("-v").arg(voice);
        }
        // Replies such as "-3 degrees" must not parse as options
        command
            .arg("--")
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Tts(format!("failed to start {}: {e}", self.program.display())))
    }
}

impl SpeechSink for CommandSpeech {
    fn speak(&self, text: &str, cancel: &CancellationToken) -> Result<()> {
        let mut child = self.spawn(text)?;

        loop {
            if cancel.is_cancelled() {
                if let Err(e) = child.kill() {
                    tracing::debug!(error = %e, "speech command already exited");
                }
                child.wait()?;
                return Ok(());
            }
            if let Some(status) = child.try_wait()? {
                if !status.success() {
                    return Err(Error::Tts(format!("speech command exited with {status}")));
                }
                return Ok(());
            }
            std::thread::sleep(CANCEL_POLL_INTERVAL);
        }
    }
}
