//! Speech-to-text (STT) processing

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use super::{Utterance, samples_to_wav};
use crate::{Error, Result};

/// Default `OpenAI` API root
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns captured PCM into text
pub trait Transcriber: Send + Sync {
    /// Transcribe 16-bit mono PCM
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String>;
}

/// Transcribe an utterance, treating any failure as "nothing was said"
///
/// The result is trimmed; an empty string means no usable speech.
pub fn transcribe_or_empty(transcriber: &dyn Transcriber, utterance: &Utterance) -> String {
    match transcriber.transcribe(utterance.samples(), utterance.sample_rate()) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "transcription failed, treating as empty");
            String::new()
        }
    }
}

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// `OpenAI` Whisper client
pub struct WhisperTranscriber {
    client: reqwest::blocking::Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    min_duration: Duration,
}

impl WhisperTranscriber {
    /// Create a new Whisper client
    ///
    /// # Errors
    ///
    /// Returns error if API key is empty or the HTTP client cannot be built
    pub fn new(api_key: SecretString, model: String, base_url: String) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            min_duration: Duration::ZERO,
        })
    }

    /// Skip the request for clips shorter than `min`
    #[must_use]
    pub const fn with_min_duration(mut self, min: Duration) -> Self {
        self.min_duration = min;
        self
    }
}

impl Transcriber for WhisperTranscriber {
    #[allow(clippy::cast_precision_loss)]
    fn transcribe(&self, pcm: &[i16], sample_rate: u32) -> Result<String> {
        let duration = Duration::from_secs_f64(pcm.len() as f64 / f64::from(sample_rate.max(1)));
        if duration < self.min_duration {
            tracing::debug!(?duration, "clip too short, skipping transcription");
            return Ok(String::new());
        }

        let audio = samples_to_wav(pcm, sample_rate)?;
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
