//! Supervisor that keeps the assistant running
//!
//! Each run builds fresh collaborators on a blocking thread, drives the frame
//! loop until it exits, and decides whether to start another run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::assistant::{
    Assistant, AssistantEvent, Collaborators, DEFAULT_CAPACITY, Mailbox, Notifier, RunExit,
    mailbox,
};
use crate::config::{Config, TtsBackend};
use crate::llm::{CommandHandler, OpenAiChat, ToolRegistry};
use crate::voice::{
    BargeInDetector, CloudSpeech, CommandSpeech, EnergyGate, MicrophoneSource, SpeechDetector,
    SpeechSink, Transcriber, TranscriptWakeWord, WhisperTranscriber, build_classifier,
};
use crate::Result;

/// First retry delay after a failed run
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Longest retry delay
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// The Aerion daemon
pub struct Daemon {
    config: Config,
    notifier: Notifier,
    shutdown: CancellationToken,
}

impl Daemon {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            notifier: Notifier::new(DEFAULT_CAPACITY),
            shutdown: CancellationToken::new(),
        }
    }

    /// Receive assistant events across restarts
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AssistantEvent> {
        self.notifier.subscribe()
    }

    /// Token that stops the daemon when cancelled
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until Ctrl-C, shutdown, or a fatal error
    ///
    /// # Errors
    ///
    /// Returns the first fatal (configuration) error
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received");
                shutdown.cancel();
            }
        });

        let mut backoff = INITIAL_BACKOFF;
        let mut runs: u32 = 0;

        loop {
            runs += 1;
            let (handle, mailbox) = mailbox();
            let config = self.config.clone();
            let notifier = self.notifier.clone();

            tracing::info!(run = runs, "starting assistant");
            let mut session =
                tokio::task::spawn_blocking(move || run_session(&config, notifier, mailbox));

            let outcome = tokio::select! {
                joined = &mut session => joined,
                () = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested");
                    handle.shutdown();
                    session.await
                }
            };

            let delay = match outcome {
                Ok(Ok(RunExit::Shutdown)) => return Ok(()),
                Ok(Ok(RunExit::Restart)) => {
                    tracing::info!("restarting assistant");
                    backoff = INITIAL_BACKOFF;
                    continue;
                }
                Ok(Ok(RunExit::SourceClosed)) => {
                    tracing::warn!(retry_in = ?backoff, "audio source closed");
                    backoff
                }
                Ok(Err(e)) if e.is_fatal() => {
                    tracing::error!(error = %e, "assistant failed");
                    return Err(e);
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, retry_in = ?backoff, "assistant stopped");
                    backoff
                }
                Err(e) => {
                    tracing::error!(error = %e, retry_in = ?backoff, "assistant thread panicked");
                    backoff
                }
            };

            if self.shutdown.is_cancelled() {
                return Ok(());
            }

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown.cancelled() => return Ok(()),
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

/// One assistant lifetime on the current (blocking) thread
///
/// The VAD and the capture stream are not `Send`, so everything is built here.
fn run_session(config: &Config, notifier: Notifier, mailbox: Mailbox) -> Result<RunExit> {
    let settings = config.assistant_settings()?;
    let collaborators = build_collaborators(config)?;
    let mut source = MicrophoneSource::open(settings.format, config.audio.input_device.as_deref())?;

    let mut assistant = Assistant::new(settings, collaborators, notifier, mailbox);
    assistant.handle().start();

    if config.wake.enabled {
        tracing::info!(wake_word = %config.wake.keyword, "aerion ready");
    } else {
        tracing::info!("aerion ready (listening continuously)");
    }

    assistant.run(&mut source)
}

/// Build every engine the assistant drives
///
/// Creates blocking HTTP clients; call off the async runtime.
///
/// # Errors
///
/// Missing credentials or bad engine settings are configuration errors
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    let format = config.frame_format()?;
    let api_key = config.openai_key()?;

    let transcriber: Arc<dyn Transcriber> = Arc::new(
        WhisperTranscriber::new(
            api_key.clone(),
            config.stt.model.clone(),
            config.llm.base_url.clone(),
        )?
        .with_min_duration(Duration::from_secs_f32(config.stt.min_duration_secs.max(0.0))),
    );

    let wake_word = TranscriptWakeWord::new(
        &config.wake.keyword,
        config.wake.sensitivity,
        format,
        Arc::clone(&transcriber),
    )?;

    let command_detector = SpeechDetector::new(
        EnergyGate::new(config.audio.rms_threshold),
        build_classifier(config.audio.vad, format, config.audio.vad_aggressiveness)?,
    );
    let barge_in = BargeInDetector::new(
        SpeechDetector::new(
            EnergyGate::new(config.barge_in.rms_threshold),
            build_classifier(config.audio.vad, format, config.audio.vad_aggressiveness)?,
        ),
        config.barge_in.min_speech_frames,
    );

    let chat = OpenAiChat::new(
        api_key,
        config.llm.base_url.clone(),
        config.llm.model.clone(),
        config.llm.temperature,
        config.llm.max_tool_rounds,
        ToolRegistry::builtin(),
    )?;

    Ok(Collaborators {
        wake_word: Box::new(wake_word),
        command_detector,
        barge_in,
        transcriber,
        dispatcher: Arc::new(CommandHandler::new(config.restart_phrases(), chat)),
        speech: build_speech(config)?,
    })
}

/// The configured synthesizer, falling back to a local command without a key
///
/// # Errors
///
/// Returns error if no synthesizer is usable
pub fn build_speech(config: &Config) -> Result<Arc<dyn SpeechSink>> {
    match (config.tts.backend, config.api_keys.openai.clone()) {
        (TtsBackend::Openai, Some(key)) => Ok(Arc::new(CloudSpeech::new(
            key,
            config.llm.base_url.clone(),
            config.tts.model.clone(),
            config.tts.voice.clone(),
            config.tts.speed,
        )?)),
        (TtsBackend::Openai, None) => {
            tracing::warn!("no API key for cloud speech, using local speech command");
            Ok(Arc::new(CommandSpeech::detect(None)?))
        }
        (TtsBackend::Command, _) => Ok(Arc::new(CommandSpeech::detect(None)?)),
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("wake_word", &self.config.wake.keyword)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
