//! Wake word detection
//!
//! Detects wake words in audio stream to activate the assistant.
//! Uses a hybrid approach: local energy segmentation picks out short bursts of
//! speech, and a background worker transcribes each burst and checks it for
//! the keyword. The frame thread never waits on the network.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use super::{EnergyGate, Frame, FrameFormat, Transcriber};
use crate::{Error, Result};

/// Energy threshold at sensitivity 0
const MAX_ENERGY_THRESHOLD: f32 = 0.06;

/// Lowest energy threshold, reached at sensitivity 1
const MIN_ENERGY_THRESHOLD: f32 = 0.005;

/// Minimum speech in a candidate segment
const MIN_SPEECH_SECS: f32 = 0.3;

/// Silence that closes a candidate segment
const END_SILENCE_SECS: f32 = 0.5;

/// Longest candidate segment; wake phrases are short
const MAX_SEGMENT_SECS: f32 = 3.0;

/// Source of wake events
pub trait WakeWordDetector {
    /// Begin listening
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot be started
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stop listening and drop any partial state
    fn stop(&mut self) {}

    /// Feed one frame; true means the keyword was heard
    ///
    /// Fires at most once per spoken keyword.
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails
    fn process(&mut self, frame: &Frame) -> Result<bool>;

    /// The keyword being listened for
    fn keyword(&self) -> &str;
}

/// State of the local segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for speech
    Idle,
    /// Detected potential speech, accumulating
    Listening,
    /// Segment handed to the verifier, waiting for its verdict
    Verifying,
}

struct Verifier {
    segments: Sender<(Vec<i16>, u32)>,
    verdicts: Receiver<bool>,
    _worker: JoinHandle<()>,
}

impl Verifier {
    fn spawn(keyword: String, transcriber: Arc<dyn Transcriber>) -> Result<Self> {
        let (segments, segment_rx) = mpsc::channel::<(Vec<i16>, u32)>();
        let (verdict_tx, verdicts) = mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("aerion-wake".to_string())
            .spawn(move || {
                // Exits once the detector drops its sender
                while let Ok((pcm, sample_rate)) = segment_rx.recv() {
                    let heard = match transcriber.transcribe(&pcm, sample_rate) {
                        Ok(transcript) => contains_keyword(&transcript, &keyword),
                        Err(e) => {
                            tracing::warn!(error = %e, "wake word verification failed");
                            false
                        }
                    };
                    if verdict_tx.send(heard).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| Error::WakeWord(format!("failed to spawn verifier: {e}")))?;

        Ok(Self {
            segments,
            verdicts,
            _worker: worker,
        })
    }
}

/// Keyword spotting by transcribing short speech bursts
pub struct TranscriptWakeWord {
    keyword: String,
    gate: EnergyGate,
    format: FrameFormat,
    transcriber: Arc<dyn Transcriber>,
    verifier: Option<Verifier>,
    state: DetectorState,
    speech_buffer: Vec<i16>,
    speech_frames: usize,
    silence_frames: usize,
    min_speech_frames: usize,
    end_silence_frames: usize,
    max_segment_frames: usize,
}

impl TranscriptWakeWord {
    /// Create a detector for `keyword`
    ///
    /// `sensitivity` in [0, 1] lowers the energy needed to consider a burst.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the keyword is blank or sensitivity
    /// is out of range
    pub fn new(
        keyword: &str,
        sensitivity: f32,
        format: FrameFormat,
        transcriber: Arc<dyn Transcriber>,
    ) -> Result<Self> {
        let keyword = normalize(keyword);
        if keyword.is_empty() {
            return Err(Error::Config("wake word must not be empty".to_string()));
        }
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(Error::Config(format!(
                "wake word sensitivity must be in [0, 1], got {sensitivity}"
            )));
        }

        let threshold = energy_threshold(sensitivity);
        tracing::debug!(keyword, sensitivity, threshold, "wake word detector initialized");

        Ok(Self {
            keyword,
            gate: EnergyGate::new(threshold),
            format,
            transcriber,
            verifier: None,
            state: DetectorState::Idle,
            speech_buffer: Vec::new(),
            speech_frames: 0,
            silence_frames: 0,
            min_speech_frames: format.frames_for(MIN_SPEECH_SECS).max(1),
            end_silence_frames: format.frames_for(END_SILENCE_SECS).max(1),
            max_segment_frames: format.frames_for(MAX_SEGMENT_SECS),
        })
    }

    /// Current segmenter state
    #[must_use]
    pub const fn state(&self) -> DetectorState {
        self.state
    }

    fn reset(&mut self) {
        self.state = DetectorState::Idle;
        self.speech_buffer.clear();
        self.speech_frames = 0;
        self.silence_frames = 0;
    }

    fn poll_verdict(&mut self) -> bool {
        let Some(verifier) = &self.verifier else {
            return false;
        };
        match verifier.verdicts.try_recv() {
            Ok(heard) => {
                self.reset();
                if heard {
                    tracing::info!(keyword = %self.keyword, "wake word detected");
                }
                heard
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                tracing::warn!("wake word verifier exited");
                self.verifier = None;
                self.reset();
                false
            }
        }
    }

    fn submit_segment(&mut self) {
        let pcm = std::mem::take(&mut self.speech_buffer);
        let Some(verifier) = &self.verifier else {
            self.reset();
            return;
        };
        tracing::debug!(samples = pcm.len(), "speech segment complete, verifying");
        if verifier.segments.send((pcm, self.format.sample_rate())).is_ok() {
            self.state = DetectorState::Verifying;
        } else {
            self.reset();
        }
    }
}

impl WakeWordDetector for TranscriptWakeWord {
    fn start(&mut self) -> Result<()> {
        self.reset();
        if self.verifier.is_none() {
            self.verifier = Some(Verifier::spawn(
                self.keyword.clone(),
                Arc::clone(&self.transcriber),
            )?);
        }
        Ok(())
    }

    fn stop(&mut self) {
        // Dropping the sender ends the worker after any in-flight request;
        // a late verdict is discarded with the receiver
        self.verifier = None;
        self.reset();
    }

    fn process(&mut self, frame: &Frame) -> Result<bool> {
        if self.verifier.is_none() {
            return Err(Error::WakeWord("detector not started".to_string()));
        }

        if self.state == DetectorState::Verifying {
            return Ok(self.poll_verdict());
        }

        let is_speech = self.gate.passes(frame);

        match self.state {
            DetectorState::Idle => {
                if is_speech {
                    self.state = DetectorState::Listening;
                    self.speech_buffer.clear();
                    self.speech_buffer.extend_from_slice(frame.samples());
                    self.speech_frames = 1;
                    self.silence_frames = 0;
                    tracing::trace!("speech detected, listening");
                }
            }
            DetectorState::Listening => {
                self.speech_buffer.extend_from_slice(frame.samples());
                if is_speech {
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                } else {
                    self.silence_frames += 1;
                }

                let segment_frames = self.speech_buffer.len() / self.format.frame_len();
                if self.silence_frames >= self.end_silence_frames {
                    if self.speech_frames >= self.min_speech_frames {
                        self.submit_segment();
                    } else {
                        tracing::trace!("burst too short - resetting");
                        self.reset();
                    }
                } else if segment_frames >= self.max_segment_frames {
                    tracing::trace!("segment too long - resetting");
                    self.reset();
                }
            }
            DetectorState::Verifying => {}
        }

        Ok(false)
    }

    fn keyword(&self) -> &str {
        &self.keyword
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Map sensitivity in [0, 1] to an RMS threshold
#[must_use]
pub fn energy_threshold(sensitivity: f32) -> f32 {
    (MAX_ENERGY_THRESHOLD * (1.0 - sensitivity.clamp(0.0, 1.0))).max(MIN_ENERGY_THRESHOLD)
}

/// Check if transcribed text contains the keyword
#[must_use]
pub fn contains_keyword(transcript: &str, keyword: &str) -> bool {
    normalize(transcript).contains(&normalize(keyword))
}
