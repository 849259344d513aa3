//! Voice activity classification
//!
//! A frame counts as speech only if it clears the RMS [`EnergyGate`] *and*
//! the classifier calls it voiced. The classifier is never consulted for
//! quiet frames.

use serde::Deserialize;
use webrtc_vad::{SampleRate, Vad, VadMode};

use super::{EnergyGate, Frame, FrameFormat};
use crate::{Error, Result};

/// Per-frame voiced/unvoiced classifier
pub trait VoiceActivityClassifier {
    /// Classify one frame
    ///
    /// # Errors
    ///
    /// Returns error if the classifier rejects the frame
    fn is_speech(&mut self, frame: &Frame) -> Result<bool>;
}

/// Which classifier runs behind the energy gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadBackend {
    /// `WebRTC` GMM classifier
    #[default]
    Webrtc,
    /// Trust the energy gate alone
    Energy,
}

/// `WebRTC` VAD wrapper
///
/// The underlying handle is not `Send`; build it on the thread that feeds it.
pub struct WebRtcClassifier {
    vad: Vad,
}

impl WebRtcClassifier {
    /// Create a classifier for `format` at aggressiveness 0..=3
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported rate or aggressiveness
    pub fn new(format: FrameFormat, aggressiveness: u8) -> Result<Self> {
        let rate = match format.sample_rate() {
            16_000 => SampleRate::Rate16kHz,
            48_000 => SampleRate::Rate48kHz,
            other => {
                return Err(Error::Config(format!(
                    "VAD does not support {other} Hz"
                )));
            }
        };
        let mode = match aggressiveness {
            0 => VadMode::Quality,
            1 => VadMode::LowBitrate,
            2 => VadMode::Aggressive,
            3 => VadMode::VeryAggressive,
            other => {
                return Err(Error::Config(format!(
                    "VAD aggressiveness must be 0..=3, got {other}"
                )));
            }
        };

        tracing::debug!(
            sample_rate = format.sample_rate(),
            aggressiveness,
            "webrtc vad initialized"
        );

        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, mode),
        })
    }
}

impl VoiceActivityClassifier for WebRtcClassifier {
    fn is_speech(&mut self, frame: &Frame) -> Result<bool> {
        self.vad
            .is_voice_segment(frame.samples())
            .map_err(|()| Error::Vad(format!("rejected frame of {} samples", frame.len())))
    }
}

/// Classifier that accepts everything the gate lets through
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyOnly;

impl VoiceActivityClassifier for EnergyOnly {
    fn is_speech(&mut self, _frame: &Frame) -> Result<bool> {
        Ok(true)
    }
}

/// Build the configured classifier
///
/// # Errors
///
/// Returns a configuration error if the `WebRTC` classifier cannot be built
pub fn build_classifier(
    backend: VadBackend,
    format: FrameFormat,
    aggressiveness: u8,
) -> Result<Box<dyn VoiceActivityClassifier>> {
    Ok(match backend {
        VadBackend::Webrtc => Box::new(WebRtcClassifier::new(format, aggressiveness)?),
        VadBackend::Energy => Box::new(EnergyOnly),
    })
}

/// Energy gate composed with a classifier
pub struct SpeechDetector {
    gate: EnergyGate,
    classifier: Box<dyn VoiceActivityClassifier>,
}

impl SpeechDetector {
    /// Compose a gate and a classifier
    #[must_use]
    pub fn new(gate: EnergyGate, classifier: Box<dyn VoiceActivityClassifier>) -> Self {
        Self { gate, classifier }
    }

    /// Whether `frame` is speech
    ///
    /// # Errors
    ///
    /// Returns error if the classifier fails on a frame that passed the gate
    pub fn classify(&mut self, frame: &Frame) -> Result<bool> {
        if !self.gate.passes(frame) {
            return Ok(false);
        }
        self.classifier.is_speech(frame)
    }
}

/// Detects the user talking over playback
///
/// Fires once `min_speech_frames` consecutive frames classify as speech.
pub struct BargeInDetector {
    detector: SpeechDetector,
    min_speech_frames: usize,
    run: usize,
}

impl BargeInDetector {
    /// Create a barge-in detector
    #[must_use]
    pub fn new(detector: SpeechDetector, min_speech_frames: usize) -> Self {
        Self {
            detector,
            min_speech_frames: min_speech_frames.max(1),
            run: 0,
        }
    }

    /// Feed one frame, returning true when speech should interrupt playback
    ///
    /// # Errors
    ///
    /// Returns error if classification fails
    pub fn detect_any_speech(&mut self, frame: &Frame) -> Result<bool> {
        if self.detector.classify(frame)? {
            self.run += 1;
        } else {
            self.run = 0;
        }
        Ok(self.run >= self.min_speech_frames)
    }

    /// Forget any partial speech run
    pub const fn reset(&mut self) {
        self.run = 0;
    }
}
