//! PCM frames, frame format and captured utterances

use std::io::Cursor;
use std::time::Duration;

use crate::{Error, Result};

/// Sample rates the segmentation pipeline accepts
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [16_000, 48_000];

/// Frame durations (ms) the VAD accepts
pub const SUPPORTED_FRAME_MS: [u32; 3] = [10, 20, 30];

/// Shared shape of every frame in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    sample_rate: u32,
    frame_ms: u32,
}

impl FrameFormat {
    /// Create a validated frame format
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unsupported rates or durations
    pub fn new(sample_rate: u32, frame_ms: u32) -> Result<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(Error::Config(format!(
                "unsupported sample rate {sample_rate} Hz (expected one of {SUPPORTED_SAMPLE_RATES:?})"
            )));
        }
        if !SUPPORTED_FRAME_MS.contains(&frame_ms) {
            return Err(Error::Config(format!(
                "unsupported frame duration {frame_ms} ms (expected one of {SUPPORTED_FRAME_MS:?})"
            )));
        }
        Ok(Self {
            sample_rate,
            frame_ms,
        })
    }

    /// Sample rate in Hz
    #[must_use]
    pub const fn sample_rate(self) -> u32 {
        self.sample_rate
    }

    /// Frame duration in milliseconds
    #[must_use]
    pub const fn frame_ms(self) -> u32 {
        self.frame_ms
    }

    /// Number of samples per frame
    #[must_use]
    pub const fn frame_len(self) -> usize {
        (self.sample_rate / 1000 * self.frame_ms) as usize
    }

    /// Wall-clock duration of one frame
    #[must_use]
    pub const fn frame_duration(self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }

    /// Whole number of frames that fit in `secs` (rounded down)
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn frames_for(self, secs: f32) -> usize {
        if secs <= 0.0 {
            return 0;
        }
        (secs * 1000.0 / self.frame_ms as f32).floor() as usize
    }
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_ms: 30,
        }
    }
}

/// One fixed-size block of 16-bit mono PCM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    samples: Vec<i16>,
}

impl Frame {
    /// Wrap samples as a frame of `format`
    ///
    /// # Errors
    ///
    /// A length mismatch is a configuration error: every frame in a session
    /// must share one shape
    pub fn new(samples: Vec<i16>, format: FrameFormat) -> Result<Self> {
        if samples.len() != format.frame_len() {
            return Err(Error::Config(format!(
                "frame has {} samples, format expects {}",
                samples.len(),
                format.frame_len()
            )));
        }
        Ok(Self { samples })
    }

    /// A frame of digital silence
    #[must_use]
    pub fn silence(format: FrameFormat) -> Self {
        Self {
            samples: vec![0; format.frame_len()],
        }
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Consume the frame, returning its samples
    #[must_use]
    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }
}

/// A finalized user command, from pre-roll through the closing silence
#[derive(Debug)]
pub struct Utterance {
    samples: Vec<i16>,
    frame_count: usize,
    format: FrameFormat,
}

impl Utterance {
    /// Concatenate frames into an utterance
    #[must_use]
    pub fn from_frames(frames: Vec<Frame>, format: FrameFormat) -> Self {
        let frame_count = frames.len();
        let mut samples = Vec::with_capacity(frame_count * format.frame_len());
        for frame in frames {
            samples.extend(frame.into_samples());
        }
        Self {
            samples,
            frame_count,
            format,
        }
    }

    /// PCM samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of frames captured
    #[must_use]
    pub const fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Size of the PCM payload in bytes
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.samples.len() * std::mem::size_of::<i16>()
    }

    /// Sample rate of the captured audio
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.format.sample_rate()
    }

    /// Audio duration
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.format.frame_duration() * u32::try_from(self.frame_count).unwrap_or(u32::MAX)
    }

    /// Encode as a 16-bit mono WAV file
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate())
    }
}

/// Encode 16-bit mono samples as WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
    }

    Ok(cursor.into_inner())
}

/// Convert a float sample in [-1, 1] to 16-bit PCM
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_validation() {
        assert!(FrameFormat::new(16_000, 30).is_ok());
        assert!(FrameFormat::new(48_000, 10).is_ok());
        assert!(FrameFormat::new(44_100, 30).unwrap_err().is_fatal());
        assert!(FrameFormat::new(16_000, 25).is_err());
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(FrameFormat::new(16_000, 30).unwrap().frame_len(), 480);
        assert_eq!(FrameFormat::new(48_000, 20).unwrap().frame_len(), 960);
    }

    #[test]
    fn test_frames_for_rounds_down() {
        let format = FrameFormat::default();
        assert_eq!(format.frames_for(2.0), 66);
        assert_eq!(format.frames_for(0.5), 16);
        assert_eq!(format.frames_for(0.0), 0);
    }

    #[test]
    fn test_frame_length_mismatch_is_fatal() {
        let err = Frame::new(vec![0; 100], FrameFormat::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_utterance_from_frames() {
        let format = FrameFormat::default();
        let frames = vec![Frame::silence(format); 4];
        let utterance = Utterance::from_frames(frames, format);
        assert_eq!(utterance.frame_count(), 4);
        assert_eq!(utterance.byte_len(), 4 * 480 * 2);
        assert_eq!(utterance.duration(), Duration::from_millis(120));
    }

    #[test]
    fn test_wav_header() {
        let wav = samples_to_wav(&[0, 100, -100], 16_000).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 6);
    }
}
