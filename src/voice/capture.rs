//! Audio capture from microphone
//!
//! The device callback converts whatever the hardware delivers into 16-bit
//! mono samples and queues them; [`MicrophoneSource::next_frame`] slices the
//! queue into fixed-size frames for the frame loop.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream};

use super::frame::f32_to_i16;
use super::{Frame, FrameFormat};
use crate::{Error, Result};

/// Longest a caller waits for a frame before reporting a stalled device
const FRAME_WAIT: Duration = Duration::from_millis(500);

/// Audio kept when the consumer falls behind
const MAX_QUEUED_SECS: usize = 5;

/// Produces fixed-size PCM frames
pub trait FrameSource {
    /// Shape of every frame this source yields
    fn format(&self) -> FrameFormat;

    /// Block until the next frame is available
    ///
    /// Returns `Ok(None)` once the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying device fails
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

#[derive(Default)]
struct Queue {
    samples: VecDeque<i16>,
    failed: Option<String>,
}

type SharedQueue = Arc<(Mutex<Queue>, Condvar)>;

/// Frames from an input device
///
/// Owns a live `cpal` stream, which is not `Send`; open it on the frame
/// thread.
pub struct MicrophoneSource {
    format: FrameFormat,
    queue: SharedQueue,
    _stream: Stream,
}

impl MicrophoneSource {
    /// Open `device_name` (or the default input device) and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no device supports `format`'s sample rate
    pub fn open(format: FrameFormat, device_name: Option<&str>) -> Result<Self> {
        let device = find_input_device(device_name)?;
        let sample_rate = SampleRate(format.sample_rate());

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| c.min_sample_rate() <= sample_rate && c.max_sample_rate() >= sample_rate)
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| {
                Error::Audio(format!(
                    "no input config supports {} Hz",
                    format.sample_rate()
                ))
            })?;

        let config = supported_config.with_sample_rate(sample_rate).config();
        let channels = usize::from(config.channels.max(1));
        let max_queued = format.sample_rate() as usize * MAX_QUEUED_SECS;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = format.sample_rate(),
            channels,
            frame_ms = format.frame_ms(),
            "audio capture initialized"
        );

        let queue: SharedQueue = Arc::new((Mutex::new(Queue::default()), Condvar::new()));
        let data_queue = Arc::clone(&queue);
        let error_queue = Arc::clone(&queue);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let (lock, ready) = &*data_queue;
                    let mut queue = lock.lock().unwrap_or_else(PoisonError::into_inner);
                    for chunk in data.chunks(channels) {
                        #[allow(clippy::cast_precision_loss)]
                        let mono = chunk.iter().sum::<f32>() / chunk.len() as f32;
                        queue.samples.push_back(f32_to_i16(mono));
                    }
                    let overflow = queue.samples.len().saturating_sub(max_queued);
                    queue.samples.drain(..overflow);
                    ready.notify_one();
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let (lock, ready) = &*error_queue;
                    lock.lock().unwrap_or_else(PoisonError::into_inner).failed =
                        Some(err.to_string());
                    ready.notify_one();
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            format,
            queue,
            _stream: stream,
        })
    }
}

impl FrameSource for MicrophoneSource {
    fn format(&self) -> FrameFormat {
        self.format
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let frame_len = self.format.frame_len();
        let (lock, ready) = &*self.queue;

        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut queue, wait) = ready
            .wait_timeout_while(guard, FRAME_WAIT, |q| {
                q.samples.len() < frame_len && q.failed.is_none()
            })
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(err) = queue.failed.take() {
            return Err(Error::Audio(err));
        }
        if wait.timed_out() && queue.samples.len() < frame_len {
            return Err(Error::Audio("input device stalled".to_string()));
        }

        let samples: Vec<i16> = queue.samples.drain(..frame_len).collect();
        drop(queue);
        Frame::new(samples, self.format).map(Some)
    }
}

fn find_input_device(name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n.contains(wanted)))
            .ok_or_else(|| Error::Config(format!("input device not found: {wanted}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string())),
    }
}

/// Names of available input and output devices
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<(Vec<String>, Vec<String>)> {
    let host = cpal::default_host();
    let inputs = host
        .input_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    let outputs = host
        .output_devices()
        .map_err(|e| Error::Audio(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .collect();
    Ok((inputs, outputs))
}
