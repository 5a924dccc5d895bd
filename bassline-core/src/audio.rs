//! # Audio Capture Module
//!
//! Real-time microphone / line-in capture through CPAL. Incoming buffers
//! are mixed down to mono `f32` and forwarded in fixed-size frames to the
//! analysis thread.
//!
//! ## Features
//! - Input device enumeration and selection by name
//! - `f32`, `i16` and `u16` device formats
//! - Stream errors forwarded to the owner instead of printed

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{Sender, TrySendError};
use anyhow::{Context, Result, anyhow};
use log::{error, info, warn};

/// Mono samples per frame sent to the analysis thread.
///
/// Small enough that several frames arrive between two 60 Hz ticks.
pub const FRAME_SIZE: usize = 512;

/// An open, playing input stream.
///
/// The stream stops when this is dropped.
pub struct AudioInput {
    stream: cpal::Stream,
    pub sample_rate: u32,
    pub device_name: String,
}

impl AudioInput {
    pub fn pause(&self) {
        if let Err(e) = self.stream.pause() {
            warn!(target: "audio", "Error pausing stream: {}", e);
        }
    }
}

/// Names of the host's input devices.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .context("Failed to enumerate input devices")?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device> {
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available")),
        Some(wanted) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| anyhow!("Input device not found: {}", wanted)),
    }
}

/// Starts capture from the named device, or the default input device.
///
/// # Arguments
/// * `device_name` - Exact device name from [`list_input_devices`]
/// * `frames` - Receives mono frames of [`FRAME_SIZE`] samples
/// * `errors` - Receives stream errors reported by the backend
///
/// # Returns
/// * `Ok(input)` - Playing stream plus its sample rate
/// * `Err(e)` - No device, unsupported format, or the stream failed to start
pub fn start_audio_capture(
    device_name: Option<&str>,
    frames: Sender<Vec<f32>>,
    errors: Sender<String>,
) -> Result<AudioInput> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;
    let name = device.name().unwrap_or_else(|_| "<unnamed>".to_string());
    info!(target: "audio", "Using audio input device: {}", name);

    let supported = device
        .default_input_config()
        .context("Failed to query default input config")?;
    let sample_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    info!(
        target: "audio",
        "Selected sample rate: {} Hz, {} channel(s), {:?}",
        sample_rate,
        channels,
        format
    );

    let stream = match format {
        cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, channels, frames, errors),
        cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, channels, frames, errors),
        cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, channels, frames, errors),
        other => Err(anyhow!("Unsupported input sample format: {:?}", other)),
    }?;

    stream.play().context("Failed to start input stream")?;

    Ok(AudioInput {
        stream,
        sample_rate,
        device_name: name,
    })
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    frames: Sender<Vec<f32>>,
    errors: Sender<String>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    // Accumulates mono samples until a full frame is ready.
    let mut pending: Vec<f32> = Vec::with_capacity(FRAME_SIZE * 2);
    let mut dropped: u64 = 0;
    let channels = channels.max(1);

    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            pending.extend(data.chunks(channels).map(|frame| {
                frame.iter().map(|&s| f32::from_sample(s)).sum::<f32>() / channels as f32
            }));

            while pending.len() >= FRAME_SIZE {
                let frame: Vec<f32> = pending.drain(..FRAME_SIZE).collect();
                if let Err(TrySendError::Full(_)) = frames.try_send(frame) {
                    dropped += 1;
                    if should_report_drop(dropped) {
                        warn!(
                            target: "audio",
                            "Analysis thread is behind, {} frame(s) dropped so far",
                            dropped
                        );
                    }
                }
            }
        },
        move |err| {
            error!(target: "audio", "An error occurred on the audio stream: {}", err);
            let _ = errors.try_send(err.to_string());
        },
        None,
    )?;
    Ok(stream)
}

/// Reports the first dropped frame and every 100th after it.
fn should_report_drop(dropped: u64) -> bool {
    dropped == 1 || dropped % 100 == 0
}
