//! CPAL output backend
//!
//! Builds a single stereo output stream on the default device and drives
//! the mixer from the audio callback. The stream handle is returned to the
//! caller and is not stored inside `AudioEngine` (CPAL streams are not
//! `Send`); dropping the handle stops audio.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::error::{AudioError, AudioResult};
use super::mixer::Mixer;
use crate::types::StereoSample;

/// Keeps the output stream alive. Drop this to stop audio.
pub struct OutputHandle {
    _stream: Stream,
    sample_rate: u32,
    channels: u16,
}

impl OutputHandle {
    /// Sample rate the device negotiated
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

/// Start the output stream on the default device
///
/// Only f32 output is supported; every device CPAL exposes on the
/// supported desktop hosts offers an f32 config.
pub fn start_output(mixer: Arc<Mutex<Mixer>>) -> AudioResult<OutputHandle> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let supported = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceConfigError(e.to_string()))?;

    if supported.sample_format() != SampleFormat::F32 {
        return Err(AudioError::UnsupportedSampleFormat(format!(
            "{:?}",
            supported.sample_format()
        )));
    }

    let config: StreamConfig = supported.into();
    let sample_rate = config.sample_rate.0;
    let channels = config.channels;

    log::info!(
        "Audio config: {} channels, {}Hz",
        channels,
        sample_rate
    );

    let ch = channels as usize;
    let mut scratch: Vec<StereoSample> = Vec::new();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _| {
                let frames = data.len() / ch;
                scratch.resize(frames, StereoSample::silence());

                if let Ok(mut mixer) = mixer.lock() {
                    mixer.process(&mut scratch[..frames]);
                } else {
                    scratch.fill(StereoSample::silence());
                }

                for (frame, out) in scratch[..frames].iter().zip(data.chunks_mut(ch)) {
                    out[0] = frame.left;
                    if ch > 1 {
                        out[1] = frame.right;
                    }
                    for extra in out.iter_mut().skip(2) {
                        *extra = 0.0;
                    }
                }
            },
            |err| log::error!("Output stream error: {}", err),
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;

    log::info!("Audio stream started");

    Ok(OutputHandle {
        _stream: stream,
        sample_rate,
        channels,
    })
}
