//! Decoded audio buffers
//!
//! Rendered stems arrive as encoded bytes (WAV from the render service, or
//! whatever the raw stem library holds). Symphonia probes and decodes them
//! into interleaved f32, which is then folded to stereo frames.

use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::error::{AudioError, AudioResult};
use crate::types::StereoSample;

/// An immutable, fully decoded stereo buffer
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    /// Stereo frames
    pub frames: Vec<StereoSample>,
    /// Sample rate the frames were decoded at
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from interleaved samples with the given channel count.
    /// Mono is duplicated to both channels; extra channels beyond stereo are
    /// dropped.
    pub fn from_interleaved(samples: &[f32], channels: u16, sample_rate: u32) -> AudioResult<Self> {
        if samples.is_empty() || channels == 0 {
            return Err(AudioError::EmptyAudio);
        }

        let channels = channels as usize;
        let frames = samples
            .chunks_exact(channels)
            .map(|frame| {
                if channels == 1 {
                    StereoSample::new(frame[0], frame[0])
                } else {
                    StereoSample::new(frame[0], frame[1])
                }
            })
            .collect::<Vec<_>>();

        if frames.is_empty() {
            return Err(AudioError::EmptyAudio);
        }

        Ok(Self {
            frames,
            sample_rate,
        })
    }

    /// Number of frames in the buffer
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the buffer holds no frames
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        self.frames.len() as f64 / self.sample_rate as f64
    }
}

/// Decode encoded audio bytes into a stereo buffer
///
/// `ext_hint` is the file extension of the source URL, if known, used to
/// speed up format probing.
pub fn decode_bytes(bytes: Vec<u8>, ext_hint: Option<&str>) -> AudioResult<Arc<AudioBuffer>> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = ext_hint {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::DecodeError(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != symphonia::core::codecs::CODEC_TYPE_NULL)
        .ok_or_else(|| AudioError::DecodeError("no audio track found".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioError::DecodeError("unknown sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::DecodeError(e.to_string()))?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => {
                log::warn!("Error reading packet: {}", e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::warn!("Error decoding packet: {}", e);
                continue;
            }
        };

        if sample_buf.is_none() {
            let spec = *decoded.spec();
            let duration = decoded.capacity() as u64;
            sample_buf = Some(SampleBuffer::new(duration, spec));
        }

        if let Some(ref mut buf) = sample_buf {
            buf.copy_interleaved_ref(decoded);
            samples.extend_from_slice(buf.samples());
        }
    }

    AudioBuffer::from_interleaved(&samples, channels, sample_rate).map(Arc::new)
}
