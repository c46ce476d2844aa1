//! Audio engine error types

use thiserror::Error;

/// Errors from the audio engine and output backend
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No output device available")]
    NoOutputDevice,

    #[error("Failed to query device config: {0}")]
    DeviceConfigError(String),

    #[error("Unsupported output sample format: {0}")]
    UnsupportedSampleFormat(String),

    #[error("Failed to build output stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to start output stream: {0}")]
    StreamPlayError(String),

    #[error("Failed to decode audio: {0}")]
    DecodeError(String),

    #[error("Audio data contains no frames")]
    EmptyAudio,

    #[error("Nothing to play: no unmuted track has a loaded stem")]
    NothingToPlay,
}

pub type AudioResult<T> = std::result::Result<T, AudioError>;
