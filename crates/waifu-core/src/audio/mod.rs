//! Speech playback: ordered clip queue, WAV decoding, output devices.

mod device;
mod queue;
mod remix;
#[cfg(test)]
pub(crate) mod testing;
mod wav;

use std::fmt;

use bytes::Bytes;

pub use device::{
    CpalSink, DeviceInfo, DeviceSelector, list_output_devices, open_output_device,
    resolve_output_device,
};
pub use queue::{AudioPlaybackQueue, AudioSink, DEFAULT_CHUNK_FRAMES, PlaybackState};
pub use wav::{decode_pcm, decode_wav};

/// One synthesized-speech payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Bytes,
    /// True when `bytes` starts with a RIFF/WAVE header.
    pub has_container_header: bool,
    pub sequence_no: u64,
}

impl AudioClip {
    pub fn wav(bytes: impl Into<Bytes>, sequence_no: u64) -> Self {
        Self {
            bytes: bytes.into(),
            has_container_header: true,
            sequence_no,
        }
    }

    pub fn raw(bytes: impl Into<Bytes>, sequence_no: u64) -> Self {
        Self {
            bytes: bytes.into(),
            has_container_header: false,
            sequence_no,
        }
    }

    /// Wraps synthesized audio, sniffing for a RIFF/WAVE header.
    pub fn detect(bytes: impl Into<Bytes>, sequence_no: u64) -> Self {
        let bytes = bytes.into();
        let has_container_header =
            bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE";
        Self {
            bytes,
            has_container_header,
            sequence_no,
        }
    }
}

/// PCM stream parameters; the output stream is reopened only when these change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes per sample.
    pub sample_width: u16,
}

/// Audio errors.
#[derive(Debug)]
pub enum AudioError {
    /// No device can play audio at all.
    NoOutputDevice,
    /// An explicit device index does not name an output-capable device.
    InvalidDeviceIndex(usize),
    /// The audio host could not enumerate devices.
    Host(String),
    /// A clip could not be decoded.
    Format(String),
    /// Headerless clip arrived before any stream was configured.
    NoActiveStream,
    /// Opening the output stream failed.
    Stream(String),
    /// Writing to the output stream failed.
    Write(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::NoOutputDevice => write!(f, "Output devices not found"),
            AudioError::InvalidDeviceIndex(index) => {
                write!(f, "Audio device {index} is not an output device")
            }
            AudioError::Host(msg) => write!(f, "Audio host error: {msg}"),
            AudioError::Format(msg) => write!(f, "Invalid audio data: {msg}"),
            AudioError::NoActiveStream => {
                write!(f, "Raw audio received before any stream was configured")
            }
            AudioError::Stream(msg) => write!(f, "Failed to open output stream: {msg}"),
            AudioError::Write(msg) => write!(f, "Failed to write audio: {msg}"),
        }
    }
}

impl std::error::Error for AudioError {}
