use std::io::Cursor;

use hound::{SampleFormat, WavReader};

use super::{AudioError, PcmFormat};

/// Decodes a WAV container into its format and interleaved `f32` samples.
///
/// # Errors
/// Returns `AudioError::Format` if the header or sample data is invalid.
pub fn decode_wav(bytes: &[u8]) -> Result<(PcmFormat, Vec<f32>), AudioError> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|err| AudioError::Format(format!("bad WAV header: {err}")))?;
    let spec = reader.spec();
    let format = PcmFormat {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        sample_width: spec.bits_per_sample.div_ceil(8),
    };

    let samples = match spec.sample_format {
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| AudioError::Format(err.to_string()))?,
        SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample);
            reader
                .into_samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| AudioError::Format(err.to_string()))?
        }
    };
    Ok((format, samples))
}

/// Decodes headerless little-endian PCM with the given sample width.
///
/// 8-bit samples are unsigned (WAV convention); wider samples are signed.
/// A trailing partial sample is dropped.
///
/// # Errors
/// Returns `AudioError::Format` for unsupported sample widths.
pub fn decode_pcm(bytes: &[u8], sample_width: u16) -> Result<Vec<f32>, AudioError> {
    let samples = match sample_width {
        1 => bytes
            .iter()
            .map(|&b| (f32::from(b) - 128.0) / 128.0)
            .collect(),
        2 => bytes
            .chunks_exact(2)
            .map(|c| f32::from(i16::from_le_bytes([c[0], c[1]])) / 32_768.0)
            .collect(),
        3 => bytes
            .chunks_exact(3)
            .map(|c| {
                // Sign-extend through the top byte of an i32.
                let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        4 => bytes
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        other => {
            return Err(AudioError::Format(format!(
                "unsupported sample width: {other} bytes"
            )));
        }
    };
    Ok(samples)
}

fn int_scale(bits: u16) -> f32 {
    (1u64 << (bits.clamp(1, 32) - 1)) as f32
}
