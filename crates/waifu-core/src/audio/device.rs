use std::collections::VecDeque;
use std::convert::Infallible;
use std::str::FromStr;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use tracing::{debug, info, warn};

use super::remix::Remixer;
use super::{AudioError, AudioSink, PcmFormat};

/// How long `write` waits for the device to drain before giving up.
const WRITE_STALL_TIMEOUT: Duration = Duration::from_secs(3);

/// Sample formats a stream can be built with, in order of preference.
const SUPPORTED_SAMPLE_FORMATS: [SampleFormat; 3] =
    [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16];

/// Which output device to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    #[default]
    Default,
    Index(usize),
    /// Case-insensitive substring of the device name.
    Name(String),
}

impl FromStr for DeviceSelector {
    type Err = Infallible;

    /// Empty strings and negative numbers mean the default device.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::Default);
        }
        if let Ok(index) = s.parse::<usize>() {
            return Ok(Self::Index(index));
        }
        if s.parse::<i64>().is_ok() {
            return Ok(Self::Default);
        }
        Ok(Self::Name(s.to_string()))
    }
}

/// One entry of the host's device list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub output_channels: u16,
}

impl DeviceInfo {
    pub fn is_output(&self) -> bool {
        self.output_channels > 0
    }
}

/// Picks a device index from the host's device list.
///
/// # Errors
/// `NoOutputDevice` when nothing can play audio, `InvalidDeviceIndex` when an
/// explicit index is out of range or names an input-only device.
pub fn resolve_output_device(
    devices: &[DeviceInfo],
    default_index: Option<usize>,
    selector: &DeviceSelector,
) -> Result<usize, AudioError> {
    let first_output = devices
        .iter()
        .find(|d| d.is_output())
        .ok_or(AudioError::NoOutputDevice)?;
    let is_output = |index: usize| devices.get(index).is_some_and(DeviceInfo::is_output);
    let fallback = default_index
        .filter(|&i| is_output(i))
        .unwrap_or(first_output.index);

    match selector {
        DeviceSelector::Index(index) => {
            if is_output(*index) {
                Ok(*index)
            } else {
                Err(AudioError::InvalidDeviceIndex(*index))
            }
        }
        DeviceSelector::Name(name) => {
            let needle = name.to_lowercase();
            let found = devices
                .iter()
                .filter(|d| d.is_output())
                .find(|d| d.name.to_lowercase().contains(&needle));
            if found.is_none() {
                info!(name = %name, "no output device matches; using default");
            }
            Ok(found.map_or(fallback, |d| d.index))
        }
        DeviceSelector::Default => Ok(fallback),
    }
}

fn output_channels(device: &cpal::Device) -> u16 {
    device
        .supported_output_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

fn enumerate() -> Result<(Vec<cpal::Device>, Vec<DeviceInfo>, Option<usize>), AudioError> {
    let host = cpal::default_host();
    let devices: Vec<cpal::Device> = host
        .devices()
        .map_err(|err| AudioError::Host(err.to_string()))?
        .collect();

    let infos: Vec<DeviceInfo> = devices
        .iter()
        .enumerate()
        .map(|(index, device)| DeviceInfo {
            index,
            name: device.name().unwrap_or_else(|_| "<unknown>".to_string()),
            output_channels: output_channels(device),
        })
        .collect();

    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let default_index = default_name.and_then(|name| {
        infos
            .iter()
            .find(|d| d.is_output() && d.name == name)
            .map(|d| d.index)
    });
    Ok((devices, infos, default_index))
}

/// Lists every device of the default host with its output channel count.
///
/// # Errors
/// Returns `AudioError::Host` if the host cannot enumerate devices.
pub fn list_output_devices() -> Result<(Vec<DeviceInfo>, Option<usize>), AudioError> {
    let (_, infos, default_index) = enumerate()?;
    Ok((infos, default_index))
}

/// Resolves `selector` against the default host and wraps the device in a sink.
///
/// # Errors
/// Returns the resolution error, or `AudioError::Host` on enumeration failure.
pub fn open_output_device(selector: &DeviceSelector) -> Result<CpalSink, AudioError> {
    let (devices, infos, default_index) = enumerate()?;
    let index = resolve_output_device(&infos, default_index, selector)?;
    let device = devices
        .into_iter()
        .nth(index)
        .ok_or(AudioError::InvalidDeviceIndex(index))?;
    info!(index, name = %infos[index].name, "using audio output device");
    Ok(CpalSink::new(device))
}

#[derive(Default)]
struct SampleBuffer {
    samples: Mutex<VecDeque<f32>>,
    drained: Condvar,
}

impl SampleBuffer {
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<f32>> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Device callback: pop what is buffered, pad underruns with silence.
    fn fill<T: SizedSample + FromSample<f32>>(&self, out: &mut [T]) {
        let mut samples = self.lock();
        for slot in out.iter_mut() {
            *slot = T::from_sample(samples.pop_front().unwrap_or(0.0));
        }
        drop(samples);
        self.drained.notify_all();
    }

    /// Blocks until the callback has taken everything buffered. False on timeout.
    fn wait_drained(&self, timeout: Duration) -> bool {
        let (_guard, result) = self
            .drained
            .wait_timeout_while(self.lock(), timeout, |samples| !samples.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }
}

/// Stream parameters the device will actually run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeviceFormat {
    channels: u16,
    sample_rate: u32,
    sample_format: SampleFormat,
}

/// [`AudioSink`] backed by a cpal output stream.
///
/// Writes land in a small buffer the device callback drains; `write` blocks
/// while the buffer is full so playback paces the worker.
pub struct CpalSink {
    device: cpal::Device,
    stream: Option<cpal::Stream>,
    buffer: Arc<SampleBuffer>,
    capacity: usize,
    remixer: Remixer,
    scratch: Vec<f32>,
}

impl CpalSink {
    pub fn new(device: cpal::Device) -> Self {
        Self {
            device,
            stream: None,
            buffer: Arc::new(SampleBuffer::default()),
            capacity: 0,
            remixer: Remixer::passthrough(1, 1),
            scratch: Vec::new(),
        }
    }

    /// The clip's own layout when the device supports it, else the device's
    /// default output config with samples remixed to fit.
    fn pick_format(&self, format: PcmFormat) -> Result<DeviceFormat, AudioError> {
        let configs = self
            .device
            .supported_output_configs()
            .map_err(|err| AudioError::Stream(err.to_string()))?;
        let formats: Vec<SampleFormat> = configs
            .filter(|c| {
                c.channels() == format.channels
                    && c.min_sample_rate().0 <= format.sample_rate
                    && format.sample_rate <= c.max_sample_rate().0
            })
            .map(|c| c.sample_format())
            .collect();
        let exact = SUPPORTED_SAMPLE_FORMATS
            .into_iter()
            .find(|f| formats.contains(f));
        if let Some(sample_format) = exact {
            return Ok(DeviceFormat {
                channels: format.channels,
                sample_rate: format.sample_rate,
                sample_format,
            });
        }

        let default = self
            .device
            .default_output_config()
            .map_err(|err| AudioError::Stream(err.to_string()))?;
        if !SUPPORTED_SAMPLE_FORMATS.contains(&default.sample_format()) {
            return Err(AudioError::Stream(format!(
                "device does not support {} Hz with {} channel(s) or sample format {}",
                format.sample_rate,
                format.channels,
                default.sample_format()
            )));
        }
        debug!(
            clip_rate = format.sample_rate,
            clip_channels = format.channels,
            device_rate = default.sample_rate().0,
            device_channels = default.channels(),
            "remixing to device default format"
        );
        Ok(DeviceFormat {
            channels: default.channels(),
            sample_rate: default.sample_rate().0,
            sample_format: default.sample_format(),
        })
    }

    fn build_stream<T>(&self, config: &StreamConfig) -> Result<cpal::Stream, AudioError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let buffer = Arc::clone(&self.buffer);
        self.device
            .build_output_stream(
                config,
                move |data: &mut [T], _| buffer.fill(data),
                |err| warn!(error = %err, "audio output stream error"),
                None,
            )
            .map_err(|err| AudioError::Stream(err.to_string()))
    }

    /// Appends device-layout samples, blocking while the buffer is full.
    fn push(&self, samples: &[f32]) -> Result<(), AudioError> {
        let mut buffer = self.buffer.lock();
        while !buffer.is_empty() && buffer.len() + samples.len() > self.capacity {
            let (guard, timeout) = self
                .buffer
                .drained
                .wait_timeout(buffer, WRITE_STALL_TIMEOUT)
                .unwrap_or_else(PoisonError::into_inner);
            buffer = guard;
            if timeout.timed_out() {
                return Err(AudioError::Write("output device stopped consuming".to_string()));
            }
        }
        buffer.extend(samples);
        Ok(())
    }
}

impl AudioSink for CpalSink {
    fn open(&mut self, format: PcmFormat) -> Result<(), AudioError> {
        // Let the previous clip's tail play out before the stream goes away.
        if self.stream.is_some() && !self.buffer.wait_drained(WRITE_STALL_TIMEOUT) {
            warn!("output device did not drain before reopening");
        }
        self.stream = None;
        self.buffer.lock().clear();

        let device_format = self.pick_format(format)?;
        let config = StreamConfig {
            channels: device_format.channels,
            sample_rate: cpal::SampleRate(device_format.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let stream = match device_format.sample_format {
            SampleFormat::I16 => self.build_stream::<i16>(&config)?,
            SampleFormat::U16 => self.build_stream::<u16>(&config)?,
            _ => self.build_stream::<f32>(&config)?,
        };
        stream
            .play()
            .map_err(|err| AudioError::Stream(err.to_string()))?;

        // Roughly 200ms of audio in flight.
        self.capacity =
            (device_format.sample_rate as usize * usize::from(device_format.channels)) / 5;
        self.remixer = Remixer::new(
            format.channels,
            format.sample_rate,
            device_format.channels,
            device_format.sample_rate,
        );
        self.stream = Some(stream);
        debug!(?device_format, "output stream opened");
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        if self.stream.is_none() {
            return Err(AudioError::NoActiveStream);
        }
        let mut mapped = std::mem::take(&mut self.scratch);
        mapped.clear();
        self.remixer.process(samples, &mut mapped);
        let result = self.push(&mapped);
        self.scratch = mapped;
        result
    }

    fn discard(&mut self) {
        self.buffer.lock().clear();
        self.remixer.reset();
    }
}
