//! Test doubles for the playback worker.

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hound::{SampleFormat, WavSpec, WavWriter};

use super::{AudioError, AudioSink, PcmFormat};

/// Builds a 16-bit WAV clip filled with `value`.
pub fn wav_bytes(sample_rate: u32, channels: u16, frames: usize, value: i16) -> Vec<u8> {
    let spec = WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for _ in 0..frames * usize::from(channels) {
            writer.write_sample(value).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Decoded float value of a 16-bit sample.
pub fn sample_value(value: i16) -> f32 {
    f32::from(value) / 32_768.0
}

pub fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Open(PcmFormat),
    Write { first: f32, len: usize },
    Discard,
}

/// Sink that records every call; optionally slow to emulate a device.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SinkEvent>>>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
    write_delay: Duration,
}

impl RecordingSink {
    pub fn slow(write_delay: Duration) -> Self {
        Self {
            write_delay,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of writes whose first sample equals `value`.
    pub fn writes_with(&self, value: f32) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Write { first, .. } if (*first - value).abs() < 1e-4))
            .count()
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl AudioSink for RecordingSink {
    fn open(&mut self, format: PcmFormat) -> Result<(), AudioError> {
        self.events.lock().unwrap().push(SinkEvent::Open(format));
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.write_delay);
        self.events.lock().unwrap().push(SinkEvent::Write {
            first: samples[0],
            len: samples.len(),
        });
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    fn discard(&mut self) {
        self.events.lock().unwrap().push(SinkEvent::Discard);
    }
}
