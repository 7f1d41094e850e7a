//! Ordered, thread-isolated clip playback.
//!
//! One worker thread owns the output device and plays clips strictly in the
//! order they were added. `stop()` bumps a shared generation counter: queued
//! clips stamped with an older generation are dropped unplayed, and the clip
//! being written notices the change between chunk writes. Nothing else is
//! shared with the worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::wav::{decode_pcm, decode_wav};
use super::{AudioClip, AudioError, PcmFormat};

/// Frames per device write (and therefore the stop latency bound).
pub const DEFAULT_CHUNK_FRAMES: usize = 1024;

/// Output backend driven by the playback worker.
///
/// `write` may block until the device has room; it is only ever called from
/// the worker thread.
pub trait AudioSink {
    /// (Re)opens the output stream with new parameters.
    ///
    /// # Errors
    /// Returns an error if the device rejects the format.
    fn open(&mut self, format: PcmFormat) -> Result<(), AudioError>;

    /// Writes one chunk of interleaved samples.
    ///
    /// # Errors
    /// Returns an error if the device write fails.
    fn write(&mut self, samples: &[f32]) -> Result<(), AudioError>;

    /// Drops anything buffered but not yet audible.
    fn discard(&mut self) {}
}

/// What the worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing(u64),
}

struct Job {
    clip: AudioClip,
    generation: u64,
}

struct Shared {
    generation: AtomicU64,
    state: Mutex<PlaybackState>,
}

impl Shared {
    fn set_state(&self, state: PlaybackState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

enum ClipOutcome {
    Finished,
    Aborted,
}

/// FIFO audio player with cooperative stop.
pub struct AudioPlaybackQueue {
    tx: Option<mpsc::UnboundedSender<Job>>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl AudioPlaybackQueue {
    /// Starts the playback worker.
    ///
    /// `make_sink` runs on the worker thread so the sink (and any device
    /// stream it holds) never has to cross threads. Construction fails if
    /// the sink cannot be created.
    ///
    /// # Errors
    /// Returns the sink construction error, or `AudioError::Stream` if the
    /// worker thread cannot be spawned.
    pub fn spawn<S, F>(make_sink: F, chunk_frames: usize) -> Result<Self, AudioError>
    where
        S: AudioSink,
        F: FnOnce() -> Result<S, AudioError> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            state: Mutex::new(PlaybackState::Idle),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("audio-playback".to_string())
            .spawn(move || {
                let sink = match make_sink() {
                    Ok(sink) => {
                        let _ = ready_tx.send(Ok(()));
                        sink
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                run_worker(sink, rx, &worker_shared, chunk_frames.max(1));
            })
            .map_err(|err| AudioError::Stream(format!("spawn playback thread: {err}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                let _ = worker.join();
                return Err(err);
            }
            Err(_) => {
                let _ = worker.join();
                return Err(AudioError::Stream("playback thread exited".to_string()));
            }
        }

        Ok(Self {
            tx: Some(tx),
            shared,
            worker: Some(worker),
        })
    }

    /// Appends a clip; never blocks.
    pub fn add(&self, clip: AudioClip) {
        let generation = self.shared.generation.load(Ordering::SeqCst);
        let Some(tx) = &self.tx else {
            return;
        };
        trace!(sequence_no = clip.sequence_no, generation, "audio clip queued");
        if tx.send(Job { clip, generation }).is_err() {
            warn!("audio worker has exited; dropping clip");
        }
    }

    /// Discards every queued clip and aborts the one being played.
    ///
    /// The abort takes effect at the next chunk boundary. The queue keeps
    /// accepting clips afterwards.
    pub fn stop(&self) {
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "audio playback stopped");
    }

    pub fn state(&self) -> PlaybackState {
        *self
            .shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for AudioPlaybackQueue {
    fn drop(&mut self) {
        self.stop();
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("audio worker panicked");
        }
    }
}

fn run_worker<S: AudioSink>(
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<Job>,
    shared: &Shared,
    chunk_frames: usize,
) {
    let mut current: Option<PcmFormat> = None;

    while let Some(job) = rx.blocking_recv() {
        let sequence_no = job.clip.sequence_no;
        if !shared.is_current(job.generation) {
            trace!(sequence_no, "discarding stopped clip");
            continue;
        }

        shared.set_state(PlaybackState::Playing(sequence_no));
        match play_clip(&mut sink, &mut current, &job, shared, chunk_frames) {
            Ok(ClipOutcome::Finished) => trace!(sequence_no, "clip finished"),
            Ok(ClipOutcome::Aborted) => {
                sink.discard();
                debug!(sequence_no, "clip aborted");
            }
            Err(err) => warn!(sequence_no, error = %err, "clip playback failed"),
        }
        shared.set_state(PlaybackState::Idle);
    }
    debug!("audio worker exiting");
}

fn play_clip<S: AudioSink>(
    sink: &mut S,
    current: &mut Option<PcmFormat>,
    job: &Job,
    shared: &Shared,
    chunk_frames: usize,
) -> Result<ClipOutcome, AudioError> {
    let (format, samples) = if job.clip.has_container_header {
        let (format, samples) = decode_wav(&job.clip.bytes)?;
        if *current != Some(format) {
            debug!(
                sample_rate = format.sample_rate,
                channels = format.channels,
                sample_width = format.sample_width,
                "reopening output stream"
            );
            *current = None;
            sink.open(format)?;
            *current = Some(format);
        }
        (format, samples)
    } else {
        let format = current.ok_or(AudioError::NoActiveStream)?;
        (format, decode_pcm(&job.clip.bytes, format.sample_width)?)
    };

    let chunk_len = chunk_frames * usize::from(format.channels.max(1));
    for chunk in samples.chunks(chunk_len) {
        if !shared.is_current(job.generation) {
            return Ok(ClipOutcome::Aborted);
        }
        sink.write(chunk)?;
    }
    Ok(ClipOutcome::Finished)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::audio::testing::{RecordingSink, SinkEvent, sample_value, wait_until, wav_bytes};

    fn spawn_queue(sink: &RecordingSink, chunk_frames: usize) -> AudioPlaybackQueue {
        let sink = sink.clone();
        AudioPlaybackQueue::spawn(move || Ok(sink), chunk_frames).unwrap()
    }

    fn value_for(i: i16) -> f32 {
        sample_value(i * 1000)
    }

    #[test]
    fn test_clips_play_in_fifo_order_one_at_a_time() {
        let sink = RecordingSink::slow(Duration::from_millis(1));
        let queue = spawn_queue(&sink, 4);

        for i in 1..=5i16 {
            queue.add(AudioClip::wav(
                wav_bytes(16_000, 1, 8, i * 1000),
                u64::try_from(i).unwrap(),
            ));
        }
        wait_until(|| sink.writes_with(value_for(5)) == 2);

        let order: Vec<f32> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Write { first, .. } => Some(*first),
                _ => None,
            })
            .collect();
        let expected: Vec<f32> = (1..=5)
            .flat_map(|i| [value_for(i), value_for(i)])
            .collect();
        assert_eq!(order, expected);
        assert_eq!(sink.max_concurrent_writes(), 1);
    }

    #[test]
    fn test_stream_reopened_only_when_format_changes() {
        let sink = RecordingSink::default();
        let queue = spawn_queue(&sink, 1024);

        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 4, 1000), 1));
        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 4, 2000), 2));
        queue.add(AudioClip::wav(wav_bytes(24_000, 1, 4, 3000), 3));
        wait_until(|| sink.writes_with(value_for(3)) == 1);

        let opens: Vec<u32> = sink
            .events()
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Open(format) => Some(format.sample_rate),
                _ => None,
            })
            .collect();
        assert_eq!(opens, vec![16_000, 24_000]);
    }

    #[test]
    fn test_raw_clip_continues_current_stream() {
        let sink = RecordingSink::default();
        let queue = spawn_queue(&sink, 1024);

        // No stream yet: skipped, worker keeps going.
        queue.add(AudioClip::raw(vec![0x00, 0x10], 1));
        queue.add(AudioClip::wav(wav_bytes(22_050, 1, 2, 1000), 2));
        queue.add(AudioClip::raw(2000i16.to_le_bytes().repeat(3), 3));
        wait_until(|| sink.writes_with(value_for(2)) == 1);

        let events = sink.events();
        let opens = events
            .iter()
            .filter(|e| matches!(e, SinkEvent::Open(_)))
            .count();
        assert_eq!(opens, 1);
        assert_eq!(
            events.last(),
            Some(&SinkEvent::Write {
                first: value_for(2),
                len: 3,
            })
        );
    }

    #[test]
    fn test_stop_aborts_current_and_discards_queued() {
        let sink = RecordingSink::slow(Duration::from_millis(5));
        let queue = spawn_queue(&sink, 1);

        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 200, 1000), 1));
        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 10, 2000), 2));
        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 10, 3000), 3));
        wait_until(|| sink.writes_with(value_for(1)) >= 3);

        queue.stop();
        let written_at_stop = sink.writes_with(value_for(1));
        wait_until(|| queue.state() == PlaybackState::Idle);

        // At most the chunk that was in flight lands after stop.
        assert!(sink.writes_with(value_for(1)) <= written_at_stop + 1);
        assert!(sink.writes_with(value_for(1)) < 200);
        assert!(sink.events().contains(&SinkEvent::Discard));

        // Queue is still open after stop.
        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 2, 4000), 4));
        wait_until(|| sink.writes_with(value_for(4)) == 2);
        assert_eq!(sink.writes_with(value_for(2)), 0);
        assert_eq!(sink.writes_with(value_for(3)), 0);
    }

    #[test]
    fn test_bad_clip_does_not_stop_worker() {
        let sink = RecordingSink::default();
        let queue = spawn_queue(&sink, 1024);

        queue.add(AudioClip::wav(b"RIFF garbage".to_vec(), 1));
        queue.add(AudioClip::wav(wav_bytes(16_000, 1, 2, 1000), 2));
        wait_until(|| sink.writes_with(value_for(1)) == 1);
    }

    #[test]
    fn test_sink_construction_failure_is_reported() {
        let result = AudioPlaybackQueue::spawn::<RecordingSink, _>(
            || Err(AudioError::NoOutputDevice),
            1024,
        );
        assert!(matches!(result, Err(AudioError::NoOutputDevice)));
    }
}
