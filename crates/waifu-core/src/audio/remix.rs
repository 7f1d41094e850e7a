//! Channel and sample-rate conversion for devices that cannot open the
//! clip's native format.

/// Streaming converter from interleaved clip samples to the device layout.
///
/// Rate conversion is linear interpolation; the last frame of each call is
/// carried over so chunk boundaries stay continuous.
#[derive(Debug, Clone)]
pub(super) struct Remixer {
    in_channels: usize,
    out_channels: usize,
    /// Input frames advanced per output frame.
    step: f64,
    /// Position of the next output frame, relative to `prev`.
    pos: f64,
    prev: Option<Vec<f32>>,
}

impl Remixer {
    pub(super) fn new(in_channels: u16, in_rate: u32, out_channels: u16, out_rate: u32) -> Self {
        Self {
            in_channels: usize::from(in_channels.max(1)),
            out_channels: usize::from(out_channels.max(1)),
            step: f64::from(in_rate.max(1)) / f64::from(out_rate.max(1)),
            pos: 0.0,
            prev: None,
        }
    }

    /// Same channel count and rate on both sides.
    pub(super) fn passthrough(channels: u16, rate: u32) -> Self {
        Self::new(channels, rate, channels, rate)
    }

    fn same_rate(&self) -> bool {
        (self.step - 1.0).abs() < f64::EPSILON
    }

    /// Forgets carried-over state, e.g. after queued audio was dropped.
    pub(super) fn reset(&mut self) {
        self.pos = 0.0;
        self.prev = None;
    }

    /// Appends the converted form of `input` to `out`.
    pub(super) fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        let oc = self.out_channels;
        if self.same_rate() {
            for frame in input.chunks_exact(self.in_channels) {
                map_frame(frame, oc, out);
            }
            return;
        }

        let mut frames = Vec::with_capacity((input.len() / self.in_channels + 1) * oc);
        if let Some(prev) = self.prev.take() {
            frames.extend(prev);
        }
        for frame in input.chunks_exact(self.in_channels) {
            map_frame(frame, oc, &mut frames);
        }
        let count = frames.len() / oc;
        if count == 0 {
            return;
        }

        while (self.pos.floor() as usize) + 1 < count {
            let idx = self.pos.floor() as usize;
            let frac = (self.pos - idx as f64) as f32;
            for c in 0..oc {
                let a = frames[idx * oc + c];
                let b = frames[(idx + 1) * oc + c];
                out.push(a + (b - a) * frac);
            }
            self.pos += self.step;
        }
        self.pos -= (count - 1) as f64;
        self.prev = Some(frames[(count - 1) * oc..].to_vec());
    }
}

/// Maps one interleaved frame onto `out_channels`.
///
/// Fewer inputs repeat across outputs (mono fills every speaker); extra
/// inputs fold onto output `i % out_channels` and are averaged.
fn map_frame(frame: &[f32], out_channels: usize, out: &mut Vec<f32>) {
    let in_channels = frame.len();
    if in_channels == out_channels {
        out.extend_from_slice(frame);
    } else if in_channels < out_channels {
        out.extend((0..out_channels).map(|c| frame[c % in_channels]));
    } else {
        for c in 0..out_channels {
            let (sum, n) = frame
                .iter()
                .skip(c)
                .step_by(out_channels)
                .fold((0.0f32, 0u16), |(sum, n), s| (sum + s, n + 1));
            out.push(sum / f32::from(n.max(1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(remixer: &mut Remixer, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        remixer.process(input, &mut out);
        out
    }

    #[test]
    fn test_mono_is_duplicated_to_stereo() {
        let mut remixer = Remixer::new(1, 24_000, 2, 24_000);
        assert_eq!(run(&mut remixer, &[0.1, -0.2]), vec![0.1, 0.1, -0.2, -0.2]);
    }

    #[test]
    fn test_extra_channels_are_downmixed() {
        let mut stereo = Remixer::new(2, 16_000, 1, 16_000);
        assert_eq!(run(&mut stereo, &[0.5, 0.25, -1.0, 1.0]), vec![0.375, 0.0]);

        let mut quad = Remixer::new(4, 16_000, 2, 16_000);
        assert_eq!(run(&mut quad, &[0.25, 0.5, 0.75, 1.0]), vec![0.5, 0.75]);
    }

    #[test]
    fn test_passthrough_is_identity() {
        let mut remixer = Remixer::passthrough(2, 44_100);
        let input = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(run(&mut remixer, &input), input.to_vec());
    }

    #[test]
    fn test_upsampling_interpolates_linearly() {
        // 24k -> 48k: one new sample halfway between each input pair.
        let mut remixer = Remixer::new(1, 24_000, 1, 48_000);
        let out = run(&mut remixer, &[0.0, 1.0, 0.0]);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 0.5]);
    }

    #[test]
    fn test_rate_conversion_is_continuous_across_chunks() {
        let input: Vec<f32> = (0..40).map(|i| i as f32 / 40.0).collect();

        let mut whole = Remixer::new(1, 22_050, 2, 48_000);
        let expected = run(&mut whole, &input);

        let mut chunked = Remixer::new(1, 22_050, 2, 48_000);
        let mut got = Vec::new();
        for chunk in input.chunks(7) {
            chunked.process(chunk, &mut got);
        }

        assert_eq!(got.len(), expected.len());
        for (a, b) in got.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-5, "{a} != {b}");
        }
        // Roughly 48000/22050 output frames per input frame, two channels each.
        let frames = got.len() / 2;
        assert!((84..=88).contains(&frames), "frames = {frames}");
    }

    #[test]
    fn test_downsampling_keeps_ramp_monotonic() {
        let input: Vec<f32> = (0..96).map(|i| i as f32).collect();
        let mut remixer = Remixer::new(1, 48_000, 1, 16_000);
        let out = run(&mut remixer, &input);
        assert_eq!(out.len(), 32);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 3.0);
        assert!(out.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_reset_drops_carried_frame() {
        let mut remixer = Remixer::new(1, 24_000, 1, 48_000);
        run(&mut remixer, &[1.0, 1.0]);
        remixer.reset();
        let out = run(&mut remixer, &[0.0, 0.0]);
        assert!(out.iter().all(|s| *s == 0.0));
    }
}
