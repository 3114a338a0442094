//! Conversion from device float frames to the session's PCM layout, and
//! level metering over PCM bytes.
//!
//! Hardware that delivers interleaved f32 (WASAPI shared mode) goes through
//! `PcmConverter::convert` before reaching the capture engine, which only
//! deals in bytes of the session `AudioFormat`.

use crate::models::audio_models::AudioFormat;

/// Streaming f32 → PCM converter for one open stream.
///
/// Keeps its scratch buffers and the resampler phase between calls, so
/// per-packet conversion allocates nothing once warmed up and packet
/// boundaries do not shift the output timing.
#[derive(Debug, Clone)]
pub struct PcmConverter {
    pub target: AudioFormat,
    resampler: LinearResampler,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    pcm: Vec<u8>,
}

impl PcmConverter {
    pub fn new(target: AudioFormat) -> Self {
        Self {
            target,
            resampler: LinearResampler::default(),
            mono: Vec::new(),
            resampled: Vec::new(),
            pcm: Vec::new(),
        }
    }

    /// Interleaved f32 at `source_rate`/`source_channels` → target PCM bytes.
    ///
    /// The returned slice is valid until the next call.
    pub fn convert(&mut self, samples: &[f32], source_rate: f64, source_channels: u16) -> &[u8] {
        downmix_into(samples, source_channels as usize, &mut self.mono);
        self.resampled.clear();
        self.resampler
            .process(&self.mono, source_rate, self.target.sample_rate as f64, &mut self.resampled);

        let channels = self.target.channels.max(1) as usize;
        self.pcm.clear();
        for &sample in &self.resampled {
            for _ in 0..channels {
                match self.target.bits_per_sample {
                    8 => self.pcm.push(uint8_sample(sample)),
                    _ => self.pcm.extend_from_slice(&int16_sample(sample)),
                }
            }
        }
        &self.pcm
    }

    /// f32 `[-1.0, 1.0]` → 16-bit signed little-endian PCM. Clamps.
    pub fn convert_to_int16_pcm(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|&s| int16_sample(s)).collect()
    }

    /// f32 `[-1.0, 1.0]` → 8-bit unsigned PCM (128 = silence). Clamps.
    pub fn convert_to_uint8_pcm(samples: &[f32]) -> Vec<u8> {
        samples.iter().map(|&s| uint8_sample(s)).collect()
    }
}

fn int16_sample(sample: f32) -> [u8; 2] {
    ((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16).to_le_bytes()
}

fn uint8_sample(sample: f32) -> u8 {
    (sample.clamp(-1.0, 1.0) * 127.0 + 128.0).round() as u8
}

/// Linear interpolation resampler for a mono stream delivered in blocks.
///
/// `position` is where the next output sample sits, in source samples,
/// relative to the start of the next block. It may be negative, in which
/// case the sample interpolates from `previous`, the last sample of the
/// block before.
#[derive(Debug, Clone, Default)]
pub struct LinearResampler {
    position: f64,
    previous: Option<f32>,
}

impl LinearResampler {
    /// Append the resampled `input` block to `output`.
    pub fn process(&mut self, input: &[f32], source_rate: f64, target_rate: f64, output: &mut Vec<f32>) {
        let Some(&last_sample) = input.last() else {
            return;
        };
        if (source_rate - target_rate).abs() < 0.01 || target_rate <= 0.0 {
            output.extend_from_slice(input);
            self.position = 0.0;
            self.previous = Some(last_sample);
            return;
        }

        let step = source_rate / target_rate;
        let last = (input.len() - 1) as f64;
        let mut position = self.position;
        while position <= last {
            let floor = position.floor();
            let fraction = (position - floor) as f32;
            let (left, right) = if floor < 0.0 {
                (self.previous.unwrap_or(input[0]), input[0])
            } else {
                let index = floor as usize;
                let left = input[index];
                (left, input.get(index + 1).copied().unwrap_or(left))
            };
            output.push(left + (right - left) * fraction);
            position += step;
        }

        self.position = position - input.len() as f64;
        self.previous = Some(last_sample);
    }
}

/// Downmix interleaved multi-channel audio to mono into `out`, averaging
/// channels per frame.
pub fn downmix_into(samples: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(samples);
        return;
    }
    let scale = 1.0 / channels as f32;
    out.extend(
        samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}

/// RMS level of PCM bytes in `format`, normalized to 0.0–1.0.
///
/// Grows monotonically with signal amplitude. A trailing partial sample is
/// ignored.
pub fn rms_level(pcm: &[u8], format: &AudioFormat) -> f32 {
    let (sum_sq, count) = match format.bits_per_sample {
        8 => pcm.iter().fold((0.0f64, 0usize), |(acc, n), &b| {
            let s = (b as f64 - 128.0) / 128.0;
            (acc + s * s, n + 1)
        }),
        _ => pcm.chunks_exact(2).fold((0.0f64, 0usize), |(acc, n), pair| {
            let s = i16::from_le_bytes([pair[0], pair[1]]) as f64 / i16::MAX as f64;
            (acc + s * s, n + 1)
        }),
    };
    if count == 0 {
        return 0.0;
    }
    ((sum_sq / count as f64).sqrt() as f32).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn convert_to_int16_pcm_full_scale() {
        let pcm = PcmConverter::convert_to_int16_pcm(&[0.0, 1.0, -1.0]);
        assert_eq!(pcm.len(), 6);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), 0);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[4], pcm[5]]), -i16::MAX);
    }

    #[test]
    fn convert_clamps_out_of_range() {
        let pcm = PcmConverter::convert_to_int16_pcm(&[2.0, -3.0]);
        assert_eq!(i16::from_le_bytes([pcm[0], pcm[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([pcm[2], pcm[3]]), -i16::MAX);
    }

    #[test]
    fn uint8_silence_is_midpoint() {
        assert_eq!(PcmConverter::convert_to_uint8_pcm(&[0.0, 1.0, -1.0]), vec![128, 255, 1]);
    }

    fn resample_all(resampler: &mut LinearResampler, input: &[f32], from: f64, to: f64, block: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for chunk in input.chunks(block) {
            resampler.process(chunk, from, to, &mut out);
        }
        out
    }

    #[test]
    fn resample_same_rate_is_passthrough() {
        let samples = vec![1.0, 2.0, 3.0];
        let out = resample_all(&mut LinearResampler::default(), &samples, 48_000.0, 48_000.0, 3);
        assert_eq!(out, samples);
    }

    #[test]
    fn resample_downsample_32k_to_16k() {
        let samples: Vec<f32> = (0..320).map(|i| i as f32 / 320.0).collect();
        let out = resample_all(&mut LinearResampler::default(), &samples, 32_000.0, 16_000.0, 320);
        assert_eq!(out.len(), 160);
        assert_relative_eq!(out[1], samples[2], epsilon = 1e-6);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let out = resample_all(&mut LinearResampler::default(), &[0.0, 1.0], 8_000.0, 16_000.0, 2);
        assert_eq!(out.len(), 3);
        assert_relative_eq!(out[1], 0.5, epsilon = 1e-6);
        assert_relative_eq!(out[2], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn resample_is_independent_of_block_size() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 * 0.05).sin()).collect();
        let whole = resample_all(&mut LinearResampler::default(), &samples, 48_000.0, 16_000.0, 480);
        let blocked = resample_all(&mut LinearResampler::default(), &samples, 48_000.0, 16_000.0, 7);
        assert_eq!(whole.len(), 160);
        assert_eq!(blocked.len(), whole.len());
        for (a, b) in whole.iter().zip(&blocked) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn resample_keeps_rate_across_uneven_blocks() {
        // one second at 44.1 kHz in 10 ms device packets
        let samples = vec![0.25f32; 44_100];
        let out = resample_all(&mut LinearResampler::default(), &samples, 44_100.0, 16_000.0, 441);
        assert!((out.len() as i64 - 16_000).abs() <= 1, "{} samples", out.len());
    }

    #[test]
    fn upsampling_interpolates_across_block_boundary() {
        let mut resampler = LinearResampler::default();
        let mut out = Vec::new();
        resampler.process(&[0.0, 1.0], 8_000.0, 16_000.0, &mut out);
        resampler.process(&[2.0, 3.0], 8_000.0, 16_000.0, &mut out);
        let expected: [f32; 7] = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0];
        assert_eq!(out.len(), expected.len());
        for (a, b) in out.iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-6);
        }
    }

    #[test]
    fn convert_stereo_float_to_mono_speech() {
        let mut converter = PcmConverter::new(AudioFormat::speech());
        // 4 stereo frames at 16 kHz, L=0.5 R=-0.5 → silence after downmix
        let samples = [0.5, -0.5, 0.5, -0.5, 0.5, -0.5, 0.5, -0.5];
        let pcm = converter.convert(&samples, 16_000.0, 2);
        assert_eq!(pcm.len(), 8);
        assert!(pcm.iter().all(|&b| b == 0));
    }

    #[test]
    fn convert_mono_to_stereo_duplicates_frames() {
        let mut converter = PcmConverter::new(AudioFormat::new(16_000, 2, 16));
        let pcm = converter.convert(&[1.0], 16_000.0, 1);
        assert_eq!(pcm.len(), 4);
        assert_eq!(&pcm[0..2], &pcm[2..4]);
    }

    #[test]
    fn convert_reuses_scratch_buffers() {
        let mut converter = PcmConverter::new(AudioFormat::speech());
        let packet = vec![0.1f32; 960];
        converter.convert(&packet, 48_000.0, 2);
        let capacity = converter.pcm.capacity();
        let pointer = converter.pcm.as_ptr();
        for _ in 0..10 {
            assert_eq!(converter.convert(&packet, 48_000.0, 2).len(), 320);
        }
        assert_eq!(converter.pcm.capacity(), capacity);
        assert_eq!(converter.pcm.as_ptr(), pointer);
    }

    #[test]
    fn downmix_averages_channels() {
        let mut mono = Vec::new();
        downmix_into(&[0.2, 0.8, 0.4, 0.6], 2, &mut mono);
        assert_eq!(mono.len(), 2);
        assert_relative_eq!(mono[0], 0.5, epsilon = 1e-6);
        assert_relative_eq!(mono[1], 0.5, epsilon = 1e-6);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_level(&[0u8; 64], &AudioFormat::speech()), 0.0);
        assert_eq!(rms_level(&[128u8; 64], &AudioFormat::new(16_000, 1, 8)), 0.0);
        assert_eq!(rms_level(&[], &AudioFormat::speech()), 0.0);
    }

    #[test]
    fn rms_is_monotonic_in_amplitude() {
        let format = AudioFormat::speech();
        let mut previous = -1.0f32;
        for amplitude in [0.0f32, 0.1, 0.25, 0.5, 0.9, 1.0] {
            let pcm = PcmConverter::convert_to_int16_pcm(&vec![amplitude; 32]);
            let level = rms_level(&pcm, &format);
            assert!(level > previous, "{} not above {}", level, previous);
            previous = level;
        }
        assert_relative_eq!(previous, 1.0, epsilon = 1e-4);
    }
}
