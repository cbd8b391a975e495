use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Samples accumulated before each transform; also the emitted frame length.
pub const DEFAULT_FFT_SIZE: usize = 1024;

pub const DEFAULT_BAR_COUNT: usize = 32;

/// Receives each completed complex frame. The slice is only valid for the
/// duration of the call.
pub type FrameCallback = Box<dyn FnMut(&[Complex<f32>]) + Send>;

/// Accumulates mono-reduced samples into a fixed ring and transforms every
/// full ring with a Hann window and a preplanned in-place FFT. All buffers
/// are allocated at construction; `process` neither blocks nor allocates.
pub struct SpectrumAnalyzer {
    channels: usize,
    ring: Vec<f32>,
    filled: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    fft_buffer: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    on_frame: FrameCallback,
}

impl SpectrumAnalyzer {
    pub fn new(channels: u16, fft_size: usize, on_frame: FrameCallback) -> Self {
        debug_assert!(fft_size.is_power_of_two());
        let fft = FftPlanner::new().plan_fft_forward(fft_size);
        let scratch_len = fft.get_inplace_scratch_len();
        let window = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / (fft_size - 1) as f32).cos())
            })
            .collect();
        Self {
            channels: channels.max(1) as usize,
            ring: vec![0.0; fft_size],
            filled: 0,
            window,
            fft,
            fft_buffer: vec![Complex::new(0.0, 0.0); fft_size],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            on_frame,
        }
    }

    pub fn fft_size(&self) -> usize {
        self.ring.len()
    }

    /// Consumes interleaved samples, mono-reducing each frame into the ring.
    pub fn process(&mut self, buffer: &[f32]) {
        let inv_channels = 1.0 / self.channels as f32;
        for frame in buffer.chunks_exact(self.channels) {
            let mono = frame.iter().sum::<f32>() * inv_channels;
            if self.filled == self.ring.len() {
                self.transform();
                self.filled = 0;
            }
            self.ring[self.filled] = mono;
            self.filled += 1;
        }
        if self.filled == self.ring.len() {
            self.transform();
            self.filled = 0;
        }
    }

    fn transform(&mut self) {
        for ((slot, sample), window) in self
            .fft_buffer
            .iter_mut()
            .zip(self.ring.iter())
            .zip(self.window.iter())
        {
            *slot = Complex::new(sample * window, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.fft_buffer, &mut self.scratch);
        (self.on_frame)(&self.fft_buffer);
    }
}

/// Folds complex frames into K smoothed perceptual bars for display.
///
/// Bars are spaced logarithmically between 40 Hz and 20 kHz, averaged over
/// their bin ranges, converted to dB and shaped by fixed mid/high boosts.
/// Each bar chases its target asymmetrically: fast attack, slow release.
pub struct SpectrumBars {
    sample_rate: u32,
    fft_size: usize,
    values: Vec<f32>,
}

const BAR_RANGE_MIN_HZ: f32 = 40.0;
const BAR_RANGE_MAX_HZ: f32 = 20_000.0;
const RISE_FACTOR: f32 = 0.2;
const FALL_FACTOR: f32 = 0.05;

impl SpectrumBars {
    pub fn new(bar_count: usize, sample_rate: u32, fft_size: usize) -> Self {
        Self {
            sample_rate,
            fft_size,
            values: vec![0.0; bar_count.max(1)],
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Folds one frame into the bars and returns the smoothed values.
    pub fn update(&mut self, frame: &[Complex<f32>]) -> &[f32] {
        let bar_count = self.values.len();
        let half = (self.fft_size / 2).min(frame.len());
        if half < 2 {
            return &self.values;
        }

        let log_min = BAR_RANGE_MIN_HZ.log10();
        let step = (BAR_RANGE_MAX_HZ.log10() - log_min) / bar_count as f32;
        let hz_per_bin = (self.sample_rate as f32 / 2.0) / half as f32;

        for i in 0..bar_count {
            let f_start = 10.0_f32.powf(log_min + i as f32 * step);
            let f_end = 10.0_f32.powf(log_min + (i + 1) as f32 * step);

            // Bin 0 is DC and is always excluded.
            let first = ((f_start / hz_per_bin) as usize).clamp(1, half - 1);
            let last = ((f_end / hz_per_bin) as usize).clamp(first, half - 1);

            let mut sum = 0.0_f32;
            for bin in first..=last {
                sum += frame[bin].norm();
            }
            let avg = sum / (last - first + 1) as f32;

            let db = 20.0 * avg.log10();
            let base = if db.is_finite() {
                (db + 60.0).max(0.0) * 1.5
            } else {
                0.0
            };

            let t = if bar_count > 1 {
                i as f32 / (bar_count - 1) as f32
            } else {
                0.0
            };
            let x = 2.0 * t - 1.0;
            let mid_boost = 1.0 + 0.5 * (1.0 - x * x);
            let high_boost = 0.3 + 2.7 * t;
            let user_scale = 0.5 + 1.5 * t;

            let mut target = base * mid_boost * high_boost * user_scale * 0.75;
            if !target.is_finite() {
                target = 0.0;
            }

            let current = self.values[i];
            let factor = if target > current {
                RISE_FACTOR
            } else {
                FALL_FACTOR
            };
            self.values[i] = current + (target - current) * factor;
        }

        &self.values
    }
}
