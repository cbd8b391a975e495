use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::types::{EqualizerBand, BAND_BANDWIDTH_OCTAVES, BAND_COUNT, BAND_FREQUENCIES};

/// Per-band gain is clamped to this range before it reaches the filter design
/// equations; extreme gains make the peaking sections unstable.
pub const GAIN_LIMIT_DB: f32 = 15.0;

#[derive(Clone, Copy)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Coefficients {
    fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

/// Second-order IIR section configured as a peaking equalizer band.
pub struct BiquadFilter {
    coeffs: Coefficients,
    z1: f32,
    z2: f32,
}

impl BiquadFilter {
    pub fn new() -> Self {
        Self {
            coeffs: Coefficients::identity(),
            z1: 0.0,
            z2: 0.0,
        }
    }

    /// Recomputes the five coefficients from the RBJ peaking-EQ design
    /// equations, with bandwidth expressed in octaves. History is preserved.
    pub fn configure(
        &mut self,
        sample_rate: f32,
        center_hz: f32,
        bandwidth_octaves: f32,
        gain_db: f32,
    ) {
        self.coeffs = peaking_coefficients(sample_rate, center_hz, bandwidth_octaves, gain_db);
    }

    /// Transposed direct form II, one sample per call, no allocation.
    #[inline]
    pub fn process(&mut self, sample: f32) -> f32 {
        let y = self.coeffs.b0 * sample + self.z1;
        self.z1 = self.coeffs.b1 * sample - self.coeffs.a1 * y + self.z2;
        self.z2 = self.coeffs.b2 * sample - self.coeffs.a2 * y;
        y
    }
}

impl Default for BiquadFilter {
    fn default() -> Self {
        Self::new()
    }
}

struct BandCell {
    center_hz: f32,
    gain_db_bits: AtomicU32,
}

/// Shared control block for the equalizer: the fixed band table plus the
/// caller-mutated gains. Control threads write gains through atomics; the
/// audio thread consumes the dirty flag at buffer boundaries.
pub struct EqControl {
    bands: Vec<BandCell>,
    dirty: AtomicBool,
}

impl EqControl {
    pub fn new() -> Self {
        let bands = BAND_FREQUENCIES
            .iter()
            .map(|&center_hz| BandCell {
                center_hz,
                gain_db_bits: AtomicU32::new(0.0_f32.to_bits()),
            })
            .collect();
        Self {
            bands,
            dirty: AtomicBool::new(false),
        }
    }

    /// Stores a new gain for one band. Out-of-range indices are a silent
    /// no-op. Gain is clamped to `±GAIN_LIMIT_DB`.
    pub fn set_gain(&self, band_index: usize, gain_db: f32) {
        let Some(band) = self.bands.get(band_index) else {
            return;
        };
        let clamped = gain_db.clamp(-GAIN_LIMIT_DB, GAIN_LIMIT_DB);
        let old = band.gain_db_bits.swap(clamped.to_bits(), Ordering::SeqCst);
        if old != clamped.to_bits() {
            self.dirty.store(true, Ordering::SeqCst);
        }
    }

    pub fn gain_db(&self, band_index: usize) -> Option<f32> {
        self.bands
            .get(band_index)
            .map(|band| f32::from_bits(band.gain_db_bits.load(Ordering::Relaxed)))
    }

    pub fn bands(&self) -> Vec<EqualizerBand> {
        self.bands
            .iter()
            .map(|band| EqualizerBand {
                center_frequency_hz: band.center_hz,
                gain_db: f32::from_bits(band.gain_db_bits.load(Ordering::Relaxed)),
                bandwidth_octaves: BAND_BANDWIDTH_OCTAVES,
            })
            .collect()
    }

    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }
}

impl Default for EqControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-channel cascade of peaking filters, one per band. Applies gains in
/// place on a pulled sample buffer; coefficient recomputation happens at
/// buffer boundaries only, never inside the per-sample loop.
pub struct Equalizer {
    control: Arc<EqControl>,
    filters: Vec<BiquadFilter>,
    channels: usize,
    sample_rate: f32,
}

impl Equalizer {
    pub fn new(channels: u16, sample_rate: u32, control: Arc<EqControl>) -> Self {
        let channels = channels.max(1) as usize;
        let mut eq = Self {
            control,
            filters: (0..channels * BAND_COUNT)
                .map(|_| BiquadFilter::new())
                .collect(),
            channels,
            sample_rate: sample_rate as f32,
        };
        eq.reconfigure();
        eq
    }

    /// Processes interleaved samples in place. Each frame's sample passes
    /// sequentially through every band's filter in band order, per channel.
    pub fn process(&mut self, buffer: &mut [f32]) {
        if self.control.take_dirty() {
            self.reconfigure();
        }

        for frame in buffer.chunks_mut(self.channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let filters = &mut self.filters[ch * BAND_COUNT..(ch + 1) * BAND_COUNT];
                let mut value = *sample;
                for filter in filters {
                    value = filter.process(value);
                }
                *sample = value;
            }
        }
    }

    fn reconfigure(&mut self) {
        for band_index in 0..BAND_COUNT {
            let gain_db = self.control.gain_db(band_index).unwrap_or(0.0);
            let center_hz = BAND_FREQUENCIES[band_index];
            for ch in 0..self.channels {
                self.filters[ch * BAND_COUNT + band_index].configure(
                    self.sample_rate,
                    center_hz,
                    BAND_BANDWIDTH_OCTAVES,
                    gain_db,
                );
            }
        }
    }
}

fn sanitize_frequency(frequency: f32, sample_rate: f32) -> f32 {
    let nyquist = (sample_rate * 0.5) - 1.0;
    frequency.clamp(10.0, nyquist.max(10.0))
}

fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

fn normalize(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Coefficients {
    let inv_a0 = if a0.abs() > f32::EPSILON {
        1.0 / a0
    } else {
        1.0
    };
    Coefficients {
        b0: b0 * inv_a0,
        b1: b1 * inv_a0,
        b2: b2 * inv_a0,
        a1: a1 * inv_a0,
        a2: a2 * inv_a0,
    }
}

fn peaking_coefficients(
    sample_rate: f32,
    center_hz: f32,
    bandwidth_octaves: f32,
    gain_db: f32,
) -> Coefficients {
    let w0 = 2.0 * std::f32::consts::PI * sanitize_frequency(center_hz, sample_rate) / sample_rate;
    let sin_w0 = w0.sin();
    let cos_w0 = w0.cos();
    // Bandwidth-in-octaves form of alpha from the RBJ cookbook.
    let alpha = sin_w0 * (std::f32::consts::LN_2 / 2.0 * bandwidth_octaves * w0 / sin_w0).sinh();
    let a = db_to_gain(gain_db / 2.0);

    normalize(
        1.0 + alpha * a,
        -2.0 * cos_w0,
        1.0 - alpha * a,
        1.0 + alpha / a,
        -2.0 * cos_w0,
        1.0 - alpha / a,
    )
}
