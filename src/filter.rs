//! Biquad Filters
//!
//! Second-order IIR stages evaluated with the direct form I recurrence
//! `y = b0·x + b1·x1 + b2·x2 − a1·y1 − a2·y2`. Coefficients follow the RBJ
//! audio EQ cookbook and are normalized by `a0`.
//!
//! Musical parameters live in shared cells so the registry can write them from
//! the control context. A registry write raises the filter's dirty flag; the
//! filter re-derives its coefficients at the start of its next `process` call.

use crate::param::{cell, ParamCell, ParamPath, ParamSpec, ValueFormat};
use crate::registry::ParamRegistry;
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cutoff/center frequencies are kept at or below this fraction of the sample rate
pub const MAX_FREQUENCY_RATIO: f64 = 0.45;

/// Lowest frequency a filter is tuned to
pub const MIN_FREQUENCY: f64 = 1.0;

/// Stable Q range for the low-pass stage
pub const LOWPASS_Q_RANGE: (f64, f64) = (0.1, 10.0);

/// Stable Q range for the band-pass stage
pub const BANDPASS_Q_RANGE: (f64, f64) = (0.1, 30.0);

/// The polymorphic filter abstraction.
///
/// `process` runs on the audio context and must stay bounded and allocation-free.
pub trait Filter: Send {
    /// Filter one sample
    fn process(&mut self, input: f64) -> f64;

    /// Filter a buffer in place
    fn process_block(&mut self, buffer: &mut [f64]) {
        for sample in buffer.iter_mut() {
            *sample = self.process(*sample);
        }
    }

    /// Zero the delay line. Coefficients are kept.
    fn reset(&mut self);

    fn type_name(&self) -> &'static str;

    fn sample_rate(&self) -> f64;

    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Register this filter's knobs under `prefix` followed by its type name
    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath);

    fn register_params(&mut self, registry: &mut ParamRegistry) {
        if self.is_used_as_component() {
            debug!(filter = self.type_name(), "skipping top-level registration of sub-component");
            return;
        }
        self.register_with_prefix(registry, &ParamPath::root());
    }

    fn set_used_as_component(&mut self, used: bool);

    fn is_used_as_component(&self) -> bool;
}

/// Clamp, falling back when the request is NaN
#[inline]
fn clamp_or(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        fallback.clamp(min, max)
    } else {
        value.clamp(min, max)
    }
}

fn max_frequency(sample_rate: f64) -> f64 {
    (sample_rate * MAX_FREQUENCY_RATIO).max(MIN_FREQUENCY)
}

// =============================================================================
// Biquad Core
// =============================================================================

/// Normalized biquad coefficients (`a0 == 1`)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl BiquadCoefficients {
    /// Pass-through
    pub const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Second-order low-pass
    pub fn lowpass(cutoff: f64, q: f64, sample_rate: f64) -> Self {
        let omega = TAU * cutoff / sample_rate;
        let (sin_w, cos_w) = (libm::sin(omega), libm::cos(omega));
        let alpha = sin_w / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 - cos_w) / 2.0 / a0,
            b1: (1.0 - cos_w) / a0,
            b2: (1.0 - cos_w) / 2.0 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Band-pass with constant skirt gain (peak gain = Q)
    pub fn bandpass(center: f64, q: f64, sample_rate: f64) -> Self {
        let omega = TAU * center / sample_rate;
        let (sin_w, cos_w) = (libm::sin(omega), libm::cos(omega));
        let alpha = sin_w / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: sin_w / 2.0 / a0,
            b1: 0.0,
            b2: -sin_w / 2.0 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

impl Default for BiquadCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Direct form I biquad with a 4-element delay line
#[derive(Debug, Clone, Default)]
pub struct Biquad {
    coefficients: BiquadCoefficients,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl Biquad {
    pub fn new(coefficients: BiquadCoefficients) -> Self {
        Self {
            coefficients,
            ..Self::default()
        }
    }

    pub fn coefficients(&self) -> BiquadCoefficients {
        self.coefficients
    }

    pub fn set_coefficients(&mut self, coefficients: BiquadCoefficients) {
        self.coefficients = coefficients;
    }

    #[inline]
    pub fn process(&mut self, input: f64) -> f64 {
        let c = &self.coefficients;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;
        output
    }

    pub fn reset(&mut self) {
        self.x1 = 0.0;
        self.x2 = 0.0;
        self.y1 = 0.0;
        self.y2 = 0.0;
    }
}

fn dirty_hook(flag: &Arc<AtomicBool>) -> Arc<dyn Fn() + Send + Sync> {
    let flag = Arc::clone(flag);
    Arc::new(move || flag.store(true, Ordering::Release))
}

// =============================================================================
// Low-Pass
// =============================================================================

/// Resonant low-pass stage
#[derive(Debug)]
pub struct LowPassFilter {
    biquad: Biquad,
    sample_rate: f64,
    cutoff: ParamCell,
    resonance: ParamCell,
    dirty: Arc<AtomicBool>,
    component: bool,
}

impl LowPassFilter {
    pub const DEFAULT_CUTOFF: f64 = 1000.0;
    pub const DEFAULT_RESONANCE: f64 = std::f64::consts::FRAC_1_SQRT_2;

    pub fn new(sample_rate: f64) -> Self {
        let mut filter = Self {
            biquad: Biquad::default(),
            sample_rate,
            cutoff: cell(Self::DEFAULT_CUTOFF),
            resonance: cell(Self::DEFAULT_RESONANCE),
            dirty: Arc::new(AtomicBool::new(false)),
            component: false,
        };
        filter.update_coefficients();
        filter
    }

    pub fn with_params(sample_rate: f64, cutoff: f64, resonance: f64) -> Self {
        let mut filter = Self::new(sample_rate);
        filter.cutoff.set(cutoff);
        filter.resonance.set(resonance);
        filter.store_clamped();
        filter
    }

    pub fn cutoff(&self) -> f64 {
        self.cutoff.get()
    }

    pub fn resonance(&self) -> f64 {
        self.resonance.get()
    }

    /// Set cutoff in Hz, clamped to [1, 0.45·sample rate]
    pub fn set_cutoff(&mut self, cutoff: f64) {
        self.cutoff.set(cutoff);
        self.store_clamped();
    }

    /// Set Q, clamped to [0.1, 10]
    pub fn set_resonance(&mut self, resonance: f64) {
        self.resonance.set(resonance);
        self.store_clamped();
    }

    pub fn coefficients(&self) -> BiquadCoefficients {
        self.biquad.coefficients()
    }

    fn clamped(&self) -> (f64, f64) {
        let cutoff = clamp_or(
            self.cutoff.get(),
            MIN_FREQUENCY,
            max_frequency(self.sample_rate),
            Self::DEFAULT_CUTOFF,
        );
        let (q_min, q_max) = LOWPASS_Q_RANGE;
        let q = clamp_or(self.resonance.get(), q_min, q_max, Self::DEFAULT_RESONANCE);
        (cutoff, q)
    }

    /// Control-side only: writes the clamped values back into the cells
    fn store_clamped(&mut self) {
        let (cutoff, q) = self.clamped();
        self.cutoff.set(cutoff);
        self.resonance.set(q);
        self.update_coefficients();
    }

    /// Reads the cells and never writes them, so it is safe on the audio path
    fn update_coefficients(&mut self) {
        let (cutoff, q) = self.clamped();
        self.biquad
            .set_coefficients(BiquadCoefficients::lowpass(cutoff, q, self.sample_rate));
    }
}

impl Filter for LowPassFilter {
    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        if self.dirty.swap(false, Ordering::Acquire) {
            self.update_coefficients();
        }
        self.biquad.process(input)
    }

    fn reset(&mut self) {
        self.biquad.reset();
    }

    fn type_name(&self) -> &'static str {
        "LowPass"
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.store_clamped();
    }

    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath) {
        let path = prefix.child(self.type_name());
        registry.register_with_hook(
            ParamSpec::frequency(path.child("Cutoff Freq"), self.cutoff.clone())
                .with_range(20.0, 8000.0)
                .with_step(50.0),
            dirty_hook(&self.dirty),
        );
        registry.register_with_hook(
            ParamSpec::new(path.child("Resonance"), self.resonance.clone())
                .with_range(0.1, 10.0)
                .with_step(0.1)
                .with_format(ValueFormat::Decimal { places: 2 }),
            dirty_hook(&self.dirty),
        );
    }

    fn set_used_as_component(&mut self, used: bool) {
        self.component = used;
    }

    fn is_used_as_component(&self) -> bool {
        self.component
    }
}

// =============================================================================
// Band-Pass
// =============================================================================

/// Band-pass stage tuned by center frequency and bandwidth
#[derive(Debug)]
pub struct BandPassFilter {
    biquad: Biquad,
    sample_rate: f64,
    center: ParamCell,
    bandwidth: ParamCell,
    dirty: Arc<AtomicBool>,
    component: bool,
}

impl BandPassFilter {
    pub const DEFAULT_CENTER: f64 = 1000.0;
    pub const DEFAULT_BANDWIDTH: f64 = 200.0;

    pub fn new(sample_rate: f64) -> Self {
        let mut filter = Self {
            biquad: Biquad::default(),
            sample_rate,
            center: cell(Self::DEFAULT_CENTER),
            bandwidth: cell(Self::DEFAULT_BANDWIDTH),
            dirty: Arc::new(AtomicBool::new(false)),
            component: false,
        };
        filter.update_coefficients();
        filter
    }

    pub fn with_params(sample_rate: f64, center: f64, bandwidth: f64) -> Self {
        let mut filter = Self::new(sample_rate);
        filter.center.set(center);
        filter.bandwidth.set(bandwidth);
        filter.store_clamped();
        filter
    }

    pub fn center(&self) -> f64 {
        self.center.get()
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth.get()
    }

    /// Effective Q, `center / bandwidth` clamped to [0.1, 30]
    pub fn q(&self) -> f64 {
        let (center, bandwidth) = self.clamped();
        Self::q_for(center, bandwidth)
    }

    /// Set the center frequency in Hz, clamped to [1, 0.45·sample rate]
    pub fn set_center(&mut self, center: f64) {
        self.center.set(center);
        self.store_clamped();
    }

    /// Set the bandwidth in Hz, clamped to [1, 0.4·sample rate]
    pub fn set_bandwidth(&mut self, bandwidth: f64) {
        self.bandwidth.set(bandwidth);
        self.store_clamped();
    }

    pub fn coefficients(&self) -> BiquadCoefficients {
        self.biquad.coefficients()
    }

    fn q_for(center: f64, bandwidth: f64) -> f64 {
        let (q_min, q_max) = BANDPASS_Q_RANGE;
        (center / bandwidth).clamp(q_min, q_max)
    }

    fn clamped(&self) -> (f64, f64) {
        let center = clamp_or(
            self.center.get(),
            MIN_FREQUENCY,
            max_frequency(self.sample_rate),
            Self::DEFAULT_CENTER,
        );
        let bandwidth = clamp_or(
            self.bandwidth.get(),
            MIN_FREQUENCY,
            (self.sample_rate * 0.4).max(MIN_FREQUENCY),
            Self::DEFAULT_BANDWIDTH,
        );
        (center, bandwidth)
    }

    /// Control-side only: writes the clamped values back into the cells
    fn store_clamped(&mut self) {
        let (center, bandwidth) = self.clamped();
        self.center.set(center);
        self.bandwidth.set(bandwidth);
        self.update_coefficients();
    }

    /// Reads the cells and never writes them, so it is safe on the audio path
    fn update_coefficients(&mut self) {
        let (center, bandwidth) = self.clamped();
        self.biquad.set_coefficients(BiquadCoefficients::bandpass(
            center,
            Self::q_for(center, bandwidth),
            self.sample_rate,
        ));
    }
}

impl Filter for BandPassFilter {
    #[inline]
    fn process(&mut self, input: f64) -> f64 {
        if self.dirty.swap(false, Ordering::Acquire) {
            self.update_coefficients();
        }
        self.biquad.process(input)
    }

    fn reset(&mut self) {
        self.biquad.reset();
    }

    fn type_name(&self) -> &'static str {
        "BandPass"
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.store_clamped();
    }

    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath) {
        let path = prefix.child(self.type_name());
        registry.register_with_hook(
            ParamSpec::frequency(path.child("Target Freq"), self.center.clone())
                .with_range(20.0, 8000.0)
                .with_step(50.0),
            dirty_hook(&self.dirty),
        );
        registry.register_with_hook(
            ParamSpec::frequency(path.child("Bandwidth"), self.bandwidth.clone())
                .with_range(10.0, 2000.0)
                .with_step(10.0),
            dirty_hook(&self.dirty),
        );
    }

    fn set_used_as_component(&mut self, used: bool) {
        self.component = used;
    }

    fn is_used_as_component(&self) -> bool {
        self.component
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SR: f64 = 44100.0;

    /// Peak of the whole impulse response and of its final 10%
    fn impulse_peaks(filter: &mut dyn Filter, len: usize) -> (f64, f64) {
        let tail_start = len - len / 10;
        let (mut peak, mut tail) = (0.0_f64, 0.0_f64);
        for n in 0..len {
            let y = filter.process(if n == 0 { 1.0 } else { 0.0 });
            assert!(y.is_finite());
            peak = peak.max(y.abs());
            if n >= tail_start {
                tail = tail.max(y.abs());
            }
        }
        (peak, tail)
    }

    #[test]
    fn test_lowpass_impulse_decays_for_clamped_params() {
        for &cutoff in &[0.0, 20.0, 440.0, 5000.0, 1e6] {
            for &q in &[0.0, 0.7071, 10.0, 1000.0] {
                let mut filter = LowPassFilter::with_params(SR, cutoff, q);
                let (peak, tail) = impulse_peaks(&mut filter, 4 * SR as usize);
                assert!(peak < 100.0, "cutoff {cutoff} q {q}: peak {peak}");
                assert!(tail < 0.5 * peak, "cutoff {cutoff} q {q}: tail {tail} peak {peak}");
            }
        }
    }

    #[test]
    fn test_bandpass_impulse_decays_for_clamped_params() {
        for &center in &[0.0, 20.0, 440.0, 5000.0, 1e6] {
            for &bandwidth in &[0.0, 10.0, 200.0, 1e6] {
                let mut filter = BandPassFilter::with_params(SR, center, bandwidth);
                let (peak, tail) = impulse_peaks(&mut filter, 4 * SR as usize);
                assert!(peak < 100.0, "center {center} bw {bandwidth}: peak {peak}");
                assert!(tail < 0.5 * peak, "center {center} bw {bandwidth}: tail {tail}");
            }
        }
    }

    #[test]
    fn test_parameters_are_clamped() {
        let mut lp = LowPassFilter::new(SR);
        lp.set_cutoff(1e9);
        lp.set_resonance(0.0);
        assert_relative_eq!(lp.cutoff(), SR * MAX_FREQUENCY_RATIO);
        assert_eq!(lp.resonance(), 0.1);

        let mut bp = BandPassFilter::new(SR);
        bp.set_center(-10.0);
        bp.set_bandwidth(f64::NAN);
        assert_eq!(bp.center(), MIN_FREQUENCY);
        assert_eq!(bp.bandwidth(), BandPassFilter::DEFAULT_BANDWIDTH);
        assert_eq!(bp.q(), 0.1);
    }

    #[test]
    fn test_lowpass_passes_dc() {
        let mut lp = LowPassFilter::new(SR);
        let mut y = 0.0;
        for _ in 0..10_000 {
            y = lp.process(1.0);
        }
        assert_relative_eq!(y, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_bandpass_blocks_dc() {
        let mut bp = BandPassFilter::new(SR);
        let mut y = 1.0;
        for _ in 0..20_000 {
            y = bp.process(1.0);
        }
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_reset_keeps_coefficients() {
        let mut lp = LowPassFilter::with_params(SR, 500.0, 2.0);
        let before = lp.coefficients();
        let first = lp.process(1.0);
        lp.process(0.3);
        lp.reset();
        assert_eq!(lp.coefficients(), before);
        assert_eq!(lp.process(1.0), first);
    }

    #[test]
    fn test_registry_write_rederives_coefficients() {
        let mut registry = ParamRegistry::new();
        let mut lp = LowPassFilter::new(SR);
        lp.register_params(&mut registry);

        assert_eq!(registry.find("LowPass Cutoff Freq"), Some(0));
        assert_eq!(registry.find("LowPass Resonance"), Some(1));

        registry.set_by_name("LowPass Cutoff Freq", 200.0);
        lp.process(0.0);
        assert_eq!(
            lp.coefficients(),
            BiquadCoefficients::lowpass(200.0, LowPassFilter::DEFAULT_RESONANCE, SR)
        );
    }

    #[test]
    fn test_process_leaves_registry_values_alone() {
        let sr = 8000.0;
        let mut registry = ParamRegistry::new();
        let mut lp = LowPassFilter::new(sr);
        lp.register_params(&mut registry);
        let mut bp = BandPassFilter::new(sr);
        bp.register_params(&mut registry);

        // Within the registry bounds but past what the filters can run at 8 kHz
        registry.set_by_name("LowPass Cutoff Freq", 8000.0);
        registry.set_by_name("BandPass Target Freq", 7000.0);
        registry.set_by_name("BandPass Bandwidth", 2000.0);
        lp.process(0.0);
        bp.process(0.0);

        assert_eq!(registry.value("LowPass Cutoff Freq"), Some(8000.0));
        assert_eq!(registry.value("BandPass Target Freq"), Some(7000.0));
        assert_eq!(registry.value("BandPass Bandwidth"), Some(2000.0));
        assert_eq!(
            lp.coefficients(),
            BiquadCoefficients::lowpass(sr * MAX_FREQUENCY_RATIO, LowPassFilter::DEFAULT_RESONANCE, sr)
        );

        // A later write is still picked up
        registry.set_by_name("LowPass Cutoff Freq", 500.0);
        lp.process(0.0);
        assert_eq!(registry.value("LowPass Cutoff Freq"), Some(500.0));
        assert_eq!(
            lp.coefficients(),
            BiquadCoefficients::lowpass(500.0, LowPassFilter::DEFAULT_RESONANCE, sr)
        );
    }

    #[test]
    fn test_bandpass_registration_names() {
        let mut registry = ParamRegistry::new();
        let mut bp = BandPassFilter::new(SR);
        bp.register_with_prefix(&mut registry, &ParamPath::from_segments(["Stage 2"]));

        let names: Vec<&str> = registry.iter().map(|(_, e)| e.name()).collect();
        assert_eq!(names, vec!["Stage 2 BandPass Target Freq", "Stage 2 BandPass Bandwidth"]);

        registry.set(1, 5.0);
        bp.process(0.0);
        assert_eq!(bp.bandwidth(), 10.0);
        assert_relative_eq!(bp.q(), 30.0);
    }

    #[test]
    fn test_process_block_matches_per_sample() {
        let input: Vec<f64> = (0..64).map(|n| ((n * 7) % 13) as f64 / 13.0 - 0.5).collect();
        let mut a = BandPassFilter::with_params(SR, 800.0, 100.0);
        let mut b = BandPassFilter::with_params(SR, 800.0, 100.0);

        let mut block = input.clone();
        a.process_block(&mut block);
        let single: Vec<f64> = input.iter().map(|&x| b.process(x)).collect();
        assert_eq!(block, single);
    }
}
