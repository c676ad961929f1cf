//! Signal Nodes
//!
//! A [`SignalNode`] produces one sample per call. Leaf generators own a phase
//! accumulator; composites (see [`crate::composite`]) own other nodes through
//! the same trait, so nesting is uniform recursion over `Box<dyn SignalNode>`.

use crate::param::{cell, ParamCell, ParamPath, ParamSpec};
use crate::registry::ParamRegistry;
use std::f64::consts::TAU;
use tracing::debug;

/// Default oscillator frequency in Hz
pub const DEFAULT_FREQUENCY: f64 = 440.0;

/// The polymorphic generator abstraction.
///
/// Implementations must keep `produce` and `produce_at` bounded and
/// allocation-free: they run on the audio context.
pub trait SignalNode: Send {
    /// Produce one sample at the node's own base frequency
    fn produce(&mut self) -> f64 {
        let frequency = self.frequency();
        self.produce_at(frequency)
    }

    /// Produce one sample as if the base frequency were `frequency` for this
    /// call only. The stored base frequency is left untouched.
    fn produce_at(&mut self, frequency: f64) -> f64;

    /// Current base frequency in Hz
    fn frequency(&self) -> f64;

    fn set_frequency(&mut self, frequency: f64);

    fn amplitude(&self) -> f64;

    /// Set the output gain, clamped to [0, 1]. NaN is ignored.
    fn set_amplitude(&mut self, amplitude: f64);

    /// Short label used as this node's segment in parameter paths
    fn type_name(&self) -> &'static str;

    fn set_sample_rate(&mut self, sample_rate: f64);

    /// Register this node's knobs under `prefix`, where the node's own path is
    /// `prefix` followed by [`SignalNode::type_name`].
    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath);

    /// Register at the top level of the registry. Sub-components never do;
    /// their owning composite exposes them through a prefix instead.
    fn register_params(&mut self, registry: &mut ParamRegistry) {
        if self.is_used_as_component() {
            debug!(node = self.type_name(), "skipping top-level registration of sub-component");
            return;
        }
        self.register_with_prefix(registry, &ParamPath::root());
    }

    fn set_used_as_component(&mut self, used: bool);

    fn is_used_as_component(&self) -> bool;

    /// Materialize anything that must exist before the first sample.
    /// Called on the control context when a node is installed.
    fn prepare(&mut self) {}

    /// Return to the initial phase/state
    fn reset(&mut self);
}

/// Clamp a requested node amplitude into [0, 1], keeping `current` for NaN
pub(crate) fn clamp_amplitude(amplitude: f64, current: f64) -> f64 {
    if amplitude.is_nan() {
        current
    } else {
        amplitude.clamp(0.0, 1.0)
    }
}

/// Leaf waveform shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Saw,
}

impl Waveform {
    /// Evaluate the unit-amplitude waveform at a phase in [0, 1)
    #[inline]
    pub fn evaluate(self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => libm::sin(TAU * phase),
            Waveform::Saw => 2.0 * phase - 1.0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Waveform::Sine => "Sine",
            Waveform::Saw => "Saw",
        }
    }
}

/// Periodic generator with a phase accumulator
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f64,
    sample_rate: f64,
    frequency: ParamCell,
    amplitude: f64,
    component: bool,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        Self {
            waveform,
            phase: 0.0,
            sample_rate,
            frequency: cell(frequency),
            amplitude: 1.0,
            component: false,
        }
    }

    pub fn sine(frequency: f64, sample_rate: f64) -> Self {
        Self::new(Waveform::Sine, frequency, sample_rate)
    }

    pub fn saw(frequency: f64, sample_rate: f64) -> Self {
        Self::new(Waveform::Saw, frequency, sample_rate)
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Current phase in [0, 1)
    pub fn phase(&self) -> f64 {
        self.phase
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Shared frequency cell, for direct live binding
    pub fn frequency_cell(&self) -> ParamCell {
        self.frequency.clone()
    }

    #[inline]
    fn advance(&mut self, frequency: f64) {
        if self.sample_rate <= 0.0 {
            return;
        }
        self.phase += frequency / self.sample_rate;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        } else if self.phase < 0.0 {
            self.phase += 1.0;
        }
        // Only reachable for increments of a full cycle or more.
        if !(0.0..1.0).contains(&self.phase) {
            self.phase = self.phase.rem_euclid(1.0);
            if !self.phase.is_finite() || self.phase >= 1.0 {
                self.phase = 0.0;
            }
        }
    }
}

impl SignalNode for Oscillator {
    #[inline]
    fn produce_at(&mut self, frequency: f64) -> f64 {
        let sample = self.waveform.evaluate(self.phase) * self.amplitude;
        self.advance(frequency);
        sample
    }

    fn frequency(&self) -> f64 {
        self.frequency.get()
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.frequency.set(frequency);
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = clamp_amplitude(amplitude, self.amplitude);
    }

    fn type_name(&self) -> &'static str {
        self.waveform.name()
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
    }

    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath) {
        let path = prefix.child(self.type_name());
        registry.register(
            ParamSpec::frequency(path.child("Frequency"), self.frequency.clone())
                .with_range(1.0, 2000.0)
                .with_step(20.0),
        );
    }

    fn set_used_as_component(&mut self, used: bool) {
        self.component = used;
    }

    fn is_used_as_component(&self) -> bool {
        self.component
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}
