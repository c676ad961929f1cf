//! Composite Signal Nodes
//!
//! Composites own other [`SignalNode`]s and combine them. Children are always
//! marked as sub-components so they never register at the top level; the
//! composite registers them under its own path instead, which is what yields
//! names like `"FM Carrier FM Modulator Sine Frequency"` for nested graphs.

use crate::filter::Filter;
use crate::node::{clamp_amplitude, Oscillator, SignalNode, DEFAULT_FREQUENCY};
use crate::param::{cell, ParamCell, ParamPath, ParamSpec, ValueFormat};
use crate::registry::ParamRegistry;
use tracing::debug;

/// Adopt a node as a sub-component of a composite
fn adopt(node: &mut dyn SignalNode, sample_rate: f64) {
    node.set_amplitude(1.0);
    node.set_used_as_component(true);
    node.set_sample_rate(sample_rate);
    node.prepare();
}

// =============================================================================
// FM Composite
// =============================================================================

/// Frequency modulation of a carrier node by a modulator node.
///
/// Each sample pulls one modulator sample `m` and drives the carrier at the
/// instantaneous frequency `base + m · depth` for that call only. The
/// carrier's stored base frequency is never written on the audio path, so a
/// depth of zero is an exact no-op.
pub struct FmNode {
    carrier: Option<Box<dyn SignalNode>>,
    modulator: Option<Box<dyn SignalNode>>,
    depth: ParamCell,
    carrier_freq: f64,
    modulator_freq: f64,
    amplitude: f64,
    sample_rate: f64,
    component: bool,
}

impl FmNode {
    pub const DEFAULT_DEPTH: f64 = 100.0;
    pub const DEFAULT_CARRIER_FREQ: f64 = DEFAULT_FREQUENCY;
    pub const DEFAULT_MODULATOR_FREQ: f64 = 880.0;

    pub fn new(sample_rate: f64) -> Self {
        Self {
            carrier: None,
            modulator: None,
            depth: cell(Self::DEFAULT_DEPTH),
            carrier_freq: Self::DEFAULT_CARRIER_FREQ,
            modulator_freq: Self::DEFAULT_MODULATOR_FREQ,
            amplitude: 1.0,
            sample_rate,
            component: false,
        }
    }

    /// Builder form of [`FmNode::set_carrier`]
    pub fn with_carrier(mut self, carrier: Box<dyn SignalNode>) -> Self {
        self.set_carrier(carrier);
        self
    }

    /// Builder form of [`FmNode::set_modulator`]
    pub fn with_modulator(mut self, modulator: Box<dyn SignalNode>) -> Self {
        self.set_modulator(modulator);
        self
    }

    pub fn with_depth(self, depth: f64) -> Self {
        self.set_modulation_depth(depth);
        self
    }

    /// Install a carrier, seeded with the cached carrier frequency
    pub fn set_carrier(&mut self, mut carrier: Box<dyn SignalNode>) {
        adopt(carrier.as_mut(), self.sample_rate);
        carrier.set_frequency(self.carrier_freq);
        self.carrier = Some(carrier);
    }

    /// Install a modulator, seeded with the cached modulator frequency
    pub fn set_modulator(&mut self, mut modulator: Box<dyn SignalNode>) {
        adopt(modulator.as_mut(), self.sample_rate);
        modulator.set_frequency(self.modulator_freq);
        self.modulator = Some(modulator);
    }

    pub fn set_carrier_frequency(&mut self, frequency: f64) {
        self.carrier_freq = frequency;
        if let Some(carrier) = self.carrier.as_mut() {
            carrier.set_frequency(frequency);
        }
    }

    pub fn set_modulator_frequency(&mut self, frequency: f64) {
        self.modulator_freq = frequency;
        if let Some(modulator) = self.modulator.as_mut() {
            modulator.set_frequency(frequency);
        }
    }

    /// Set depth in Hz per unit of modulator output. Negative values become 0.
    pub fn set_modulation_depth(&self, depth: f64) {
        self.depth.set(if depth > 0.0 { depth } else { 0.0 });
    }

    pub fn modulation_depth(&self) -> f64 {
        self.depth.get()
    }

    pub fn carrier_frequency(&self) -> f64 {
        self.carrier
            .as_ref()
            .map_or(self.carrier_freq, |c| c.frequency())
    }

    pub fn modulator_frequency(&self) -> f64 {
        self.modulator
            .as_ref()
            .map_or(self.modulator_freq, |m| m.frequency())
    }

    pub fn carrier(&self) -> Option<&dyn SignalNode> {
        self.carrier.as_deref()
    }

    pub fn modulator(&self) -> Option<&dyn SignalNode> {
        self.modulator.as_deref()
    }
}

impl SignalNode for FmNode {
    fn produce_at(&mut self, frequency: f64) -> f64 {
        if self.carrier.is_none() || self.modulator.is_none() {
            self.prepare();
        }
        let (Some(carrier), Some(modulator)) = (self.carrier.as_mut(), self.modulator.as_mut())
        else {
            return 0.0;
        };

        let m = modulator.produce();
        let instantaneous = frequency + m * self.depth.get();
        carrier.produce_at(instantaneous) * self.amplitude
    }

    fn frequency(&self) -> f64 {
        self.carrier_frequency()
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.set_carrier_frequency(frequency);
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = clamp_amplitude(amplitude, self.amplitude);
    }

    fn type_name(&self) -> &'static str {
        "FM"
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for child in [self.carrier.as_mut(), self.modulator.as_mut()].into_iter().flatten() {
            child.set_sample_rate(sample_rate);
        }
    }

    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath) {
        self.prepare();
        let path = prefix.child(self.type_name());
        registry.register(
            ParamSpec::new(path.child("Modulation Depth"), self.depth.clone())
                .with_range(0.0, 1000.0)
                .with_step(20.0)
                .with_format(ValueFormat::Decimal { places: 0 })
                .with_unit("Hz"),
        );
        if let Some(carrier) = self.carrier.as_mut() {
            carrier.register_with_prefix(registry, &path.child("Carrier"));
        }
        if let Some(modulator) = self.modulator.as_mut() {
            modulator.register_with_prefix(registry, &path.child("Modulator"));
        }
    }

    fn set_used_as_component(&mut self, used: bool) {
        self.component = used;
    }

    fn is_used_as_component(&self) -> bool {
        self.component
    }

    /// Create default sine children for any slot still empty
    fn prepare(&mut self) {
        if self.carrier.is_none() {
            debug!(frequency = self.carrier_freq, "creating default FM carrier");
            self.set_carrier(Box::new(Oscillator::sine(self.carrier_freq, self.sample_rate)));
        }
        if self.modulator.is_none() {
            debug!(frequency = self.modulator_freq, "creating default FM modulator");
            self.set_modulator(Box::new(Oscillator::sine(self.modulator_freq, self.sample_rate)));
        }
    }

    fn reset(&mut self) {
        for child in [self.carrier.as_mut(), self.modulator.as_mut()].into_iter().flatten() {
            child.reset();
        }
    }
}

// =============================================================================
// Additive Composite
// =============================================================================

/// Equal-weight sum of partials.
///
/// The node's frequency is a reference pitch: producing at frequency `f`
/// transposes every partial by `f / reference` for that call, which lets an
/// additive stack act as an FM carrier.
pub struct AdditiveNode {
    partials: Vec<Box<dyn SignalNode>>,
    amplitude: ParamCell,
    reference: f64,
    sample_rate: f64,
    component: bool,
}

impl AdditiveNode {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            partials: Vec::new(),
            amplitude: cell(1.0),
            reference: DEFAULT_FREQUENCY,
            sample_rate,
            component: false,
        }
    }

    /// Builder form of [`AdditiveNode::add`]
    pub fn with(mut self, partial: Box<dyn SignalNode>) -> Self {
        self.add(partial);
        self
    }

    /// Append a partial, forcing it to unit amplitude and component state
    pub fn add(&mut self, mut partial: Box<dyn SignalNode>) {
        adopt(partial.as_mut(), self.sample_rate);
        self.partials.push(partial);
    }

    pub fn clear(&mut self) {
        self.partials.clear();
    }

    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    pub fn partials(&self) -> impl Iterator<Item = &dyn SignalNode> {
        self.partials.iter().map(|p| p.as_ref())
    }
}

impl SignalNode for AdditiveNode {
    fn produce_at(&mut self, frequency: f64) -> f64 {
        if self.partials.is_empty() {
            return 0.0;
        }
        let sum: f64 = if frequency == self.reference || self.reference <= 0.0 {
            self.partials.iter_mut().map(|p| p.produce()).sum()
        } else {
            let ratio = frequency / self.reference;
            self.partials
                .iter_mut()
                .map(|p| {
                    let f = p.frequency() * ratio;
                    p.produce_at(f)
                })
                .sum()
        };
        sum / self.partials.len() as f64 * self.amplitude.get()
    }

    fn frequency(&self) -> f64 {
        self.reference
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.reference = frequency;
    }

    fn amplitude(&self) -> f64 {
        self.amplitude.get()
    }

    fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude.set(clamp_amplitude(amplitude, self.amplitude.get()));
    }

    fn type_name(&self) -> &'static str {
        "Additive"
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for partial in &mut self.partials {
            partial.set_sample_rate(sample_rate);
        }
    }

    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath) {
        let path = prefix.child(self.type_name());
        registry.register(ParamSpec::gain(path.child("Amplitude"), self.amplitude.clone()));
        for (i, partial) in self.partials.iter_mut().enumerate() {
            partial.register_with_prefix(registry, &path.child(format!("Osc {}", i + 1)));
        }
    }

    fn set_used_as_component(&mut self, used: bool) {
        self.component = used;
    }

    fn is_used_as_component(&self) -> bool {
        self.component
    }

    fn prepare(&mut self) {
        for partial in &mut self.partials {
            partial.prepare();
        }
    }

    fn reset(&mut self) {
        for partial in &mut self.partials {
            partial.reset();
        }
    }
}

// =============================================================================
// Filtered Node
// =============================================================================

/// A node whose output runs through its own filter before reaching the parent
pub struct FilteredNode {
    source: Box<dyn SignalNode>,
    filter: Box<dyn Filter>,
    amplitude: f64,
    component: bool,
}

impl FilteredNode {
    pub fn new(mut source: Box<dyn SignalNode>, mut filter: Box<dyn Filter>) -> Self {
        let sample_rate = filter.sample_rate();
        adopt(source.as_mut(), sample_rate);
        filter.set_used_as_component(true);
        Self {
            source,
            filter,
            amplitude: 1.0,
            component: false,
        }
    }

    pub fn source(&self) -> &dyn SignalNode {
        self.source.as_ref()
    }

    pub fn filter(&self) -> &dyn Filter {
        self.filter.as_ref()
    }
}

impl SignalNode for FilteredNode {
    fn produce_at(&mut self, frequency: f64) -> f64 {
        self.filter.process(self.source.produce_at(frequency)) * self.amplitude
    }

    fn frequency(&self) -> f64 {
        self.source.frequency()
    }

    fn set_frequency(&mut self, frequency: f64) {
        self.source.set_frequency(frequency);
    }

    fn amplitude(&self) -> f64 {
        self.amplitude
    }

    fn set_amplitude(&mut self, amplitude: f64) {
        self.amplitude = clamp_amplitude(amplitude, self.amplitude);
    }

    fn type_name(&self) -> &'static str {
        "Filtered"
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.source.set_sample_rate(sample_rate);
        self.filter.set_sample_rate(sample_rate);
    }

    fn register_with_prefix(&mut self, registry: &mut ParamRegistry, prefix: &ParamPath) {
        let path = prefix.child(self.type_name());
        self.source.register_with_prefix(registry, &path);
        self.filter.register_with_prefix(registry, &path);
    }

    fn set_used_as_component(&mut self, used: bool) {
        self.component = used;
    }

    fn is_used_as_component(&self) -> bool {
        self.component
    }

    fn prepare(&mut self) {
        self.source.prepare();
    }

    fn reset(&mut self) {
        self.source.reset();
        self.filter.reset();
    }
}
