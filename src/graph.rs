//! Sound Graph
//!
//! The top-level container the audio context pulls from. Per sample it mixes
//! every root node by its normalized weight, runs the mix through the filter
//! chain in insertion order, applies the first envelope's gain and finally the
//! master volume.
//!
//! Topology changes (`add_node`, `clear_nodes`, `add_filter`, ...) are
//! control-context operations. A running graph is never mutated structurally
//! in place; see [`crate::engine`] for how a rebuilt graph is swapped in.

use crate::envelope::Envelope;
use crate::filter::Filter;
use crate::node::SignalNode;
use crate::param::{cell, ParamCell, ParamPath, ParamSpec};
use crate::registry::ParamRegistry;
use tracing::debug;

/// Default master volume for a new graph
pub const DEFAULT_MASTER_VOLUME: f64 = 0.7;

/// Mixing container for root nodes, filters and envelopes
pub struct SoundGraph {
    sample_rate: f64,
    nodes: Vec<Box<dyn SignalNode>>,
    weights: Vec<f64>,
    filters: Vec<Box<dyn Filter>>,
    envelopes: Vec<Envelope>,
    master_volume: ParamCell,
}

impl SoundGraph {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            sample_rate,
            nodes: Vec::new(),
            weights: Vec::new(),
            filters: Vec::new(),
            envelopes: Vec::new(),
            master_volume: cell(DEFAULT_MASTER_VOLUME),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Propagate a new sample rate to every node, filter and envelope
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        for node in &mut self.nodes {
            node.set_sample_rate(sample_rate);
        }
        for filter in &mut self.filters {
            filter.set_sample_rate(sample_rate);
        }
        for envelope in &mut self.envelopes {
            envelope.set_sample_rate(sample_rate);
        }
    }

    // =========================================================================
    // Topology
    // =========================================================================

    /// Append a root node with weight 1.0, then renormalize
    pub fn add_node(&mut self, mut node: Box<dyn SignalNode>) {
        node.prepare();
        self.nodes.push(node);
        self.weights.push(1.0);
        self.normalize_weights();
    }

    /// Remove every root node and the whole filter chain
    pub fn clear_nodes(&mut self) {
        self.nodes.clear();
        self.weights.clear();
        self.filters.clear();
    }

    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn clear_filters(&mut self) {
        self.filters.clear();
    }

    pub fn add_envelope(&mut self, envelope: Envelope) {
        self.envelopes.push(envelope);
    }

    pub fn clear_envelopes(&mut self) {
        self.envelopes.clear();
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    pub fn envelope_count(&self) -> usize {
        self.envelopes.len()
    }

    pub fn node(&self, index: usize) -> Option<&dyn SignalNode> {
        self.nodes.get(index).map(|n| n.as_ref())
    }

    pub fn filter(&self, index: usize) -> Option<&dyn Filter> {
        self.filters.get(index).map(|f| f.as_ref())
    }

    pub fn envelope(&self, index: usize) -> Option<&Envelope> {
        self.envelopes.get(index)
    }

    pub fn envelope_mut(&mut self, index: usize) -> Option<&mut Envelope> {
        self.envelopes.get_mut(index)
    }

    // =========================================================================
    // Mixing
    // =========================================================================

    /// Set one root's weight, clamped to [0, 1], then renormalize.
    /// Out-of-range indices are ignored.
    pub fn set_mix_weight(&mut self, index: usize, weight: f64) {
        let Some(slot) = self.weights.get_mut(index) else {
            return;
        };
        *slot = if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) };
        self.normalize_weights();
    }

    /// Set the leading weights in one pass, each clamped to [0, 1], then
    /// renormalize once. Extra values are ignored.
    pub fn set_mix_weights(&mut self, weights: &[f64]) {
        for (slot, weight) in self.weights.iter_mut().zip(weights) {
            *slot = if weight.is_nan() { 0.0 } else { weight.clamp(0.0, 1.0) };
        }
        self.normalize_weights();
    }

    pub fn mix_weight(&self, index: usize) -> Option<f64> {
        self.weights.get(index).copied()
    }

    pub fn mix_weights(&self) -> &[f64] {
        &self.weights
    }

    fn normalize_weights(&mut self) {
        if self.weights.is_empty() {
            return;
        }
        let sum: f64 = self.weights.iter().sum();
        if sum > 0.0 && sum.is_finite() {
            for w in &mut self.weights {
                *w /= sum;
            }
        } else {
            let equal = 1.0 / self.weights.len() as f64;
            self.weights.fill(equal);
        }
    }

    pub fn master_volume(&self) -> f64 {
        self.master_volume.get()
    }

    /// Set the master volume, clamped to [0, 1]
    pub fn set_master_volume(&mut self, volume: f64) {
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        self.master_volume.set(volume);
    }

    pub fn with_master_volume(mut self, volume: f64) -> Self {
        self.set_master_volume(volume);
        self
    }

    // =========================================================================
    // Notes
    // =========================================================================

    pub fn note_on(&mut self) {
        for envelope in &mut self.envelopes {
            envelope.note_on();
        }
    }

    pub fn note_off(&mut self) {
        for envelope in &mut self.envelopes {
            envelope.note_off();
        }
    }

    /// True while the first envelope is sounding, or always without envelopes
    pub fn is_active(&self) -> bool {
        self.envelopes.first().map_or(true, Envelope::is_active)
    }

    // =========================================================================
    // Audio
    // =========================================================================

    /// Produce one output sample
    #[inline]
    pub fn produce(&mut self) -> f64 {
        if self.nodes.is_empty() {
            return 0.0;
        }

        let mut sample = 0.0;
        for (node, weight) in self.nodes.iter_mut().zip(&self.weights) {
            sample += node.produce() * weight;
        }
        for filter in &mut self.filters {
            sample = filter.process(sample);
        }
        if let Some(envelope) = self.envelopes.first_mut() {
            sample *= envelope.next_sample();
        }

        let volume = self.master_volume.get();
        let volume = if volume.is_nan() { 0.0 } else { volume.clamp(0.0, 1.0) };
        sample * volume
    }

    /// Fill a buffer with consecutive samples
    pub fn generate(&mut self, buffer: &mut [f64]) {
        for sample in buffer.iter_mut() {
            *sample = self.produce();
        }
    }

    /// Reset oscillator phases, filter history and envelopes
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
        for filter in &mut self.filters {
            filter.reset();
        }
        for envelope in &mut self.envelopes {
            envelope.reset();
        }
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Expose every knob in the graph.
    ///
    /// Roots sharing a type name are prefixed `"Layer k"`, filters sharing a
    /// type name `"Stage k"` (k is the 1-based position). The first envelope
    /// is `"Envelope"`, later ones `"Envelope k"`.
    pub fn register_params(&mut self, registry: &mut ParamRegistry) {
        let node_types: Vec<&'static str> = self.nodes.iter().map(|n| n.type_name()).collect();
        for (i, node) in self.nodes.iter_mut().enumerate() {
            if node.is_used_as_component() {
                debug!(node = node.type_name(), "skipping registration of sub-component root");
                continue;
            }
            let prefix = layer_prefix(&node_types, i, "Layer");
            node.register_with_prefix(registry, &prefix);
        }

        let filter_types: Vec<&'static str> = self.filters.iter().map(|f| f.type_name()).collect();
        for (i, filter) in self.filters.iter_mut().enumerate() {
            if filter.is_used_as_component() {
                continue;
            }
            let prefix = layer_prefix(&filter_types, i, "Stage");
            filter.register_with_prefix(registry, &prefix);
        }

        for (i, envelope) in self.envelopes.iter().enumerate() {
            let path = if i == 0 {
                ParamPath::from_segments(["Envelope"])
            } else {
                ParamPath::from_segments([format!("Envelope {}", i + 1)])
            };
            envelope.register_at(registry, &path);
        }

        registry.register(ParamSpec::gain(
            ParamPath::from_segments(["Master Volume"]),
            self.master_volume.clone(),
        ));
        debug!(params = registry.len(), "graph parameters registered");
    }
}

fn layer_prefix(types: &[&'static str], index: usize, label: &str) -> ParamPath {
    let name = types[index];
    if types.iter().filter(|t| **t == name).count() > 1 {
        ParamPath::from_segments([format!("{} {}", label, index + 1)])
    } else {
        ParamPath::root()
    }
}

impl std::fmt::Debug for SoundGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoundGraph")
            .field("sample_rate", &self.sample_rate)
            .field("nodes", &self.nodes.iter().map(|n| n.type_name()).collect::<Vec<_>>())
            .field("weights", &self.weights)
            .field("filters", &self.filters.iter().map(|f| f.type_name()).collect::<Vec<_>>())
            .field("envelopes", &self.envelopes.len())
            .field("master_volume", &self.master_volume())
            .finish()
    }
}
