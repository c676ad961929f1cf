//! Graph Descriptions
//!
//! Serializable descriptions of a [`SoundGraph`]: which root nodes it mixes
//! (recursively, for composites), its filter chain, envelopes and master
//! volume. A description is plain data; [`GraphDef::build`] turns it into a
//! runnable graph on the control context.
//!
//! ```
//! use lyre::patch::{FilterDef, GraphDef, NodeDef};
//!
//! let def = GraphDef::new("Nested FM")
//!     .with_node(NodeDef::fm(NodeDef::fm_default(), NodeDef::sine(880.0)))
//!     .with_filter(FilterDef::low_pass(2000.0, 0.7071));
//! let graph = def.build(44100.0).unwrap();
//! assert_eq!(graph.node_count(), 1);
//! ```

use crate::composite::{AdditiveNode, FilteredNode, FmNode};
use crate::envelope::Envelope;
use crate::filter::{BandPassFilter, Filter, LowPassFilter};
use crate::graph::{SoundGraph, DEFAULT_MASTER_VOLUME};
use crate::node::{Oscillator, SignalNode, DEFAULT_FREQUENCY};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current description schema version
pub const GRAPH_DEF_VERSION: u32 = 1;

/// Errors from parsing or building a [`GraphDef`]
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("unsupported graph description version {0}")]
    UnsupportedVersion(u32),

    #[error("invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: f64 },

    #[error("graph JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn default_version() -> u32 {
    GRAPH_DEF_VERSION
}

fn default_frequency() -> f64 {
    DEFAULT_FREQUENCY
}

fn default_unit() -> f64 {
    1.0
}

fn default_master_volume() -> f64 {
    DEFAULT_MASTER_VOLUME
}

fn default_depth() -> f64 {
    FmNode::DEFAULT_DEPTH
}

fn default_carrier_frequency() -> f64 {
    FmNode::DEFAULT_CARRIER_FREQ
}

fn default_modulator_frequency() -> f64 {
    FmNode::DEFAULT_MODULATOR_FREQ
}

fn finite(field: &'static str, value: f64) -> Result<f64, PatchError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(PatchError::InvalidValue { field, value })
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Serializable description of a whole graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDef {
    /// Schema version for forward compatibility
    #[serde(default = "default_version")]
    pub version: u32,

    pub name: String,
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub layers: Vec<LayerDef>,
    #[serde(default)]
    pub filters: Vec<FilterDef>,
    #[serde(default)]
    pub envelopes: Vec<EnvelopeDef>,

    #[serde(default = "default_master_volume")]
    pub master_volume: f64,
}

impl GraphDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: GRAPH_DEF_VERSION,
            name: name.into(),
            description: None,
            layers: Vec::new(),
            filters: Vec::new(),
            envelopes: Vec::new(),
            master_volume: DEFAULT_MASTER_VOLUME,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    /// Add a root node with weight 1.0
    pub fn with_node(self, node: NodeDef) -> Self {
        self.with_weighted_node(node, 1.0)
    }

    pub fn with_weighted_node(mut self, node: NodeDef, weight: f64) -> Self {
        self.layers.push(LayerDef { node, weight });
        self
    }

    pub fn with_filter(mut self, filter: FilterDef) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_envelope(mut self, envelope: EnvelopeDef) -> Self {
        self.envelopes.push(envelope);
        self
    }

    pub fn with_master_volume(mut self, volume: f64) -> Self {
        self.master_volume = volume;
        self
    }

    pub fn to_json(&self) -> Result<String, PatchError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, PatchError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Instantiate the described graph
    pub fn build(&self, sample_rate: f64) -> Result<SoundGraph, PatchError> {
        if self.version > GRAPH_DEF_VERSION {
            return Err(PatchError::UnsupportedVersion(self.version));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(PatchError::InvalidSampleRate(sample_rate));
        }

        let mut graph = SoundGraph::new(sample_rate);
        let mut weights = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            graph.add_node(layer.node.build(sample_rate)?);
            weights.push(finite("weight", layer.weight)?);
        }
        graph.set_mix_weights(&weights);

        for filter in &self.filters {
            graph.add_filter(filter.build(sample_rate)?);
        }
        for envelope in &self.envelopes {
            graph.add_envelope(envelope.build(sample_rate)?);
        }
        graph.set_master_volume(finite("master_volume", self.master_volume)?);
        Ok(graph)
    }
}

/// A root node and its mix weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerDef {
    pub node: NodeDef,
    #[serde(default = "default_unit")]
    pub weight: f64,
}

// =============================================================================
// Nodes
// =============================================================================

/// Serializable description of a signal node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeDef {
    Sine {
        #[serde(default = "default_frequency")]
        frequency: f64,
    },
    Saw {
        #[serde(default = "default_frequency")]
        frequency: f64,
    },
    /// FM composite. Missing children become sines; children are tuned to
    /// `carrier_frequency` / `modulator_frequency`.
    Fm {
        #[serde(default)]
        carrier: Option<Box<NodeDef>>,
        #[serde(default)]
        modulator: Option<Box<NodeDef>>,
        #[serde(default = "default_carrier_frequency")]
        carrier_frequency: f64,
        #[serde(default = "default_modulator_frequency")]
        modulator_frequency: f64,
        #[serde(default = "default_depth")]
        depth: f64,
    },
    Additive {
        #[serde(default)]
        partials: Vec<NodeDef>,
        #[serde(default = "default_unit")]
        amplitude: f64,
    },
    Filtered {
        source: Box<NodeDef>,
        filter: FilterDef,
    },
}

impl NodeDef {
    pub fn sine(frequency: f64) -> Self {
        NodeDef::Sine { frequency }
    }

    pub fn saw(frequency: f64) -> Self {
        NodeDef::Saw { frequency }
    }

    /// FM with explicit children at the default frequencies and depth
    pub fn fm(carrier: NodeDef, modulator: NodeDef) -> Self {
        NodeDef::Fm {
            carrier: Some(Box::new(carrier)),
            modulator: Some(Box::new(modulator)),
            carrier_frequency: FmNode::DEFAULT_CARRIER_FREQ,
            modulator_frequency: FmNode::DEFAULT_MODULATOR_FREQ,
            depth: FmNode::DEFAULT_DEPTH,
        }
    }

    /// FM with default sine children
    pub fn fm_default() -> Self {
        NodeDef::Fm {
            carrier: None,
            modulator: None,
            carrier_frequency: FmNode::DEFAULT_CARRIER_FREQ,
            modulator_frequency: FmNode::DEFAULT_MODULATOR_FREQ,
            depth: FmNode::DEFAULT_DEPTH,
        }
    }

    pub fn additive(partials: Vec<NodeDef>) -> Self {
        NodeDef::Additive {
            partials,
            amplitude: 1.0,
        }
    }

    pub fn filtered(source: NodeDef, filter: FilterDef) -> Self {
        NodeDef::Filtered {
            source: Box::new(source),
            filter,
        }
    }

    pub fn build(&self, sample_rate: f64) -> Result<Box<dyn SignalNode>, PatchError> {
        Ok(match self {
            NodeDef::Sine { frequency } => Box::new(Oscillator::sine(
                finite("frequency", *frequency)?,
                sample_rate,
            )),
            NodeDef::Saw { frequency } => Box::new(Oscillator::saw(
                finite("frequency", *frequency)?,
                sample_rate,
            )),
            NodeDef::Fm {
                carrier,
                modulator,
                carrier_frequency,
                modulator_frequency,
                depth,
            } => {
                let mut fm = FmNode::new(sample_rate).with_depth(finite("depth", *depth)?);
                fm.set_carrier_frequency(finite("carrier_frequency", *carrier_frequency)?);
                fm.set_modulator_frequency(finite("modulator_frequency", *modulator_frequency)?);
                if let Some(carrier) = carrier {
                    fm.set_carrier(carrier.build(sample_rate)?);
                }
                if let Some(modulator) = modulator {
                    fm.set_modulator(modulator.build(sample_rate)?);
                }
                Box::new(fm)
            }
            NodeDef::Additive {
                partials,
                amplitude,
            } => {
                let mut additive = AdditiveNode::new(sample_rate);
                for partial in partials {
                    additive.add(partial.build(sample_rate)?);
                }
                additive.set_amplitude(finite("amplitude", *amplitude)?.clamp(0.0, 1.0));
                Box::new(additive)
            }
            NodeDef::Filtered { source, filter } => Box::new(FilteredNode::new(
                source.build(sample_rate)?,
                filter.build(sample_rate)?,
            )),
        })
    }
}

// =============================================================================
// Filters and Envelopes
// =============================================================================

/// Serializable description of a filter stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterDef {
    LowPass { cutoff: f64, resonance: f64 },
    BandPass { center: f64, bandwidth: f64 },
}

impl FilterDef {
    pub fn low_pass(cutoff: f64, resonance: f64) -> Self {
        FilterDef::LowPass { cutoff, resonance }
    }

    pub fn band_pass(center: f64, bandwidth: f64) -> Self {
        FilterDef::BandPass { center, bandwidth }
    }

    /// Out-of-range values are clamped by the filter itself
    pub fn build(&self, sample_rate: f64) -> Result<Box<dyn Filter>, PatchError> {
        Ok(match self {
            FilterDef::LowPass { cutoff, resonance } => Box::new(LowPassFilter::with_params(
                sample_rate,
                finite("cutoff", *cutoff)?,
                finite("resonance", *resonance)?,
            )),
            FilterDef::BandPass { center, bandwidth } => Box::new(BandPassFilter::with_params(
                sample_rate,
                finite("center", *center)?,
                finite("bandwidth", *bandwidth)?,
            )),
        })
    }
}

/// Serializable ADSR settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeDef {
    pub attack_ms: f64,
    pub decay_ms: f64,
    pub sustain_pct: f64,
    pub release_ms: f64,
}

impl Default for EnvelopeDef {
    fn default() -> Self {
        Self {
            attack_ms: Envelope::DEFAULT_ATTACK_MS,
            decay_ms: Envelope::DEFAULT_DECAY_MS,
            sustain_pct: Envelope::DEFAULT_SUSTAIN_PCT,
            release_ms: Envelope::DEFAULT_RELEASE_MS,
        }
    }
}

impl EnvelopeDef {
    pub fn new(attack_ms: f64, decay_ms: f64, sustain_pct: f64, release_ms: f64) -> Self {
        Self {
            attack_ms,
            decay_ms,
            sustain_pct,
            release_ms,
        }
    }

    pub fn build(&self, sample_rate: f64) -> Result<Envelope, PatchError> {
        let non_negative = |field, value: f64| finite(field, value).map(|v| v.max(0.0));
        Ok(Envelope::with_times(
            sample_rate,
            non_negative("attack_ms", self.attack_ms)?,
            non_negative("decay_ms", self.decay_ms)?,
            non_negative("sustain_pct", self.sustain_pct)?.min(100.0),
            non_negative("release_ms", self.release_ms)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamRegistry;

    const SR: f64 = 44100.0;

    #[test]
    fn test_parse_minimal_json() {
        let json = r#"{
            "name": "Plain",
            "layers": [{ "node": { "type": "sine", "frequency": 220.0 } }]
        }"#;
        let def = GraphDef::from_json(json).unwrap();
        assert_eq!(def.version, GRAPH_DEF_VERSION);
        assert_eq!(def.master_volume, DEFAULT_MASTER_VOLUME);
        assert_eq!(def.layers[0].weight, 1.0);

        let graph = def.build(SR).unwrap();
        assert_eq!(graph.node(0).map(|n| n.frequency()), Some(220.0));
    }

    #[test]
    fn test_nested_fm_from_json() {
        let json = r#"{
            "name": "Nested",
            "layers": [{
                "node": {
                    "type": "fm",
                    "carrier": { "type": "fm", "depth": 50.0 },
                    "depth": 300.0
                }
            }],
            "filters": [{ "type": "band_pass", "center": 900.0, "bandwidth": 150.0 }],
            "envelopes": [{ "attack_ms": 5.0 }]
        }"#;
        let mut graph = GraphDef::from_json(json).unwrap().build(SR).unwrap();
        let mut registry = ParamRegistry::new();
        graph.register_params(&mut registry);

        assert_eq!(registry.value("FM Modulation Depth"), Some(300.0));
        assert_eq!(registry.value("FM Carrier FM Modulation Depth"), Some(50.0));
        assert!(registry.find("FM Carrier FM Modulator Sine Frequency").is_some());
        assert_eq!(registry.value("BandPass Target Freq"), Some(900.0));
        assert_eq!(registry.value("Envelope Attack"), Some(5.0));
        assert_eq!(registry.value("Envelope Sustain"), Some(Envelope::DEFAULT_SUSTAIN_PCT));
    }

    #[test]
    fn test_weights_follow_description() {
        let def = GraphDef::new("Layers")
            .with_weighted_node(NodeDef::sine(220.0), 0.75)
            .with_weighted_node(NodeDef::saw(110.0), 0.25);
        let graph = def.build(SR).unwrap();
        assert_eq!(graph.mix_weights(), &[0.75, 0.25]);
    }

    #[test]
    fn test_fm_children_take_cached_frequencies() {
        let def = NodeDef::Fm {
            carrier: Some(Box::new(NodeDef::saw(100.0))),
            modulator: None,
            carrier_frequency: 330.0,
            modulator_frequency: 3.0,
            depth: 10.0,
        };
        let node = def.build(SR).unwrap();
        assert_eq!(node.frequency(), 330.0);
    }

    #[test]
    fn test_additive_and_filtered_build() {
        let def = GraphDef::new("Triple").with_node(NodeDef::additive(vec![
            NodeDef::filtered(NodeDef::saw(110.0), FilterDef::band_pass(440.0, 60.0)),
            NodeDef::filtered(NodeDef::saw(110.0), FilterDef::band_pass(880.0, 60.0)),
        ]));
        let mut graph = def.build(SR).unwrap();
        let mut registry = ParamRegistry::new();
        graph.register_params(&mut registry);

        assert_eq!(
            registry.value("Additive Osc 2 Filtered BandPass Target Freq"),
            Some(880.0)
        );
        for _ in 0..512 {
            assert!(graph.produce().is_finite());
        }
    }

    #[test]
    fn test_json_roundtrip() {
        let def = GraphDef::new("Roundtrip")
            .with_description("fm through a low-pass")
            .with_node(NodeDef::fm(NodeDef::saw(1.0), NodeDef::sine(2.0)))
            .with_filter(FilterDef::low_pass(1200.0, 2.0))
            .with_envelope(EnvelopeDef::new(0.0, 20.0, 80.0, 300.0))
            .with_master_volume(0.5);
        let json = def.to_json().unwrap();
        assert_eq!(GraphDef::from_json(&json).unwrap(), def);
    }

    #[test]
    fn test_rejects_invalid_descriptions() {
        let future = GraphDef {
            version: GRAPH_DEF_VERSION + 1,
            ..GraphDef::new("Future")
        };
        assert!(matches!(future.build(SR), Err(PatchError::UnsupportedVersion(_))));

        let def = GraphDef::new("Bad").with_node(NodeDef::sine(f64::NAN));
        assert!(matches!(
            def.build(SR),
            Err(PatchError::InvalidValue { field: "frequency", .. })
        ));
        assert!(matches!(
            GraphDef::new("Rate").build(0.0),
            Err(PatchError::InvalidSampleRate(_))
        ));
        assert!(matches!(
            GraphDef::from_json(r#"{ "name": "x", "layers": [{ "node": { "type": "square" } }] }"#),
            Err(PatchError::Json(_))
        ));
    }
}
