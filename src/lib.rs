//! # Lyre: Real-time Modular Sound Synthesis
//!
//! `lyre` is a single-voice, single-channel synthesis engine built from a
//! graph of signal nodes. Every knob a node exposes is bound into a live
//! parameter registry, with hierarchical names when nodes are nested inside
//! composites.
//!
//! ## Architecture
//!
//! - **Signal Nodes** - sine/saw generators plus FM, additive and filtered
//!   composites that own other nodes to any depth
//! - **Filters** - biquad low-pass and band-pass stages
//! - **Envelope** - linear ADSR gain
//! - **Sound Graph** - mixes root nodes by normalized weight, runs the filter
//!   chain, applies the envelope and master volume
//! - **Parameter Registry** - clamped, hook-aware access to every live value
//! - **Engine** - a `Controller`/`Renderer` pair that keeps the audio thread
//!   lock-free while graphs are rebuilt
//!
//! ## Quick Start
//!
//! ```rust
//! use lyre::prelude::*;
//!
//! let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
//!
//! // Nested FM: the carrier is itself an FM composite
//! controller
//!     .rebuild(|graph| {
//!         let carrier = FmNode::new(44100.0);
//!         graph.add_node(Box::new(FmNode::new(44100.0).with_carrier(Box::new(carrier))));
//!         graph.add_filter(Box::new(LowPassFilter::new(44100.0)));
//!         graph.add_envelope(Envelope::new(44100.0));
//!     })
//!     .unwrap();
//!
//! // Live parameter access from the control thread
//! let registry = controller.registry();
//! registry.set_by_name("FM Carrier FM Modulator Sine Frequency", 220.0);
//! registry.increment_by_name("LowPass Cutoff Freq");
//!
//! // Audio thread
//! controller.note_on().unwrap();
//! let mut block = [0.0; 256];
//! renderer.render_block(&mut block);
//! ```

pub mod composite;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod filter;
pub mod graph;
pub mod node;
pub mod param;
pub mod patch;
pub mod preset;
pub mod registry;

/// Prelude module for convenient imports
pub mod prelude {
    // Signal nodes
    pub use crate::composite::{AdditiveNode, FilteredNode, FmNode};
    pub use crate::node::{Oscillator, SignalNode, Waveform};

    // Filters and envelope
    pub use crate::envelope::{Envelope, EnvelopeStage};
    pub use crate::filter::{BandPassFilter, Biquad, BiquadCoefficients, Filter, LowPassFilter};

    // Graph and engine
    pub use crate::config::{ConfigError, EngineConfig};
    pub use crate::engine::{engine, Controller, EngineCommand, EngineError, Renderer};
    pub use crate::graph::SoundGraph;

    // Parameters
    pub use crate::param::{AtomicF64, ParamCell, ParamCurve, ParamPath, ParamSpec, ValueFormat};
    pub use crate::registry::{ParamEntry, ParamHook, ParamId, ParamRegistry};

    // Descriptions and presets
    pub use crate::patch::{EnvelopeDef, FilterDef, GraphDef, LayerDef, NodeDef, PatchError};
    pub use crate::preset::{Preset, PresetBank, PresetError, PresetInfo};
}

// Re-export key types at crate root for convenience
pub use prelude::*;
