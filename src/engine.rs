//! Real-time Engine
//!
//! Splits a running synth into two halves that live on different threads:
//!
//! - [`Renderer`] sits in the audio callback. It owns the running
//!   [`SoundGraph`] and pulls samples from it.
//! - [`Controller`] sits on the control thread. It owns the
//!   [`ParamRegistry`] bound to the running graph and builds replacement
//!   graphs.
//!
//! Leaf parameter writes go straight through the registry's shared cells.
//! Topology changes never touch the running graph: the controller builds a
//! complete new graph, registers it into a fresh registry and sends it over a
//! lock-free ring. The renderer swaps it in between two samples and sends the
//! old graph back so it is freed on the control thread.

use crate::config::{ConfigError, EngineConfig};
use crate::graph::SoundGraph;
use crate::registry::ParamRegistry;
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors reported to the control context
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine command queue is full")]
    QueueFull,

    #[error("invalid engine config: {0}")]
    Config(#[from] ConfigError),
}

/// Messages from the control context to the audio context
pub enum EngineCommand {
    /// Replace the running graph
    Swap(Box<SoundGraph>),
    NoteOn,
    NoteOff,
    /// Reset phases, filter history and envelopes of the running graph
    Reset,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineCommand::Swap(_) => f.write_str("Swap"),
            EngineCommand::NoteOn => f.write_str("NoteOn"),
            EngineCommand::NoteOff => f.write_str("NoteOff"),
            EngineCommand::Reset => f.write_str("Reset"),
        }
    }
}

/// Create a connected controller/renderer pair running an empty graph
pub fn engine(config: &EngineConfig) -> Result<(Controller, Renderer), EngineError> {
    config.validate()?;

    let (command_tx, command_rx) = RingBuffer::<EngineCommand>::new(config.command_capacity);
    let (retire_tx, retire_rx) = RingBuffer::<Box<SoundGraph>>::new(config.retire_capacity);

    let mut graph = SoundGraph::new(config.sample_rate);
    graph.set_master_volume(config.master_volume);
    let mut registry = ParamRegistry::new();
    graph.register_params(&mut registry);

    info!(sample_rate = config.sample_rate, "engine created");

    let controller = Controller {
        registry,
        commands: command_tx,
        retired: retire_rx,
        sample_rate: config.sample_rate,
        in_flight: 0,
        retire_capacity: config.retire_capacity,
    };
    let renderer = Renderer {
        graph: Box::new(graph),
        commands: command_rx,
        retired: retire_tx,
    };
    Ok((controller, renderer))
}

// =============================================================================
// Audio Context
// =============================================================================

/// Audio-context half of the engine
pub struct Renderer {
    graph: Box<SoundGraph>,
    commands: Consumer<EngineCommand>,
    retired: Producer<Box<SoundGraph>>,
}

impl Renderer {
    /// Apply pending commands. Bounded by the command ring capacity.
    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                EngineCommand::Swap(graph) => {
                    let old = std::mem::replace(&mut self.graph, graph);
                    // The controller never has more swaps outstanding than
                    // the retire ring holds, so this push always has room.
                    let pushed = self.retired.push(old);
                    debug_assert!(pushed.is_ok(), "retire ring overflow");
                }
                EngineCommand::NoteOn => self.graph.note_on(),
                EngineCommand::NoteOff => self.graph.note_off(),
                EngineCommand::Reset => self.graph.reset(),
            }
        }
    }

    /// Produce one sample
    #[inline]
    pub fn produce(&mut self) -> f64 {
        self.apply_commands();
        self.graph.produce()
    }

    /// Fill a mono buffer. Commands are applied once, before the block.
    pub fn render_block(&mut self, buffer: &mut [f64]) {
        self.apply_commands();
        self.graph.generate(buffer);
    }

    /// Fill an interleaved `f32` buffer, copying the mono signal to every channel
    pub fn render_interleaved(&mut self, buffer: &mut [f32], channels: usize) {
        self.apply_commands();
        for frame in buffer.chunks_mut(channels.max(1)) {
            let sample = self.graph.produce() as f32;
            frame.fill(sample);
        }
    }

    /// The running graph
    pub fn graph(&self) -> &SoundGraph {
        &self.graph
    }
}

// =============================================================================
// Control Context
// =============================================================================

/// Control-context half of the engine
pub struct Controller {
    registry: ParamRegistry,
    commands: Producer<EngineCommand>,
    retired: Consumer<Box<SoundGraph>>,
    sample_rate: f64,
    /// Swaps sent whose retired graph has not been collected yet
    in_flight: usize,
    retire_capacity: usize,
}

impl Controller {
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Parameters of the most recently installed graph
    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    /// Send a complete graph to the renderer.
    ///
    /// On success the registry is replaced by one bound to the new graph. On
    /// failure both the running graph and the registry are left unchanged.
    ///
    /// Fails with [`EngineError::QueueFull`] while `retire_capacity` swaps are
    /// still waiting for the renderer to pick them up and hand back the old
    /// graph, so a swapped-out graph is never freed on the audio thread.
    pub fn install(&mut self, mut graph: SoundGraph) -> Result<(), EngineError> {
        self.collect_garbage();
        if self.in_flight >= self.retire_capacity {
            warn!(in_flight = self.in_flight, "retired graphs not collected yet, graph not installed");
            return Err(EngineError::QueueFull);
        }

        if graph.sample_rate() != self.sample_rate {
            graph.set_sample_rate(self.sample_rate);
        }
        let mut registry = ParamRegistry::new();
        graph.register_params(&mut registry);
        let summary = (graph.node_count(), graph.filter_count(), graph.envelope_count());

        match self.commands.push(EngineCommand::Swap(Box::new(graph))) {
            Ok(()) => {
                self.registry = registry;
                self.in_flight += 1;
                info!(
                    nodes = summary.0,
                    filters = summary.1,
                    envelopes = summary.2,
                    params = self.registry.len(),
                    "graph installed"
                );
                Ok(())
            }
            Err(PushError::Full(_)) => {
                warn!("command queue full, graph not installed");
                Err(EngineError::QueueFull)
            }
        }
    }

    /// Build a fresh graph at the engine's sample rate and install it
    pub fn rebuild<F>(&mut self, build: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut SoundGraph),
    {
        let mut graph = SoundGraph::new(self.sample_rate);
        build(&mut graph);
        self.install(graph)
    }

    pub fn note_on(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::NoteOn)
    }

    pub fn note_off(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::NoteOff)
    }

    pub fn reset(&mut self) -> Result<(), EngineError> {
        self.send(EngineCommand::Reset)
    }

    fn send(&mut self, command: EngineCommand) -> Result<(), EngineError> {
        match self.commands.push(command) {
            Ok(()) => Ok(()),
            Err(PushError::Full(command)) => {
                warn!(?command, "command queue full");
                Err(EngineError::QueueFull)
            }
        }
    }

    /// Free graphs the renderer has swapped out. Returns how many were freed.
    pub fn collect_garbage(&mut self) -> usize {
        let mut freed = 0;
        while let Ok(graph) = self.retired.pop() {
            drop(graph);
            freed += 1;
        }
        self.in_flight = self.in_flight.saturating_sub(freed);
        if freed > 0 {
            debug!(freed, "retired graphs freed");
        }
        freed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::node::Oscillator;
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    const SR: f64 = 44100.0;

    fn sine_graph(freq: f64) -> SoundGraph {
        let mut graph = SoundGraph::new(SR).with_master_volume(1.0);
        graph.add_node(Box::new(Oscillator::sine(freq, SR)));
        graph
    }

    #[test]
    fn test_new_engine_is_silent() {
        let (controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        assert_eq!(renderer.produce(), 0.0);
        assert_eq!(controller.registry().len(), 1);
        assert_eq!(controller.registry().value("Master Volume"), Some(0.7));
    }

    #[test]
    fn test_install_swaps_between_samples() {
        let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        controller.install(sine_graph(440.0)).unwrap();

        assert_eq!(controller.registry().find("Sine Frequency"), Some(0));
        for n in 0..32 {
            let expected = (TAU * 440.0 * n as f64 / SR).sin();
            assert_relative_eq!(renderer.produce(), expected, epsilon = 1e-9);
        }
        assert_eq!(controller.collect_garbage(), 1);
    }

    #[test]
    fn test_registry_writes_reach_running_graph() {
        let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        controller.install(sine_graph(440.0)).unwrap();
        renderer.produce();

        controller.registry().set_by_name("Master Volume", 0.0);
        for _ in 0..16 {
            assert_eq!(renderer.produce(), 0.0);
        }
        assert_eq!(renderer.graph().master_volume(), 0.0);
    }

    #[test]
    fn test_full_queue_leaves_registry_unchanged() {
        let config = EngineConfig {
            command_capacity: 1,
            ..EngineConfig::default()
        };
        let (mut controller, mut renderer) = engine(&config).unwrap();
        controller.install(sine_graph(440.0)).unwrap();

        let result = controller.rebuild(|graph| {
            graph.add_node(Box::new(Oscillator::saw(110.0, SR)));
        });
        assert!(matches!(result, Err(EngineError::QueueFull)));
        assert!(controller.registry().find("Sine Frequency").is_some());
        assert!(controller.registry().find("Saw Frequency").is_none());

        renderer.produce();
        assert_eq!(renderer.graph().node(0).map(|n| n.type_name()), Some("Sine"));
    }

    #[test]
    fn test_swaps_bounded_by_retire_capacity() {
        let config = EngineConfig {
            command_capacity: 64,
            retire_capacity: 2,
            ..EngineConfig::default()
        };
        let (mut controller, mut renderer) = engine(&config).unwrap();
        controller.install(sine_graph(220.0)).unwrap();
        controller.install(sine_graph(330.0)).unwrap();

        // Renderer has not run, so both retired slots are spoken for
        let result = controller.install(sine_graph(440.0));
        assert!(matches!(result, Err(EngineError::QueueFull)));
        assert_eq!(controller.registry().value("Sine Frequency"), Some(330.0));

        // Every swapped-out graph comes back to the control side
        renderer.produce();
        assert_eq!(controller.collect_garbage(), 2);
        controller.install(sine_graph(440.0)).unwrap();
        renderer.produce();
        assert_eq!(controller.collect_garbage(), 1);
        assert_eq!(controller.registry().value("Sine Frequency"), Some(440.0));
    }

    #[test]
    fn test_many_installs_while_renderer_stalls() {
        let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        let capacity = EngineConfig::default().retire_capacity;

        let installed = (0..20)
            .filter(|n| controller.install(sine_graph(100.0 + *n as f64)).is_ok())
            .count();
        assert_eq!(installed, capacity);

        renderer.produce();
        assert_eq!(controller.collect_garbage(), installed);
    }

    #[test]
    fn test_note_commands_drive_envelopes() {
        let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        controller
            .rebuild(|graph| {
                graph.add_node(Box::new(Oscillator::sine(440.0, SR)));
                graph.add_envelope(Envelope::with_times(SR, 0.0, 0.0, 100.0, 0.0));
            })
            .unwrap();

        renderer.produce();
        assert!(!renderer.graph().is_active());

        controller.note_on().unwrap();
        renderer.produce();
        assert!(renderer.graph().is_active());

        controller.note_off().unwrap();
        renderer.produce();
        assert!(!renderer.graph().is_active());
    }

    #[test]
    fn test_render_interleaved_copies_mono() {
        let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        controller.install(sine_graph(1000.0)).unwrap();

        let mut buffer = [0.0_f32; 64];
        renderer.render_interleaved(&mut buffer, 2);
        for frame in buffer.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
        assert!(buffer.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn test_renderer_on_audio_thread() {
        let (mut controller, mut renderer) = engine(&EngineConfig::default()).unwrap();
        controller.install(sine_graph(440.0)).unwrap();

        let audio = std::thread::spawn(move || {
            let mut block = [0.0; 128];
            let mut peak = 0.0_f64;
            for _ in 0..200 {
                renderer.render_block(&mut block);
                peak = block.iter().fold(peak, |p, s| p.max(s.abs()));
            }
            peak
        });

        for step in 0..50 {
            controller.registry().set_by_name("Sine Frequency", 200.0 + step as f64 * 10.0);
        }
        let peak = audio.join().unwrap();
        assert!(peak <= 1.0 + 1e-9);
        controller.collect_garbage();
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = EngineConfig::default().with_sample_rate(-1.0);
        assert!(matches!(engine(&config), Err(EngineError::Config(_))));
    }
}
