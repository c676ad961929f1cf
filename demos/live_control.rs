//! Live Control
//!
//! Drives an engine from a small preset bank, the way a control surface
//! would: load presets by name and index, step parameters up and down, and
//! trigger notes, while a separate thread plays the renderer.
//!
//! Run with: `cargo run --example live_control`

use lyre::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SAMPLE_RATE: f64 = 48000.0;

fn bank() -> PresetBank {
    let mut bank = PresetBank::new();
    bank.register(Preset::new(
        PresetInfo::new("Soft Sine").with_description("single sine with a slow envelope"),
        GraphDef::new("Soft Sine")
            .with_node(NodeDef::sine(440.0))
            .with_envelope(EnvelopeDef::new(200.0, 300.0, 60.0, 800.0)),
    ));
    bank.register(Preset::new(
        PresetInfo::new("Band Stack").with_description("three band-passed saws summed"),
        GraphDef::new("Band Stack")
            .with_node(NodeDef::additive(vec![
                NodeDef::filtered(NodeDef::saw(110.0), FilterDef::band_pass(400.0, 80.0)),
                NodeDef::filtered(NodeDef::saw(110.0), FilterDef::band_pass(1200.0, 120.0)),
                NodeDef::filtered(NodeDef::saw(110.0), FilterDef::band_pass(2800.0, 200.0)),
            ]))
            .with_envelope(EnvelopeDef::default())
            .with_master_volume(0.9),
    ));
    bank
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let bank = bank();
    let (mut controller, mut renderer) =
        engine(&EngineConfig::default().with_sample_rate(SAMPLE_RATE))?;

    let running = Arc::new(AtomicBool::new(true));
    let audio_running = Arc::clone(&running);
    let audio = thread::spawn(move || {
        let mut buffer = vec![0.0_f32; 2 * 256];
        let mut peak = 0.0_f32;
        while audio_running.load(Ordering::Relaxed) {
            renderer.render_interleaved(&mut buffer, 2);
            peak = buffer.iter().fold(peak, |p, s| p.max(s.abs()));
            thread::sleep(Duration::from_millis(5));
        }
        peak
    });

    bank.load_by_name("Soft Sine", &mut controller)?;
    controller.note_on()?;
    for _ in 0..5 {
        let value = controller.registry().increment_by_name("Sine Frequency");
        println!("Sine Frequency -> {:?}", value);
        thread::sleep(Duration::from_millis(20));
    }
    controller.note_off()?;

    if let Err(err) = bank.load_by_name("No Such Preset", &mut controller) {
        println!("expected failure: {err}");
    }

    bank.load_by_index(1, &mut controller)?;
    controller.note_on()?;
    let registry = controller.registry();
    for name in registry.top_level_groups() {
        println!("group: {name}");
    }
    if let Some(index) = registry.find("Additive Osc 2 Filtered BandPass Target Freq") {
        for _ in 0..3 {
            registry.decrement(index);
        }
        println!(
            "Osc 2 band center: {}",
            registry.get(index).map(|e| e.display_value()).unwrap_or_default()
        );
    }
    thread::sleep(Duration::from_millis(50));
    controller.note_off()?;

    running.store(false, Ordering::Relaxed);
    let peak = audio.join().map_err(|_| "audio thread panicked")?;
    controller.collect_garbage();
    println!("peak output: {peak:.3}");

    Ok(())
}
