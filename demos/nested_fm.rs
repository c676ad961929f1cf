//! Nested FM
//!
//! Builds an FM composite whose carrier is itself an FM composite, prints
//! the hierarchical parameter names it exposes, then renders a short burst
//! and reports its peak level.
//!
//! Run with: `cargo run --example nested_fm`

use lyre::prelude::*;

const SAMPLE_RATE: f64 = 44100.0;

fn main() -> Result<(), EngineError> {
    tracing_subscriber::fmt::init();

    let (mut controller, mut renderer) =
        engine(&EngineConfig::default().with_sample_rate(SAMPLE_RATE))?;

    controller.rebuild(|graph| {
        let inner = FmNode::new(SAMPLE_RATE).with_depth(40.0);
        let outer = FmNode::new(SAMPLE_RATE)
            .with_carrier(Box::new(inner))
            .with_depth(250.0);
        graph.add_node(Box::new(outer));
        graph.add_filter(Box::new(LowPassFilter::with_params(SAMPLE_RATE, 3000.0, 1.2)));
        graph.add_envelope(Envelope::with_times(SAMPLE_RATE, 20.0, 150.0, 60.0, 300.0));
    })?;

    println!("Parameters:");
    for (index, entry) in controller.registry().iter() {
        println!(
            "  [{:2}] {:<45} {:>10}  ({} .. {}, step {})",
            index,
            entry.name(),
            entry.display_value(),
            entry.min(),
            entry.max(),
            entry.step()
        );
    }

    println!("\nGroups under \"FM Carrier\":");
    let carrier = ParamPath::from_segments(["FM", "Carrier"]);
    for (_, entry) in controller.registry().group(&carrier) {
        println!("  {}", entry.name());
    }

    controller.note_on()?;
    let mut block = vec![0.0; 512];
    let mut peak = 0.0_f64;
    for _ in 0..((SAMPLE_RATE as usize) / block.len()) {
        renderer.render_block(&mut block);
        peak = block.iter().fold(peak, |p, s| p.max(s.abs()));
    }
    println!("\nPeak over one second: {:.3}", peak);

    controller
        .registry()
        .set_by_name("FM Carrier FM Modulator Sine Frequency", 3.0);
    controller.note_off()?;
    renderer.render_block(&mut block);
    controller.collect_garbage();

    Ok(())
}
