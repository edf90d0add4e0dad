// src/main.rs
//
// Small demo: build a few sounds through the registry, read them lazily
// and materialize one.

use sndflow::{
    BlockPool, Diagnostics, EngineConfig, OperatorArgs, OperatorRegistry, SampleFormat,
    register_standard_operators,
};

fn main() {
    env_logger::init();

    let config = EngineConfig::default();
    let sr = config.default_sample_rate;

    // --------------------------------
    // Registry with a diagnosed pool
    // --------------------------------
    let diag = Diagnostics::from_config(&config);
    let mut registry = OperatorRegistry::with_pool(BlockPool::with_diagnostics(diag.clone()));
    register_standard_operators(&mut registry);
    println!("operators: {}", registry.names().join(", "));

    // --------------------------------
    // A one-second tone, shaped by a half-second constant
    // --------------------------------
    let build = || -> sndflow::EngineResult<sndflow::Sound> {
        let tone = registry.make("osc", OperatorArgs::new(0.0, sr).with_param(440.0))?;
        let tone = tone.xform(sr, 0.0, 0.0, 1.0, 1.0);
        let gain = registry.make("const", OperatorArgs::new(0.0, sr).with_param(0.5).with_param(sr / 2.0))?;
        let shaped = registry.make("prod", OperatorArgs::new(0.0, sr).with_input(tone.clone()).with_input(gain))?;
        registry.make("add", OperatorArgs::new(0.0, sr).with_input(shaped).with_input(tone.scaled(0.25)))
    };
    let mut mix = match build() {
        Ok(snd) => snd,
        Err(e) => {
            eprintln!("could not build the demo graph: {e}");
            return;
        }
    };
    print!("{}", mix.print_tree());

    // --------------------------------
    // Pull a few blocks through two cursors
    // --------------------------------
    let mut reader = mix.clone();
    for i in 0..3 {
        let chunk = reader.get_next();
        let first = chunk.samples().first().copied().unwrap_or(0.0);
        println!("block {} has {} samples, first {:.4}", i, chunk.len, first);
    }
    println!("value at 10 ms: {:.4}", mix.clone().sref(0.01).unwrap_or(0.0));

    // --------------------------------
    // Materialize
    // --------------------------------
    match mix.to_table(&config) {
        Ok(table) => {
            let pcm = table.to_pcm(SampleFormat::Short);
            println!("table of {} samples, {} pcm frames", table.length(), pcm.len());
        }
        Err(e) => eprintln!("materialization failed: {e}"),
    }

    let stats = registry.pool().stats();
    println!(
        "blocks allocated {}, freed {}, {} events recorded",
        stats.allocated,
        stats.freed,
        diag.recent().len()
    );
}
