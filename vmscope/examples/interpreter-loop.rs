//! Demo embedding host: profiles a synthetic VM through two phases and
//! prints the resulting global buckets.
//!
//! Phase 1 busy-loops in plain interpreter mode. Phase 2 flips the
//! engine into "collector running for trace 7" mode, which attributes
//! samples to that trace's gc sub-bucket.
//!
//! Run with: cargo run --example interpreter-loop

use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use vmscope::host::SyntheticEngine;
use vmscope::wire::{encode_non_jit, VmBucket};
use vmscope::{CounterFile, Profiler};

fn busy_spin(duration: Duration) {
    let start = Instant::now();
    let mut acc = 0u64;
    while start.elapsed() < duration {
        for i in 0..10_000u64 {
            acc = acc.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(i);
        }
    }
    std::hint::black_box(acc);
}

fn main() -> Result<()> {
    env_logger::init();

    let engine = Arc::new(SyntheticEngine::new());
    let mut profiler = Profiler::new(Arc::clone(&engine) as Arc<dyn vmscope::HostEngine>);

    let path = std::env::temp_dir().join("vmscope-demo.counters");
    let counters = CounterFile::open(&path)?;
    profiler.select(&counters);
    profiler.start()?;

    println!("phase 1: interpreter busy loop (500ms)");
    busy_spin(Duration::from_millis(500));

    println!("phase 2: collector running for trace 7 (300ms)");
    engine.set_gc_trace(7);
    engine.set_mode(encode_non_jit(VmBucket::GarbageCollect));
    busy_spin(Duration::from_millis(300));

    profiler.stop();
    profiler.deselect();

    let store = counters.store();
    println!("\ncounter file: {}", path.display());
    println!("total samples: {}", store.vm_total());
    for bucket in [
        VmBucket::Interpreter,
        VmBucket::GarbageCollect,
        VmBucket::JitGc,
        VmBucket::JitFfi,
        VmBucket::JitLoop,
        VmBucket::JitHead,
    ] {
        println!("  {:<14} {}", format!("{bucket:?}"), store.vm[bucket as usize]);
    }
    println!("  trace 7 gc sub-bucket: {}", store.trace[7].gc);

    Ok(())
}
