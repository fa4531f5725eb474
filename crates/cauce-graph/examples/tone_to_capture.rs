//! Tone to capture: a driver-paced graph on its own data thread.
//!
//! A 440 Hz tone at 44.1 kHz s16 is converted and resampled to 48 kHz f32p
//! and captured into lock-free rings, which the main thread drains while
//! printing levels and driver statistics.
//!
//! Settings come from the user config file when present.
//!
//! Run with: RUST_LOG=cauce_graph=debug cargo run -p cauce-graph --example tone_to_capture

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use cauce_config::{Settings, default_settings_path};
use cauce_dsp::SampleFormat;
use cauce_graph::nodes::{AudioConvert, CaptureSink, ToneSource};
use cauce_graph::{AudioInfo, Context, Direction, DriverListener, LinkOptions, NodeId, NodeProps, NodeState};
use tracing_subscriber::EnvFilter;

#[derive(Default)]
struct Counters {
    complete: AtomicU32,
    xruns: AtomicU32,
}

impl DriverListener for Counters {
    fn complete(&self, _driver: NodeId) {
        self.complete.fetch_add(1, Ordering::Relaxed);
    }

    fn xrun(&self, _node: NodeId) {
        self.xruns.fetch_add(1, Ordering::Relaxed);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = Settings::load_or_default(default_settings_path())?;
    let mut ctx = Context::with_settings(&settings);
    let counters = Arc::new(Counters::default());
    ctx.add_driver_listener(Arc::clone(&counters) as Arc<dyn DriverListener>);

    let data_loop = ctx.spawn_data_loop("cauce-data")?;
    let tone = ctx.add_node(
        NodeProps::new("tone").driver(true).data_loop(data_loop),
        Box::new(ToneSource::new(440.0, 0.5, 2).with_cpu_flags(ctx.config().cpu_flags)),
    )?;
    let convert = ctx.add_node(
        NodeProps::new("convert").data_loop(data_loop),
        Box::new(AudioConvert::new(ctx.config())),
    )?;
    let (sink, mut rings) = CaptureSink::new(2, 1 << 16);
    let stats = sink.stats();
    let capture = ctx.add_node(NodeProps::new("capture").data_loop(data_loop), Box::new(sink))?;
    ctx.set_driver(convert, tone)?;
    ctx.set_driver(capture, tone)?;

    let rate = ctx.config().rate;
    ctx.port_set_format(tone, Direction::Output, 0, Some(AudioInfo::new(SampleFormat::S16, 44100, 2)))?;
    ctx.port_set_format(capture, Direction::Input, 0, Some(AudioInfo::new(SampleFormat::F32P, rate, 2)))?;
    ctx.link(tone, 0, convert, 0, LinkOptions::default())?;
    ctx.link(convert, 0, capture, 0, LinkOptions::default())?;
    for id in [capture, convert, tone] {
        ctx.set_state(id, NodeState::Running)?;
    }
    tracing::info!(rate, quantum = ctx.config().quantum, "graph running");

    for second in 1..=3 {
        let mut peak = 0.0f32;
        for _ in 0..10 {
            std::thread::sleep(Duration::from_millis(100));
            ctx.dispatch();
            for ring in &mut rings {
                if let Ok(chunk) = ring.read_chunk(ring.slots()) {
                    let (a, b) = chunk.as_slices();
                    peak = a.iter().chain(b).fold(peak, |p, v| p.max(v.abs()));
                    chunk.commit_all();
                }
            }
        }
        let a = ctx.activation(tone)?;
        println!(
            "{second}s: frames:{} peak:{peak:.3} quanta:{} xruns:{} position:{:?} cpu:{:.4}",
            stats.frames(),
            counters.complete.load(Ordering::Relaxed),
            counters.xruns.load(Ordering::Relaxed),
            a.position().state(),
            a.cpu_load()[0],
        );
    }

    for id in [tone, convert, capture] {
        ctx.set_state(id, NodeState::Suspended)?;
    }
    println!("dropped samples: {}", stats.dropped());
    Ok(())
}
