//! Criterion benchmarks for one graph quantum.
//!
//! Each case runs a tone driver through a converter into a capture sink on
//! the inline loop, so a measurement covers scheduling, buffer circulation
//! and conversion together.
//!
//! Run with: cargo bench -p cauce-graph -- graph/
#![allow(missing_docs)]

use cauce_dsp::SampleFormat;
use cauce_graph::nodes::{AudioConvert, CaptureSink, FormatConvert, ToneSource};
use cauce_graph::{AudioInfo, Context, Direction, EngineConfig, LinkOptions, NodeImpl, NodeProps, NodeState};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rtrb::Consumer;

const QUANTA: &[u64] = &[64, 256, 1024];

struct Case {
    name: &'static str,
    source: AudioInfo,
    dynamic: bool,
    resample: bool,
}

fn cases() -> Vec<Case> {
    vec![
        Case {
            name: "copy",
            source: AudioInfo::new(SampleFormat::F32P, 48000, 2),
            dynamic: false,
            resample: false,
        },
        Case {
            name: "passthrough",
            source: AudioInfo::new(SampleFormat::F32P, 48000, 2),
            dynamic: true,
            resample: false,
        },
        Case {
            name: "s16-convert",
            source: AudioInfo::new(SampleFormat::S16, 48000, 2),
            dynamic: false,
            resample: false,
        },
        Case {
            name: "resample-44100",
            source: AudioInfo::new(SampleFormat::S16, 44100, 2),
            dynamic: false,
            resample: true,
        },
    ]
}

fn build(case: &Case, quantum: u64) -> (Context, Vec<Consumer<f32>>) {
    let mut ctx = Context::new(EngineConfig {
        quantum,
        ..EngineConfig::default()
    });
    let convert: Box<dyn NodeImpl> = if case.resample {
        Box::new(AudioConvert::new(ctx.config()))
    } else {
        Box::new(FormatConvert::new(ctx.config().cpu_flags))
    };
    let tone = ctx
        .add_node(NodeProps::new("tone").driver(true), Box::new(ToneSource::new(440.0, 0.5, 2)))
        .unwrap();
    let convert = ctx.add_node(NodeProps::new("convert"), convert).unwrap();
    let (sink, rings) = CaptureSink::new(2, 4 * 8192);
    let capture = ctx.add_node(NodeProps::new("capture"), Box::new(sink)).unwrap();
    ctx.set_driver(convert, tone).unwrap();
    ctx.set_driver(capture, tone).unwrap();

    ctx.port_set_format(tone, Direction::Output, 0, Some(case.source.clone()))
        .unwrap();
    ctx.port_set_format(capture, Direction::Input, 0, Some(AudioInfo::new(SampleFormat::F32P, 48000, 2)))
        .unwrap();
    ctx.link(tone, 0, convert, 0, LinkOptions::default()).unwrap();
    let options = LinkOptions {
        dynamic: case.dynamic,
        ..LinkOptions::default()
    };
    ctx.link(convert, 0, capture, 0, options).unwrap();
    for id in [capture, convert, tone] {
        ctx.set_state(id, NodeState::Running).unwrap();
    }
    (ctx, rings)
}

fn drain(rings: &mut [Consumer<f32>]) {
    for ring in rings {
        if let Ok(chunk) = ring.read_chunk(ring.slots()) {
            chunk.commit_all();
        }
    }
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph/cycle");
    for case in cases() {
        for &quantum in QUANTA {
            group.bench_with_input(BenchmarkId::new(case.name, quantum), &quantum, |b, &quantum| {
                let (mut ctx, mut rings) = build(&case, quantum);
                b.iter(|| {
                    black_box(ctx.cycle());
                    drain(&mut rings);
                });
            });
        }
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    c.bench_function("graph/build", |b| {
        let case = &cases()[0];
        b.iter(|| black_box(build(case, 1024)));
    });
}

criterion_group!(benches, bench_cycle, bench_build);
criterion_main!(benches);
