//! Criterion benchmarks for the sample format converter
//!
//! Run with: cargo bench -p cauce-dsp -- convert/
#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use cauce_dsp::{Converter, CpuFlags, SampleFormat};

const QUANTUM_SIZES: &[usize] = &[128, 256, 1024, 4096];

fn buffers(format: SampleFormat, channels: usize, n_samples: usize) -> Vec<Vec<u8>> {
    let len = n_samples * format.stride(channels);
    (0..format.blocks(channels))
        .map(|b| (0..len).map(|i| (i * 31 + b * 7) as u8).collect())
        .collect()
}

fn bench_pair(c: &mut Criterion, src: SampleFormat, dst: SampleFormat, channels: u32) {
    let mut group = c.benchmark_group(format!("convert/{src}->{dst}x{channels}"));
    let ch = channels as usize;

    for (label, flags) in [("generic", CpuFlags::NONE), ("detected", CpuFlags::detect())] {
        let conv = Converter::new(src, dst, channels, flags).unwrap();
        for &n_samples in QUANTUM_SIZES {
            let input = buffers(src, ch, n_samples);
            let mut output = buffers(dst, ch, n_samples);
            group.throughput(Throughput::Elements((n_samples * ch) as u64));
            group.bench_with_input(BenchmarkId::new(label, n_samples), &n_samples, |b, &n| {
                let src_refs: Vec<&[u8]> = input.iter().map(Vec::as_slice).collect();
                b.iter(|| {
                    let mut dst_refs: Vec<&mut [u8]> = output.iter_mut().map(Vec::as_mut_slice).collect();
                    conv.process(black_box(&mut dst_refs), black_box(&src_refs), n);
                });
            });
        }
    }
    group.finish();
}

fn bench_convert(c: &mut Criterion) {
    bench_pair(c, SampleFormat::S16, SampleFormat::F32P, 2);
    bench_pair(c, SampleFormat::S16, SampleFormat::F32P, 6);
    bench_pair(c, SampleFormat::F32P, SampleFormat::S16, 2);
    bench_pair(c, SampleFormat::F32, SampleFormat::F32P, 8);
    bench_pair(c, SampleFormat::S24, SampleFormat::F32P, 2);
    bench_pair(c, SampleFormat::F32P, SampleFormat::S32, 2);
}

criterion_group!(benches, bench_convert);
criterion_main!(benches);
