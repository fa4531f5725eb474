//! Conversion kernels.
//!
//! Every kernel has the [`ConvertFn`](super::ConvertFn) signature. Buffer
//! lists follow the layout of their format: one slice for interleaved data,
//! one slice per channel for planar data. Kernels index at most
//! `n_samples * n_channels` samples on either side.
//!
//! The `*_lanes` kernels process `LANES` frames per step through a fixed
//! size array so the compiler can keep the block in vector registers. They
//! apply the same per-sample arithmetic as the generic kernels and
//! therefore produce identical output.

use super::codec::{F32, S16, SampleCodec};

#[inline]
fn offset(planar: bool, frame: usize, channel: usize, n_channels: usize, size: usize) -> (usize, usize) {
    if planar {
        (channel, frame * size)
    } else {
        (0, (frame * n_channels + channel) * size)
    }
}

/// Decodes with `S`, re-encodes with `D`.
pub(crate) fn convert<S: SampleCodec, D: SampleCodec, const SRC_PLANAR: bool, const DST_PLANAR: bool>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    for frame in 0..n_samples {
        for ch in 0..n_channels {
            let (sb, so) = offset(SRC_PLANAR, frame, ch, n_channels, S::SIZE);
            let (db, dof) = offset(DST_PLANAR, frame, ch, n_channels, D::SIZE);
            let v = S::decode(&src[sb][so..so + S::SIZE]);
            D::encode(v, &mut dst[db][dof..dof + D::SIZE]);
        }
    }
}

/// Moves raw samples between layouts without touching their bits.
pub(crate) fn reorder<const SIZE: usize, const SRC_PLANAR: bool, const DST_PLANAR: bool>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    for frame in 0..n_samples {
        for ch in 0..n_channels {
            let (sb, so) = offset(SRC_PLANAR, frame, ch, n_channels, SIZE);
            let (db, dof) = offset(DST_PLANAR, frame, ch, n_channels, SIZE);
            dst[db][dof..dof + SIZE].copy_from_slice(&src[sb][so..so + SIZE]);
        }
    }
}

/// Same-format copy of interleaved data.
pub(crate) fn copy_interleaved<const SIZE: usize>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let len = n_samples * n_channels * SIZE;
    dst[0][..len].copy_from_slice(&src[0][..len]);
}

/// Same-format copy of planar data.
pub(crate) fn copy_planar<const SIZE: usize>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let len = n_samples * SIZE;
    for (d, s) in dst.iter_mut().zip(src).take(n_channels) {
        d[..len].copy_from_slice(&s[..len]);
    }
}

#[inline]
fn store_block<const LANES: usize>(out: &mut [u8], block: &[f32; LANES]) {
    for (chunk, v) in out.chunks_exact_mut(4).zip(block) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
}

/// Interleaved s16 to planar f32, `LANES` frames per step.
pub(crate) fn s16_to_f32p_lanes<const LANES: usize>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let input = src[0];
    let blocks = n_samples / LANES;

    for (ch, out) in dst.iter_mut().enumerate().take(n_channels) {
        for b in 0..blocks {
            let mut block = [0.0f32; LANES];
            for (l, v) in block.iter_mut().enumerate() {
                let at = ((b * LANES + l) * n_channels + ch) * 2;
                *v = S16::decode(&input[at..at + 2]);
            }
            store_block(&mut out[b * LANES * 4..(b + 1) * LANES * 4], &block);
        }
        for frame in blocks * LANES..n_samples {
            let at = (frame * n_channels + ch) * 2;
            F32::encode(S16::decode(&input[at..at + 2]), &mut out[frame * 4..frame * 4 + 4]);
        }
    }
}

/// Stereo interleaved s16 to planar f32, both channels in one pass.
pub(crate) fn s16_to_f32p_2_lanes<const LANES: usize>(
    _n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let input = src[0];
    let [left, right, ..] = dst else {
        return;
    };
    let blocks = n_samples / LANES;

    for b in 0..blocks {
        let mut l_block = [0.0f32; LANES];
        let mut r_block = [0.0f32; LANES];
        for l in 0..LANES {
            let at = (b * LANES + l) * 4;
            l_block[l] = S16::decode(&input[at..at + 2]);
            r_block[l] = S16::decode(&input[at + 2..at + 4]);
        }
        let range = b * LANES * 4..(b + 1) * LANES * 4;
        store_block(&mut left[range.clone()], &l_block);
        store_block(&mut right[range], &r_block);
    }
    for frame in blocks * LANES..n_samples {
        let at = frame * 4;
        F32::encode(S16::decode(&input[at..at + 2]), &mut left[frame * 4..frame * 4 + 4]);
        F32::encode(S16::decode(&input[at + 2..at + 4]), &mut right[frame * 4..frame * 4 + 4]);
    }
}

/// Planar f32 to interleaved s16, `LANES` frames per step.
pub(crate) fn f32p_to_s16_lanes<const LANES: usize>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let output = &mut *dst[0];
    let blocks = n_samples / LANES;

    for (ch, input) in src.iter().enumerate().take(n_channels) {
        for b in 0..blocks {
            let mut block = [0.0f32; LANES];
            for (l, v) in block.iter_mut().enumerate() {
                let at = (b * LANES + l) * 4;
                *v = F32::decode(&input[at..at + 4]);
            }
            for (l, v) in block.iter().enumerate() {
                let at = ((b * LANES + l) * n_channels + ch) * 2;
                S16::encode(*v, &mut output[at..at + 2]);
            }
        }
        for frame in blocks * LANES..n_samples {
            let at = (frame * n_channels + ch) * 2;
            S16::encode(F32::decode(&input[frame * 4..frame * 4 + 4]), &mut output[at..at + 2]);
        }
    }
}

/// Interleaved f32 to planar f32, `LANES` frames per step.
pub(crate) fn deinterleave_f32_lanes<const LANES: usize>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let input = src[0];
    let blocks = n_samples / LANES;

    for (ch, out) in dst.iter_mut().enumerate().take(n_channels) {
        for b in 0..blocks {
            let mut block = [0.0f32; LANES];
            for (l, v) in block.iter_mut().enumerate() {
                let at = ((b * LANES + l) * n_channels + ch) * 4;
                *v = F32::decode(&input[at..at + 4]);
            }
            store_block(&mut out[b * LANES * 4..(b + 1) * LANES * 4], &block);
        }
        for frame in blocks * LANES..n_samples {
            let at = (frame * n_channels + ch) * 4;
            out[frame * 4..frame * 4 + 4].copy_from_slice(&input[at..at + 4]);
        }
    }
}

/// Planar f32 to interleaved f32, `LANES` frames per step.
pub(crate) fn interleave_f32_lanes<const LANES: usize>(
    n_channels: usize,
    dst: &mut [&mut [u8]],
    src: &[&[u8]],
    n_samples: usize,
) {
    let output = &mut *dst[0];
    let blocks = n_samples / LANES;

    for (ch, input) in src.iter().enumerate().take(n_channels) {
        for b in 0..blocks {
            let mut block = [0.0f32; LANES];
            for (l, v) in block.iter_mut().enumerate() {
                let at = (b * LANES + l) * 4;
                *v = F32::decode(&input[at..at + 4]);
            }
            for (l, v) in block.iter().enumerate() {
                let at = ((b * LANES + l) * n_channels + ch) * 4;
                output[at..at + 4].copy_from_slice(&v.to_le_bytes());
            }
        }
        for frame in blocks * LANES..n_samples {
            let at = (frame * n_channels + ch) * 4;
            output[at..at + 4].copy_from_slice(&input[frame * 4..frame * 4 + 4]);
        }
    }
}
