//! The ordered conversion dispatch table.
//!
//! Lookup walks this table top to bottom and takes the first eligible
//! entry. For any format pair the entries are ordered by
//! [`ConvertEntry::rank`]: exact channel counts first, then wider vector
//! kernels, then the generic fallback. The `table_order_matches_rank` test
//! keeps the declaration order and the rank in agreement.

use super::ConvertEntry;
use super::codec::{F32, S8, S16, S24Be, S24In32, S24Le, S32, U8};
use super::kernels::{
    convert, copy_interleaved, copy_planar, deinterleave_f32_lanes, f32p_to_s16_lanes,
    interleave_f32_lanes, reorder, s16_to_f32p_2_lanes, s16_to_f32p_lanes,
};
use crate::cpu::CpuFlags;
use crate::format::SampleFormat as F;

const ANY: u32 = 0;
const C: CpuFlags = CpuFlags::NONE;
const SSE2: CpuFlags = CpuFlags::SSE2;
const AVX2: CpuFlags = CpuFlags::AVX2;
const NEON: CpuFlags = CpuFlags::NEON;

const fn e(
    src: F,
    dst: F,
    n_channels: u32,
    cpu_flags: CpuFlags,
    func: super::ConvertFn,
    name: &'static str,
) -> ConvertEntry {
    ConvertEntry::new(src, dst, n_channels, cpu_flags, func, name)
}

pub(super) static CONVERT_TABLE: &[ConvertEntry] = &[
    // u8
    e(F::U8, F::U8, ANY, C, copy_interleaved::<1>, "copy_u8"),
    e(F::U8P, F::U8P, ANY, C, copy_planar::<1>, "copy_u8p"),
    e(F::U8, F::U8P, ANY, C, reorder::<1, false, true>, "deinterleave_u8"),
    e(F::U8P, F::U8, ANY, C, reorder::<1, true, false>, "interleave_u8"),
    e(F::U8, F::F32, ANY, C, convert::<U8, F32, false, false>, "u8_to_f32"),
    e(F::U8, F::F32P, ANY, C, convert::<U8, F32, false, true>, "u8_to_f32p"),
    e(F::U8P, F::F32, ANY, C, convert::<U8, F32, true, false>, "u8p_to_f32"),
    e(F::U8P, F::F32P, ANY, C, convert::<U8, F32, true, true>, "u8p_to_f32p"),
    e(F::F32, F::U8, ANY, C, convert::<F32, U8, false, false>, "f32_to_u8"),
    e(F::F32, F::U8P, ANY, C, convert::<F32, U8, false, true>, "f32_to_u8p"),
    e(F::F32P, F::U8, ANY, C, convert::<F32, U8, true, false>, "f32p_to_u8"),
    e(F::F32P, F::U8P, ANY, C, convert::<F32, U8, true, true>, "f32p_to_u8p"),
    // s8
    e(F::S8, F::S8, ANY, C, copy_interleaved::<1>, "copy_s8"),
    e(F::S8P, F::S8P, ANY, C, copy_planar::<1>, "copy_s8p"),
    e(F::S8, F::S8P, ANY, C, reorder::<1, false, true>, "deinterleave_s8"),
    e(F::S8P, F::S8, ANY, C, reorder::<1, true, false>, "interleave_s8"),
    e(F::S8, F::F32, ANY, C, convert::<S8, F32, false, false>, "s8_to_f32"),
    e(F::S8, F::F32P, ANY, C, convert::<S8, F32, false, true>, "s8_to_f32p"),
    e(F::S8P, F::F32, ANY, C, convert::<S8, F32, true, false>, "s8p_to_f32"),
    e(F::S8P, F::F32P, ANY, C, convert::<S8, F32, true, true>, "s8p_to_f32p"),
    e(F::F32, F::S8, ANY, C, convert::<F32, S8, false, false>, "f32_to_s8"),
    e(F::F32, F::S8P, ANY, C, convert::<F32, S8, false, true>, "f32_to_s8p"),
    e(F::F32P, F::S8, ANY, C, convert::<F32, S8, true, false>, "f32p_to_s8"),
    e(F::F32P, F::S8P, ANY, C, convert::<F32, S8, true, true>, "f32p_to_s8p"),
    // s16
    e(F::S16, F::S16, ANY, C, copy_interleaved::<2>, "copy_s16"),
    e(F::S16P, F::S16P, ANY, C, copy_planar::<2>, "copy_s16p"),
    e(F::S16, F::S16P, ANY, C, reorder::<2, false, true>, "deinterleave_s16"),
    e(F::S16P, F::S16, ANY, C, reorder::<2, true, false>, "interleave_s16"),
    e(F::S16, F::F32, ANY, C, convert::<S16, F32, false, false>, "s16_to_f32"),
    e(F::S16, F::F32P, 2, SSE2, s16_to_f32p_2_lanes::<4>, "s16_to_f32p_2_sse2"),
    e(F::S16, F::F32P, 2, NEON, s16_to_f32p_2_lanes::<4>, "s16_to_f32p_2_neon"),
    e(F::S16, F::F32P, ANY, AVX2, s16_to_f32p_lanes::<8>, "s16_to_f32p_avx2"),
    e(F::S16, F::F32P, ANY, SSE2, s16_to_f32p_lanes::<4>, "s16_to_f32p_sse2"),
    e(F::S16, F::F32P, ANY, NEON, s16_to_f32p_lanes::<4>, "s16_to_f32p_neon"),
    e(F::S16, F::F32P, ANY, C, convert::<S16, F32, false, true>, "s16_to_f32p"),
    e(F::S16P, F::F32, ANY, C, convert::<S16, F32, true, false>, "s16p_to_f32"),
    e(F::S16P, F::F32P, ANY, C, convert::<S16, F32, true, true>, "s16p_to_f32p"),
    e(F::F32, F::S16, ANY, C, convert::<F32, S16, false, false>, "f32_to_s16"),
    e(F::F32, F::S16P, ANY, C, convert::<F32, S16, false, true>, "f32_to_s16p"),
    e(F::F32P, F::S16, ANY, AVX2, f32p_to_s16_lanes::<8>, "f32p_to_s16_avx2"),
    e(F::F32P, F::S16, ANY, SSE2, f32p_to_s16_lanes::<4>, "f32p_to_s16_sse2"),
    e(F::F32P, F::S16, ANY, NEON, f32p_to_s16_lanes::<4>, "f32p_to_s16_neon"),
    e(F::F32P, F::S16, ANY, C, convert::<F32, S16, true, false>, "f32p_to_s16"),
    e(F::F32P, F::S16P, ANY, C, convert::<F32, S16, true, true>, "f32p_to_s16p"),
    // s24 little-endian
    e(F::S24, F::S24, ANY, C, copy_interleaved::<3>, "copy_s24"),
    e(F::S24P, F::S24P, ANY, C, copy_planar::<3>, "copy_s24p"),
    e(F::S24, F::S24P, ANY, C, reorder::<3, false, true>, "deinterleave_s24"),
    e(F::S24P, F::S24, ANY, C, reorder::<3, true, false>, "interleave_s24"),
    e(F::S24, F::F32, ANY, C, convert::<S24Le, F32, false, false>, "s24_to_f32"),
    e(F::S24, F::F32P, ANY, C, convert::<S24Le, F32, false, true>, "s24_to_f32p"),
    e(F::S24P, F::F32, ANY, C, convert::<S24Le, F32, true, false>, "s24p_to_f32"),
    e(F::S24P, F::F32P, ANY, C, convert::<S24Le, F32, true, true>, "s24p_to_f32p"),
    e(F::F32, F::S24, ANY, C, convert::<F32, S24Le, false, false>, "f32_to_s24"),
    e(F::F32, F::S24P, ANY, C, convert::<F32, S24Le, false, true>, "f32_to_s24p"),
    e(F::F32P, F::S24, ANY, C, convert::<F32, S24Le, true, false>, "f32p_to_s24"),
    e(F::F32P, F::S24P, ANY, C, convert::<F32, S24Le, true, true>, "f32p_to_s24p"),
    // s24 big-endian
    e(F::S24_BE, F::S24_BE, ANY, C, copy_interleaved::<3>, "copy_s24be"),
    e(F::S24_BE_P, F::S24_BE_P, ANY, C, copy_planar::<3>, "copy_s24bep"),
    e(F::S24_BE, F::S24_BE_P, ANY, C, reorder::<3, false, true>, "deinterleave_s24be"),
    e(F::S24_BE_P, F::S24_BE, ANY, C, reorder::<3, true, false>, "interleave_s24be"),
    e(F::S24_BE, F::F32, ANY, C, convert::<S24Be, F32, false, false>, "s24be_to_f32"),
    e(F::S24_BE, F::F32P, ANY, C, convert::<S24Be, F32, false, true>, "s24be_to_f32p"),
    e(F::S24_BE_P, F::F32, ANY, C, convert::<S24Be, F32, true, false>, "s24bep_to_f32"),
    e(F::S24_BE_P, F::F32P, ANY, C, convert::<S24Be, F32, true, true>, "s24bep_to_f32p"),
    e(F::F32, F::S24_BE, ANY, C, convert::<F32, S24Be, false, false>, "f32_to_s24be"),
    e(F::F32, F::S24_BE_P, ANY, C, convert::<F32, S24Be, false, true>, "f32_to_s24bep"),
    e(F::F32P, F::S24_BE, ANY, C, convert::<F32, S24Be, true, false>, "f32p_to_s24be"),
    e(F::F32P, F::S24_BE_P, ANY, C, convert::<F32, S24Be, true, true>, "f32p_to_s24bep"),
    // s24 in 32-bit words
    e(F::S24_32, F::S24_32, ANY, C, copy_interleaved::<4>, "copy_s24_32"),
    e(F::S24_32P, F::S24_32P, ANY, C, copy_planar::<4>, "copy_s24_32p"),
    e(F::S24_32, F::S24_32P, ANY, C, reorder::<4, false, true>, "deinterleave_s24_32"),
    e(F::S24_32P, F::S24_32, ANY, C, reorder::<4, true, false>, "interleave_s24_32"),
    e(F::S24_32, F::F32, ANY, C, convert::<S24In32, F32, false, false>, "s24_32_to_f32"),
    e(F::S24_32, F::F32P, ANY, C, convert::<S24In32, F32, false, true>, "s24_32_to_f32p"),
    e(F::S24_32P, F::F32, ANY, C, convert::<S24In32, F32, true, false>, "s24_32p_to_f32"),
    e(F::S24_32P, F::F32P, ANY, C, convert::<S24In32, F32, true, true>, "s24_32p_to_f32p"),
    e(F::F32, F::S24_32, ANY, C, convert::<F32, S24In32, false, false>, "f32_to_s24_32"),
    e(F::F32, F::S24_32P, ANY, C, convert::<F32, S24In32, false, true>, "f32_to_s24_32p"),
    e(F::F32P, F::S24_32, ANY, C, convert::<F32, S24In32, true, false>, "f32p_to_s24_32"),
    e(F::F32P, F::S24_32P, ANY, C, convert::<F32, S24In32, true, true>, "f32p_to_s24_32p"),
    // s32
    e(F::S32, F::S32, ANY, C, copy_interleaved::<4>, "copy_s32"),
    e(F::S32P, F::S32P, ANY, C, copy_planar::<4>, "copy_s32p"),
    e(F::S32, F::S32P, ANY, C, reorder::<4, false, true>, "deinterleave_s32"),
    e(F::S32P, F::S32, ANY, C, reorder::<4, true, false>, "interleave_s32"),
    e(F::S32, F::F32, ANY, C, convert::<S32, F32, false, false>, "s32_to_f32"),
    e(F::S32, F::F32P, ANY, C, convert::<S32, F32, false, true>, "s32_to_f32p"),
    e(F::S32P, F::F32, ANY, C, convert::<S32, F32, true, false>, "s32p_to_f32"),
    e(F::S32P, F::F32P, ANY, C, convert::<S32, F32, true, true>, "s32p_to_f32p"),
    e(F::F32, F::S32, ANY, C, convert::<F32, S32, false, false>, "f32_to_s32"),
    e(F::F32, F::S32P, ANY, C, convert::<F32, S32, false, true>, "f32_to_s32p"),
    e(F::F32P, F::S32, ANY, C, convert::<F32, S32, true, false>, "f32p_to_s32"),
    e(F::F32P, F::S32P, ANY, C, convert::<F32, S32, true, true>, "f32p_to_s32p"),
    // f32
    e(F::F32, F::F32, ANY, C, copy_interleaved::<4>, "copy_f32"),
    e(F::F32P, F::F32P, ANY, C, copy_planar::<4>, "copy_f32p"),
    e(F::F32, F::F32P, ANY, AVX2, deinterleave_f32_lanes::<8>, "deinterleave_f32_avx2"),
    e(F::F32, F::F32P, ANY, SSE2, deinterleave_f32_lanes::<4>, "deinterleave_f32_sse2"),
    e(F::F32, F::F32P, ANY, NEON, deinterleave_f32_lanes::<4>, "deinterleave_f32_neon"),
    e(F::F32, F::F32P, ANY, C, reorder::<4, false, true>, "deinterleave_f32"),
    e(F::F32P, F::F32, ANY, AVX2, interleave_f32_lanes::<8>, "interleave_f32_avx2"),
    e(F::F32P, F::F32, ANY, SSE2, interleave_f32_lanes::<4>, "interleave_f32_sse2"),
    e(F::F32P, F::F32, ANY, NEON, interleave_f32_lanes::<4>, "interleave_f32_neon"),
    e(F::F32P, F::F32, ANY, C, reorder::<4, true, false>, "interleave_f32"),
];
