//! Cauce DSP - sample format conversion and resampling
//!
//! This crate holds the data-path building blocks of the cauce audio graph.
//! Everything here is allocation-free once initialized and safe to call from
//! a real-time thread.
//!
//! # Sample Formats
//!
//! - [`Encoding`] - Raw PCM encodings (u8, s8, s16, s24 LE/BE, s24_32, s32, f32)
//! - [`SampleFormat`] - An encoding plus its interleaved/planar layout
//! - [`ChannelPosition`] / [`ChannelRemap`] - Speaker positions and the
//!   buffer reordering needed to match two channel layouts
//! - [`ChannelMix`] - Gain matrix that up- or downmixes between layouts
//!   with different channel counts
//!
//! # Conversion
//!
//! - [`Converter`] - Binds a (source, destination, channels, cpu flags) tuple
//!   to a conversion kernel picked from an ordered dispatch table
//! - [`CpuFlags`] - CPU capability mask used to select accelerated kernels
//!
//! # Resampling
//!
//! - [`Resampler`] - Streaming rate converter with two backends:
//!   polyphase windowed-sinc ([`NativeResampler`]) and peak decimation
//!   ([`PeaksResampler`])
//!
//! # no_std Support
//!
//! This crate is `no_std` compatible (it needs `alloc`). Disable the default
//! `std` feature to drop runtime CPU feature detection:
//!
//! ```toml
//! [dependencies]
//! cauce-dsp = { version = "0.1", default-features = false }
//! ```
//!
//! # Example
//!
//! ```rust
//! use cauce_dsp::{Converter, CpuFlags, SampleFormat};
//!
//! let conv = Converter::new(SampleFormat::S16, SampleFormat::F32P, 2, CpuFlags::NONE).unwrap();
//!
//! // two stereo frames of s16 little-endian
//! let src: Vec<u8> = [32767i16, -32767, 0, 0].iter().flat_map(|s| s.to_le_bytes()).collect();
//! let mut left = vec![0u8; 8];
//! let mut right = vec![0u8; 8];
//!
//! conv.process(&mut [&mut left, &mut right], &[&src], 2);
//! assert_eq!(f32::from_le_bytes(left[..4].try_into().unwrap()), 1.0);
//! assert_eq!(f32::from_le_bytes(right[..4].try_into().unwrap()), -1.0);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(not(feature = "std"))]
extern crate alloc;

pub mod channel;
pub mod channelmix;
pub mod convert;
pub mod cpu;
pub mod format;
pub mod resample;

pub use channel::{ChannelPosition, ChannelRemap};
pub use channelmix::{ChannelMix, ChannelMixError};
pub use convert::{ConvertEntry, ConvertError, ConvertFn, Converter, f32_from_bytes, f32_to_bytes};
pub use cpu::CpuFlags;
pub use format::{Encoding, ParseFormatError, SampleFormat};
pub use resample::{
    NativeResampler, PeaksResampler, ResampleConfig, ResampleError, ResampleMethod, Resampler,
};

/// Maximum number of channels a single stream may carry.
///
/// Kernels gather per-channel buffer slices into fixed arrays of this size so
/// the process path never allocates.
pub const MAX_CHANNELS: usize = 64;
