//! Sample format conversion.
//!
//! A [`Converter`] binds a `(source format, destination format, channel
//! count, cpu flags)` tuple to one kernel from a static, ordered table.
//! Selection happens once, at format negotiation time; processing is a
//! direct function pointer call.
//!
//! # Selection
//!
//! An entry is eligible when:
//!
//! - its format pair equals the requested pair,
//! - its channel constraint is `0` (wildcard) or equals the channel count,
//! - its required [`CpuFlags`] are a subset of the caller's flags (generic
//!   entries require none).
//!
//! The first eligible entry wins. Entries for a pair are declared in
//! [`ConvertEntry::rank`] order, so exact channel-count kernels beat
//! wildcards and wider vector kernels beat narrower ones.
//!
//! # Numeric Semantics
//!
//! - u8: `v / 128 - 1`
//! - signed N-bit: `v / (2^(N-1) - 1)`, s32 computed in f64
//! - float to integer: clamp to [-1.0, 1.0], scale, truncate toward zero
//!
//! # Buffers
//!
//! Buffers are byte slices. Interleaved formats take one slice, planar
//! formats one slice per channel. [`f32_from_bytes`] and [`f32_to_bytes`]
//! move planar f32 data between byte buffers and sample slices.

mod codec;
mod kernels;
mod table;

use core::fmt;

use crate::cpu::CpuFlags;
use crate::format::SampleFormat;

/// Signature shared by every conversion kernel:
/// `(n_channels, dst_buffers, src_buffers, n_samples)`.
pub type ConvertFn = fn(usize, &mut [&mut [u8]], &[&[u8]], usize);

/// One row of the conversion dispatch table.
#[derive(Clone, Copy)]
pub struct ConvertEntry {
    src: SampleFormat,
    dst: SampleFormat,
    n_channels: u32,
    cpu_flags: CpuFlags,
    func: ConvertFn,
    name: &'static str,
}

impl ConvertEntry {
    pub(crate) const fn new(
        src: SampleFormat,
        dst: SampleFormat,
        n_channels: u32,
        cpu_flags: CpuFlags,
        func: ConvertFn,
        name: &'static str,
    ) -> Self {
        Self {
            src,
            dst,
            n_channels,
            cpu_flags,
            func,
            name,
        }
    }

    /// Source format.
    pub fn src(&self) -> SampleFormat {
        self.src
    }

    /// Destination format.
    pub fn dst(&self) -> SampleFormat {
        self.dst
    }

    /// Required channel count, `0` for any.
    pub fn n_channels(&self) -> u32 {
        self.n_channels
    }

    /// CPU features the kernel needs.
    pub fn cpu_flags(&self) -> CpuFlags {
        self.cpu_flags
    }

    /// Kernel name, for logging.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` for same-format copies.
    pub fn is_passthrough(&self) -> bool {
        self.src == self.dst
    }

    /// Preference rank among entries for the same format pair. Higher is
    /// preferred: exact channel counts first, then vector width.
    pub fn rank(&self) -> (bool, u32) {
        (self.n_channels != 0, self.cpu_flags.lanes())
    }

    /// Returns `true` if this entry can serve the request.
    pub fn matches(&self, src: SampleFormat, dst: SampleFormat, n_channels: u32, cpu_flags: CpuFlags) -> bool {
        self.src == src
            && self.dst == dst
            && (self.n_channels == 0 || self.n_channels == n_channels)
            && cpu_flags.contains(self.cpu_flags)
    }
}

impl fmt::Debug for ConvertEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertEntry")
            .field("name", &self.name)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("n_channels", &self.n_channels)
            .field("cpu_flags", &self.cpu_flags)
            .finish()
    }
}

/// The full dispatch table in lookup order.
pub fn entries() -> &'static [ConvertEntry] {
    table::CONVERT_TABLE
}

/// Errors from converter setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertError {
    /// No table entry converts between the two formats.
    Unsupported {
        /// Requested source format.
        src: SampleFormat,
        /// Requested destination format.
        dst: SampleFormat,
        /// Requested channel count.
        n_channels: u32,
    },
    /// Channel count above [`MAX_CHANNELS`](crate::MAX_CHANNELS).
    TooManyChannels(u32),
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Unsupported {
                src,
                dst,
                n_channels,
            } => write!(f, "unsupported conversion {src} -> {dst} ({n_channels} channels)"),
            ConvertError::TooManyChannels(n) => write!(f, "too many channels: {n}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConvertError {}

/// A selected conversion kernel bound to its formats and channel count.
///
/// `Converter` is immutable and stateless; [`process`](Self::process) can be
/// called any number of times from the real-time thread.
#[derive(Debug, Clone, Copy)]
pub struct Converter {
    entry: ConvertEntry,
    n_channels: u32,
}

impl Converter {
    /// Looks up the kernel for `src -> dst` with `n_channels` channels.
    ///
    /// # Arguments
    ///
    /// * `src` - Source sample format
    /// * `dst` - Destination sample format
    /// * `n_channels` - Channel count (0 is legal and makes processing a no-op)
    /// * `cpu_flags` - Features available to accelerated kernels
    ///
    /// # Errors
    ///
    /// [`ConvertError::Unsupported`] when no entry handles the format pair.
    pub fn new(
        src: SampleFormat,
        dst: SampleFormat,
        n_channels: u32,
        cpu_flags: CpuFlags,
    ) -> Result<Self, ConvertError> {
        if n_channels as usize > crate::MAX_CHANNELS {
            return Err(ConvertError::TooManyChannels(n_channels));
        }
        let entry = entries()
            .iter()
            .find(|e| e.matches(src, dst, n_channels, cpu_flags))
            .ok_or(ConvertError::Unsupported {
                src,
                dst,
                n_channels,
            })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "convert {} -> {} channels:{} flags:{} using {}",
            src,
            dst,
            n_channels,
            cpu_flags,
            entry.name
        );

        Ok(Self {
            entry: *entry,
            n_channels,
        })
    }

    /// Binds a specific table entry, bypassing lookup.
    ///
    /// # Errors
    ///
    /// [`ConvertError::Unsupported`] if the entry requires a different
    /// channel count.
    pub fn with_entry(entry: &ConvertEntry, n_channels: u32) -> Result<Self, ConvertError> {
        if entry.n_channels != 0 && entry.n_channels != n_channels {
            return Err(ConvertError::Unsupported {
                src: entry.src,
                dst: entry.dst,
                n_channels,
            });
        }
        if n_channels as usize > crate::MAX_CHANNELS {
            return Err(ConvertError::TooManyChannels(n_channels));
        }
        Ok(Self {
            entry: *entry,
            n_channels,
        })
    }

    /// Source format.
    pub fn src_format(&self) -> SampleFormat {
        self.entry.src
    }

    /// Destination format.
    pub fn dst_format(&self) -> SampleFormat {
        self.entry.dst
    }

    /// Channel count.
    pub fn n_channels(&self) -> u32 {
        self.n_channels
    }

    /// Flags required by the selected kernel.
    pub fn cpu_flags(&self) -> CpuFlags {
        self.entry.cpu_flags
    }

    /// Selected kernel name.
    pub fn name(&self) -> &'static str {
        self.entry.name
    }

    /// Returns `true` when source and destination formats are equal, so the
    /// caller may hand the source memory over instead of copying.
    pub fn is_passthrough(&self) -> bool {
        self.entry.is_passthrough()
    }

    /// Converts `n_samples` frames from `src` into `dst`.
    ///
    /// `src` and `dst` hold one slice per block of their format (see
    /// [`SampleFormat::blocks`]). Each slice must hold at least
    /// `n_samples * stride` bytes.
    ///
    /// A zero channel count or zero `n_samples` returns immediately.
    #[inline]
    pub fn process(&self, dst: &mut [&mut [u8]], src: &[&[u8]], n_samples: usize) {
        let n_channels = self.n_channels as usize;
        if n_channels == 0 || n_samples == 0 {
            return;
        }
        debug_assert!(src.len() >= self.entry.src.blocks(n_channels));
        debug_assert!(dst.len() >= self.entry.dst.blocks(n_channels));
        (self.entry.func)(n_channels, dst, src, n_samples);
    }
}

/// Decodes little-endian f32 bytes into `dst`. Returns the number of samples
/// written, the smaller of `dst.len()` and `src.len() / 4`.
pub fn f32_from_bytes(src: &[u8], dst: &mut [f32]) -> usize {
    let mut n = 0;
    for (d, chunk) in dst.iter_mut().zip(src.chunks_exact(4)) {
        *d = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        n += 1;
    }
    n
}

/// Encodes `src` as little-endian f32 bytes. Returns the number of samples
/// written, the smaller of `src.len()` and `dst.len() / 4`.
pub fn f32_to_bytes(src: &[f32], dst: &mut [u8]) -> usize {
    let mut n = 0;
    for (chunk, s) in dst.chunks_exact_mut(4).zip(src) {
        chunk.copy_from_slice(&s.to_le_bytes());
        n += 1;
    }
    n
}
