//! Port formats, buffers and per-port IO areas.
//!
//! A buffer is a set of [`Data`] blocks, one per channel for planar formats
//! and a single block for interleaved ones. Buffers are allocated by the
//! link that joins two ports and circulate between them: the output side
//! fills a free buffer and hands it over, the input side reads it and hands
//! it back. While a node processes, each of its ports exposes at most one
//! buffer through its [`PortIo`].

use std::fmt;

use cauce_dsp::{ChannelPosition, SampleFormat};

use crate::implementation::ProcessStatus;

/// Negotiated format of an audio port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInfo {
    /// Sample encoding and layout.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel count.
    pub channels: u32,
    /// Speaker position per channel.
    pub positions: Vec<ChannelPosition>,
}

impl AudioInfo {
    /// Format with the default channel layout for `channels`.
    pub fn new(format: SampleFormat, rate: u32, channels: u32) -> Self {
        Self {
            format,
            rate,
            channels,
            positions: ChannelPosition::default_layout(channels as usize),
        }
    }

    /// Replaces the channel layout.
    pub fn with_positions(mut self, positions: Vec<ChannelPosition>) -> Self {
        self.positions = positions;
        self
    }

    /// Bytes per frame within one block.
    pub fn stride(&self) -> usize {
        self.format.stride(self.channels as usize)
    }

    /// Blocks per buffer.
    pub fn blocks(&self) -> usize {
        self.format.blocks(self.channels as usize)
    }
}

impl fmt::Display for AudioInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}Hz {}ch", self.format, self.rate, self.channels)
    }
}

/// Flags describing what may be done with a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct DataFlags(u32);

impl DataFlags {
    /// No flags.
    pub const NONE: Self = Self(0);
    /// The consumer may read the memory.
    pub const READABLE: Self = Self(1 << 0);
    /// The producer may write the memory.
    pub const WRITABLE: Self = Self(1 << 1);
    /// The memory may be swapped for other memory of the same size.
    pub const DYNAMIC: Self = Self(1 << 2);
    /// Readable and writable.
    pub const READWRITE: Self = Self(Self::READABLE.0 | Self::WRITABLE.0);

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bitwise or.
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for DataFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Valid region of a data block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Chunk {
    /// Byte offset of the first valid byte.
    pub offset: u32,
    /// Number of valid bytes.
    pub size: u32,
    /// Bytes per frame.
    pub stride: u32,
}

impl Chunk {
    /// Whole frames in the chunk.
    pub fn frames(&self) -> usize {
        if self.stride == 0 { 0 } else { (self.size / self.stride) as usize }
    }
}

/// One memory block of a buffer.
#[derive(Debug, Clone)]
pub struct Data {
    /// Access flags.
    pub flags: DataFlags,
    /// Backing memory; its length is the block capacity.
    pub memory: Vec<u8>,
    /// Valid region.
    pub chunk: Chunk,
}

impl Data {
    /// Zero-filled block of `size` bytes.
    pub fn new(flags: DataFlags, size: usize) -> Self {
        Self {
            flags,
            memory: vec![0; size],
            chunk: Chunk::default(),
        }
    }

    /// Capacity in bytes.
    pub fn max_size(&self) -> usize {
        self.memory.len()
    }

    /// The valid bytes described by the chunk, clamped to the memory.
    pub fn valid(&self) -> &[u8] {
        let start = (self.chunk.offset as usize).min(self.memory.len());
        let end = start.saturating_add(self.chunk.size as usize).min(self.memory.len());
        &self.memory[start..end]
    }
}

/// A set of data blocks moving between two ports.
#[derive(Debug, Clone)]
pub struct Buffer {
    /// Index of the buffer within its link's pool.
    pub id: u32,
    /// One block per planar channel, or one for interleaved data.
    pub datas: Vec<Data>,
}

impl Buffer {
    /// Allocates a buffer sized for `frames` frames of `info`.
    pub fn alloc(id: u32, info: &AudioInfo, frames: usize, flags: DataFlags) -> Self {
        let size = frames * info.stride();
        Self {
            id,
            datas: (0..info.blocks()).map(|_| Data::new(flags, size)).collect(),
        }
    }

    /// Returns `true` if every block carries all bits of `flags`.
    pub fn all_have(&self, flags: DataFlags) -> bool {
        self.datas.iter().all(|d| d.flags.contains(flags))
    }
}

/// IO area of one port during `process`.
///
/// On an input, `HAVE_DATA` with a buffer means unread data is present;
/// the node sets `NEED_DATA` once it has consumed it. On an output, the
/// node receives a free buffer (or none if the pool ran dry) and sets
/// `HAVE_DATA` after filling it.
#[derive(Debug)]
pub struct PortIo {
    /// `NEED_DATA` or `HAVE_DATA`.
    pub status: ProcessStatus,
    /// Buffer currently exposed on the port.
    pub buffer: Option<Buffer>,
}

impl Default for PortIo {
    fn default() -> Self {
        Self {
            status: ProcessStatus::NEED_DATA,
            buffer: None,
        }
    }
}

impl PortIo {
    /// Returns `true` if the port holds unconsumed data.
    pub fn has_data(&self) -> bool {
        self.status.contains(ProcessStatus::HAVE_DATA) && self.buffer.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_buffer_has_block_per_channel() {
        let info = AudioInfo::new(SampleFormat::F32P, 48000, 2);
        let buf = Buffer::alloc(0, &info, 256, DataFlags::READWRITE);
        assert_eq!(buf.datas.len(), 2);
        assert_eq!(buf.datas[0].max_size(), 1024);
    }

    #[test]
    fn interleaved_buffer_has_one_block() {
        let info = AudioInfo::new(SampleFormat::S16, 44100, 2);
        let buf = Buffer::alloc(0, &info, 256, DataFlags::READWRITE | DataFlags::DYNAMIC);
        assert_eq!(buf.datas.len(), 1);
        assert_eq!(buf.datas[0].max_size(), 1024);
        assert!(buf.all_have(DataFlags::DYNAMIC));
    }

    #[test]
    fn valid_region_is_clamped() {
        let mut d = Data::new(DataFlags::READABLE, 8);
        d.chunk = Chunk {
            offset: 4,
            size: 100,
            stride: 2,
        };
        assert_eq!(d.valid().len(), 4);
        assert_eq!(d.chunk.frames(), 50);
    }

    #[test]
    fn display_format() {
        let info = AudioInfo::new(SampleFormat::F32P, 48000, 2);
        assert_eq!(info.to_string(), "f32p 48000Hz 2ch");
    }
}
