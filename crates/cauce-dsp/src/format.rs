//! PCM sample encodings and layouts.
//!
//! A [`SampleFormat`] is an [`Encoding`] plus a layout flag. Interleaved
//! formats carry every channel in one buffer, frame after frame. Planar
//! formats use one buffer per channel.
//!
//! All multi-byte encodings are little-endian in memory, except
//! [`Encoding::S24Be`] which exists for big-endian packed 24-bit sources.

use core::fmt;
use core::str::FromStr;

/// Raw PCM encoding of a single sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Unsigned 8-bit, 128 is silence.
    U8,
    /// Signed 8-bit.
    S8,
    /// Signed 16-bit little-endian.
    S16,
    /// Signed 24-bit packed in 3 bytes, little-endian.
    S24,
    /// Signed 24-bit packed in 3 bytes, big-endian.
    S24Be,
    /// Signed 24-bit in the low bits of a 32-bit little-endian word.
    S24_32,
    /// Signed 32-bit little-endian.
    S32,
    /// 32-bit IEEE float little-endian, nominal range [-1.0, 1.0].
    F32,
}

impl Encoding {
    /// Every supported encoding.
    pub const ALL: [Encoding; 8] = [
        Encoding::U8,
        Encoding::S8,
        Encoding::S16,
        Encoding::S24,
        Encoding::S24Be,
        Encoding::S24_32,
        Encoding::S32,
        Encoding::F32,
    ];

    /// Size of one sample in bytes.
    pub const fn sample_size(self) -> usize {
        match self {
            Encoding::U8 | Encoding::S8 => 1,
            Encoding::S16 => 2,
            Encoding::S24 | Encoding::S24Be => 3,
            Encoding::S24_32 | Encoding::S32 | Encoding::F32 => 4,
        }
    }

    /// Returns `true` for the float encoding.
    pub const fn is_float(self) -> bool {
        matches!(self, Encoding::F32)
    }

    /// Short lowercase name, as accepted by [`SampleFormat::from_str`].
    pub const fn name(self) -> &'static str {
        match self {
            Encoding::U8 => "u8",
            Encoding::S8 => "s8",
            Encoding::S16 => "s16",
            Encoding::S24 => "s24",
            Encoding::S24Be => "s24be",
            Encoding::S24_32 => "s24_32",
            Encoding::S32 => "s32",
            Encoding::F32 => "f32",
        }
    }
}

/// An encoding plus its buffer layout.
///
/// # Example
///
/// ```rust
/// use cauce_dsp::{Encoding, SampleFormat};
///
/// let fmt: SampleFormat = "s16p".parse().unwrap();
/// assert_eq!(fmt, SampleFormat::S16P);
/// assert_eq!(fmt.encoding(), Encoding::S16);
/// assert_eq!(fmt.stride(2), 2);
/// assert_eq!(SampleFormat::S16.stride(2), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleFormat {
    encoding: Encoding,
    planar: bool,
}

impl SampleFormat {
    /// Interleaved unsigned 8-bit.
    pub const U8: Self = Self::interleaved(Encoding::U8);
    /// Planar unsigned 8-bit.
    pub const U8P: Self = Self::planar(Encoding::U8);
    /// Interleaved signed 8-bit.
    pub const S8: Self = Self::interleaved(Encoding::S8);
    /// Planar signed 8-bit.
    pub const S8P: Self = Self::planar(Encoding::S8);
    /// Interleaved signed 16-bit.
    pub const S16: Self = Self::interleaved(Encoding::S16);
    /// Planar signed 16-bit.
    pub const S16P: Self = Self::planar(Encoding::S16);
    /// Interleaved packed 24-bit, little-endian.
    pub const S24: Self = Self::interleaved(Encoding::S24);
    /// Planar packed 24-bit, little-endian.
    pub const S24P: Self = Self::planar(Encoding::S24);
    /// Interleaved packed 24-bit, big-endian.
    pub const S24_BE: Self = Self::interleaved(Encoding::S24Be);
    /// Planar packed 24-bit, big-endian.
    pub const S24_BE_P: Self = Self::planar(Encoding::S24Be);
    /// Interleaved 24-bit in 32-bit words.
    pub const S24_32: Self = Self::interleaved(Encoding::S24_32);
    /// Planar 24-bit in 32-bit words.
    pub const S24_32P: Self = Self::planar(Encoding::S24_32);
    /// Interleaved signed 32-bit.
    pub const S32: Self = Self::interleaved(Encoding::S32);
    /// Planar signed 32-bit.
    pub const S32P: Self = Self::planar(Encoding::S32);
    /// Interleaved 32-bit float.
    pub const F32: Self = Self::interleaved(Encoding::F32);
    /// Planar 32-bit float.
    pub const F32P: Self = Self::planar(Encoding::F32);

    /// Creates a format from an encoding and a layout flag.
    pub const fn new(encoding: Encoding, planar: bool) -> Self {
        Self { encoding, planar }
    }

    /// Interleaved layout of `encoding`.
    pub const fn interleaved(encoding: Encoding) -> Self {
        Self::new(encoding, false)
    }

    /// Planar layout of `encoding`.
    pub const fn planar(encoding: Encoding) -> Self {
        Self::new(encoding, true)
    }

    /// The sample encoding.
    pub const fn encoding(self) -> Encoding {
        self.encoding
    }

    /// Returns `true` for one-buffer-per-channel layouts.
    pub const fn is_planar(self) -> bool {
        self.planar
    }

    /// Size of one sample in bytes.
    pub const fn sample_size(self) -> usize {
        self.encoding.sample_size()
    }

    /// Bytes between consecutive frames within one buffer.
    pub const fn stride(self, channels: usize) -> usize {
        if self.planar {
            self.sample_size()
        } else {
            self.sample_size() * channels
        }
    }

    /// Number of buffers (blocks) a stream of `channels` channels uses.
    pub const fn blocks(self, channels: usize) -> usize {
        if self.planar { channels } else { 1 }
    }

    /// Same encoding, planar layout.
    pub const fn to_planar(self) -> Self {
        Self::planar(self.encoding)
    }

    /// Same encoding, interleaved layout.
    pub const fn to_interleaved(self) -> Self {
        Self::interleaved(self.encoding)
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.encoding.name())?;
        if self.planar {
            f.write_str("p")?;
        }
        Ok(())
    }
}

/// Error returned when a format name is not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseFormatError;

impl fmt::Display for ParseFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown sample format")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ParseFormatError {}

impl FromStr for SampleFormat {
    type Err = ParseFormatError;

    /// Parses names such as `s16`, `S16LE`, `f32p`, `s24be` or `s24_32p`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut buf = [0u8; 16];
        let bytes = s.trim().as_bytes();
        if bytes.len() > buf.len() {
            return Err(ParseFormatError);
        }
        for (dst, src) in buf.iter_mut().zip(bytes) {
            *dst = src.to_ascii_lowercase();
        }
        let lower = core::str::from_utf8(&buf[..bytes.len()]).map_err(|_| ParseFormatError)?;

        let (name, planar) = match lower.strip_suffix('p') {
            Some(rest) => (rest, true),
            None => (lower, false),
        };
        let name = name.strip_suffix("le").unwrap_or(name);

        let encoding = Encoding::ALL
            .iter()
            .copied()
            .find(|e| e.name() == name)
            .ok_or(ParseFormatError)?;
        Ok(Self::new(encoding, planar))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_follow_layout() {
        assert_eq!(SampleFormat::S24.stride(2), 6);
        assert_eq!(SampleFormat::S24P.stride(2), 3);
        assert_eq!(SampleFormat::F32.blocks(6), 1);
        assert_eq!(SampleFormat::F32P.blocks(6), 6);
    }

    #[test]
    fn parse_accepts_common_spellings() {
        assert_eq!("S16LE".parse(), Ok(SampleFormat::S16));
        assert_eq!("f32p".parse(), Ok(SampleFormat::F32P));
        assert_eq!("s24be".parse(), Ok(SampleFormat::S24_BE));
        assert_eq!("s24_32p".parse(), Ok(SampleFormat::S24_32P));
        assert_eq!("u8".parse(), Ok(SampleFormat::U8));
        assert_eq!("s20".parse::<SampleFormat>(), Err(ParseFormatError));
        assert_eq!("".parse::<SampleFormat>(), Err(ParseFormatError));
    }

    #[test]
    fn display_round_trips_through_parse() {
        for enc in Encoding::ALL {
            for planar in [false, true] {
                let fmt = SampleFormat::new(enc, planar);
                let name = format!("{fmt}");
                assert_eq!(name.parse(), Ok(fmt), "{name}");
            }
        }
    }
}
