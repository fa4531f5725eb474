//! CPU capability flags.
//!
//! [`CpuFlags`] is the mask passed to [`Converter::new`](crate::Converter::new).
//! Conversion table entries declare the flags they need; an entry is only
//! eligible when the caller's mask contains all of them.

use core::fmt;
use core::str::FromStr;

use crate::format::ParseFormatError;

/// Bit set of CPU features relevant to sample conversion kernels.
///
/// # Example
///
/// ```rust
/// use cauce_dsp::CpuFlags;
///
/// let flags: CpuFlags = "sse2,avx2".parse().unwrap();
/// assert!(flags.contains(CpuFlags::AVX2));
/// assert!(!flags.contains(CpuFlags::NEON));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CpuFlags(u32);

const NAMES: [(CpuFlags, &str); 9] = [
    (CpuFlags::SSE, "sse"),
    (CpuFlags::SSE2, "sse2"),
    (CpuFlags::SSE3, "sse3"),
    (CpuFlags::SSSE3, "ssse3"),
    (CpuFlags::SSE41, "sse41"),
    (CpuFlags::SSE42, "sse42"),
    (CpuFlags::AVX, "avx"),
    (CpuFlags::AVX2, "avx2"),
    (CpuFlags::NEON, "neon"),
];

impl CpuFlags {
    /// No features; only generic kernels are eligible.
    pub const NONE: Self = Self(0);
    /// x86 SSE.
    pub const SSE: Self = Self(1 << 0);
    /// x86 SSE2.
    pub const SSE2: Self = Self(1 << 1);
    /// x86 SSE3.
    pub const SSE3: Self = Self(1 << 2);
    /// x86 SSSE3.
    pub const SSSE3: Self = Self(1 << 3);
    /// x86 SSE4.1.
    pub const SSE41: Self = Self(1 << 4);
    /// x86 SSE4.2.
    pub const SSE42: Self = Self(1 << 5);
    /// x86 AVX.
    pub const AVX: Self = Self(1 << 6);
    /// x86 AVX2.
    pub const AVX2: Self = Self(1 << 7);
    /// ARM NEON.
    pub const NEON: Self = Self(1 << 8);

    /// Creates a flag set from raw bits, dropping unknown bits.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0x1ff)
    }

    /// Raw bit representation.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if no flag is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if all bits in `other` are set in `self`.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of two flag sets.
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Returns the flags present in both sets.
    #[inline]
    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Detects the features of the running CPU.
    ///
    /// Returns [`CpuFlags::NONE`] on architectures without accelerated
    /// kernels.
    #[cfg(feature = "std")]
    pub fn detect() -> Self {
        #[allow(unused_mut)]
        let mut flags = Self::NONE;

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            let detected = [
                (std::is_x86_feature_detected!("sse"), Self::SSE),
                (std::is_x86_feature_detected!("sse2"), Self::SSE2),
                (std::is_x86_feature_detected!("sse3"), Self::SSE3),
                (std::is_x86_feature_detected!("ssse3"), Self::SSSE3),
                (std::is_x86_feature_detected!("sse4.1"), Self::SSE41),
                (std::is_x86_feature_detected!("sse4.2"), Self::SSE42),
                (std::is_x86_feature_detected!("avx"), Self::AVX),
                (std::is_x86_feature_detected!("avx2"), Self::AVX2),
            ];
            for (present, flag) in detected {
                if present {
                    flags = flags.union(flag);
                }
            }
        }

        #[cfg(target_arch = "aarch64")]
        {
            if std::arch::is_aarch64_feature_detected!("neon") {
                flags = flags.union(Self::NEON);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("cpu flags: {}", flags);

        flags
    }

    /// Vector width in f32 lanes that kernels registered under these flags
    /// process per step. Generic kernels report 1.
    pub const fn lanes(self) -> u32 {
        if self.contains(Self::AVX2) {
            8
        } else if self.contains(Self::SSE2) || self.contains(Self::NEON) {
            4
        } else {
            1
        }
    }
}

impl fmt::Display for CpuFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl FromStr for CpuFlags {
    type Err = ParseFormatError;

    /// Parses a comma separated list such as `"sse2,avx2"`. `"none"` and the
    /// empty string give [`CpuFlags::NONE`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::NONE;
        for item in s.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if item.eq_ignore_ascii_case("none") {
                continue;
            }
            let flag = NAMES
                .iter()
                .find(|(_, name)| item.eq_ignore_ascii_case(name))
                .map(|(flag, _)| *flag)
                .ok_or(ParseFormatError)?;
            flags = flags.union(flag);
        }
        Ok(flags)
    }
}
