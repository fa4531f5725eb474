//! Streaming sample rate conversion.
//!
//! [`Resampler`] converts planar f32 audio from one rate to another and
//! keeps its phase across calls, so a stream can be fed in chunks of any
//! size. Two backends share the interface:
//!
//! - [`NativeResampler`] - polyphase windowed-sinc FIR, quality selected
//!   from a 15-entry table
//! - [`PeaksResampler`] - per-bucket absolute maximum, for level meters and
//!   waveform overviews
//!
//! # Streaming Contract
//!
//! [`Resampler::process`] takes the available input and output lengths and
//! rewrites them to the amounts actually consumed and produced. Whatever
//! input was not consumed must be submitted again at the start of the next
//! call. The native backend may consume input without producing output
//! while it fills its history.
//!
//! # Example
//!
//! ```rust
//! use cauce_dsp::{ResampleConfig, Resampler};
//!
//! let mut r = Resampler::new(&ResampleConfig::new(1, 44100, 48000)).unwrap();
//! let input = vec![0.25f32; 4410];
//! let mut output = vec![0.0f32; 8192];
//!
//! let mut in_len = input.len();
//! let mut out_len = output.len();
//! r.process(&[&input], &mut in_len, &mut [&mut output], &mut out_len);
//!
//! assert!(in_len <= 4410);
//! assert!(out_len > 4000);
//! ```

mod native;
mod peaks;

use core::fmt;

pub use native::NativeResampler;
pub use peaks::PeaksResampler;

/// Number of entries in the quality table.
pub const QUALITY_COUNT: u32 = 15;

/// Quality used when none is requested.
pub const DEFAULT_QUALITY: u32 = 4;

/// Backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResampleMethod {
    /// Polyphase windowed-sinc interpolation.
    #[default]
    Native,
    /// Absolute peak per output sample, downsampling only.
    Peaks,
}

/// Resampler construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResampleConfig {
    /// Channel count.
    pub channels: u32,
    /// Input rate in Hz.
    pub in_rate: u32,
    /// Output rate in Hz.
    pub out_rate: u32,
    /// Quality index, clamped to `0..QUALITY_COUNT`.
    pub quality: u32,
    /// Backend.
    pub method: ResampleMethod,
}

impl ResampleConfig {
    /// Native backend at the default quality.
    pub fn new(channels: u32, in_rate: u32, out_rate: u32) -> Self {
        Self {
            channels,
            in_rate,
            out_rate,
            quality: DEFAULT_QUALITY,
            method: ResampleMethod::Native,
        }
    }

    /// Sets the quality index.
    pub fn with_quality(mut self, quality: u32) -> Self {
        self.quality = quality;
        self
    }

    /// Sets the backend.
    pub fn with_method(mut self, method: ResampleMethod) -> Self {
        self.method = method;
        self
    }
}

/// Errors from resampler construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResampleError {
    /// A rate of zero was requested.
    InvalidRate {
        /// Requested input rate.
        in_rate: u32,
        /// Requested output rate.
        out_rate: u32,
    },
    /// A channel count of zero was requested.
    NoChannels,
    /// Channel count above [`MAX_CHANNELS`](crate::MAX_CHANNELS).
    TooManyChannels(u32),
    /// Filter bank or history could not be allocated.
    OutOfMemory {
        /// Floats that were requested.
        requested: usize,
    },
}

impl fmt::Display for ResampleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResampleError::InvalidRate { in_rate, out_rate } => {
                write!(f, "invalid resample rates {in_rate} -> {out_rate}")
            }
            ResampleError::NoChannels => write!(f, "resampler needs at least one channel"),
            ResampleError::TooManyChannels(n) => write!(f, "too many channels: {n}"),
            ResampleError::OutOfMemory { requested } => {
                write!(f, "out of memory allocating {requested} filter values")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ResampleError {}

/// Greatest common divisor.
pub(crate) fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// A streaming rate converter.
#[derive(Debug, Clone)]
pub enum Resampler {
    /// Polyphase FIR backend.
    Native(NativeResampler),
    /// Peak decimation backend.
    Peaks(PeaksResampler),
}

impl Resampler {
    /// Builds the backend selected in `config`.
    ///
    /// # Errors
    ///
    /// [`ResampleError`] on zero rates, zero or too many channels, or when
    /// the filter bank cannot be allocated.
    pub fn new(config: &ResampleConfig) -> Result<Self, ResampleError> {
        if config.in_rate == 0 || config.out_rate == 0 {
            return Err(ResampleError::InvalidRate {
                in_rate: config.in_rate,
                out_rate: config.out_rate,
            });
        }
        if config.channels == 0 {
            return Err(ResampleError::NoChannels);
        }
        if config.channels as usize > crate::MAX_CHANNELS {
            return Err(ResampleError::TooManyChannels(config.channels));
        }
        match config.method {
            ResampleMethod::Native => NativeResampler::new(config).map(Resampler::Native),
            ResampleMethod::Peaks => PeaksResampler::new(config).map(Resampler::Peaks),
        }
    }

    /// Converts as much of `src` into `dst` as possible.
    ///
    /// On return `in_len` holds the number of input frames consumed and
    /// `out_len` the number of output frames written.
    #[inline]
    pub fn process(&mut self, src: &[&[f32]], in_len: &mut usize, dst: &mut [&mut [f32]], out_len: &mut usize) {
        match self {
            Resampler::Native(r) => r.process(src, in_len, dst, out_len),
            Resampler::Peaks(r) => r.process(src, in_len, dst, out_len),
        }
    }

    /// Applies a playback rate multiplier without rebuilding the filter.
    /// `rate > 1.0` consumes input more slowly.
    pub fn update_rate(&mut self, rate: f64) {
        match self {
            Resampler::Native(r) => r.update_rate(rate),
            Resampler::Peaks(_) => {}
        }
    }

    /// Input frames needed to produce `out_len` output frames.
    pub fn in_len(&self, out_len: usize) -> usize {
        match self {
            Resampler::Native(r) => r.in_len(out_len),
            Resampler::Peaks(r) => r.in_len(out_len),
        }
    }

    /// Latency in input frames.
    pub fn delay(&self) -> usize {
        match self {
            Resampler::Native(r) => r.delay(),
            Resampler::Peaks(_) => 0,
        }
    }

    /// Clears history and phase.
    pub fn reset(&mut self) {
        match self {
            Resampler::Native(r) => r.reset(),
            Resampler::Peaks(r) => r.reset(),
        }
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        match self {
            Resampler::Native(r) => r.channels(),
            Resampler::Peaks(r) => r.channels(),
        }
    }

    /// Nominal input rate in Hz.
    pub fn in_rate(&self) -> u32 {
        match self {
            Resampler::Native(r) => r.in_rate(),
            Resampler::Peaks(r) => r.in_rate(),
        }
    }

    /// Nominal output rate in Hz.
    pub fn out_rate(&self) -> u32 {
        match self {
            Resampler::Native(r) => r.out_rate(),
            Resampler::Peaks(r) => r.out_rate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_reduces() {
        assert_eq!(gcd(44100, 48000), 300);
        assert_eq!(gcd(48000, 48000), 48000);
        assert_eq!(gcd(7, 0), 7);
    }

    #[test]
    fn zero_rates_rejected() {
        let err = Resampler::new(&ResampleConfig::new(2, 0, 48000)).unwrap_err();
        assert_eq!(
            err,
            ResampleError::InvalidRate {
                in_rate: 0,
                out_rate: 48000
            }
        );
    }

    #[test]
    fn zero_channels_rejected() {
        for method in [ResampleMethod::Native, ResampleMethod::Peaks] {
            let config = ResampleConfig::new(0, 44100, 48000).with_method(method);
            assert_eq!(Resampler::new(&config).unwrap_err(), ResampleError::NoChannels);
        }
    }

    #[test]
    fn dispatch_reports_backend_properties() {
        let native = Resampler::new(&ResampleConfig::new(2, 48000, 44100)).unwrap();
        assert_eq!(native.channels(), 2);
        assert!(native.delay() > 0);

        let peaks =
            Resampler::new(&ResampleConfig::new(2, 48000, 100).with_method(ResampleMethod::Peaks)).unwrap();
        assert_eq!(peaks.delay(), 0);
        assert_eq!(peaks.out_rate(), 100);
    }
}
