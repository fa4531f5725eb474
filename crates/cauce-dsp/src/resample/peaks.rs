//! Peak-hold decimator.
//!
//! Every output sample is the largest absolute input value of its bucket.
//! Bucket `k` covers input frames `[k * in / out, (k + 1) * in / out)`
//! counted from the last reset, so bucket edges never drift however the
//! stream is chunked. A bucket that straddles two calls carries its running
//! maximum across.

#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

use super::{ResampleConfig, ResampleError, gcd};

/// Absolute-peak resampler.
#[derive(Debug, Clone)]
pub struct PeaksResampler {
    channels: u32,
    in_rate: u32,
    out_rate: u32,
    /// Reduced rates.
    i_rate: u64,
    o_rate: u64,
    /// Input frames consumed since the last counter reduction.
    i_count: u64,
    /// Output frames produced since the last counter reduction.
    o_count: u64,
    max_f: Vec<f32>,
}

impl PeaksResampler {
    pub(super) fn new(config: &ResampleConfig) -> Result<Self, ResampleError> {
        if config.in_rate == 0 || config.out_rate == 0 {
            return Err(ResampleError::InvalidRate {
                in_rate: config.in_rate,
                out_rate: config.out_rate,
            });
        }
        let g = gcd(config.in_rate, config.out_rate);
        let channels = config.channels as usize;

        let mut max_f = Vec::new();
        max_f
            .try_reserve_exact(channels)
            .map_err(|_| ResampleError::OutOfMemory { requested: channels })?;
        max_f.resize(channels, 0.0);

        #[cfg(feature = "tracing")]
        tracing::debug!("peaks resampler {} -> {}", config.in_rate, config.out_rate);

        Ok(Self {
            channels: config.channels,
            in_rate: config.in_rate,
            out_rate: config.out_rate,
            i_rate: u64::from(config.in_rate / g),
            o_rate: u64::from(config.out_rate / g),
            i_count: 0,
            o_count: 0,
            max_f,
        })
    }

    /// Channel count.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Nominal input rate.
    pub fn in_rate(&self) -> u32 {
        self.in_rate
    }

    /// Nominal output rate.
    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    /// Clears the bucket counters and carried maxima.
    pub fn reset(&mut self) {
        self.i_count = 0;
        self.o_count = 0;
        self.max_f.fill(0.0);
    }

    /// Input frames needed to produce `out_len` frames.
    pub fn in_len(&self, out_len: usize) -> usize {
        (out_len as u64 * self.i_rate / self.o_rate) as usize
    }

    /// Emits one peak per completed bucket.
    ///
    /// `in_len` and `out_len` are rewritten to the frames consumed and
    /// produced. Input that fills a bucket only partially is consumed and
    /// remembered.
    pub fn process(&mut self, src: &[&[f32]], in_len: &mut usize, dst: &mut [&mut [f32]], out_len: &mut usize) {
        let channels = self.channels as usize;
        let (ilen, olen) = (*in_len, *out_len);
        let (mut i, mut o) = (0usize, 0usize);

        for ((s, d), max_f) in src.iter().zip(dst.iter_mut()).zip(self.max_f.iter_mut()).take(channels) {
            let mut m = *max_f;
            let mut o_count = self.o_count;
            i = 0;
            o = 0;
            while i < ilen && o < olen {
                let end = ((o_count + 1) * self.i_rate / self.o_rate).saturating_sub(self.i_count) as usize;
                let chunk = end.min(ilen);
                m = s[i..chunk].iter().fold(m, |acc, v| acc.max(v.abs()));
                i = chunk;
                if i == end {
                    d[o] = m;
                    o += 1;
                    m = 0.0;
                    o_count += 1;
                }
            }
            *max_f = m;
        }

        *in_len = i;
        *out_len = o;
        self.i_count += i as u64;
        self.o_count += o as u64;
        while self.i_count >= self.i_rate && self.o_count >= self.o_rate {
            self.i_count -= self.i_rate;
            self.o_count -= self.o_rate;
        }
    }
}
