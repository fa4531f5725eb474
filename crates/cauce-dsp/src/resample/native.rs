//! Polyphase windowed-sinc resampler.
//!
//! The filter bank holds `n_phases + 1` rows of `n_taps` coefficients. Row
//! `p` is the low-pass kernel sampled at fractional offset `p / n_phases`.
//! The bank is oversampled so there are at least 256 rows, which keeps the
//! linear blend between neighbouring rows accurate when the playback rate
//! multiplier moves the phase off the exact row grid.
//!
//! Three process paths exist:
//!
//! - copy: reduced input and output rates are equal
//! - full: exact rows, playback multiplier of 1.0
//! - interpolated: blend of two rows, any other multiplier

use core::f64::consts::PI;

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use super::{QUALITY_COUNT, ResampleConfig, ResampleError, gcd};

/// `(n_taps, cutoff)` per quality index.
const QUALITY_TABLE: [(u32, f64); QUALITY_COUNT as usize] = [
    (8, 0.5),
    (16, 0.6),
    (24, 0.72),
    (32, 0.8),
    (48, 0.865),
    (64, 0.9),
    (80, 0.92),
    (96, 0.933),
    (128, 0.95),
    (144, 0.955),
    (160, 0.96),
    (192, 0.965),
    (256, 0.975),
    (896, 0.997),
    (1024, 0.998),
];

const MAX_TAPS: usize = 1 << 18;
const MAX_FILTER_LEN: usize = 1 << 27;
const MIN_PHASES: u32 = 256;

#[inline]
fn sinc(x: f64) -> f64 {
    if x < 1e-6 {
        1.0
    } else {
        let x = x * PI;
        libm::sin(x) / x
    }
}

/// Blackman-Nuttall window centred on zero, `x` in taps.
#[inline]
fn window(x: f64, n_taps: usize) -> f64 {
    const A0: f64 = 0.363_581_9;
    const A1: f64 = 0.489_177_5;
    const A2: f64 = 0.136_599_5;
    const A3: f64 = 0.010_641_1;
    let x = 2.0 * PI * x / n_taps as f64;
    A0 + A1 * libm::cos(x) + A2 * libm::cos(2.0 * x) + A3 * libm::cos(3.0 * x)
}

fn build_filter(taps: &mut [f32], n_taps: usize, n_phases: usize, cutoff: f64) {
    let half = n_taps / 2;
    for i in 0..=n_phases {
        let mut t = i as f64 / n_phases as f64;
        for j in 0..half {
            let v = (cutoff * sinc(t * cutoff) * window(t, n_taps)) as f32;
            // row i and row (n_phases - i) mirror each other
            taps[(n_phases - i) * n_taps + half + j] = v;
            taps[i * n_taps + (half - j - 1)] = v;
            t += 1.0;
        }
    }
}

fn alloc_zeroed(len: usize) -> Result<Vec<f32>, ResampleError> {
    if len > MAX_FILTER_LEN {
        return Err(ResampleError::OutOfMemory { requested: len });
    }
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ResampleError::OutOfMemory { requested: len })?;
    v.resize(len, 0.0);
    Ok(v)
}

#[inline]
fn inner_product(s: &[f32], taps: &[f32]) -> f32 {
    let mut acc = [0.0f32; 8];
    for (sc, tc) in s.chunks_exact(8).zip(taps.chunks_exact(8)) {
        for l in 0..8 {
            acc[l] += sc[l] * tc[l];
        }
    }
    acc.iter().sum()
}

#[inline]
fn inner_product_ip(s: &[f32], t0: &[f32], t1: &[f32], x: f32) -> f32 {
    let sum0 = inner_product(s, t0);
    let sum1 = inner_product(s, t1);
    (sum1 - sum0) * x + sum0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Copy,
    Full,
    Interpolated,
}

/// Immutable filter bank.
#[derive(Debug, Clone)]
struct FilterBank {
    taps: Vec<f32>,
    n_taps: usize,
    n_phases: usize,
    oversample: usize,
}

impl FilterBank {
    #[inline]
    fn row(&self, row: usize) -> &[f32] {
        &self.taps[row * self.n_taps..(row + 1) * self.n_taps]
    }
}

/// Rate ratio and phase, rebuilt by `update_rate`.
#[derive(Debug, Clone, Copy)]
struct RateState {
    rate: f64,
    in_rate: u32,
    out_rate: u32,
    inc: usize,
    frac: u32,
    phase: u32,
    path: Path,
}

/// Resamples `src[..ilen]` starting at `ioffs` into `dst[ooffs..olen]`.
///
/// On return `in_len` is the next unread input index and `out_len` the next
/// unwritten output index.
#[allow(clippy::too_many_arguments)]
fn run<S: AsRef<[f32]>>(
    bank: &FilterBank,
    state: &mut RateState,
    channels: usize,
    src: &[S],
    ioffs: usize,
    in_len: &mut usize,
    dst: &mut [&mut [f32]],
    ooffs: usize,
    out_len: &mut usize,
) {
    let n_taps = bank.n_taps;
    let ilen = *in_len;
    let olen = *out_len;
    let mut index = ioffs;
    let mut o = ooffs;

    match state.path {
        Path::Copy => {
            let centre = n_taps / 2 - 1;
            if o < olen && index + n_taps <= ilen {
                let n = (olen - o).min(ilen - (index + n_taps) + 1);
                for (s, d) in src.iter().zip(dst.iter_mut()).take(channels) {
                    d[o..o + n].copy_from_slice(&s.as_ref()[index + centre..index + centre + n]);
                }
                index += n;
                o += n;
            }
        }
        Path::Full | Path::Interpolated => {
            let mut phase = state.phase;
            let out_rate = state.out_rate;
            let scale = bank.n_phases as f64 / f64::from(out_rate);
            for (s, d) in src.iter().zip(dst.iter_mut()).take(channels) {
                let s = s.as_ref();
                index = ioffs;
                phase = state.phase;
                o = ooffs;
                while o < olen && index + n_taps <= ilen {
                    let window = &s[index..index + n_taps];
                    d[o] = if state.path == Path::Full {
                        inner_product(window, bank.row(phase as usize * bank.oversample))
                    } else {
                        let ph = f64::from(phase) * scale;
                        let row = ph as usize;
                        inner_product_ip(window, bank.row(row), bank.row(row + 1), (ph - row as f64) as f32)
                    };
                    index += state.inc;
                    phase += state.frac;
                    if phase >= out_rate {
                        phase -= out_rate;
                        index += 1;
                    }
                    o += 1;
                }
            }
            state.phase = phase;
        }
    }
    *in_len = index;
    *out_len = o;
}

/// Polyphase FIR resampler.
///
/// See the [module docs](super) for the streaming contract.
#[derive(Debug, Clone)]
pub struct NativeResampler {
    channels: u32,
    in_rate: u32,
    out_rate: u32,
    quality: u32,
    bank: FilterBank,
    state: RateState,
    history: Vec<Vec<f32>>,
    hist: usize,
}

impl NativeResampler {
    pub(super) fn new(config: &ResampleConfig) -> Result<Self, ResampleError> {
        let quality = config.quality.min(QUALITY_COUNT - 1);
        let (q_taps, q_cutoff) = QUALITY_TABLE[quality as usize];

        let g = gcd(config.in_rate, config.out_rate);
        let in_rate = config.in_rate / g;
        let out_rate = config.out_rate / g;

        // downsampling lowers the cutoff and lengthens the filter to match
        let cutoff = (q_cutoff * f64::from(out_rate) / f64::from(in_rate)).min(q_cutoff);
        let stretch = if cutoff < q_cutoff { q_cutoff / cutoff } else { 1.0 };
        let n_taps = libm::ceil(f64::from(q_taps) * stretch) as usize;
        let n_taps = n_taps.div_ceil(8).saturating_mul(8).min(MAX_TAPS);

        let oversample = (MIN_PHASES - 1 + out_rate) / out_rate;
        let n_phases = (out_rate * oversample) as usize;

        let filter_len = (n_phases + 1).saturating_mul(n_taps);
        let mut taps = alloc_zeroed(filter_len)?;
        build_filter(&mut taps, n_taps, n_phases, cutoff);

        let mut history = Vec::new();
        history
            .try_reserve_exact(config.channels as usize)
            .map_err(|_| ResampleError::OutOfMemory {
                requested: n_taps * 2 * config.channels as usize,
            })?;
        for _ in 0..config.channels {
            history.push(alloc_zeroed(n_taps * 2)?);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "native resampler {} -> {} quality:{} n_taps:{} n_phases:{} cutoff:{}",
            config.in_rate,
            config.out_rate,
            quality,
            n_taps,
            n_phases,
            cutoff
        );

        let mut r = Self {
            channels: config.channels,
            in_rate: config.in_rate,
            out_rate: config.out_rate,
            quality,
            bank: FilterBank {
                taps,
                n_taps,
                n_phases,
                oversample: oversample as usize,
            },
            state: RateState {
                rate: 0.0,
                in_rate,
                out_rate,
                inc: 0,
                frac: 0,
                phase: 0,
                path: Path::Full,
            },
            history,
            hist: 0,
        };
        r.update_rate(1.0);
        r.reset();
        Ok(r)
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

    /// Quality index after clamping.
    pub fn quality(&self) -> u32 {
        self.quality
    }

    /// Filter length.
    pub fn n_taps(&self) -> usize {
        self.bank.n_taps
    }

    /// Oversampled phase count of the filter bank.
    pub fn n_phases(&self) -> usize {
        self.bank.n_phases
    }

    /// Current phase, always below the reduced output rate.
    pub fn phase(&self) -> u32 {
        self.state.phase
    }

    /// Reduced output rate the phase counts against.
    pub fn phase_modulus(&self) -> u32 {
        self.state.out_rate
    }

    /// Filter coefficients, row after row.
    pub fn taps(&self) -> &[f32] {
        &self.bank.taps
    }

    /// Group delay in input frames.
    pub fn delay(&self) -> usize {
        self.bank.n_taps / 2
    }

    /// Clears history and phase. The history is primed with
    /// `n_taps / 2 - 1` zeros so output sample `k` lines up with input time
    /// `k * in_rate / out_rate`.
    pub fn reset(&mut self) {
        for h in &mut self.history {
            h.fill(0.0);
        }
        self.hist = self.bank.n_taps / 2 - 1;
        self.state.phase = 0;
    }

    /// Applies a playback rate multiplier. The effective input rate becomes
    /// `in_rate / rate`, so `rate > 1.0` stretches the input over more
    /// output frames.
    ///
    /// Only the ratio integers and the phase change; the filter bank stays.
    /// The phase keeps its fractional position, truncated to the new
    /// modulus. Non-finite or non-positive rates are ignored.
    pub fn update_rate(&mut self, rate: f64) {
        if rate == self.state.rate || !rate.is_finite() || rate <= 0.0 {
            return;
        }
        let old_out = self.state.out_rate;
        let in_rate = ((f64::from(self.in_rate) / rate) as u32).max(1);
        let out_rate = self.out_rate;
        let g = gcd(in_rate, out_rate);
        let (in_rate, out_rate) = (in_rate / g, out_rate / g);

        let s = &mut self.state;
        s.rate = rate;
        s.phase = (u64::from(s.phase) * u64::from(out_rate) / u64::from(old_out)) as u32;
        s.in_rate = in_rate;
        s.out_rate = out_rate;
        s.inc = (in_rate / out_rate) as usize;
        s.frac = in_rate % out_rate;
        s.path = if in_rate == out_rate {
            Path::Copy
        } else if rate == 1.0 {
            Path::Full
        } else {
            Path::Interpolated
        };
    }

    /// Input frames needed to produce `out_len` frames from the current
    /// state.
    pub fn in_len(&self, out_len: usize) -> usize {
        let s = &self.state;
        let frac_part = (s.phase as usize + out_len * s.frac as usize) / s.out_rate as usize;
        frac_part + out_len * s.inc + self.bank.n_taps.saturating_sub(self.hist)
    }

    /// Converts as much of `src` into `dst` as possible.
    ///
    /// `src` and `dst` hold one slice per channel. On return `in_len` and
    /// `out_len` hold the frames consumed and produced.
    pub fn process(&mut self, src: &[&[f32]], in_len: &mut usize, dst: &mut [&mut [f32]], out_len: &mut usize) {
        let channels = self.channels as usize;
        if channels == 0 {
            *in_len = 0;
            *out_len = 0;
            return;
        }
        let Self {
            bank,
            state,
            history,
            hist: hist_ref,
            ..
        } = self;
        let n_taps = bank.n_taps;
        let hist = *hist_ref;
        let mut refill = 0;

        let (mut consumed, mut produced) = (0, 0);
        if hist > 0 {
            if hist <= n_taps {
                // top the history up to a full filter length
                refill = (*in_len).min(n_taps - 1);
                for (h, s) in history.iter_mut().zip(src) {
                    h[hist..hist + refill].copy_from_slice(&s[..refill]);
                }
                if hist + refill < n_taps {
                    *hist_ref = hist + refill;
                    *in_len = refill;
                    *out_len = 0;
                    return;
                }
            }
            consumed = hist + refill;
            produced = *out_len;
            run(bank, state, channels, history.as_slice(), 0, &mut consumed, dst, 0, &mut produced);
        }

        let remain = if consumed >= hist {
            let skip = consumed - hist;
            let mut index = *in_len;
            run(bank, state, channels, src, skip, &mut index, dst, produced, out_len);

            let left = *in_len - index;
            if left > 0 && left <= n_taps {
                for (h, s) in history.iter_mut().zip(src) {
                    h[..left].copy_from_slice(&s[index..index + left]);
                }
                left
            } else {
                *in_len = index;
                0
            }
        } else {
            *out_len = produced;
            let mut left = hist - consumed;
            if refill > 0 && *in_len < n_taps {
                // the short input already went into the history
                left += refill;
            } else {
                *in_len = 0;
            }
            if left > 0 {
                for h in history.iter_mut() {
                    h.copy_within(consumed..consumed + left, 0);
                }
            }
            left
        };
        *hist_ref = remain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resample::DEFAULT_QUALITY;

    fn make(in_rate: u32, out_rate: u32) -> NativeResampler {
        NativeResampler::new(&ResampleConfig::new(1, in_rate, out_rate)).unwrap()
    }

    fn run_all(r: &mut NativeResampler, input: &[f32], chunk: usize) -> Vec<f32> {
        let mut out = Vec::new();
        let mut buf = vec![0.0f32; 4096];
        let mut pos = 0;
        while pos < input.len() {
            let end = (pos + chunk).min(input.len());
            let mut in_len = end - pos;
            let mut out_len = buf.len();
            r.process(&[&input[pos..end]], &mut in_len, &mut [&mut buf], &mut out_len);
            out.extend_from_slice(&buf[..out_len]);
            pos += in_len;
            if in_len == 0 && out_len == 0 {
                break;
            }
        }
        out
    }

    #[test]
    fn zero_channels_report_no_work() {
        let mut r = NativeResampler::new(&ResampleConfig::new(0, 44100, 48000)).unwrap();
        let (mut in_len, mut out_len) = (64, 64);
        r.process(&[], &mut in_len, &mut [], &mut out_len);
        assert_eq!((in_len, out_len), (0, 0));
    }

    #[test]
    fn default_quality_geometry() {
        let r = make(44100, 48000);
        assert_eq!(r.quality(), DEFAULT_QUALITY);
        assert_eq!(r.n_taps(), 48);
        assert_eq!(r.delay(), 24);
        // 160 reduced output phases, oversampled to at least 256
        assert_eq!(r.n_phases(), 320);
        assert_eq!(r.taps().len(), 321 * 48);
    }

    #[test]
    fn downsampling_lengthens_filter() {
        let r = make(48000, 44100);
        assert!(r.n_taps() > 48);
        assert_eq!(r.n_taps() % 8, 0);
    }

    #[test]
    fn quality_is_clamped() {
        let r = NativeResampler::new(&ResampleConfig::new(1, 44100, 48000).with_quality(99)).unwrap();
        assert_eq!(r.quality(), QUALITY_COUNT - 1);
    }

    #[test]
    fn filter_is_reproducible() {
        let a = make(44100, 48000);
        let b = make(44100, 48000);
        assert_eq!(a.taps(), b.taps());
    }

    #[test]
    fn rows_mirror_each_other() {
        let r = make(44100, 48000);
        let n = r.n_taps();
        let phases = r.n_phases();
        let taps = r.taps();
        for k in 0..n {
            assert_eq!(taps[k], taps[phases * n + (n - 1 - k)]);
        }
    }

    #[test]
    fn unity_gain_at_dc() {
        let mut r = make(44100, 48000);
        let input = vec![0.5f32; 4000];
        let out = run_all(&mut r, &input, 512);
        for &v in &out[100..out.len() - 100] {
            assert!((v - 0.5).abs() < 0.005, "{v}");
        }
    }

    #[test]
    fn short_input_goes_to_history() {
        let mut r = make(44100, 48000);
        let input = [0.1f32; 10];
        let mut out = [0.0f32; 64];
        let mut in_len = input.len();
        let mut out_len = out.len();
        r.process(&[&input], &mut in_len, &mut [&mut out], &mut out_len);
        assert_eq!(in_len, 10);
        assert_eq!(out_len, 0);
    }

    #[test]
    fn phase_stays_below_modulus() {
        let mut r = make(44100, 48000);
        let input: Vec<f32> = (0..10_000).map(|i| (i as f32 * 0.01).sin()).collect();
        let mut pos = 0;
        let mut buf = vec![0.0f32; 333];
        while pos < input.len() {
            let mut in_len = (input.len() - pos).min(777);
            let mut out_len = buf.len();
            r.process(&[&input[pos..pos + in_len]], &mut in_len, &mut [&mut buf], &mut out_len);
            assert!(r.phase() < r.phase_modulus());
            pos += in_len;
        }
    }

    #[test]
    fn equal_rates_copy_without_shift() {
        let mut r = make(48000, 48000);
        let input: Vec<f32> = (0..1000).map(|i| i as f32).collect();
        let out = run_all(&mut r, &input, 1000);
        assert_eq!(out.len(), 1000 - r.delay());
        assert_eq!(&out[..], &input[..out.len()]);
    }

    #[test]
    fn update_rate_keeps_fractional_phase() {
        let mut r = make(44100, 48000);
        let input = vec![0.0f32; 1001];
        let _ = run_all(&mut r, &input, 1001);
        let before = f64::from(r.phase()) / f64::from(r.phase_modulus());

        r.update_rate(1.01);
        let after = f64::from(r.phase()) / f64::from(r.phase_modulus());
        assert!(after <= before);
        assert!(before - after < 1.0 / f64::from(r.phase_modulus()));
    }

    #[test]
    fn higher_rate_needs_less_input() {
        let mut r = make(48000, 48000);
        let base = r.in_len(1024);
        r.update_rate(1.1);
        assert!(r.in_len(1024) < base);
        r.update_rate(1.0);
        assert_eq!(r.in_len(1024), base);
    }

    #[test]
    fn ignores_bad_rates() {
        let mut r = make(44100, 48000);
        let before = r.in_len(256);
        r.update_rate(0.0);
        r.update_rate(f64::NAN);
        assert_eq!(r.in_len(256), before);
    }
}
