//! Channel up- and downmixing between speaker layouts.
//!
//! [`ChannelMix`] holds a gain matrix with one row per destination channel
//! and one column per source channel. Positions present on both sides pass
//! at unity. A source position missing from the destination folds into its
//! nearest neighbours: center into front left and right, sides into rears
//! or fronts, rears into sides or fronts. LFE is dropped when the
//! destination has none. Anything still unrouted goes to a mono
//! destination if there is one, or pairs in order with unused
//! destination channels.
//!
//! When a row sums above 1 the whole matrix is scaled down so that no
//! destination channel can clip from summing full-scale sources.

use core::f32::consts::FRAC_1_SQRT_2;
use core::fmt;

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

use crate::MAX_CHANNELS;
use crate::channel::ChannelPosition;

/// Errors from channel mix construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMixError {
    /// One of the layouts has no channels.
    NoChannels,
    /// Channel count above [`MAX_CHANNELS`].
    TooManyChannels(u32),
}

impl fmt::Display for ChannelMixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelMixError::NoChannels => write!(f, "channel mix needs at least one channel"),
            ChannelMixError::TooManyChannels(n) => write!(f, "too many channels: {n}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ChannelMixError {}

/// Fallback targets of a source position, tried in order. The first entry
/// with at least one position in the destination layout wins and every
/// matching position receives the gain.
type Folds = &'static [(&'static [ChannelPosition], f32)];

fn folds(pos: ChannelPosition) -> Folds {
    use ChannelPosition::*;
    match pos {
        Mono => &[(&[FL, FR], 1.0), (&[FC], 1.0)],
        FL | FLC => &[(&[FL], 1.0), (&[FC], 1.0)],
        FR | FRC => &[(&[FR], 1.0), (&[FC], 1.0)],
        FC => &[(&[FL, FR], FRAC_1_SQRT_2)],
        SL => &[(&[RL], 1.0), (&[FL], FRAC_1_SQRT_2)],
        SR => &[(&[RR], 1.0), (&[FR], FRAC_1_SQRT_2)],
        RL => &[(&[SL], 1.0), (&[FL], FRAC_1_SQRT_2)],
        RR => &[(&[SR], 1.0), (&[FR], FRAC_1_SQRT_2)],
        RC => &[
            (&[RL, RR], FRAC_1_SQRT_2),
            (&[SL, SR], FRAC_1_SQRT_2),
            (&[FL, FR], 0.5),
        ],
        TFL => &[(&[FL], FRAC_1_SQRT_2)],
        TFR => &[(&[FR], FRAC_1_SQRT_2)],
        TFC => &[(&[FC], FRAC_1_SQRT_2), (&[FL, FR], 0.5)],
        TRL => &[(&[RL], FRAC_1_SQRT_2), (&[SL], FRAC_1_SQRT_2), (&[FL], 0.5)],
        TRR => &[(&[RR], FRAC_1_SQRT_2), (&[SR], FRAC_1_SQRT_2), (&[FR], 0.5)],
        TC | TRC => &[(&[FL, FR], 0.5)],
        LFE | Unknown | Aux(_) => &[],
    }
}

/// Positions used for mixing: layouts with unknown channels fall back to
/// the default layout of their size.
fn effective_layout(positions: &[ChannelPosition]) -> Vec<ChannelPosition> {
    if positions.contains(&ChannelPosition::Unknown) {
        ChannelPosition::default_layout(positions.len())
    } else {
        positions.to_vec()
    }
}

/// A gain matrix between two channel layouts.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMix {
    n_src: usize,
    n_dst: usize,
    /// Row-major, `n_dst` rows of `n_src` gains.
    matrix: Vec<f32>,
    identity: bool,
}

impl ChannelMix {
    /// Builds the matrix from `src_positions` to `dst_positions`.
    ///
    /// # Errors
    ///
    /// [`ChannelMixError::NoChannels`] for an empty layout and
    /// [`ChannelMixError::TooManyChannels`] above [`MAX_CHANNELS`].
    pub fn new(src_positions: &[ChannelPosition], dst_positions: &[ChannelPosition]) -> Result<Self, ChannelMixError> {
        let (n_src, n_dst) = (src_positions.len(), dst_positions.len());
        if n_src == 0 || n_dst == 0 {
            return Err(ChannelMixError::NoChannels);
        }
        if n_src.max(n_dst) > MAX_CHANNELS {
            return Err(ChannelMixError::TooManyChannels(n_src.max(n_dst) as u32));
        }
        let src = effective_layout(src_positions);
        let dst = effective_layout(dst_positions);

        let mut matrix = vec![0.0f32; n_dst * n_src];
        let mut routed = vec![false; n_src];
        let mut taken = vec![false; n_dst];

        // equal positions, each destination taken once
        for (s, pos) in src.iter().enumerate() {
            if let Some(d) = (0..n_dst).find(|&d| !taken[d] && dst[d] == *pos) {
                matrix[d * n_src + s] = 1.0;
                taken[d] = true;
                routed[s] = true;
            }
        }
        for (s, &pos) in src.iter().enumerate() {
            if routed[s] {
                continue;
            }
            for &(targets, gain) in folds(pos) {
                let hits: Vec<usize> = (0..n_dst).filter(|&d| targets.contains(&dst[d])).collect();
                if !hits.is_empty() {
                    for d in hits {
                        matrix[d * n_src + s] += gain;
                    }
                    routed[s] = true;
                    break;
                }
            }
        }
        let mono = dst.iter().position(|p| *p == ChannelPosition::Mono);
        for (s, &pos) in src.iter().enumerate() {
            if routed[s] || pos == ChannelPosition::LFE {
                continue;
            }
            let target = mono.or_else(|| (0..n_dst).find(|&d| !taken[d]));
            if let Some(d) = target {
                matrix[d * n_src + s] += 1.0;
                taken[d] = true;
            }
        }

        let max_sum = matrix.chunks_exact(n_src).map(|row| row.iter().sum::<f32>()).fold(0.0f32, f32::max);
        if max_sum > 1.0 {
            for gain in &mut matrix {
                *gain /= max_sum;
            }
        }
        let identity = n_src == n_dst
            && matrix
                .chunks_exact(n_src)
                .enumerate()
                .all(|(d, row)| row.iter().enumerate().all(|(s, &g)| g == if s == d { 1.0 } else { 0.0 }));

        #[cfg(feature = "tracing")]
        tracing::debug!("channel mix {:?} -> {:?} identity:{}", src, dst, identity);

        Ok(Self {
            n_src,
            n_dst,
            matrix,
            identity,
        })
    }

    /// Source channel count.
    pub fn src_channels(&self) -> usize {
        self.n_src
    }

    /// Destination channel count.
    pub fn dst_channels(&self) -> usize {
        self.n_dst
    }

    /// Gain from source channel `src` into destination channel `dst`.
    pub fn gain(&self, dst: usize, src: usize) -> f32 {
        if dst < self.n_dst && src < self.n_src {
            self.matrix[dst * self.n_src + src]
        } else {
            0.0
        }
    }

    /// Returns `true` when every channel passes unchanged.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Mixes `n` frames of planar float. `src` holds one slice per source
    /// channel and `dst` one per destination channel; extra slices are
    /// ignored and short slices bound the frame count.
    pub fn process(&self, dst: &mut [&mut [f32]], src: &[&[f32]], n: usize) {
        for (row, out) in self.matrix.chunks_exact(self.n_src).zip(dst.iter_mut()) {
            let len = n.min(out.len());
            let out = &mut out[..len];
            out.fill(0.0);
            for (&gain, input) in row.iter().zip(src) {
                if gain == 0.0 {
                    continue;
                }
                if gain == 1.0 {
                    for (o, i) in out.iter_mut().zip(input.iter()) {
                        *o += *i;
                    }
                } else {
                    for (o, i) in out.iter_mut().zip(input.iter()) {
                        *o += gain * *i;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ChannelPosition::*;
    use super::*;

    fn layout(n: usize) -> Vec<ChannelPosition> {
        ChannelPosition::default_layout(n)
    }

    #[test]
    fn same_layout_is_identity() {
        let mix = ChannelMix::new(&layout(6), &layout(6)).unwrap();
        assert!(mix.is_identity());
        let swapped = ChannelMix::new(&[FR, FL], &[FL, FR]).unwrap();
        assert!(!swapped.is_identity());
        assert_eq!(swapped.gain(0, 1), 1.0);
        assert_eq!(swapped.gain(1, 0), 1.0);
    }

    #[test]
    fn mono_to_stereo_duplicates() {
        let mix = ChannelMix::new(&layout(1), &layout(2)).unwrap();
        let src = [0.5f32, -0.25];
        let mut left = [0.0f32; 2];
        let mut right = [0.0f32; 2];
        mix.process(&mut [&mut left, &mut right], &[&src], 2);
        assert_eq!(left, src);
        assert_eq!(right, src);
    }

    #[test]
    fn stereo_to_mono_averages() {
        let mix = ChannelMix::new(&layout(2), &layout(1)).unwrap();
        assert_eq!(mix.gain(0, 0), 0.5);
        assert_eq!(mix.gain(0, 1), 0.5);
        let mut out = [0.0f32; 2];
        mix.process(&mut [&mut out], &[&[1.0, 0.5], &[0.0, -0.5]], 2);
        assert_eq!(out, [0.5, 0.0]);
    }

    #[test]
    fn surround_downmix_stays_in_range() {
        let mix = ChannelMix::new(&layout(6), &layout(2)).unwrap();
        // LFE is dropped, center and sides fold into the fronts
        assert_eq!(mix.gain(0, 3), 0.0);
        assert!(mix.gain(0, 2) > 0.0 && mix.gain(1, 2) > 0.0);
        assert!(mix.gain(0, 4) > 0.0 && mix.gain(1, 4) == 0.0);
        for d in 0..2 {
            let sum: f32 = (0..6).map(|s| mix.gain(d, s)).sum();
            assert!(sum <= 1.0 + 1e-6, "row {d} sums to {sum}");
        }
    }

    #[test]
    fn quad_to_surround_moves_rears_to_sides() {
        let mix = ChannelMix::new(&[FL, FR, RL, RR], &[FL, FR, FC, LFE, SL, SR]).unwrap();
        assert_eq!(mix.gain(4, 2), 1.0);
        assert_eq!(mix.gain(5, 3), 1.0);
        assert_eq!(mix.gain(2, 0), 0.0);
    }

    #[test]
    fn unknown_positions_use_default_layout() {
        let mix = ChannelMix::new(&[Unknown, Unknown], &[Mono]).unwrap();
        assert_eq!(mix.gain(0, 0), 0.5);
        assert_eq!(mix.gain(0, 1), 0.5);
    }

    #[test]
    fn aux_channels_pair_in_order() {
        let mix = ChannelMix::new(&[Aux(0), Aux(1), Aux(2)], &[Aux(2), Aux(7)]).unwrap();
        assert_eq!(mix.gain(0, 2), 1.0);
        assert_eq!(mix.gain(1, 0), 1.0);
        assert_eq!(mix.gain(1, 1), 0.0);
    }

    #[test]
    fn empty_layouts_are_rejected() {
        assert_eq!(ChannelMix::new(&[], &[FL]), Err(ChannelMixError::NoChannels));
        let wide = layout(MAX_CHANNELS + 1);
        assert_eq!(
            ChannelMix::new(&wide, &[FL]),
            Err(ChannelMixError::TooManyChannels(MAX_CHANNELS as u32 + 1))
        );
    }
}
