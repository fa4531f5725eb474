//! Channel positions and layout matching.
//!
//! Two streams with the same channel count may still order their channels
//! differently. [`ChannelRemap`] matches positions between a source and a
//! destination layout and expresses the result as buffer indices that the
//! converter consumes, so reordering costs nothing beyond the conversion
//! itself.

#[cfg(not(feature = "std"))]
use alloc::{vec, vec::Vec};

/// Speaker position of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPosition {
    /// Position not known.
    Unknown,
    /// Single channel.
    Mono,
    /// Front left.
    FL,
    /// Front right.
    FR,
    /// Front center.
    FC,
    /// Low frequency effects.
    LFE,
    /// Side left.
    SL,
    /// Side right.
    SR,
    /// Front left of center.
    FLC,
    /// Front right of center.
    FRC,
    /// Rear center.
    RC,
    /// Rear left.
    RL,
    /// Rear right.
    RR,
    /// Top center.
    TC,
    /// Top front left.
    TFL,
    /// Top front center.
    TFC,
    /// Top front right.
    TFR,
    /// Top rear left.
    TRL,
    /// Top rear center.
    TRC,
    /// Top rear right.
    TRR,
    /// Auxiliary channel with an index.
    Aux(u32),
}

impl ChannelPosition {
    /// Default layout for `channels` channels.
    ///
    /// | channels | layout |
    /// |---|---|
    /// | 1 | MONO |
    /// | 2 | FL FR |
    /// | 3 | FL FR LFE |
    /// | 4 | FL FR RL RR |
    /// | 5 | FL FR FC RL RR |
    /// | 6 | FL FR FC LFE SL SR |
    /// | 8 | FL FR FC LFE SL SR RL RR |
    /// | other | AUX0 .. AUXn |
    pub fn default_layout(channels: usize) -> Vec<ChannelPosition> {
        use ChannelPosition::*;
        match channels {
            1 => vec![Mono],
            2 => vec![FL, FR],
            3 => vec![FL, FR, LFE],
            4 => vec![FL, FR, RL, RR],
            5 => vec![FL, FR, FC, RL, RR],
            6 => vec![FL, FR, FC, LFE, SL, SR],
            8 => vec![FL, FR, FC, LFE, SL, SR, RL, RR],
            n => (0..n as u32).map(Aux).collect(),
        }
    }
}

/// Buffer reordering that maps a source channel layout onto a destination
/// layout.
///
/// The converter processes channels in kernel order `k`. For every `k`:
///
/// - [`src`](Self::src)`[k]` is the source buffer the kernel reads,
/// - [`dst`](Self::dst)`[b]` is the kernel slot that writes destination
///   buffer `b`.
///
/// Interleaved sides have a single buffer, so only the planar side can be
/// permuted. When both sides are interleaved no reordering is possible and
/// the remap degrades to the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRemap {
    src: Vec<usize>,
    dst: Vec<usize>,
    identity: bool,
}

impl ChannelRemap {
    /// Identity mapping for `channels` channels in the given layouts.
    pub fn identity(channels: usize, src_planar: bool, dst_planar: bool) -> Self {
        let src = if src_planar { (0..channels).collect() } else { vec![0] };
        let dst = if dst_planar { (0..channels).collect() } else { vec![0] };
        Self {
            src,
            dst,
            identity: true,
        }
    }

    /// Matches `dst_positions` against `src_positions`.
    ///
    /// Each destination channel takes the first unused source channel with
    /// the same position; leftovers pair up in order. Both layouts must
    /// have the same length.
    pub fn new(
        src_positions: &[ChannelPosition],
        src_planar: bool,
        dst_positions: &[ChannelPosition],
        dst_planar: bool,
    ) -> Self {
        let n = src_positions.len().min(dst_positions.len());
        let mut used = vec![false; n];
        let mut from: Vec<Option<usize>> = vec![None; n];

        for (j, pos) in dst_positions.iter().take(n).enumerate() {
            if let Some(i) = (0..n).find(|&i| !used[i] && src_positions[i] == *pos) {
                used[i] = true;
                from[j] = Some(i);
            }
        }
        for slot in from.iter_mut().filter(|s| s.is_none()) {
            if let Some(i) = (0..n).find(|&i| !used[i]) {
                used[i] = true;
                *slot = Some(i);
            }
        }
        // `from[j]` is the source channel feeding destination channel `j`
        let from: Vec<usize> = from.into_iter().enumerate().map(|(j, f)| f.unwrap_or(j)).collect();
        let identity = from.iter().enumerate().all(|(j, &i)| i == j);

        let mut remap = Self::identity(n, src_planar, dst_planar);
        remap.identity = identity;
        match (src_planar, dst_planar) {
            (true, _) => remap.src.copy_from_slice(&from),
            (false, true) => remap.dst.copy_from_slice(&from),
            (false, false) => {
                #[cfg(feature = "tracing")]
                if !identity {
                    tracing::debug!("channel reorder between interleaved layouts is ignored");
                }
                remap.identity = true;
            }
        }
        remap
    }

    /// Source buffer index per kernel slot.
    pub fn src(&self) -> &[usize] {
        &self.src
    }

    /// Kernel slot per destination buffer.
    pub fn dst(&self) -> &[usize] {
        &self.dst
    }

    /// Returns `true` if no channel moves.
    pub fn is_identity(&self) -> bool {
        self.identity
    }
}
