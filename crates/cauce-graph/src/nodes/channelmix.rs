//! Channel up- and downmixing on planar float streams.

use cauce_dsp::{ChannelMix, MAX_CHANNELS, f32_from_bytes, f32_to_bytes};

use crate::error::NodeError;
use crate::port::{AudioInfo, Data};

use super::convert::set_chunks;

const F32_STRIDE: usize = 4;

/// A [`ChannelMix`] working on `f32p` data blocks.
#[derive(Debug, Clone)]
pub struct ChannelMixStage {
    mix: ChannelMix,
    scratch_in: Vec<Vec<f32>>,
    scratch_out: Vec<Vec<f32>>,
}

impl ChannelMixStage {
    /// Builds the matrix from the layout of `src` to the layout of `dst`,
    /// with scratch for `max_frames` frames per call.
    ///
    /// # Errors
    ///
    /// [`NodeError::InvalidArgument`] when either layout is empty or too
    /// wide.
    pub fn new(src: &AudioInfo, dst: &AudioInfo, max_frames: usize) -> Result<Self, NodeError> {
        let mix = ChannelMix::new(&src.positions, &dst.positions)?;
        tracing::debug!(
            "channel mix stage {:?} -> {:?} identity:{}",
            src.positions,
            dst.positions,
            mix.is_identity()
        );
        Ok(Self {
            scratch_in: vec![vec![0.0; max_frames]; mix.src_channels()],
            scratch_out: vec![vec![0.0; max_frames]; mix.dst_channels()],
            mix,
        })
    }

    /// The gain matrix.
    pub fn mix(&self) -> &ChannelMix {
        &self.mix
    }

    /// Mixes `n` frames from the start of the valid region of `src` into
    /// `dst` and sets the chunks of `dst`. Returns the frames written.
    pub fn run(&mut self, dst: &mut [Data], src: &[Data], n: usize) -> usize {
        let capacity = self.scratch_in.first().map_or(0, Vec::len);
        let room = dst.iter().map(|d| d.max_size() / F32_STRIDE).min().unwrap_or(0);
        let n = n.min(capacity).min(room);
        for (scratch, data) in self.scratch_in.iter_mut().zip(src) {
            let got = f32_from_bytes(data.valid(), &mut scratch[..n]);
            scratch[got..n].fill(0.0);
        }

        let (n_src, n_dst) = (self.scratch_in.len(), self.scratch_out.len());
        let mut srcs: [&[f32]; MAX_CHANNELS] = [&[][..]; MAX_CHANNELS];
        for (slot, scratch) in srcs.iter_mut().zip(&self.scratch_in) {
            *slot = &scratch[..n];
        }
        let mut dsts: [&mut [f32]; MAX_CHANNELS] = std::array::from_fn(|_| Default::default());
        for (slot, scratch) in dsts.iter_mut().zip(self.scratch_out.iter_mut()) {
            *slot = &mut scratch[..n];
        }
        self.mix.process(&mut dsts[..n_dst], &srcs[..n_src], n);

        for (data, scratch) in dst.iter_mut().zip(&self.scratch_out) {
            f32_to_bytes(&scratch[..n], &mut data.memory);
        }
        set_chunks(dst, n, F32_STRIDE);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Buffer, Chunk, DataFlags};
    use cauce_dsp::SampleFormat;

    fn f32p(channels: u32) -> AudioInfo {
        AudioInfo::new(SampleFormat::F32P, 48000, channels)
    }

    fn filled(info: &AudioInfo, channels: &[&[f32]]) -> Buffer {
        let frames = channels.first().map_or(0, |c| c.len());
        let mut buf = Buffer::alloc(0, info, frames, DataFlags::READWRITE);
        for (data, samples) in buf.datas.iter_mut().zip(channels) {
            f32_to_bytes(samples, &mut data.memory);
            data.chunk = Chunk {
                offset: 0,
                size: (samples.len() * F32_STRIDE) as u32,
                stride: F32_STRIDE as u32,
            };
        }
        buf
    }

    fn samples(data: &Data) -> Vec<f32> {
        let mut out = vec![0.0; data.valid().len() / F32_STRIDE];
        f32_from_bytes(data.valid(), &mut out);
        out
    }

    #[test]
    fn stereo_downmix_writes_chunks() {
        let mut stage = ChannelMixStage::new(&f32p(2), &f32p(1), 8).unwrap();
        let src = filled(&f32p(2), &[&[1.0, 0.5, 0.0], &[0.0, 0.5, -1.0]]);
        let mut dst = Buffer::alloc(0, &f32p(1), 8, DataFlags::READWRITE);

        assert_eq!(stage.run(&mut dst.datas, &src.datas, 3), 3);
        assert_eq!(dst.datas[0].chunk.frames(), 3);
        assert_eq!(samples(&dst.datas[0]), vec![0.5, 0.5, -0.5]);
    }

    #[test]
    fn frames_are_bounded_by_scratch_and_room() {
        let mut stage = ChannelMixStage::new(&f32p(1), &f32p(2), 2).unwrap();
        let src = filled(&f32p(1), &[&[0.25, 0.5, 0.75]]);
        let mut dst = Buffer::alloc(0, &f32p(2), 4, DataFlags::READWRITE);
        assert_eq!(stage.run(&mut dst.datas, &src.datas, 3), 2);
        assert_eq!(samples(&dst.datas[1]), vec![0.25, 0.5]);
    }
}
