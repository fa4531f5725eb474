//! Rate conversion on planar float streams.

use cauce_dsp::{MAX_CHANNELS, ResampleConfig, Resampler, SampleFormat, f32_from_bytes, f32_to_bytes};

use crate::context::EngineConfig;
use crate::error::{NodeError, ProcessError};
use crate::id::Direction;
use crate::implementation::{Command, Completion, NodeImpl, Param, ParamId, ProcessContext, ProcessStatus, Prop};
use crate::port::{AudioInfo, Data};

use super::check_port;
use super::convert::set_chunks;

const F32_STRIDE: usize = 4;

/// A [`Resampler`] working on `f32p` data blocks, with the decode and
/// encode scratch it needs preallocated.
#[derive(Debug, Clone)]
pub struct ResampleStage {
    resampler: Resampler,
    scratch_in: Vec<Vec<f32>>,
    scratch_out: Vec<Vec<f32>>,
}

impl ResampleStage {
    /// Builds a resampler able to take up to `max_frames` input frames per
    /// call.
    ///
    /// # Errors
    ///
    /// The resampler's construction error, as a [`NodeError`].
    pub fn new(config: &ResampleConfig, max_frames: usize) -> Result<Self, NodeError> {
        let resampler = Resampler::new(config)?;
        let channels = config.channels as usize;
        let out_frames = max_frames
            .saturating_mul(config.out_rate as usize)
            .div_ceil(config.in_rate.max(1) as usize)
            .max(max_frames)
            + 1;
        tracing::debug!(
            "resample stage {} -> {} channels:{} quality:{} delay:{}",
            config.in_rate,
            config.out_rate,
            config.channels,
            config.quality,
            resampler.delay()
        );
        Ok(Self {
            resampler,
            scratch_in: vec![vec![0.0; max_frames]; channels],
            scratch_out: vec![vec![0.0; out_frames]; channels],
        })
    }

    /// Latency in input frames.
    pub fn delay(&self) -> usize {
        self.resampler.delay()
    }

    /// Applies a playback rate multiplier.
    pub fn update_rate(&mut self, rate: f64) {
        self.resampler.update_rate(rate);
    }

    /// Clears the filter history.
    pub fn reset(&mut self) {
        self.resampler.reset();
    }

    /// Resamples `f32p` blocks, reading `src` from `offset` frames into its
    /// valid region and writing at most `max_out` frames to `dst`. Sets the
    /// chunks of `dst` and returns `(consumed, produced)`.
    pub fn run(&mut self, dst: &mut [Data], src: &[Data], offset: usize, max_out: usize) -> (usize, usize) {
        let start = offset * F32_STRIDE;
        let capacity = self.scratch_in.first().map_or(0, Vec::len);
        let mut in_len = src
            .iter()
            .map(|d| d.valid().len().saturating_sub(start) / F32_STRIDE)
            .min()
            .unwrap_or(0)
            .min(capacity);
        for (scratch, data) in self.scratch_in.iter_mut().zip(src) {
            let valid = data.valid();
            f32_from_bytes(&valid[start.min(valid.len())..], &mut scratch[..in_len]);
        }

        let room = dst.iter().map(|d| d.max_size() / F32_STRIDE).min().unwrap_or(0);
        let mut out_len = self
            .scratch_out
            .first()
            .map_or(0, Vec::len)
            .min(room)
            .min(max_out);

        let mut srcs: [&[f32]; MAX_CHANNELS] = [&[][..]; MAX_CHANNELS];
        for (slot, scratch) in srcs.iter_mut().zip(&self.scratch_in) {
            *slot = &scratch[..in_len];
        }
        let mut dsts: [&mut [f32]; MAX_CHANNELS] = std::array::from_fn(|_| Default::default());
        for (slot, scratch) in dsts.iter_mut().zip(self.scratch_out.iter_mut()) {
            *slot = &mut scratch[..out_len];
        }
        let channels = self.scratch_in.len();
        self.resampler
            .process(&srcs[..channels], &mut in_len, &mut dsts[..channels], &mut out_len);

        for (data, scratch) in dst.iter_mut().zip(&self.scratch_out) {
            f32_to_bytes(&scratch[..out_len], &mut data.memory);
        }
        set_chunks(dst, out_len, F32_STRIDE);
        (in_len, out_len)
    }
}

/// Resampler node: one `f32p` input and one `f32p` output with the same
/// channel count and any rates.
///
/// Properties: [`Prop::Rate`] and [`Prop::Quality`].
#[derive(Debug)]
pub struct Resample {
    config: EngineConfig,
    quality: u32,
    rate: f64,
    input: Option<AudioInfo>,
    output: Option<AudioInfo>,
    stage: Option<ResampleStage>,
    in_offset: usize,
}

impl Resample {
    /// A resampler using the quality and method of `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            quality: config.resample_quality,
            config: config.clone(),
            rate: 1.0,
            input: None,
            output: None,
            stage: None,
            in_offset: 0,
        }
    }

    /// Latency in input frames, 0 until both formats are set.
    pub fn delay(&self) -> usize {
        self.stage.as_ref().map_or(0, ResampleStage::delay)
    }

    fn configure(&mut self) -> Result<(), NodeError> {
        self.stage = None;
        self.in_offset = 0;
        let (Some(input), Some(output)) = (&self.input, &self.output) else {
            return Ok(());
        };
        if input.channels != output.channels {
            return Err(NodeError::UnsupportedFormat(format!(
                "channel mixing {} -> {} channels",
                input.channels, output.channels
            )));
        }
        let config = self
            .config
            .resample_config(input.channels, input.rate, output.rate)
            .with_quality(self.quality);
        let mut stage = ResampleStage::new(&config, self.config.max_quantum as usize)?;
        stage.update_rate(self.rate);
        self.stage = Some(stage);
        Ok(())
    }

    fn apply_props(&mut self, props: &[Prop]) -> Result<(), NodeError> {
        let mut rebuild = false;
        for prop in props {
            match *prop {
                Prop::Rate(rate) => {
                    self.rate = rate;
                    if let Some(stage) = &mut self.stage {
                        stage.update_rate(rate);
                    }
                }
                Prop::Quality(quality) if quality != self.quality => {
                    self.quality = quality;
                    rebuild = true;
                }
                _ => {}
            }
        }
        if rebuild { self.configure() } else { Ok(()) }
    }
}

impl NodeImpl for Resample {
    fn name(&self) -> &str {
        "resample"
    }

    fn port_count(&self, _direction: Direction) -> u32 {
        1
    }

    fn send_command(&mut self, command: Command) -> Result<Completion, NodeError> {
        match command {
            Command::Start if self.stage.is_none() => return Err(NodeError::NoFormat),
            Command::Flush | Command::Suspend => {
                if let Some(stage) = &mut self.stage {
                    stage.reset();
                }
                self.in_offset = 0;
            }
            _ => {}
        }
        Ok(Completion::Done)
    }

    fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, NodeError> {
        let params: Vec<Param> = match id {
            ParamId::EnumFormat => {
                let channels = self.input.as_ref().or(self.output.as_ref()).map(|f| f.channels);
                channels
                    .into_iter()
                    .flat_map(|ch| {
                        [Direction::Input, Direction::Output].map(|dir| {
                            Param::Format(dir, AudioInfo::new(SampleFormat::F32P, self.config.rate, ch))
                        })
                    })
                    .collect()
            }
            ParamId::Format => [
                self.input.clone().map(|f| Param::Format(Direction::Input, f)),
                self.output.clone().map(|f| Param::Format(Direction::Output, f)),
            ]
            .into_iter()
            .flatten()
            .collect(),
            ParamId::Props => vec![Param::Props(vec![Prop::Rate(self.rate), Prop::Quality(self.quality)])],
        };
        Ok(params.into_iter().skip(start as usize).take(num as usize).collect())
    }

    fn set_param(&mut self, id: ParamId, _flags: u32, param: Option<&Param>) -> Result<Completion, NodeError> {
        match (id, param) {
            (ParamId::Props, Some(Param::Props(props))) => self.apply_props(props)?,
            (ParamId::Props, None) => {
                self.apply_props(&[Prop::Rate(1.0), Prop::Quality(self.config.resample_quality)])?;
            }
            _ => return Err(NodeError::NotSupported),
        }
        Ok(Completion::Done)
    }

    fn port_set_format(
        &mut self,
        direction: Direction,
        port_id: u32,
        format: Option<&AudioInfo>,
    ) -> Result<Completion, NodeError> {
        check_port(direction, port_id, 1, 1)?;
        if let Some(f) = format
            && f.format != SampleFormat::F32P
        {
            return Err(NodeError::UnsupportedFormat(format!("resample needs f32p, got {}", f.format)));
        }
        match direction {
            Direction::Input => self.input = format.cloned(),
            Direction::Output => self.output = format.cloned(),
        }
        self.configure()?;
        Ok(Completion::Done)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessStatus, ProcessError> {
        let (Some(input), Some(output)) = (ctx.inputs.first_mut(), ctx.outputs.first_mut()) else {
            return Err(ProcessError::NotConfigured);
        };
        if output.status.contains(ProcessStatus::HAVE_DATA) {
            return Ok(ProcessStatus::HAVE_DATA);
        }
        if !input.status.contains(ProcessStatus::HAVE_DATA) {
            return Ok(input.status);
        }
        let stage = self.stage.as_mut().ok_or(ProcessError::NotConfigured)?;
        let Some(in_buf) = input.buffer.as_ref() else {
            return Ok(ProcessStatus::NEED_DATA);
        };
        let Some(out_buf) = output.buffer.as_mut() else {
            return Err(ProcessError::Pipe);
        };

        let avail = super::frames_in(in_buf, F32_STRIDE).saturating_sub(self.in_offset);
        let (consumed, produced) = stage.run(&mut out_buf.datas, &in_buf.datas, self.in_offset, usize::MAX);

        let mut status = ProcessStatus::OK;
        if produced > 0 {
            output.status = ProcessStatus::HAVE_DATA;
            status |= ProcessStatus::HAVE_DATA;
        }
        if consumed >= avail {
            self.in_offset = 0;
            input.status = ProcessStatus::NEED_DATA;
            status |= ProcessStatus::NEED_DATA;
        } else {
            self.in_offset += consumed;
        }
        if status.is_ok() {
            status = ProcessStatus::NEED_DATA;
        }
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Clock;
    use crate::port::{Buffer, Chunk, DataFlags, PortIo};

    fn f32p(rate: u32, channels: u32) -> AudioInfo {
        AudioInfo::new(SampleFormat::F32P, rate, channels)
    }

    fn filled(info: &AudioInfo, frames: usize, value: f32) -> PortIo {
        let mut buf = Buffer::alloc(0, info, frames, DataFlags::READWRITE);
        for data in &mut buf.datas {
            for chunk in data.memory.chunks_exact_mut(4) {
                chunk.copy_from_slice(&value.to_le_bytes());
            }
            data.chunk = Chunk {
                offset: 0,
                size: (frames * 4) as u32,
                stride: 4,
            };
        }
        PortIo {
            status: ProcessStatus::HAVE_DATA,
            buffer: Some(buf),
        }
    }

    #[test]
    fn upsamples_a_block() {
        let config = EngineConfig::default();
        let mut node = Resample::new(&config);
        node.port_set_format(Direction::Input, 0, Some(&f32p(24000, 1))).unwrap();
        node.port_set_format(Direction::Output, 0, Some(&f32p(48000, 1))).unwrap();
        assert!(node.delay() > 0);

        let mut inputs = [filled(&f32p(24000, 1), 512, 0.25)];
        let mut outputs = [PortIo {
            status: ProcessStatus::NEED_DATA,
            buffer: Some(Buffer::alloc(0, &f32p(48000, 1), 4096, DataFlags::READWRITE)),
        }];
        let mut ctx = ProcessContext {
            inputs: &mut inputs,
            outputs: &mut outputs,
            clock: Clock::default(),
        };
        let status = node.process(&mut ctx).unwrap();
        assert!(status.contains(ProcessStatus::NEED_DATA));
        assert!(status.contains(ProcessStatus::HAVE_DATA));

        let produced = outputs[0].buffer.as_ref().unwrap().datas[0].chunk.frames();
        let expected = (512 - node.delay()) * 2;
        assert!(produced.abs_diff(expected) <= 4, "produced {produced}, expected about {expected}");
        assert_eq!(inputs[0].status, ProcessStatus::NEED_DATA);
    }

    #[test]
    fn refuses_integer_formats_and_channel_mixing() {
        let mut node = Resample::new(&EngineConfig::default());
        let err = node
            .port_set_format(Direction::Input, 0, Some(&AudioInfo::new(SampleFormat::S16, 48000, 2)))
            .unwrap_err();
        assert!(matches!(err, NodeError::UnsupportedFormat(_)));

        node.port_set_format(Direction::Input, 0, Some(&f32p(48000, 2))).unwrap();
        let err = node
            .port_set_format(Direction::Output, 0, Some(&f32p(44100, 1)))
            .unwrap_err();
        assert!(matches!(err, NodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn props_round_trip() {
        let mut node = Resample::new(&EngineConfig::default());
        node.port_set_format(Direction::Input, 0, Some(&f32p(44100, 2))).unwrap();
        node.port_set_format(Direction::Output, 0, Some(&f32p(48000, 2))).unwrap();
        let delay_before = node.delay();

        let props = Param::Props(vec![Prop::Rate(1.01), Prop::Quality(0)]);
        node.set_param(ParamId::Props, 0, Some(&props)).unwrap();
        assert_eq!(
            node.enum_params(ParamId::Props, 0, 1).unwrap(),
            vec![Param::Props(vec![Prop::Rate(1.01), Prop::Quality(0)])]
        );
        assert!(node.delay() < delay_before);

        node.set_param(ParamId::Props, 0, None).unwrap();
        assert_eq!(node.delay(), delay_before);
        assert_eq!(
            node.set_param(ParamId::Format, 0, None),
            Err(NodeError::NotSupported)
        );
    }

    #[test]
    fn start_needs_formats() {
        let mut node = Resample::new(&EngineConfig::default());
        assert_eq!(node.send_command(Command::Start), Err(NodeError::NoFormat));
        assert_eq!(node.send_command(Command::Pause), Ok(Completion::Done));
    }
}
