//! Combined format converter, channel mixer and resampler.

use cauce_dsp::SampleFormat;

use crate::context::EngineConfig;
use crate::error::{NodeError, ProcessError};
use crate::id::Direction;
use crate::implementation::{Command, Completion, NodeImpl, Param, ParamId, ProcessContext, ProcessStatus, Prop};
use crate::port::{AudioInfo, Buffer, DataFlags};

use super::{ChannelMixStage, ConvertStage, ResampleStage, check_port, enum_formats, frames_in, frames_room};

/// Conversion chain for one pair of port formats.
///
/// Input is converted to `f32p`. With equal channel counts the conversion
/// also puts the channels in the output's order; otherwise a channel mix
/// maps the input layout onto the output layout. The result is resampled
/// when the rates differ, then converted to the output format.
#[derive(Debug)]
struct Pipeline {
    in_conv: ConvertStage,
    mix: Option<(ChannelMixStage, Buffer)>,
    resample: Option<ResampleStage>,
    out_conv: ConvertStage,
    decoded: Buffer,
    resampled: Buffer,
    capacity: usize,
}

impl Pipeline {
    fn new(input: &AudioInfo, output: &AudioInfo, config: &EngineConfig, quality: u32) -> Result<Self, NodeError> {
        let capacity = config.max_quantum as usize;
        let mixing = input.channels != output.channels;
        let decoded_positions = if mixing {
            input.positions.clone()
        } else {
            output.positions.clone()
        };
        let mid_in = AudioInfo::new(SampleFormat::F32P, input.rate, input.channels).with_positions(decoded_positions);
        let mid_mixed = AudioInfo::new(SampleFormat::F32P, input.rate, output.channels)
            .with_positions(output.positions.clone());
        let mid_out = AudioInfo::new(SampleFormat::F32P, output.rate, output.channels)
            .with_positions(output.positions.clone());

        let mix = if mixing {
            let stage = ChannelMixStage::new(&mid_in, &mid_mixed, capacity)?;
            Some((stage, Buffer::alloc(2, &mid_mixed, capacity, DataFlags::READWRITE)))
        } else {
            None
        };
        let resample = if input.rate == output.rate {
            None
        } else {
            let rc = config
                .resample_config(output.channels, input.rate, output.rate)
                .with_quality(quality);
            Some(ResampleStage::new(&rc, capacity)?)
        };
        Ok(Self {
            in_conv: ConvertStage::new(input, &mid_in, config.cpu_flags)?,
            mix,
            resample,
            out_conv: ConvertStage::new(&mid_out, output, config.cpu_flags)?,
            decoded: Buffer::alloc(0, &mid_in, capacity, DataFlags::READWRITE),
            resampled: Buffer::alloc(1, &mid_out, capacity, DataFlags::READWRITE),
            capacity,
        })
    }

    /// Converts from `offset` frames into `src`. Returns `(consumed, produced)`.
    fn run(&mut self, dst: &mut Buffer, src: &Buffer, offset: usize) -> (usize, usize) {
        let avail = frames_in(src, self.in_conv.src_stride())
            .saturating_sub(offset)
            .min(self.capacity);
        let room = frames_room(dst, self.out_conv.dst_stride());
        let n = if self.resample.is_some() { avail } else { avail.min(room) };

        self.in_conv.run(&mut self.decoded.datas, &src.datas, offset, n);
        let mixed = match &mut self.mix {
            Some((stage, mixed)) => {
                stage.run(&mut mixed.datas, &self.decoded.datas, n);
                &*mixed
            }
            None => &self.decoded,
        };
        match &mut self.resample {
            None => {
                self.out_conv.run(&mut dst.datas, &mixed.datas, 0, n);
                (n, n)
            }
            Some(resample) => {
                let (consumed, produced) = resample.run(&mut self.resampled.datas, &mixed.datas, 0, room);
                self.out_conv.run(&mut dst.datas, &self.resampled.datas, 0, produced);
                (consumed, produced)
            }
        }
    }
}

/// Audio converter node: one input and one output with any sample
/// formats, channel layouts and rates.
///
/// Properties: [`Prop::Rate`] and [`Prop::Quality`], applied to the
/// resampler when the rates differ.
#[derive(Debug)]
pub struct AudioConvert {
    config: EngineConfig,
    quality: u32,
    rate: f64,
    input: Option<AudioInfo>,
    output: Option<AudioInfo>,
    pipeline: Option<Pipeline>,
    in_offset: usize,
}

impl AudioConvert {
    /// A converter using the kernels and resampler settings of `config`.
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            quality: config.resample_quality,
            config: config.clone(),
            rate: 1.0,
            input: None,
            output: None,
            pipeline: None,
            in_offset: 0,
        }
    }

    /// Resampler latency in input frames, 0 when no resampling happens.
    pub fn delay(&self) -> usize {
        self.pipeline
            .as_ref()
            .and_then(|p| p.resample.as_ref())
            .map_or(0, ResampleStage::delay)
    }

    fn configure(&mut self) -> Result<(), NodeError> {
        self.pipeline = None;
        self.in_offset = 0;
        if let (Some(input), Some(output)) = (&self.input, &self.output) {
            let mut pipeline = Pipeline::new(input, output, &self.config, self.quality)?;
            if let Some(resample) = &mut pipeline.resample {
                resample.update_rate(self.rate);
            }
            tracing::debug!(
                "audioconvert {} -> {} mix:{} resample:{}",
                input,
                output,
                pipeline.mix.is_some(),
                pipeline.resample.is_some()
            );
            self.pipeline = Some(pipeline);
        }
        Ok(())
    }
}

impl NodeImpl for AudioConvert {
    fn name(&self) -> &str {
        "audioconvert"
    }

    fn port_count(&self, _direction: Direction) -> u32 {
        1
    }

    fn send_command(&mut self, command: Command) -> Result<Completion, NodeError> {
        match command {
            Command::Start if self.pipeline.is_none() => return Err(NodeError::NoFormat),
            Command::Flush | Command::Suspend => {
                if let Some(resample) = self.pipeline.as_mut().and_then(|p| p.resample.as_mut()) {
                    resample.reset();
                }
                self.in_offset = 0;
            }
            _ => {}
        }
        Ok(Completion::Done)
    }

    fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, NodeError> {
        match id {
            ParamId::EnumFormat => {
                let (direction, channels) = match (&self.input, &self.output) {
                    (_, Some(o)) => (Direction::Input, o.channels),
                    (Some(i), None) => (Direction::Output, i.channels),
                    (None, None) => return Ok(Vec::new()),
                };
                Ok(enum_formats(direction, self.config.rate, channels, start, num))
            }
            ParamId::Format => Ok([
                self.input.clone().map(|f| Param::Format(Direction::Input, f)),
                self.output.clone().map(|f| Param::Format(Direction::Output, f)),
            ]
            .into_iter()
            .flatten()
            .skip(start as usize)
            .take(num as usize)
            .collect()),
            ParamId::Props => Ok(vec![Param::Props(vec![Prop::Rate(self.rate), Prop::Quality(self.quality)])]
                .into_iter()
                .skip(start as usize)
                .take(num as usize)
                .collect()),
        }
    }

    fn set_param(&mut self, id: ParamId, _flags: u32, param: Option<&Param>) -> Result<Completion, NodeError> {
        let props = match (id, param) {
            (ParamId::Props, Some(Param::Props(props))) => props.clone(),
            (ParamId::Props, None) => vec![Prop::Rate(1.0), Prop::Quality(self.config.resample_quality)],
            _ => return Err(NodeError::NotSupported),
        };
        let mut rebuild = false;
        for prop in props {
            match prop {
                Prop::Rate(rate) => {
                    self.rate = rate;
                    if let Some(resample) = self.pipeline.as_mut().and_then(|p| p.resample.as_mut()) {
                        resample.update_rate(rate);
                    }
                }
                Prop::Quality(quality) if quality != self.quality => {
                    self.quality = quality;
                    rebuild = true;
                }
                _ => {}
            }
        }
        if rebuild {
            self.configure()?;
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
        let pipeline = self.pipeline.as_mut().ok_or(ProcessError::NotConfigured)?;
        let Some(in_buf) = input.buffer.as_ref() else {
            return Ok(ProcessStatus::NEED_DATA);
        };
        let Some(out_buf) = output.buffer.as_mut() else {
            return Err(ProcessError::Pipe);
        };

        let avail = frames_in(in_buf, pipeline.in_conv.src_stride()).saturating_sub(self.in_offset);
        let (consumed, produced) = pipeline.run(out_buf, in_buf, self.in_offset);

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
