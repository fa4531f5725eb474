//! Sine tone generator.

use std::f64::consts::TAU;

use cauce_dsp::{CpuFlags, SampleFormat};

use crate::error::{NodeError, ProcessError};
use crate::id::Direction;
use crate::implementation::{Command, Completion, NodeImpl, Param, ParamId, ProcessContext, ProcessStatus, Prop};
use crate::port::{AudioInfo, Buffer, DataFlags};

use super::convert::set_chunks;
use super::{ConvertStage, check_port, enum_formats, frames_room};

/// Sine generator with one output port in any sample format.
///
/// Meant to be added as a driver: each quantum it produces the number of
/// frames at its port rate that covers the graph clock's quantum, carrying
/// the remainder over so no drift builds up.
#[derive(Debug)]
pub struct ToneSource {
    frequency: f64,
    volume: f32,
    mute: bool,
    phase: f64,
    cpu_flags: CpuFlags,
    format: Option<AudioInfo>,
    stage: Option<ConvertStage>,
    scratch: Option<Buffer>,
    accum: u64,
    channels: u32,
}

impl ToneSource {
    /// A tone of `frequency` Hz at linear `volume`, suggesting `channels`
    /// channels when formats are enumerated.
    pub fn new(frequency: f64, volume: f32, channels: u32) -> Self {
        Self {
            frequency,
            volume,
            mute: false,
            phase: 0.0,
            cpu_flags: CpuFlags::NONE,
            format: None,
            stage: None,
            scratch: None,
            accum: 0,
            channels,
        }
    }

    /// Uses kernels for `cpu_flags` when converting to the port format.
    pub fn with_cpu_flags(mut self, cpu_flags: CpuFlags) -> Self {
        self.cpu_flags = cpu_flags;
        self
    }

    fn float_info(format: &AudioInfo) -> AudioInfo {
        AudioInfo::new(SampleFormat::F32P, format.rate, format.channels).with_positions(format.positions.clone())
    }

    /// Frames to produce this quantum at the port rate.
    fn frames_for(&mut self, rate: u32, duration: u64, port_rate: u32) -> usize {
        if rate == 0 {
            return duration as usize;
        }
        self.accum += duration * u64::from(port_rate);
        let n = self.accum / u64::from(rate);
        self.accum %= u64::from(rate);
        n as usize
    }
}

/// Writes `n` frames of a sine into every block of `scratch`.
fn render(phase: &mut f64, step: f64, gain: f32, scratch: &mut Buffer, n: usize) {
    for i in 0..n {
        let v = (phase.sin() as f32 * gain).to_le_bytes();
        for data in &mut scratch.datas {
            data.memory[i * 4..i * 4 + 4].copy_from_slice(&v);
        }
        *phase += step;
        if *phase >= TAU {
            *phase -= TAU;
        }
    }
    set_chunks(&mut scratch.datas, n, 4);
}

impl NodeImpl for ToneSource {
    fn name(&self) -> &str {
        "tone"
    }

    fn port_count(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => 0,
            Direction::Output => 1,
        }
    }

    fn send_command(&mut self, command: Command) -> Result<Completion, NodeError> {
        match command {
            Command::Start if self.stage.is_none() => return Err(NodeError::NoFormat),
            Command::Flush | Command::Suspend => {
                self.phase = 0.0;
                self.accum = 0;
            }
            _ => {}
        }
        Ok(Completion::Done)
    }

    fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, NodeError> {
        match id {
            ParamId::EnumFormat => Ok(enum_formats(Direction::Output, 48000, self.channels, start, num)),
            ParamId::Format => Ok(self
                .format
                .clone()
                .map(|f| Param::Format(Direction::Output, f))
                .into_iter()
                .skip(start as usize)
                .take(num as usize)
                .collect()),
            ParamId::Props => Ok(vec![Param::Props(vec![
                Prop::Frequency(self.frequency),
                Prop::Volume(self.volume),
                Prop::Mute(self.mute),
            ])]
            .into_iter()
            .skip(start as usize)
            .take(num as usize)
            .collect()),
        }
    }

    fn set_param(&mut self, id: ParamId, _flags: u32, param: Option<&Param>) -> Result<Completion, NodeError> {
        match (id, param) {
            (ParamId::Props, Some(Param::Props(props))) => {
                for prop in props {
                    match *prop {
                        Prop::Frequency(f) if f.is_finite() && f > 0.0 => self.frequency = f,
                        Prop::Frequency(f) => {
                            return Err(NodeError::InvalidArgument(format!("frequency {f}")));
                        }
                        Prop::Volume(v) => self.volume = v,
                        Prop::Mute(m) => self.mute = m,
                        _ => {}
                    }
                }
                Ok(Completion::Done)
            }
            _ => Err(NodeError::NotSupported),
        }
    }

    fn port_set_format(
        &mut self,
        direction: Direction,
        port_id: u32,
        format: Option<&AudioInfo>,
    ) -> Result<Completion, NodeError> {
        check_port(direction, port_id, 0, 1)?;
        self.stage = None;
        self.scratch = None;
        self.format = None;
        if let Some(format) = format {
            self.stage = Some(ConvertStage::new(&Self::float_info(format), format, self.cpu_flags)?);
            self.format = Some(format.clone());
        }
        Ok(Completion::Done)
    }

    fn port_use_buffers(&mut self, direction: Direction, port_id: u32, buffers: &[Buffer]) -> Result<(), NodeError> {
        check_port(direction, port_id, 0, 1)?;
        self.scratch = None;
        let (Some(format), Some(first)) = (&self.format, buffers.first()) else {
            return Ok(());
        };
        let frames = frames_room(first, format.stride());
        self.scratch = Some(Buffer::alloc(0, &Self::float_info(format), frames, DataFlags::READWRITE));
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessStatus, ProcessError> {
        let clock = ctx.clock;
        let Some(output) = ctx.outputs.first_mut() else {
            return Err(ProcessError::NotConfigured);
        };
        if output.status.contains(ProcessStatus::HAVE_DATA) {
            return Ok(ProcessStatus::HAVE_DATA);
        }
        let Some(port_rate) = self.format.as_ref().map(|f| f.rate) else {
            return Err(ProcessError::NotConfigured);
        };
        let Some(out_buf) = output.buffer.as_mut() else {
            // pool ran dry: downstream is behind
            return Ok(ProcessStatus::NEED_DATA);
        };
        let frames = self.frames_for(clock.rate, clock.duration, port_rate);
        let (Some(scratch), Some(stage)) = (self.scratch.as_mut(), self.stage.as_ref()) else {
            return Err(ProcessError::NotConfigured);
        };

        let n = frames
            .min(frames_room(out_buf, stage.dst_stride()))
            .min(frames_room(scratch, 4));
        let step = TAU * self.frequency / f64::from(port_rate.max(1));
        let gain = if self.mute { 0.0 } else { self.volume };
        render(&mut self.phase, step, gain, scratch, n);
        stage.run(&mut out_buf.datas, &scratch.datas, 0, n);

        output.status = ProcessStatus::HAVE_DATA;
        Ok(ProcessStatus::HAVE_DATA)
    }
}
