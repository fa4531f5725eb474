//! Sample format conversion with channel reordering.

use cauce_dsp::{ChannelRemap, Converter, CpuFlags, MAX_CHANNELS};

use crate::error::{NodeError, ProcessError};
use crate::id::Direction;
use crate::implementation::{Command, Completion, NodeImpl, Param, ParamId, ProcessContext, ProcessStatus};
use crate::port::{AudioInfo, Buffer, Chunk, Data, DataFlags};

use super::{check_port, enum_formats, frames_in, frames_room};

/// A converter bound to two port formats, plus the channel remap between
/// their layouts.
#[derive(Debug, Clone)]
pub struct ConvertStage {
    converter: Converter,
    remap: ChannelRemap,
    src_stride: usize,
    dst_stride: usize,
}

impl ConvertStage {
    /// Builds the stage for `src -> dst`. Rates are not looked at.
    ///
    /// # Errors
    ///
    /// [`NodeError::UnsupportedFormat`] when the channel counts differ or
    /// no kernel handles the pair.
    pub fn new(src: &AudioInfo, dst: &AudioInfo, cpu_flags: CpuFlags) -> Result<Self, NodeError> {
        if src.channels != dst.channels {
            return Err(NodeError::UnsupportedFormat(format!(
                "channel mixing {} -> {} channels",
                src.channels, dst.channels
            )));
        }
        let converter = Converter::new(src.format, dst.format, src.channels, cpu_flags)?;
        let remap = ChannelRemap::new(
            &src.positions,
            src.format.is_planar(),
            &dst.positions,
            dst.format.is_planar(),
        );
        tracing::debug!(
            "convert stage {} -> {} using {} remap:{:?}/{:?}",
            src,
            dst,
            converter.name(),
            remap.src(),
            remap.dst()
        );
        Ok(Self {
            converter,
            remap,
            src_stride: src.stride(),
            dst_stride: dst.stride(),
        })
    }

    /// Returns `true` when output equals input byte for byte.
    pub fn is_identity(&self) -> bool {
        self.converter.is_passthrough() && self.remap.is_identity()
    }

    /// Bytes per frame per source block.
    pub fn src_stride(&self) -> usize {
        self.src_stride
    }

    /// Bytes per frame per destination block.
    pub fn dst_stride(&self) -> usize {
        self.dst_stride
    }

    /// Converts `n` frames. `src` and `dst` hold one slice per buffer block
    /// in port order; the remap decides which block feeds which channel.
    pub fn convert(&self, dst: &mut [&mut [u8]], src: &[&[u8]], n: usize) {
        let mut srcs: [&[u8]; MAX_CHANNELS] = [&[][..]; MAX_CHANNELS];
        for (slot, &block) in srcs.iter_mut().zip(self.remap.src()) {
            if let Some(s) = src.get(block) {
                *slot = s;
            }
        }
        let mut dsts: [&mut [u8]; MAX_CHANNELS] = std::array::from_fn(|_| Default::default());
        for (d, &slot) in dst.iter_mut().zip(self.remap.dst()) {
            dsts[slot] = &mut **d;
        }
        let n_src = self.remap.src().len();
        let n_dst = self.remap.dst().len();
        self.converter.process(&mut dsts[..n_dst], &srcs[..n_src], n);
    }

    /// Converts `n` frames starting `offset` frames into the valid region
    /// of `src`, and sets the chunks of `dst`.
    pub fn run(&self, dst: &mut [Data], src: &[Data], offset: usize, n: usize) {
        let (n_src, n_dst) = (src.len().min(MAX_CHANNELS), dst.len().min(MAX_CHANNELS));
        let start = offset * self.src_stride;
        let mut srcs: [&[u8]; MAX_CHANNELS] = [&[][..]; MAX_CHANNELS];
        for (slot, data) in srcs.iter_mut().zip(src) {
            let valid = data.valid();
            *slot = &valid[start.min(valid.len())..];
        }
        let mut dsts: [&mut [u8]; MAX_CHANNELS] = std::array::from_fn(|_| Default::default());
        for (slot, data) in dsts.iter_mut().zip(dst.iter_mut()) {
            *slot = &mut data.memory[..];
        }
        self.convert(&mut dsts[..n_dst], &srcs[..n_src], n);
        set_chunks(dst, n, self.dst_stride);
    }
}

/// Marks `n` frames valid in every block.
pub(crate) fn set_chunks(datas: &mut [Data], n: usize, stride: usize) {
    for d in datas {
        d.chunk = Chunk {
            offset: 0,
            size: (n * stride) as u32,
            stride: stride as u32,
        };
    }
}

/// Format converter node: one input, one output, same rate and channel
/// count, any sample formats.
///
/// When both formats and layouts are equal and the output buffers allow
/// it, data moves by swapping memory instead of copying.
#[derive(Debug)]
pub struct FormatConvert {
    cpu_flags: CpuFlags,
    input: Option<AudioInfo>,
    output: Option<AudioInfo>,
    stage: Option<ConvertStage>,
    out_dynamic: bool,
    passthrough: bool,
    in_offset: usize,
}

impl FormatConvert {
    /// A converter that will pick kernels for `cpu_flags`.
    pub fn new(cpu_flags: CpuFlags) -> Self {
        Self {
            cpu_flags,
            input: None,
            output: None,
            stage: None,
            out_dynamic: false,
            passthrough: false,
            in_offset: 0,
        }
    }

    /// Returns `true` when data is moved without conversion.
    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    fn configure(&mut self) -> Result<(), NodeError> {
        self.stage = None;
        if let (Some(input), Some(output)) = (&self.input, &self.output) {
            if input.rate != output.rate {
                return Err(NodeError::UnsupportedFormat(format!(
                    "rate {} -> {} needs a resampler",
                    input.rate, output.rate
                )));
            }
            self.stage = Some(ConvertStage::new(input, output, self.cpu_flags)?);
        }
        self.update_passthrough();
        Ok(())
    }

    fn update_passthrough(&mut self) {
        self.passthrough = self.out_dynamic && self.stage.as_ref().is_some_and(ConvertStage::is_identity);
    }
}

/// Moves the memory of `src` into `dst` and `dst`'s old memory into `src`,
/// keeping at most `n` frames valid in `dst`.
pub(crate) fn swap_buffers(dst: &mut Buffer, src: &mut Buffer, n: usize, stride: usize) {
    for (d, s) in dst.datas.iter_mut().zip(src.datas.iter_mut()) {
        std::mem::swap(&mut d.memory, &mut s.memory);
        d.chunk = Chunk {
            offset: s.chunk.offset,
            size: s.chunk.size.min((n * stride) as u32),
            stride: stride as u32,
        };
    }
}

impl NodeImpl for FormatConvert {
    fn name(&self) -> &str {
        "format-convert"
    }

    fn port_count(&self, _direction: Direction) -> u32 {
        1
    }

    fn send_command(&mut self, command: Command) -> Result<Completion, NodeError> {
        match command {
            Command::Start if self.stage.is_none() => Err(NodeError::NoFormat),
            Command::Flush | Command::Suspend => {
                self.in_offset = 0;
                Ok(Completion::Done)
            }
            _ => Ok(Completion::Done),
        }
    }

    fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, NodeError> {
        match id {
            ParamId::EnumFormat => {
                let (direction, other) = match (&self.input, &self.output) {
                    (Some(i), None) => (Direction::Output, i),
                    (None, Some(o)) | (Some(_), Some(o)) => (Direction::Input, o),
                    (None, None) => return Ok(Vec::new()),
                };
                Ok(enum_formats(direction, other.rate, other.channels, start, num))
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
            ParamId::Props => Ok(Vec::new()),
        }
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

    fn port_use_buffers(&mut self, direction: Direction, port_id: u32, buffers: &[Buffer]) -> Result<(), NodeError> {
        check_port(direction, port_id, 1, 1)?;
        if direction == Direction::Output {
            self.out_dynamic = !buffers.is_empty() && buffers.iter().all(|b| b.all_have(DataFlags::DYNAMIC));
            self.update_passthrough();
        }
        Ok(())
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
        let stage = self.stage.as_ref().ok_or(ProcessError::NotConfigured)?;
        let Some(in_buf) = input.buffer.as_mut() else {
            return Ok(ProcessStatus::NEED_DATA);
        };
        let Some(out_buf) = output.buffer.as_mut() else {
            return Err(ProcessError::Pipe);
        };

        let avail = frames_in(in_buf, stage.src_stride()).saturating_sub(self.in_offset);
        let n = avail.min(frames_room(out_buf, stage.dst_stride()));
        if self.passthrough && self.in_offset == 0 && n == avail {
            swap_buffers(out_buf, in_buf, n, stage.dst_stride());
        } else {
            stage.run(&mut out_buf.datas, &in_buf.datas, self.in_offset, n);
        }
        output.status = ProcessStatus::HAVE_DATA;

        if n < avail {
            self.in_offset += n;
            return Ok(ProcessStatus::HAVE_DATA);
        }
        self.in_offset = 0;
        input.status = ProcessStatus::NEED_DATA;
        Ok(ProcessStatus::HAVE_DATA | ProcessStatus::NEED_DATA)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::Clock;
    use crate::port::PortIo;
    use cauce_dsp::{ChannelPosition, SampleFormat};

    fn io_with(info: &AudioInfo, frames: usize, flags: DataFlags) -> PortIo {
        PortIo {
            status: ProcessStatus::NEED_DATA,
            buffer: Some(Buffer::alloc(0, info, frames, flags)),
        }
    }

    #[test]
    fn converts_s16_to_f32p() {
        let src = AudioInfo::new(SampleFormat::S16, 48000, 2);
        let dst = AudioInfo::new(SampleFormat::F32P, 48000, 2);
        let mut node = FormatConvert::new(CpuFlags::NONE);
        node.port_set_format(Direction::Input, 0, Some(&src)).unwrap();
        node.port_set_format(Direction::Output, 0, Some(&dst)).unwrap();

        let mut input = io_with(&src, 4, DataFlags::READWRITE);
        {
            let data = &mut input.buffer.as_mut().unwrap().datas[0];
            for (i, s) in [16384i16, -16384, 0, 0, 0, 0, 0, 0].iter().enumerate() {
                data.memory[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
            }
            data.chunk = Chunk { offset: 0, size: 16, stride: 4 };
        }
        input.status = ProcessStatus::HAVE_DATA;
        let mut inputs = [input];
        let mut outputs = [io_with(&dst, 8, DataFlags::READWRITE)];
        let mut ctx = ProcessContext {
            inputs: &mut inputs,
            outputs: &mut outputs,
            clock: Clock::default(),
        };
        let status = node.process(&mut ctx).unwrap();
        assert!(status.contains(ProcessStatus::HAVE_DATA));

        let out = outputs[0].buffer.as_ref().unwrap();
        assert_eq!(out.datas[0].chunk.size, 16);
        let left = f32::from_le_bytes(out.datas[0].memory[0..4].try_into().unwrap());
        let right = f32::from_le_bytes(out.datas[1].memory[0..4].try_into().unwrap());
        assert!((left - 0.5).abs() < 1e-4);
        assert!((right + 0.5).abs() < 1e-4);
        assert_eq!(inputs[0].status, ProcessStatus::NEED_DATA);
    }

    #[test]
    fn swapped_layout_is_remapped() {
        use ChannelPosition::{FL, FR};
        let src = AudioInfo::new(SampleFormat::F32P, 48000, 2).with_positions(vec![FR, FL]);
        let dst = AudioInfo::new(SampleFormat::F32P, 48000, 2);
        let stage = ConvertStage::new(&src, &dst, CpuFlags::NONE).unwrap();
        assert!(!stage.is_identity());

        let a = 1.0f32.to_le_bytes();
        let b = 2.0f32.to_le_bytes();
        let mut out_l = [0u8; 4];
        let mut out_r = [0u8; 4];
        stage.convert(&mut [&mut out_l[..], &mut out_r[..]], &[&a[..], &b[..]], 1);
        // source block 0 is front-right
        assert_eq!(f32::from_le_bytes(out_l), 2.0);
        assert_eq!(f32::from_le_bytes(out_r), 1.0);
    }

    #[test]
    fn run_skips_consumed_frames_and_sets_chunks() {
        let src = AudioInfo::new(SampleFormat::S16, 48000, 2);
        let dst = AudioInfo::new(SampleFormat::F32P, 48000, 2);
        let stage = ConvertStage::new(&src, &dst, CpuFlags::NONE).unwrap();

        let mut in_buf = Buffer::alloc(0, &src, 3, DataFlags::READWRITE);
        for (i, s) in [0i16, 0, 8192, -8192, 16384, -16384].iter().enumerate() {
            in_buf.datas[0].memory[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
        }
        in_buf.datas[0].chunk = Chunk { offset: 0, size: 12, stride: 4 };
        let mut out_buf = Buffer::alloc(0, &dst, 4, DataFlags::READWRITE);

        stage.run(&mut out_buf.datas, &in_buf.datas, 1, 2);
        let sample = |block: usize, frame: usize| {
            let m = &out_buf.datas[block].memory;
            f32::from_le_bytes(m[frame * 4..frame * 4 + 4].try_into().unwrap())
        };
        for data in &out_buf.datas {
            assert_eq!(data.chunk, Chunk { offset: 0, size: 8, stride: 4 });
        }
        assert!((sample(0, 0) - 0.25).abs() < 1e-4);
        assert!((sample(1, 0) + 0.25).abs() < 1e-4);
        assert!((sample(0, 1) - 0.5).abs() < 1e-4);
        assert!((sample(1, 1) + 0.5).abs() < 1e-4);
    }

    #[test]
    fn passthrough_needs_dynamic_buffers() {
        let info = AudioInfo::new(SampleFormat::F32P, 48000, 2);
        let mut node = FormatConvert::new(CpuFlags::NONE);
        node.port_set_format(Direction::Input, 0, Some(&info)).unwrap();
        node.port_set_format(Direction::Output, 0, Some(&info)).unwrap();
        let plain = [Buffer::alloc(0, &info, 8, DataFlags::READWRITE)];
        node.port_use_buffers(Direction::Output, 0, &plain).unwrap();
        assert!(!node.is_passthrough());
        let dynamic = [Buffer::alloc(0, &info, 8, DataFlags::READWRITE | DataFlags::DYNAMIC)];
        node.port_use_buffers(Direction::Output, 0, &dynamic).unwrap();
        assert!(node.is_passthrough());
    }

    #[test]
    fn rate_change_is_refused() {
        let mut node = FormatConvert::new(CpuFlags::NONE);
        node.port_set_format(Direction::Input, 0, Some(&AudioInfo::new(SampleFormat::S16, 44100, 2)))
            .unwrap();
        let err = node
            .port_set_format(Direction::Output, 0, Some(&AudioInfo::new(SampleFormat::F32, 48000, 2)))
            .unwrap_err();
        assert!(matches!(err, NodeError::UnsupportedFormat(_)));
    }

    #[test]
    fn edge_cases() {
        let info = AudioInfo::new(SampleFormat::F32, 48000, 1);
        let mut node = FormatConvert::new(CpuFlags::NONE);
        node.port_set_format(Direction::Input, 0, Some(&info)).unwrap();
        node.port_set_format(Direction::Output, 0, Some(&info)).unwrap();

        // input without data reports its status
        let mut inputs = [PortIo::default()];
        let mut outputs = [io_with(&info, 8, DataFlags::READWRITE)];
        let mut ctx = ProcessContext {
            inputs: &mut inputs,
            outputs: &mut outputs,
            clock: Clock::default(),
        };
        assert_eq!(node.process(&mut ctx), Ok(ProcessStatus::NEED_DATA));

        // output not consumed yet
        ctx.outputs[0].status = ProcessStatus::HAVE_DATA;
        assert_eq!(node.process(&mut ctx), Ok(ProcessStatus::HAVE_DATA));

        // no output buffer
        ctx.outputs[0] = PortIo::default();
        ctx.inputs[0] = io_with(&info, 8, DataFlags::READWRITE);
        ctx.inputs[0].status = ProcessStatus::HAVE_DATA;
        assert_eq!(node.process(&mut ctx), Err(ProcessError::Pipe));
    }
}
