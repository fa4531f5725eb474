//! Sink that hands planar float audio to another thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cauce_dsp::SampleFormat;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::error::{NodeError, ProcessError};
use crate::id::Direction;
use crate::implementation::{Command, Completion, NodeImpl, Param, ParamId, ProcessContext, ProcessStatus};
use crate::port::AudioInfo;

use super::check_port;

/// Counters shared between a [`CaptureSink`] and its reader.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames: AtomicU64,
    dropped: AtomicU64,
}

impl CaptureStats {
    /// Frames received from the graph.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// Samples lost because a ring was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// One `f32p` input port; each channel is pushed into its own ring.
#[derive(Debug)]
pub struct CaptureSink {
    channels: u32,
    producers: Vec<Producer<f32>>,
    format: Option<AudioInfo>,
    stats: Arc<CaptureStats>,
}

impl CaptureSink {
    /// Creates a sink for `channels` channels with rings of `capacity`
    /// samples, returning the consumer side of each ring.
    pub fn new(channels: u32, capacity: usize) -> (Self, Vec<Consumer<f32>>) {
        let (producers, consumers) = (0..channels).map(|_| RingBuffer::new(capacity)).unzip();
        let sink = Self {
            channels,
            producers,
            format: None,
            stats: Arc::new(CaptureStats::default()),
        };
        (sink, consumers)
    }

    /// Shared counters, readable from any thread.
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

impl NodeImpl for CaptureSink {
    fn name(&self) -> &str {
        "capture"
    }

    fn port_count(&self, direction: Direction) -> u32 {
        match direction {
            Direction::Input => 1,
            Direction::Output => 0,
        }
    }

    fn send_command(&mut self, command: Command) -> Result<Completion, NodeError> {
        match command {
            Command::Start if self.format.is_none() => Err(NodeError::NoFormat),
            _ => Ok(Completion::Done),
        }
    }

    fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, NodeError> {
        let params = match id {
            ParamId::EnumFormat => vec![Param::Format(
                Direction::Input,
                AudioInfo::new(SampleFormat::F32P, 48000, self.channels),
            )],
            ParamId::Format => self
                .format
                .clone()
                .map(|f| Param::Format(Direction::Input, f))
                .into_iter()
                .collect(),
            ParamId::Props => Vec::new(),
        };
        Ok(params.into_iter().skip(start as usize).take(num as usize).collect())
    }

    fn port_set_format(
        &mut self,
        direction: Direction,
        port_id: u32,
        format: Option<&AudioInfo>,
    ) -> Result<Completion, NodeError> {
        check_port(direction, port_id, 1, 0)?;
        if let Some(f) = format
            && (f.format != SampleFormat::F32P || f.channels != self.channels)
        {
            return Err(NodeError::UnsupportedFormat(format!(
                "capture takes f32p {}ch, got {}",
                self.channels, f
            )));
        }
        self.format = format.cloned();
        Ok(Completion::Done)
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessStatus, ProcessError> {
        let Some(input) = ctx.inputs.first_mut() else {
            return Err(ProcessError::NotConfigured);
        };
        if !input.has_data() {
            return Ok(ProcessStatus::NEED_DATA);
        }
        let Some(buffer) = input.buffer.as_ref() else {
            return Ok(ProcessStatus::NEED_DATA);
        };
        if buffer.datas.len() != self.producers.len() {
            return Err(ProcessError::InvalidBuffer);
        }

        let mut frames = 0;
        for (producer, data) in self.producers.iter_mut().zip(&buffer.datas) {
            let samples = data.valid().chunks_exact(4);
            let n = samples.len();
            frames = n;
            let writable = producer.slots().min(n);
            if let Ok(chunk) = producer.write_chunk_uninit(writable) {
                chunk.fill_from_iter(samples.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])));
            }
            if writable < n {
                self.stats.dropped.fetch_add((n - writable) as u64, Ordering::Relaxed);
            }
        }
        self.stats.frames.fetch_add(frames as u64, Ordering::Relaxed);

        input.status = ProcessStatus::NEED_DATA;
        Ok(ProcessStatus::NEED_DATA)
    }
}
