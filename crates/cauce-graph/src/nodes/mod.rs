//! Built-in node implementations.
//!
//! - [`FormatConvert`] - sample format and channel order conversion
//! - [`Resample`] - rate conversion on planar float streams
//! - [`AudioConvert`] - format conversion, channel mixing and resampling in
//!   one node
//! - [`ToneSource`] - sine generator that drives a graph
//! - [`CaptureSink`] - hands planar float input to another thread

mod audioconvert;
mod capture;
mod channelmix;
mod convert;
mod resample;
mod tone;

pub use audioconvert::AudioConvert;
pub use capture::{CaptureSink, CaptureStats};
pub use channelmix::ChannelMixStage;
pub use convert::{ConvertStage, FormatConvert};
pub use resample::{Resample, ResampleStage};
pub use tone::ToneSource;

use cauce_dsp::{Encoding, SampleFormat};

use crate::error::NodeError;
use crate::id::Direction;
use crate::implementation::Param;
use crate::port::{AudioInfo, Buffer};

/// Every sample format at `rate` and `channels`, interleaved first, as
/// [`Param::Format`] entries for `direction`.
pub(crate) fn enum_formats(direction: Direction, rate: u32, channels: u32, start: u32, num: u32) -> Vec<Param> {
    [false, true]
        .into_iter()
        .flat_map(|planar| Encoding::ALL.into_iter().map(move |e| SampleFormat::new(e, planar)))
        .map(|format| Param::Format(direction, AudioInfo::new(format, rate, channels)))
        .skip(start as usize)
        .take(num as usize)
        .collect()
}

/// Rejects port ids beyond the node's port counts.
pub(crate) fn check_port(direction: Direction, port_id: u32, n_inputs: u32, n_outputs: u32) -> Result<(), NodeError> {
    let count = match direction {
        Direction::Input => n_inputs,
        Direction::Output => n_outputs,
    };
    if port_id < count {
        Ok(())
    } else {
        Err(NodeError::UnknownPort(direction, port_id))
    }
}

/// Frames present in every block of `buffer`.
pub(crate) fn frames_in(buffer: &Buffer, stride: usize) -> usize {
    if stride == 0 {
        return 0;
    }
    buffer.datas.iter().map(|d| d.valid().len() / stride).min().unwrap_or(0)
}

/// Frames that fit in every block of `buffer`.
pub(crate) fn frames_room(buffer: &Buffer, stride: usize) -> usize {
    if stride == 0 {
        return 0;
    }
    buffer.datas.iter().map(|d| d.max_size() / stride).min().unwrap_or(0)
}
