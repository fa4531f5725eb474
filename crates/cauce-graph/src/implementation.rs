//! The interface a processing unit implements to live in the graph.
//!
//! The graph owns each implementation through a [`NodeImpl`] trait object.
//! The control plane calls the command, parameter and port methods while the
//! node is off its data loop. The data loop calls [`NodeImpl::process`] once
//! per quantum after all upstream nodes have finished.

use std::fmt;
use std::sync::Arc;

use crate::activation::Clock;
use crate::error::{NodeError, ProcessError};
use crate::events::{Hooks, Notice};
use crate::id::{Direction, NodeId};
use crate::port::{AudioInfo, Buffer, PortIo};
use crate::scheduler::NodeShared;

/// Bitmask returned by `process` and stored in port IO areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ProcessStatus(u32);

impl ProcessStatus {
    /// Nothing happened yet; the node will finish asynchronously.
    pub const OK: Self = Self(0);
    /// The node wants more input.
    pub const NEED_DATA: Self = Self(1 << 0);
    /// The node produced output.
    pub const HAVE_DATA: Self = Self(1 << 1);
    /// The node reached the end of its stream.
    pub const DRAINED: Self = Self(1 << 2);

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if all bits of `other` are set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` for [`ProcessStatus::OK`].
    pub const fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for ProcessStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ProcessStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            return f.write_str("ok");
        }
        let names = [
            (Self::NEED_DATA, "need-data"),
            (Self::HAVE_DATA, "have-data"),
            (Self::DRAINED, "drained"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Commands sent to an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Begin processing.
    Start,
    /// Stop processing but keep formats and buffers.
    Pause,
    /// Stop processing and release resources.
    Suspend,
    /// Drop queued data and reset internal state.
    Flush,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Command::Start => "start",
            Command::Pause => "pause",
            Command::Suspend => "suspend",
            Command::Flush => "flush",
        })
    }
}

/// Outcome of a control operation that may finish later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Finished synchronously.
    Done,
    /// Will finish when [`NodeCallbacks::complete`] reports this sequence
    /// number.
    Pending(u32),
}

/// Parameter identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamId {
    /// Formats the node can accept.
    EnumFormat,
    /// Formats currently configured.
    Format,
    /// Node properties.
    Props,
}

/// One property value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prop {
    /// Playback rate multiplier applied by resamplers.
    Rate(f64),
    /// Resampler quality index.
    Quality(u32),
    /// Linear gain.
    Volume(f32),
    /// Silences the output.
    Mute(bool),
    /// Oscillator frequency in Hz.
    Frequency(f64),
}

/// Typed parameter values.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// A port format.
    Format(Direction, AudioInfo),
    /// A set of properties. Implementations ignore properties they do not
    /// know.
    Props(Vec<Prop>),
}

/// Per-call view of a node's ports and clock.
#[derive(Debug)]
pub struct ProcessContext<'a> {
    /// IO areas of the input ports.
    pub inputs: &'a mut [PortIo],
    /// IO areas of the output ports.
    pub outputs: &'a mut [PortIo],
    /// The driver's clock for this quantum.
    pub clock: Clock,
}

impl ProcessContext<'_> {
    /// Frames in the current quantum, when a clock drives the graph.
    pub fn quantum(&self) -> Option<usize> {
        (self.clock.duration > 0).then_some(self.clock.duration as usize)
    }
}

/// A processing unit hosted by a graph node.
pub trait NodeImpl: Send {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Number of ports in `direction`.
    fn port_count(&self, direction: Direction) -> u32;

    /// Receives the handle used to finish asynchronous work.
    fn set_callbacks(&mut self, _callbacks: NodeCallbacks) {}

    /// Executes a command.
    fn send_command(&mut self, command: Command) -> Result<Completion, NodeError>;

    /// Lists parameters of kind `id`, skipping `start` and returning at most
    /// `num`.
    fn enum_params(&self, id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, NodeError>;

    /// Sets or clears a parameter.
    fn set_param(&mut self, _id: ParamId, _flags: u32, _param: Option<&Param>) -> Result<Completion, NodeError> {
        Err(NodeError::NotSupported)
    }

    /// Sets or clears the format of a port.
    fn port_set_format(
        &mut self,
        direction: Direction,
        port_id: u32,
        format: Option<&AudioInfo>,
    ) -> Result<Completion, NodeError>;

    /// Announces the buffers that will circulate on a port. An empty slice
    /// releases them.
    fn port_use_buffers(&mut self, _direction: Direction, _port_id: u32, _buffers: &[Buffer]) -> Result<(), NodeError> {
        Ok(())
    }

    /// Processes one quantum. Must not block or allocate.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<ProcessStatus, ProcessError>;
}

/// Handle an implementation keeps to report asynchronous events.
///
/// Cloneable and usable from any thread.
#[derive(Clone)]
pub struct NodeCallbacks {
    pub(crate) shared: Arc<NodeShared>,
    pub(crate) hooks: Arc<Hooks>,
}

impl fmt::Debug for NodeCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCallbacks").field("node", &self.shared.id).finish()
    }
}

impl NodeCallbacks {
    /// Node these callbacks belong to.
    pub fn node(&self) -> NodeId {
        self.shared.id
    }

    /// Finishes a quantum that `process` left pending by returning
    /// [`ProcessStatus::OK`], and triggers the node's dependents.
    pub fn ready(&self, status: ProcessStatus) {
        let now = crate::time::now_nsec();
        self.shared.activation.state().set_status(status.bits());
        self.shared.resume(now);
        if status.contains(ProcessStatus::DRAINED) {
            self.hooks.emit_drained(self.shared.id);
        }
    }

    /// Reports a missed deadline detected by the implementation.
    pub fn xrun(&self, trigger: u64, delay: u64) {
        self.shared.xrun(&self.hooks, trigger, delay);
    }

    /// Completes an operation that returned [`Completion::Pending`].
    pub fn complete(&self, seq: u32, result: Result<(), NodeError>) {
        self.hooks.notify(Notice::Completed {
            node: self.shared.id,
            seq,
            result,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_bits() {
        let s = ProcessStatus::NEED_DATA | ProcessStatus::HAVE_DATA;
        assert!(s.contains(ProcessStatus::HAVE_DATA));
        assert!(!s.contains(ProcessStatus::DRAINED));
        assert!(!s.is_ok());
        assert!(ProcessStatus::default().is_ok());
        assert_eq!(s.to_string(), "need-data|have-data");
        assert_eq!(ProcessStatus::OK.to_string(), "ok");
    }

    #[test]
    fn quantum_from_clock() {
        let mut inputs: [PortIo; 0] = [];
        let mut outputs: [PortIo; 0] = [];
        let mut ctx = ProcessContext {
            inputs: &mut inputs,
            outputs: &mut outputs,
            clock: Clock {
                rate: 48000,
                duration: 256,
                position: 0,
            },
        };
        assert_eq!(ctx.quantum(), Some(256));
        ctx.clock.duration = 0;
        assert_eq!(ctx.quantum(), None);
    }
}
