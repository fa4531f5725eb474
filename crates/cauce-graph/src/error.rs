//! Error types for the graph control plane and data path.

use thiserror::Error;

use crate::id::{Direction, LinkId, LoopId, NodeId};
use crate::node::NodeState;

/// Control-plane failures.
#[derive(Debug, Error)]
pub enum GraphError {
    /// No node with this id.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// No link with this id.
    #[error("link {0} not found")]
    LinkNotFound(LinkId),

    /// No data loop with this id.
    #[error("data loop {0:?} not found")]
    LoopNotFound(LoopId),

    /// The node has no such port.
    #[error("{node} has no {direction} port {port}")]
    PortNotFound {
        /// Node owning the port.
        node: NodeId,
        /// Port direction.
        direction: Direction,
        /// Port index.
        port: u32,
    },

    /// The port already carries a link.
    #[error("{direction} port {port} of {node} is already linked")]
    PortBusy {
        /// Node owning the port.
        node: NodeId,
        /// Port direction.
        direction: Direction,
        /// Port index.
        port: u32,
    },

    /// The operation needs the node off its data loop.
    #[error("{0} is running on a data loop")]
    Busy(NodeId),

    /// The requested state cannot be requested.
    #[error("invalid state request: {0}")]
    InvalidState(NodeState),

    /// A follower was asked to run without a driver.
    #[error("{0} has no driver")]
    NoDriver(NodeId),

    /// The node cannot pace a graph.
    #[error("{0} is not a driver")]
    NotADriver(NodeId),

    /// Neither side of a link has a format.
    #[error("no format to negotiate between {output} and {input}")]
    NoFormat {
        /// Node owning the output port.
        output: NodeId,
        /// Node owning the input port.
        input: NodeId,
    },

    /// Both sides of a link have different formats.
    #[error("format mismatch: output {output} vs input {input}")]
    FormatMismatch {
        /// Format of the output port.
        output: String,
        /// Format of the input port.
        input: String,
    },

    /// A node and its peer are the same node.
    #[error("cannot link {0} to itself")]
    SelfLink(NodeId),

    /// The node implementation refused an operation.
    #[error("{node}: {source}")]
    Node {
        /// Node that failed.
        node: NodeId,
        /// Underlying error.
        #[source]
        source: NodeError,
    },

    /// A data thread could not be started.
    #[error("failed to spawn data loop: {0}")]
    Spawn(#[source] std::io::Error),

    /// A data loop stopped answering.
    #[error("data loop {0:?} disconnected")]
    LoopDisconnected(LoopId),
}

impl GraphError {
    /// Wraps a [`NodeError`] raised by `node`.
    pub fn node(node: NodeId, source: NodeError) -> Self {
        Self::Node { node, source }
    }
}

/// Failures reported by a node implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeError {
    /// The command or parameter is not implemented.
    #[error("operation not supported")]
    NotSupported,

    /// An argument was out of range or inconsistent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The port does not exist.
    #[error("unknown {0} port {1}")]
    UnknownPort(Direction, u32),

    /// The format cannot be handled.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The operation needs formats that are not set yet.
    #[error("format not negotiated")]
    NoFormat,

    /// An allocation failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// The implementation failed internally.
    #[error("{0}")]
    Failed(String),
}

impl From<cauce_dsp::ConvertError> for NodeError {
    fn from(e: cauce_dsp::ConvertError) -> Self {
        NodeError::UnsupportedFormat(e.to_string())
    }
}

impl From<cauce_dsp::ChannelMixError> for NodeError {
    fn from(e: cauce_dsp::ChannelMixError) -> Self {
        NodeError::InvalidArgument(e.to_string())
    }
}

impl From<cauce_dsp::ResampleError> for NodeError {
    fn from(e: cauce_dsp::ResampleError) -> Self {
        match e {
            cauce_dsp::ResampleError::OutOfMemory { .. } => NodeError::OutOfMemory(e.to_string()),
            _ => NodeError::InvalidArgument(e.to_string()),
        }
    }
}

/// Data-path failure returned from `process`.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// An output port has no buffer to write into.
    #[error("broken pipe: no output buffer")]
    Pipe,

    /// The node was asked to process before its formats were set.
    #[error("process called without negotiated formats")]
    NotConfigured,

    /// A buffer did not match the negotiated geometry.
    #[error("invalid buffer")]
    InvalidBuffer,
}
