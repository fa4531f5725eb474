//! Cauce Graph - real-time audio graph with driver/follower scheduling
//!
//! A graph is a set of nodes joined by links between their ports. One node
//! per group is the *driver*: it wakes up once per quantum, signals its
//! followers, and the quantum is complete when every follower has run.
//! Followers run as soon as all of their upstream nodes have finished,
//! which is tracked with a per-node join counter in a shared
//! [`Activation`] record.
//!
//! # Building Blocks
//!
//! - [`Context`] - Owns nodes, links and data loops; runs the node state
//!   machine on the control thread
//! - [`NodeImpl`] - What a processing unit implements: commands,
//!   parameters, port formats, buffers and `process`
//! - [`Activation`] - Atomic status, join counter, timing and position of
//!   one node, shared with every thread that triggers it
//! - [`LinkOptions`] - Buffer count and flags for a port-to-port link
//!
//! # Node Lifecycle
//!
//! Nodes are created [`NodeState::Suspended`]. Requesting
//! [`NodeState::Running`] negotiates formats on their links, allocates
//! buffers, sends `Start` and moves the node onto its data loop. State
//! changes finish asynchronously; listeners registered with
//! [`Context::add_node_listener`] see every transition.
//!
//! # Built-in Nodes
//!
//! The [`nodes`] module provides a format converter, a resampler, a
//! combined audio converter, a sine source and a capture sink.
//!
//! # Example
//!
//! ```rust
//! use cauce_dsp::SampleFormat;
//! use cauce_graph::nodes::{CaptureSink, ToneSource};
//! use cauce_graph::{AudioInfo, Context, Direction, LinkOptions, NodeProps, NodeState};
//!
//! let mut ctx = Context::default();
//! let tone = ctx
//!     .add_node(NodeProps::new("tone").driver(true), Box::new(ToneSource::new(440.0, 0.5, 2)))
//!     .unwrap();
//! let (sink, _rings) = CaptureSink::new(2, 48000);
//! let capture = ctx.add_node(NodeProps::new("capture"), Box::new(sink)).unwrap();
//! ctx.set_driver(capture, tone).unwrap();
//!
//! let format = AudioInfo::new(SampleFormat::F32P, 48000, 2);
//! ctx.port_set_format(tone, Direction::Output, 0, Some(format)).unwrap();
//! ctx.link(tone, 0, capture, 0, LinkOptions::default()).unwrap();
//!
//! ctx.set_state(capture, NodeState::Running).unwrap();
//! ctx.set_state(tone, NodeState::Running).unwrap();
//! ctx.dispatch();
//! ctx.cycle();
//! assert_eq!(ctx.node_state(tone).unwrap(), NodeState::Running);
//! ```

pub mod activation;
mod context;
mod data_loop;
pub mod error;
pub mod events;
pub mod id;
pub mod implementation;
mod link;
mod node;
pub mod nodes;
pub mod port;
mod ratelimit;
mod runtime;
mod scheduler;
mod target;
mod time;
mod work;

pub use activation::{Activation, ActivationState, ActivationStatus, Clock, DriverCommand, Position, PositionState};
pub use context::{Context, EngineConfig};
pub use data_loop::DEFAULT_QUEUE_CAPACITY;
pub use error::{GraphError, NodeError, ProcessError};
pub use events::{DriverListener, NodeListener};
pub use id::{Direction, LinkId, LoopId, NodeId};
pub use implementation::{
    Command, Completion, NodeCallbacks, NodeImpl, Param, ParamId, ProcessContext, ProcessStatus, Prop,
};
pub use link::{DEFAULT_BUFFERS, LinkOptions};
pub use node::{NodeProps, NodeState};
pub use port::{AudioInfo, Buffer, Chunk, Data, DataFlags, PortIo};
