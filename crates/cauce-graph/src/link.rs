//! Links between an output port and an input port.
//!
//! A link negotiates one format for its two ports, allocates a small pool
//! of buffers and circulates them over two single-producer rings:
//!
//! ```text
//!            ready ring
//!   output ─────────────▶ input
//!          ◀─────────────
//!            free ring
//! ```
//!
//! When the link is active the input's node also waits for the output's
//! node each quantum.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::context::Context;
use crate::error::GraphError;
use crate::id::{Direction, LinkId, NodeId};
use crate::port::{AudioInfo, Buffer, DataFlags, PortIo};
use crate::scheduler;

/// Default number of buffers per link.
pub const DEFAULT_BUFFERS: u32 = 2;

/// Link construction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkOptions {
    /// Buffers in the pool.
    pub buffers: u32,
    /// Let the input swap buffer memory instead of copying.
    pub dynamic: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            buffers: DEFAULT_BUFFERS,
            dynamic: false,
        }
    }
}

/// Output half of a link's rings, held by the output node's runtime.
pub(crate) struct OutputEnd {
    pub(crate) ready: Producer<Buffer>,
    pub(crate) free: Consumer<Buffer>,
}

/// Input half of a link's rings, held by the input node's runtime.
pub(crate) struct InputEnd {
    pub(crate) ready: Consumer<Buffer>,
    pub(crate) free: Producer<Buffer>,
}

/// Builds both ring halves with every buffer on the free ring.
fn rings(buffers: Vec<Buffer>) -> (OutputEnd, InputEnd) {
    let n = buffers.len().max(1);
    let (ready_tx, ready_rx) = RingBuffer::new(n);
    let (mut free_tx, free_rx) = RingBuffer::new(n);
    for buffer in buffers {
        if free_tx.push(buffer).is_err() {
            break;
        }
    }
    (
        OutputEnd {
            ready: ready_tx,
            free: free_rx,
        },
        InputEnd {
            ready: ready_rx,
            free: free_tx,
        },
    )
}

pub(crate) struct Link {
    pub(crate) id: LinkId,
    pub(crate) output: NodeId,
    pub(crate) output_port: u32,
    pub(crate) input: NodeId,
    pub(crate) input_port: u32,
    options: LinkOptions,
    /// Last negotiated format, reapplied after a suspend.
    info: Option<AudioInfo>,
    prepared: bool,
    /// The input's join counter includes this link.
    active: Arc<AtomicBool>,
}

impl Link {
    fn peer(&self, node: NodeId) -> NodeId {
        if node == self.output { self.input } else { self.output }
    }
}

impl Context {
    /// Links an output port to an input port and negotiates their format.
    ///
    /// A port with a format hands it to an unconfigured peer; two configured
    /// ports must agree. When both nodes are running the link becomes
    /// active immediately.
    ///
    /// # Errors
    ///
    /// - [`GraphError::SelfLink`], [`GraphError::PortNotFound`] and
    ///   [`GraphError::PortBusy`] for bad endpoints
    /// - [`GraphError::NoFormat`] and [`GraphError::FormatMismatch`] when
    ///   negotiation fails
    /// - [`GraphError::Busy`] when a running node would need a new format
    pub fn link(
        &mut self,
        output: NodeId,
        output_port: u32,
        input: NodeId,
        input_port: u32,
        options: LinkOptions,
    ) -> Result<LinkId, GraphError> {
        if output == input {
            return Err(GraphError::SelfLink(output));
        }
        self.check_free(output, Direction::Output, output_port)?;
        self.check_free(input, Direction::Input, input_port)?;

        let id = LinkId(self.links.len() as u32);
        self.links.push(Some(Link {
            id,
            output,
            output_port,
            input,
            input_port,
            options,
            info: None,
            prepared: false,
            active: Arc::new(AtomicBool::new(false)),
        }));
        self.set_port_link(output, Direction::Output, output_port, Some(id))?;
        self.set_port_link(input, Direction::Input, input_port, Some(id))?;

        if let Err(e) = self.prepare_link(id) {
            tracing::debug!("link {} failed: {}", id, e);
            self.set_port_link(output, Direction::Output, output_port, None)?;
            self.set_port_link(input, Direction::Input, input_port, None)?;
            self.links[id.0 as usize] = None;
            return Err(e);
        }
        if self.node(output)?.is_live() && self.node(input)?.is_live() {
            self.activate(id)?;
        }
        tracing::debug!(
            "{}: {}:{} -> {}:{}",
            id,
            output,
            output_port,
            input,
            input_port
        );
        Ok(id)
    }

    /// Removes a link, releasing its buffers on both ports.
    pub fn unlink(&mut self, id: LinkId) -> Result<(), GraphError> {
        self.deactivate(id)?;
        let link = self
            .links
            .get_mut(id.0 as usize)
            .and_then(Option::take)
            .ok_or(GraphError::LinkNotFound(id))?;
        self.detach(link.output, Direction::Output, link.output_port, true)?;
        self.detach(link.input, Direction::Input, link.input_port, true)?;
        self.set_port_link(link.output, Direction::Output, link.output_port, None)?;
        self.set_port_link(link.input, Direction::Input, link.input_port, None)?;
        tracing::debug!("{} removed", id);
        Ok(())
    }

    /// Format negotiated on a link.
    pub fn link_format(&self, id: LinkId) -> Result<Option<&AudioInfo>, GraphError> {
        Ok(self.link_ref(id)?.info.as_ref())
    }

    /// Returns `true` if the input's node waits on this link.
    pub fn link_is_active(&self, id: LinkId) -> Result<bool, GraphError> {
        Ok(self.link_ref(id)?.active.load(Ordering::Acquire))
    }

    fn link_ref(&self, id: LinkId) -> Result<&Link, GraphError> {
        self.links
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphError::LinkNotFound(id))
    }

    fn link_mut(&mut self, id: LinkId) -> Result<&mut Link, GraphError> {
        self.links
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::LinkNotFound(id))
    }

    /// Links touching `node`.
    fn links_of(&self, node: NodeId) -> Vec<LinkId> {
        self.links
            .iter()
            .flatten()
            .filter(|l| l.output == node || l.input == node)
            .map(|l| l.id)
            .collect()
    }

    fn check_free(&self, node: NodeId, direction: Direction, port: u32) -> Result<(), GraphError> {
        let state = self
            .node(node)?
            .ports(direction)
            .get(port as usize)
            .ok_or(GraphError::PortNotFound { node, direction, port })?;
        if state.link.is_some() {
            return Err(GraphError::PortBusy { node, direction, port });
        }
        Ok(())
    }

    fn set_port_link(&mut self, node: NodeId, direction: Direction, port: u32, link: Option<LinkId>) -> Result<(), GraphError> {
        let state = self
            .node_mut(node)?
            .port_mut(direction, port)
            .ok_or(GraphError::PortNotFound { node, direction, port })?;
        state.link = link;
        Ok(())
    }

    /// Picks the format both ports of a link will use.
    fn negotiate(&mut self, id: LinkId) -> Result<AudioInfo, GraphError> {
        let link = self.link_ref(id)?;
        let (output, output_port, input, input_port) = (link.output, link.output_port, link.input, link.input_port);
        let remembered = link.info.clone();
        let out_format = self.port_format(output, Direction::Output, output_port)?.cloned();
        let in_format = self.port_format(input, Direction::Input, input_port)?.cloned();

        match (out_format, in_format) {
            (Some(o), Some(i)) if o == i => Ok(o),
            (Some(o), Some(i)) => Err(GraphError::FormatMismatch {
                output: o.to_string(),
                input: i.to_string(),
            }),
            (Some(o), None) => {
                self.port_set_format(input, Direction::Input, input_port, Some(o.clone()))?;
                Ok(o)
            }
            (None, Some(i)) => {
                self.port_set_format(output, Direction::Output, output_port, Some(i.clone()))?;
                Ok(i)
            }
            (None, None) => {
                let info = remembered.ok_or(GraphError::NoFormat { output, input })?;
                self.port_set_format(output, Direction::Output, output_port, Some(info.clone()))?;
                self.port_set_format(input, Direction::Input, input_port, Some(info.clone()))?;
                Ok(info)
            }
        }
    }

    /// Negotiates, allocates the buffer pool and installs the ring ends in
    /// both runtimes.
    fn prepare_link(&mut self, id: LinkId) -> Result<(), GraphError> {
        let info = self.negotiate(id)?;
        let link = self.link_ref(id)?;
        let (output, output_port, input, input_port) = (link.output, link.output_port, link.input, link.input_port);
        let options = link.options;

        let flags = if options.dynamic {
            DataFlags::READWRITE | DataFlags::DYNAMIC
        } else {
            DataFlags::READWRITE
        };
        let frames = self.config.max_quantum as usize;
        let buffers: Vec<Buffer> = (0..options.buffers.max(1))
            .map(|i| Buffer::alloc(i, &info, frames, flags))
            .collect();

        for (node, direction, port) in [
            (output, Direction::Output, output_port),
            (input, Direction::Input, input_port),
        ] {
            let announced = buffers.clone();
            self.with_runtime(node, move |rt| rt.node.port_use_buffers(direction, port, &announced))?
                .map_err(|e| GraphError::node(node, e))?;
        }

        let (out_end, in_end) = rings(buffers);
        let port = output_port as usize;
        self.with_runtime(output, move |rt| {
            if let (Some(slot), Some(io)) = (rt.out_ends.get_mut(port), rt.outputs.get_mut(port)) {
                *slot = Some(out_end);
                *io = PortIo::default();
            }
        })?;
        let port = input_port as usize;
        self.with_runtime(input, move |rt| {
            if let (Some(slot), Some(io)) = (rt.in_ends.get_mut(port), rt.inputs.get_mut(port)) {
                *slot = Some(in_end);
                *io = PortIo::default();
            }
        })?;

        tracing::debug!("{} prepared: {} x{} {}", id, info, options.buffers, frames);
        let link = self.link_mut(id)?;
        link.info = Some(info);
        link.prepared = true;
        Ok(())
    }

    fn detach(&mut self, node: NodeId, direction: Direction, port: u32, clear_buffers: bool) -> Result<(), GraphError> {
        let index = port as usize;
        let result = self.with_runtime(node, move |rt| {
            match direction {
                Direction::Input => {
                    if let Some(end) = rt.in_ends.get_mut(index) {
                        *end = None;
                    }
                    if let Some(io) = rt.inputs.get_mut(index) {
                        *io = PortIo::default();
                    }
                }
                Direction::Output => {
                    if let Some(end) = rt.out_ends.get_mut(index) {
                        *end = None;
                    }
                    if let Some(io) = rt.outputs.get_mut(index) {
                        *io = PortIo::default();
                    }
                }
            }
            if clear_buffers {
                rt.node.port_use_buffers(direction, port, &[])
            } else {
                Ok(())
            }
        })?;
        if let Err(e) = result {
            tracing::warn!("{} {} port {}: error clearing buffers: {}", node, direction, port, e);
        }
        Ok(())
    }

    fn activate(&mut self, id: LinkId) -> Result<(), GraphError> {
        let link = self.link_ref(id)?;
        let active = Arc::clone(&link.active);
        let output = Arc::clone(&self.node(link.output)?.shared);
        let input = Arc::clone(&self.node(link.input)?.shared);
        if !active.load(Ordering::Acquire) {
            tracing::debug!("{} activate", id);
        }
        scheduler::activate_link(id, &active, &output, &input);
        Ok(())
    }

    fn deactivate(&mut self, id: LinkId) -> Result<(), GraphError> {
        let link = self.link_ref(id)?;
        let active = Arc::clone(&link.active);
        let output = Arc::clone(&self.node(link.output)?.shared);
        let input = Arc::clone(&self.node(link.input)?.shared);
        if active.load(Ordering::Acquire) {
            tracing::debug!("{} deactivate", id);
        }
        scheduler::deactivate_link(id, &active, &output, &input);
        Ok(())
    }

    /// Prepares the links of a node about to run and activates those whose
    /// peer runs too.
    pub(crate) fn activate_links(&mut self, node: NodeId) -> Result<(), GraphError> {
        for id in self.links_of(node) {
            let link = self.link_ref(id)?;
            let peer = link.peer(node);
            if !link.prepared {
                self.prepare_link(id)?;
            }
            if self.node(peer)?.is_live() {
                self.activate(id)?;
            }
        }
        Ok(())
    }

    /// Stops every link of a node from counting in join counters.
    pub(crate) fn deactivate_links(&mut self, node: NodeId) -> Result<(), GraphError> {
        for id in self.links_of(node) {
            self.deactivate(id)?;
        }
        Ok(())
    }

    /// Drops the buffer pools of a node's links. They are rebuilt with the
    /// remembered format when the node runs again.
    pub(crate) fn release_links(&mut self, node: NodeId) -> Result<(), GraphError> {
        for id in self.links_of(node) {
            self.deactivate(id)?;
            let link = self.link_mut(id)?;
            link.prepared = false;
            let (output, output_port, input, input_port) = (link.output, link.output_port, link.input, link.input_port);
            self.detach(output, Direction::Output, output_port, false)?;
            self.detach(input, Direction::Input, input_port, false)?;
        }
        Ok(())
    }
}
