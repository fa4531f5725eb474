//! Node lifecycle: the control-plane half of a node and its state machine.
//!
//! ```text
//! CREATING -> SUSPENDED -> IDLE -> RUNNING
//! ```
//!
//! `ERROR` is reachable from every state. Transitions are requested with
//! [`Context::set_state`] and complete through the work queue, possibly
//! later when the implementation finishes asynchronously. A node entering
//! `RUNNING` moves its runtime onto its data loop; a node leaving it is
//! taken back before the pause or suspend command is sent.

use std::fmt;
use std::sync::Arc;

use crate::activation::DriverCommand;
use crate::context::Context;
use crate::error::{GraphError, NodeError};
use crate::events::NodeListener;
use crate::id::{Direction, LinkId, LoopId, NodeId};
use crate::implementation::{Command, Completion, Param, ParamId};
use crate::port::AudioInfo;
use crate::runtime::NodeRuntime;
use crate::scheduler::NodeShared;

/// Lifecycle state of a node. Ordered so that `Error < Creating <
/// Suspended < Idle < Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeState {
    /// A transition failed.
    Error,
    /// Being constructed.
    Creating,
    /// Formats and buffers released.
    Suspended,
    /// Configured but not processing.
    Idle,
    /// Processing on a data loop.
    Running,
}

impl NodeState {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            NodeState::Error => "error",
            NodeState::Creating => "creating",
            NodeState::Suspended => "suspended",
            NodeState::Idle => "idle",
            NodeState::Running => "running",
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction properties of a node.
#[derive(Debug, Clone)]
pub struct NodeProps {
    /// Name used in logs. Empty means the implementation's name.
    pub name: String,
    /// The node can pace a graph. Such nodes start out driving themselves.
    pub driver: bool,
    /// Loop the node runs on.
    pub data_loop: LoopId,
    /// Overrides the engine's `pause_on_idle` default.
    pub pause_on_idle: Option<bool>,
}

impl Default for NodeProps {
    fn default() -> Self {
        Self {
            name: String::new(),
            driver: false,
            data_loop: LoopId::MAIN,
            pause_on_idle: None,
        }
    }
}

impl NodeProps {
    /// Properties with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Marks the node as able to drive a graph.
    pub fn driver(mut self, driver: bool) -> Self {
        self.driver = driver;
        self
    }

    /// Selects the data loop.
    pub fn data_loop(mut self, id: LoopId) -> Self {
        self.data_loop = id;
        self
    }

    /// Overrides `pause_on_idle`.
    pub fn pause_on_idle(mut self, pause: bool) -> Self {
        self.pause_on_idle = Some(pause);
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct PortState {
    pub(crate) format: Option<AudioInfo>,
    pub(crate) link: Option<LinkId>,
}

/// Control-plane record of a node.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Arc<str>,
    pub(crate) shared: Arc<NodeShared>,
    /// Present while the node is off its data loop.
    pub(crate) runtime: Option<Box<NodeRuntime>>,
    pub(crate) data_loop: LoopId,
    pub(crate) can_drive: bool,
    pub(crate) driver: Option<NodeId>,
    pub(crate) active: bool,
    pub(crate) pause_on_idle: bool,
    pub(crate) state: NodeState,
    pub(crate) pending_state: NodeState,
    pub(crate) pending_work: Option<crate::work::WorkId>,
    pub(crate) last_error: Option<NodeError>,
    pub(crate) error: Option<String>,
    pub(crate) inputs: Vec<PortState>,
    pub(crate) outputs: Vec<PortState>,
}

impl Node {
    pub(crate) fn on_loop(&self) -> bool {
        self.runtime.is_none()
    }

    pub(crate) fn ports(&self, direction: Direction) -> &[PortState] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    pub(crate) fn port_mut(&mut self, direction: Direction, port: u32) -> Option<&mut PortState> {
        match direction {
            Direction::Input => self.inputs.get_mut(port as usize),
            Direction::Output => self.outputs.get_mut(port as usize),
        }
    }

    /// The node is, or is about to be, running.
    pub(crate) fn is_live(&self) -> bool {
        self.active && (self.state == NodeState::Running || self.pending_state == NodeState::Running)
    }
}

impl Context {
    /// Requests a state change. The change completes when the
    /// implementation confirms it; listeners hear about it then.
    ///
    /// # Errors
    ///
    /// - [`GraphError::InvalidState`] when requesting `Creating`
    /// - [`GraphError::NoDriver`] when an active node without a driver is
    ///   asked to run
    /// - [`GraphError::Node`] when the implementation refuses the command
    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<(), GraphError> {
        let node = self.node(id)?;
        let old = node.pending_state;
        let active = node.active;
        let pause_on_idle = node.pause_on_idle;
        let has_driver = node.driver.is_some();
        let was_live = node.is_live();
        tracing::debug!(
            "({}-{}) set state ({}) {} -> {}, active {}",
            node.name,
            id.0,
            node.state,
            old,
            state,
            active
        );

        let res = match state {
            NodeState::Creating => return Err(GraphError::InvalidState(state)),
            NodeState::Suspended => self.suspend_node(id)?,
            NodeState::Idle if pause_on_idle => self.pause_node(id)?,
            NodeState::Running if active => {
                if !has_driver {
                    return Err(GraphError::NoDriver(id));
                }
                match self.activate_links(id).and_then(|()| self.start_node(id)) {
                    Ok(res) => res,
                    Err(e) => {
                        if !was_live {
                            self.deactivate_links(id)?;
                        }
                        return Err(e);
                    }
                }
            }
            NodeState::Idle | NodeState::Running | NodeState::Error => Completion::Done,
        };

        let node = self.node_mut(id)?;
        if old != state {
            if let Some(work) = node.pending_work.take() {
                tracing::debug!("({}-{}) cancel pending {}", node.name, id.0, old);
                node.state = node.pending_state;
                self.work.cancel(work);
            }
            let work = self.work.add(id, Ok(res), state);
            let node = self.node_mut(id)?;
            node.pending_state = state;
            node.pending_work = Some(work);
        }
        self.process_work();
        Ok(())
    }

    /// Current state of a node.
    pub fn node_state(&self, id: NodeId) -> Result<NodeState, GraphError> {
        Ok(self.node(id)?.state)
    }

    /// Error message of a node in [`NodeState::Error`].
    pub fn node_error(&self, id: NodeId) -> Result<Option<&str>, GraphError> {
        Ok(self.node(id)?.error.as_deref())
    }

    /// Marks a node as part of a live graph. Inactive nodes accept
    /// `Running` requests without starting. Deactivating a running node
    /// pauses it.
    pub fn set_active(&mut self, id: NodeId, active: bool) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        if node.active == active {
            return Ok(());
        }
        tracing::debug!("({}-{}) {}", node.name, id.0, if active { "activate" } else { "deactivate" });
        let live = node.is_live();
        node.active = active;
        if !active && live {
            self.set_state(id, NodeState::Idle)?;
        } else if active && node.state == NodeState::Running && !node.on_loop() {
            // accepted while inactive, start it now
            if node.driver.is_none() {
                return Err(GraphError::NoDriver(id));
            }
            self.activate_links(id)?;
            self.send_start(id)?;
            if let Err(e) = self.enter_running(id) {
                self.update_state(id, NodeState::Error, Some(e));
            }
        }
        Ok(())
    }

    /// Makes `driver` pace `id`. A driver-capable node may drive itself.
    ///
    /// # Errors
    ///
    /// [`GraphError::Busy`] while `id` runs, [`GraphError::NotADriver`]
    /// when `driver` does not drive itself.
    pub fn set_driver(&mut self, id: NodeId, driver: NodeId) -> Result<(), GraphError> {
        let drv = self.node(driver)?;
        let drives_itself = if driver == id {
            drv.can_drive
        } else {
            drv.driver == Some(driver)
        };
        if !drives_itself {
            return Err(GraphError::NotADriver(driver));
        }
        let node = self.node_mut(id)?;
        if node.on_loop() {
            return Err(GraphError::Busy(id));
        }
        tracing::debug!("({}-{}) driver {}", node.name, id.0, driver);
        node.driver = Some(driver);
        Ok(())
    }

    /// Driver of a node, if any.
    pub fn driver(&self, id: NodeId) -> Result<Option<NodeId>, GraphError> {
        Ok(self.node(id)?.driver)
    }

    fn suspend_node(&mut self, id: NodeId) -> Result<Completion, GraphError> {
        let node = self.node(id)?;
        tracing::debug!("({}-{}) suspend node state:{}", node.name, id.0, node.state);
        if node.state > NodeState::Error && node.state <= NodeState::Suspended {
            return Ok(Completion::Done);
        }

        if let Err(e) = self.pause_node(id) {
            tracing::debug!("({}-{}) pause before suspend failed: {}", self.node(id)?.name, id.0, e);
        }
        self.release_links(id)?;

        let node = self.node_mut(id)?;
        let name = Arc::clone(&node.name);
        let (n_in, n_out) = (node.inputs.len(), node.outputs.len());
        let Some(runtime) = node.runtime.as_deref_mut() else {
            return Err(GraphError::Busy(id));
        };
        for (direction, count) in [(Direction::Input, n_in), (Direction::Output, n_out)] {
            for port in 0..count as u32 {
                if let Err(e) = runtime.node.port_set_format(direction, port, None) {
                    tracing::warn!("({}-{}) error unset format {}: {}", name, id.0, direction, e);
                }
                if let Err(e) = runtime.node.port_use_buffers(direction, port, &[]) {
                    tracing::warn!("({}-{}) error clearing {} buffers: {}", name, id.0, direction, e);
                }
            }
        }
        runtime.release_buffers();

        let mut res = runtime.node.send_command(Command::Suspend);
        if res == Err(NodeError::NotSupported) {
            res = runtime.node.send_command(Command::Pause);
        }
        if let Err(e) = res {
            tracing::warn!("({}-{}) suspend node error {}", name, id.0, e);
        }
        for port in node.inputs.iter_mut().chain(node.outputs.iter_mut()) {
            port.format = None;
        }

        self.update_state(id, NodeState::Suspended, None);
        Ok(Completion::Done)
    }

    fn pause_node(&mut self, id: NodeId) -> Result<Completion, GraphError> {
        let node = self.node(id)?;
        tracing::debug!(
            "({}-{}) pause node state:{} pause-on-idle:{}",
            node.name,
            id.0,
            node.state,
            node.pause_on_idle
        );
        if !node.on_loop() && node.pending_state <= NodeState::Idle {
            return Ok(Completion::Done);
        }

        self.deactivate_links(id)?;
        self.remove_from_loop(id)?;

        let node = self.node_mut(id)?;
        let name = Arc::clone(&node.name);
        let runtime = node.runtime.as_deref_mut().ok_or(GraphError::Busy(id))?;
        runtime.node.send_command(Command::Pause).map_err(|e| {
            tracing::debug!("({}-{}) pause node error {}", name, id.0, e);
            GraphError::node(id, e)
        })
    }

    fn start_node(&mut self, id: NodeId) -> Result<Completion, GraphError> {
        let node = self.node_mut(id)?;
        if node.pending_state >= NodeState::Running {
            return Ok(Completion::Done);
        }
        tracing::debug!("({}-{}) start node", node.name, id.0);
        self.send_start(id)
    }

    /// Sends `Start` to a follower. Drivers are started when the transition
    /// completes.
    fn send_start(&mut self, id: NodeId) -> Result<Completion, GraphError> {
        let node = self.node_mut(id)?;
        if node.driver == Some(id) {
            return Ok(Completion::Done);
        }
        let name = Arc::clone(&node.name);
        let runtime = node.runtime.as_deref_mut().ok_or(GraphError::Busy(id))?;
        runtime.node.send_command(Command::Start).map_err(|e| {
            tracing::error!("({}-{}) start node error: {}", name, id.0, e);
            GraphError::node(id, e)
        })
    }

    /// Applies a finished state change.
    pub(crate) fn on_state_complete(&mut self, id: NodeId, state: NodeState, result: Result<(), NodeError>) {
        let Ok(node) = self.node_mut(id) else {
            return;
        };
        node.pending_work = None;
        tracing::debug!("({}-{}) state complete {}: {:?}", node.name, id.0, state, result);
        let result = match node.last_error.take() {
            Some(e) => Err(e),
            None => result,
        };
        let suspended = node.state == NodeState::Suspended;
        match result {
            Ok(()) => self.update_state(id, state, None),
            Err(_) if suspended => self.update_state(id, NodeState::Suspended, None),
            Err(e) => self.update_state(id, NodeState::Error, Some(format!("error changing node state: {e}"))),
        }
    }

    pub(crate) fn update_state(&mut self, id: NodeId, state: NodeState, error: Option<String>) {
        let mut state = state;
        let mut error = error;

        if state == NodeState::Running {
            if let Err(e) = self.enter_running(id) {
                state = NodeState::Error;
                error = Some(e);
            }
        }

        let Ok(node) = self.node_mut(id) else {
            return;
        };
        let old = node.state;
        node.error = error;
        node.state = state;
        node.pending_state = state;
        tracing::debug!("({}-{}) {} -> {} ({:?})", node.name, id.0, old, state, node.error);
        if old == state {
            return;
        }

        let name = Arc::clone(&node.name);
        let error = node.error.clone();
        match &error {
            Some(e) if state == NodeState::Error => {
                tracing::error!("({}-{}) {} -> error ({})", name, id.0, old, e);
            }
            _ => tracing::info!("({}-{}) {} -> {}", name, id.0, old, state),
        }
        for listener in &self.node_listeners {
            listener.state_changed(id, old, state, error.as_deref());
        }
    }

    /// Starts a self-driving node and hands the runtime to its loop.
    fn enter_running(&mut self, id: NodeId) -> Result<(), String> {
        let node = self.node_mut(id).map_err(|e| e.to_string())?;
        if !node.active {
            return Ok(());
        }
        if node.driver == Some(id) {
            if let Some(runtime) = node.runtime.as_deref_mut() {
                runtime
                    .node
                    .send_command(Command::Start)
                    .map_err(|e| format!("Start error: {e}"))?;
            }
        }
        self.add_to_loop(id).map_err(|e| e.to_string())
    }

    fn add_to_loop(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.node(id)?;
        if node.on_loop() {
            return Ok(());
        }
        let driver = node.driver.ok_or(GraphError::NoDriver(id))?;
        let driver_shared = Arc::clone(&self.node(driver)?.shared);
        let loop_id = node.data_loop;

        let (rate, quantum, sync_timeout) = (
            self.config.rate,
            self.config.quantum,
            self.config.sync_timeout_nsec(),
        );
        let node = self.node_mut(id)?;
        let Some(mut runtime) = node.runtime.take() else {
            return Ok(());
        };
        runtime.driving = driver == id;
        if runtime.driving {
            let a = &runtime.shared.activation;
            a.position().set_clock(rate, quantum);
            a.set_sync_timeout(sync_timeout);
            a.request(DriverCommand::Start);
        }
        self.loop_mut(loop_id)?.add(runtime, driver_shared)
    }

    /// Takes the runtime back from the data loop.
    pub(crate) fn remove_from_loop(&mut self, id: NodeId) -> Result<(), GraphError> {
        let node = self.node(id)?;
        if !node.on_loop() {
            return Ok(());
        }
        let loop_id = node.data_loop;
        let driver = node.driver.ok_or(GraphError::NoDriver(id))?;
        let driver_shared = Arc::clone(&self.node(driver)?.shared);
        let runtime = self
            .loop_mut(loop_id)?
            .remove(id, driver_shared)?
            .ok_or(GraphError::NodeNotFound(id))?;
        self.node_mut(id)?.runtime = Some(runtime);
        Ok(())
    }

    /// Runs `f` against the runtime of `id`, on the control thread when the
    /// node is off its loop and on the loop otherwise.
    pub(crate) fn with_runtime<R, F>(&mut self, id: NodeId, f: F) -> Result<R, GraphError>
    where
        R: Send + 'static,
        F: FnOnce(&mut NodeRuntime) -> R + Send + 'static,
    {
        let node = self.node_mut(id)?;
        if let Some(runtime) = node.runtime.as_deref_mut() {
            return Ok(f(runtime));
        }
        let loop_id = node.data_loop;
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.loop_mut(loop_id)?.invoke(
            id,
            Box::new(move |runtime| {
                let _ = tx.send(runtime.map(f));
            }),
        )?;
        rx.recv()
            .map_err(|_| GraphError::LoopDisconnected(loop_id))?
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Sets or clears the format of a port.
    ///
    /// # Errors
    ///
    /// [`GraphError::Busy`] while the node runs, [`GraphError::PortNotFound`]
    /// and [`GraphError::Node`] when the implementation refuses.
    pub fn port_set_format(
        &mut self,
        id: NodeId,
        direction: Direction,
        port: u32,
        format: Option<AudioInfo>,
    ) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        if node.port_mut(direction, port).is_none() {
            return Err(GraphError::PortNotFound {
                node: id,
                direction,
                port,
            });
        }
        let name = Arc::clone(&node.name);
        let runtime = node.runtime.as_deref_mut().ok_or(GraphError::Busy(id))?;
        runtime
            .node
            .port_set_format(direction, port, format.as_ref())
            .map_err(|e| GraphError::node(id, e))?;
        match &format {
            Some(f) => tracing::debug!("({}-{}) {} port {} format {}", name, id.0, direction, port, f),
            None => tracing::debug!("({}-{}) {} port {} format cleared", name, id.0, direction, port),
        }
        if let Some(state) = node.port_mut(direction, port) {
            state.format = format;
        }
        Ok(())
    }

    /// Negotiated format of a port.
    pub fn port_format(&self, id: NodeId, direction: Direction, port: u32) -> Result<Option<&AudioInfo>, GraphError> {
        let node = self.node(id)?;
        node.ports(direction)
            .get(port as usize)
            .map(|p| p.format.as_ref())
            .ok_or(GraphError::PortNotFound {
                node: id,
                direction,
                port,
            })
    }

    /// Sets a parameter, on the data loop when the node runs.
    pub fn set_param(&mut self, id: NodeId, param_id: ParamId, flags: u32, param: Option<Param>) -> Result<Completion, GraphError> {
        self.with_runtime(id, move |rt| rt.node.set_param(param_id, flags, param.as_ref()))?
            .map_err(|e| GraphError::node(id, e))
    }

    /// Lists parameters, on the data loop when the node runs.
    pub fn enum_params(&mut self, id: NodeId, param_id: ParamId, start: u32, num: u32) -> Result<Vec<Param>, GraphError> {
        self.with_runtime(id, move |rt| rt.node.enum_params(param_id, start, num))?
            .map_err(|e| GraphError::node(id, e))
    }

    /// Sends a command straight to the implementation.
    pub fn send_command(&mut self, id: NodeId, command: Command) -> Result<Completion, GraphError> {
        self.with_runtime(id, move |rt| rt.node.send_command(command))?
            .map_err(|e| GraphError::node(id, e))
    }

    /// Registers a node state listener.
    pub fn add_node_listener(&mut self, listener: Box<dyn NodeListener>) {
        self.node_listeners.push(listener);
    }
}
