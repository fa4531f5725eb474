//! The graph context: node and link arenas, data loops and the control
//! thread's event pump.

use std::sync::Arc;
use std::time::Duration;

use cauce_config::Settings;
use cauce_dsp::{CpuFlags, ResampleConfig, ResampleMethod};
use crossbeam_channel::Receiver;

use crate::activation::{Activation, DriverCommand};
use crate::data_loop::{DEFAULT_QUEUE_CAPACITY, DataLoop};
use crate::error::GraphError;
use crate::events::{DriverListener, Hooks, NodeListener, Notice};
use crate::id::{Direction, LoopId, NodeId};
use crate::implementation::{NodeCallbacks, NodeImpl};
use crate::link::Link;
use crate::node::{Node, NodeProps, NodeState, PortState};
use crate::runtime::NodeRuntime;
use crate::scheduler::NodeShared;
use crate::target::Wakeup;
use crate::time::now_nsec;
use crate::work::WorkQueue;

/// Engine-wide parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Graph sample rate.
    pub rate: u32,
    /// Frames per quantum.
    pub quantum: u64,
    /// Largest quantum; sizes link buffers.
    pub max_quantum: u32,
    /// How long a starting driver waits for followers to sync.
    pub sync_timeout: Duration,
    /// CPU features handed to converters.
    pub cpu_flags: CpuFlags,
    /// Resampler quality index.
    pub resample_quality: u32,
    /// Use the peak decimator instead of the polyphase resampler.
    pub resample_peaks: bool,
    /// Default for [`NodeProps::pause_on_idle`].
    pub pause_on_idle: bool,
    /// Preallocated ready queue slots of each data loop. Further posts
    /// spill into an overflow queue.
    pub queue_capacity: usize,
}

impl EngineConfig {
    /// The sync timeout in nanoseconds.
    pub fn sync_timeout_nsec(&self) -> u64 {
        u64::try_from(self.sync_timeout.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Resampler parameters for a stream under this configuration.
    pub fn resample_config(&self, channels: u32, in_rate: u32, out_rate: u32) -> ResampleConfig {
        let method = if self.resample_peaks {
            ResampleMethod::Peaks
        } else {
            ResampleMethod::Native
        };
        ResampleConfig::new(channels, in_rate, out_rate)
            .with_quality(self.resample_quality)
            .with_method(method)
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            rate: settings.clock.rate,
            quantum: u64::from(settings.clock.quantum),
            max_quantum: settings.clock.max_quantum,
            sync_timeout: settings.sync_timeout(),
            cpu_flags: settings.effective_cpu_flags(),
            resample_quality: settings.resample.quality,
            resample_peaks: settings.resample.peaks,
            pause_on_idle: settings.node.pause_on_idle,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

/// Owner of every node, link and data loop of one graph.
///
/// All methods run on the control thread. Nodes on threaded loops are
/// reached through blocking loop invocations; nodes on the main loop run
/// when [`cycle`](Self::cycle) is called.
pub struct Context {
    pub(crate) config: EngineConfig,
    hooks: Arc<Hooks>,
    notices: Receiver<Notice>,
    nodes: Vec<Option<Node>>,
    pub(crate) links: Vec<Option<Link>>,
    loops: Vec<Option<DataLoop>>,
    pub(crate) work: WorkQueue,
    pub(crate) node_listeners: Vec<Box<dyn NodeListener>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("nodes", &self.nodes.iter().flatten().count())
            .field("links", &self.links.iter().flatten().count())
            .field("loops", &self.loops.len())
            .finish()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Context {
    /// Creates a context with an inline main loop.
    pub fn new(config: EngineConfig) -> Self {
        let (hooks, notices) = Hooks::new();
        let main = DataLoop::inline(LoopId::MAIN, Arc::clone(&hooks), config.queue_capacity);
        tracing::debug!(
            "context: rate:{} quantum:{} sync-timeout:{:?} cpu:{}",
            config.rate,
            config.quantum,
            config.sync_timeout,
            config.cpu_flags
        );
        Self {
            config,
            hooks,
            notices,
            nodes: Vec::new(),
            links: Vec::new(),
            loops: vec![Some(main)],
            work: WorkQueue::default(),
            node_listeners: Vec::new(),
        }
    }

    /// Creates a context from loaded settings.
    pub fn with_settings(settings: &Settings) -> Self {
        Self::new(EngineConfig::from(settings))
    }

    /// Engine parameters.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Starts a data loop on its own thread.
    ///
    /// # Errors
    ///
    /// [`GraphError::Spawn`] if the thread cannot be created.
    pub fn spawn_data_loop(&mut self, name: &str) -> Result<LoopId, GraphError> {
        let id = LoopId(self.loops.len() as u32);
        let data_loop = DataLoop::spawn(id, name.to_string(), Arc::clone(&self.hooks), self.config.queue_capacity)?;
        tracing::debug!("data loop {} ({}) spawned", id.0, name);
        self.loops.push(Some(data_loop));
        Ok(id)
    }

    /// Adds a node in [`NodeState::Suspended`].
    ///
    /// Driver-capable nodes start out driving themselves. Nodes start out
    /// active.
    pub fn add_node(&mut self, props: NodeProps, mut node: Box<dyn NodeImpl>) -> Result<NodeId, GraphError> {
        let id = NodeId(self.nodes.len() as u32);
        let data_loop = self
            .loops
            .get(props.data_loop.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphError::LoopNotFound(props.data_loop))?;

        let name: Arc<str> = if props.name.is_empty() {
            Arc::from(node.name())
        } else {
            Arc::from(props.name.as_str())
        };
        let wakeup = Arc::new(Wakeup::new(id, Arc::clone(data_loop.shared())));
        let shared = Arc::new(NodeShared::new(id, Arc::clone(&name), wakeup));
        node.set_callbacks(NodeCallbacks {
            shared: Arc::clone(&shared),
            hooks: Arc::clone(&self.hooks),
        });

        let n_inputs = node.port_count(Direction::Input) as usize;
        let n_outputs = node.port_count(Direction::Output) as usize;
        let runtime = NodeRuntime::new(Arc::clone(&shared), node, n_inputs, n_outputs);

        tracing::debug!("({}-{}) new node inputs:{} outputs:{}", name, id.0, n_inputs, n_outputs);
        self.nodes.push(Some(Node {
            id,
            name,
            shared,
            runtime: Some(Box::new(runtime)),
            data_loop: props.data_loop,
            can_drive: props.driver,
            driver: props.driver.then_some(id),
            active: true,
            pause_on_idle: props.pause_on_idle.unwrap_or(self.config.pause_on_idle),
            state: NodeState::Creating,
            pending_state: NodeState::Creating,
            pending_work: None,
            last_error: None,
            error: None,
            inputs: (0..n_inputs).map(|_| PortState::default()).collect(),
            outputs: (0..n_outputs).map(|_| PortState::default()).collect(),
        }));
        self.update_state(id, NodeState::Suspended, None);
        Ok(id)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::NodeNotFound(id))
    }

    pub(crate) fn loop_mut(&mut self, id: LoopId) -> Result<&mut DataLoop, GraphError> {
        self.loops
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::LoopNotFound(id))
    }

    /// Name of a node.
    pub fn node_name(&self, id: NodeId) -> Result<&str, GraphError> {
        Ok(&self.node(id)?.name)
    }

    /// Returns `true` while the node's runtime is on its data loop.
    pub fn is_on_loop(&self, id: NodeId) -> Result<bool, GraphError> {
        Ok(self.node(id)?.on_loop())
    }

    /// Activation record of a node, for inspection.
    pub fn activation(&self, id: NodeId) -> Result<Arc<Activation>, GraphError> {
        Ok(Arc::clone(&self.node(id)?.shared.activation))
    }

    /// Posts a transport command to a driver's next quantum.
    pub fn request_driver(&self, driver: NodeId, command: DriverCommand) -> Result<(), GraphError> {
        self.node(driver)?.shared.activation.request(command);
        Ok(())
    }

    /// Asks a running driver to resynchronize its followers, as after a
    /// seek.
    pub fn request_reposition(&self, driver: NodeId) -> Result<(), GraphError> {
        self.node(driver)?.shared.activation.request_reposition();
        Ok(())
    }

    /// Registers a driver event listener. Called on data threads.
    pub fn add_driver_listener(&self, listener: Arc<dyn DriverListener>) {
        self.hooks.add_listener(listener);
    }

    /// Applies every finished state change.
    pub(crate) fn process_work(&mut self) {
        while let Some(done) = self.work.pop_ready() {
            self.on_state_complete(done.node, done.state, done.result);
        }
    }

    /// Handles notices from data loops and implementations, then finishes
    /// ready state changes. Returns the number of notices handled.
    pub fn dispatch(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(notice) = self.notices.try_recv() {
            handled += 1;
            match notice {
                Notice::ProcessFailed { node, error } => {
                    let failed = self.node(node).is_ok_and(|n| n.state != NodeState::Error);
                    if failed {
                        self.update_state(node, NodeState::Error, Some(format!("process error: {error}")));
                    }
                }
                Notice::Completed { node, seq, result } => {
                    if !self.work.complete(node, seq, result.clone())
                        && let Err(e) = result
                        && let Ok(n) = self.node_mut(node)
                    {
                        n.last_error = Some(e);
                    }
                }
            }
        }
        self.process_work();
        handled
    }

    /// Runs one quantum on every inline loop: ticks their drivers, runs
    /// triggered nodes until none is left, then dispatches notices.
    /// Returns the number of node wakeups handled.
    pub fn cycle(&mut self) -> usize {
        let now = now_nsec();
        for data_loop in self.loops.iter_mut().flatten() {
            data_loop.tick(now);
        }
        let mut total = 0;
        loop {
            let n: usize = self.loops.iter_mut().flatten().map(DataLoop::dispatch).sum();
            if n == 0 {
                break;
            }
            total += n;
        }
        self.dispatch();
        total
    }
}
