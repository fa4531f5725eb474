//! Data loops: owners of node runtimes and executors of triggered nodes.
//!
//! A loop owns the [`NodeRuntime`] of every node running on it and a
//! lock-free ready queue fed by [`Wakeup::signal`](crate::target). Posts
//! never fail: a full queue spills into an unbounded overflow. A wakeup
//! posts only on its 0 to 1 edge, so every post has to reach the loop.
//! A loop is
//! either driven inline by [`Context::cycle`](crate::Context::cycle) or runs
//! on its own thread, where it also keeps time for its drivers.
//!
//! Control messages (adding, removing and reaching into a runtime) travel
//! over a channel and are handled between quanta, never while a node is
//! processing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{JoinHandle, Thread};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use crossbeam_queue::{ArrayQueue, SegQueue};

use crate::error::GraphError;
use crate::events::Hooks;
use crate::id::{LoopId, NodeId};
use crate::runtime::NodeRuntime;
use crate::scheduler::{self, NodeShared};
use crate::time::now_nsec;

/// Default capacity of a loop's ready queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Longest time an idle loop thread parks before polling its channel.
const IDLE_PARK: Duration = Duration::from_millis(10);

/// Smallest driver period a loop thread will honour.
const MIN_PERIOD_NSEC: u64 = 100_000;

/// Ready queue and parking handle of one loop, shared with every wakeup
/// that posts to it.
#[derive(Debug)]
pub(crate) struct LoopShared {
    queue: ArrayQueue<NodeId>,
    /// Takes posts the preallocated queue has no room for.
    overflow: SegQueue<NodeId>,
    spilled: AtomicBool,
    thread: OnceLock<Thread>,
}

impl LoopShared {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow: SegQueue::new(),
            spilled: AtomicBool::new(false),
            thread: OnceLock::new(),
        }
    }

    /// Queues `id` and wakes the loop thread. Never blocks and never drops.
    pub(crate) fn post(&self, id: NodeId) {
        if let Err(id) = self.queue.push(id) {
            if !self.spilled.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    "ready queue full ({} slots), spilling wakeup for {}",
                    self.queue.capacity(),
                    id
                );
            }
            self.overflow.push(id);
        }
        self.unpark();
    }

    pub(crate) fn pop(&self) -> Option<NodeId> {
        self.queue.pop().or_else(|| self.overflow.pop())
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.overflow.is_empty()
    }

    fn unpark(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }
}

/// Closure run against one runtime on the loop that owns it.
pub(crate) type InvokeFn = Box<dyn FnOnce(Option<&mut NodeRuntime>) + Send>;

/// Control messages for a threaded loop.
pub(crate) enum LoopMessage {
    Add {
        runtime: Box<NodeRuntime>,
        driver: Arc<NodeShared>,
    },
    Remove {
        node: NodeId,
        driver: Arc<NodeShared>,
        reply: Sender<Option<Box<NodeRuntime>>>,
    },
    Invoke {
        node: NodeId,
        func: InvokeFn,
    },
    Quit,
}

#[derive(Debug, Clone, Copy)]
struct DriverSlot {
    id: NodeId,
    next: u64,
}

/// Everything a loop owns. Lives on the loop thread, or inside the
/// [`DataLoop`] for inline loops.
pub(crate) struct LoopState {
    id: LoopId,
    shared: Arc<LoopShared>,
    hooks: Arc<Hooks>,
    nodes: Vec<Option<Box<NodeRuntime>>>,
    drivers: Vec<DriverSlot>,
}

impl LoopState {
    fn new(id: LoopId, shared: Arc<LoopShared>, hooks: Arc<Hooks>) -> Self {
        Self {
            id,
            shared,
            hooks,
            nodes: Vec::new(),
            drivers: Vec::new(),
        }
    }

    fn runtime_mut(&mut self, node: NodeId) -> Option<&mut NodeRuntime> {
        self.nodes.get_mut(node.index() as usize).and_then(Option::as_deref_mut)
    }

    fn add(&mut self, runtime: Box<NodeRuntime>, driver: &NodeShared) {
        let id = runtime.shared.id;
        // stale signals from a previous membership
        runtime.shared.wakeup.read();
        scheduler::add_node(&runtime.shared, driver);
        if runtime.driving {
            self.drivers.push(DriverSlot { id, next: 0 });
        }
        let index = id.index() as usize;
        if self.nodes.len() <= index {
            self.nodes.resize_with(index + 1, || None);
        }
        tracing::debug!("({}-{}) added to data loop {}", runtime.shared.name, id.0, self.id.0);
        self.nodes[index] = Some(runtime);
    }

    fn remove(&mut self, node: NodeId, driver: &NodeShared) -> Option<Box<NodeRuntime>> {
        let runtime = self.nodes.get_mut(node.index() as usize).and_then(Option::take)?;
        scheduler::remove_node(&runtime.shared, driver);
        self.drivers.retain(|d| d.id != node);
        tracing::debug!("({}-{}) removed from data loop {}", runtime.shared.name, node.0, self.id.0);
        Some(runtime)
    }

    fn handle(&mut self, message: LoopMessage) -> bool {
        match message {
            LoopMessage::Add { runtime, driver } => self.add(runtime, &driver),
            LoopMessage::Remove { node, driver, reply } => {
                let runtime = self.remove(node, &driver);
                if reply.send(runtime).is_err() {
                    tracing::warn!("data loop {}: remove reply dropped for {}", self.id.0, node);
                }
            }
            LoopMessage::Invoke { node, func } => func(self.runtime_mut(node)),
            LoopMessage::Quit => return false,
        }
        true
    }

    /// Runs every node on the ready queue. Returns how many were run.
    fn dispatch(&mut self) -> usize {
        let mut n = 0;
        while let Some(id) = self.shared.pop() {
            n += 1;
            let hooks = Arc::clone(&self.hooks);
            match self.runtime_mut(id) {
                Some(runtime) => runtime.on_signal(&hooks, now_nsec()),
                None => tracing::trace!("data loop {}: {} is not here", self.id.0, id),
            }
        }
        n
    }

    /// Ticks every driver once.
    fn tick_all(&mut self, now: u64) {
        for i in 0..self.drivers.len() {
            let id = self.drivers[i].id;
            self.tick_driver(id, now);
        }
    }

    /// Ticks the drivers whose deadline passed. Returns the nearest
    /// upcoming deadline.
    fn tick_due(&mut self, now: u64) -> Option<u64> {
        let mut nearest: Option<u64> = None;
        for i in 0..self.drivers.len() {
            let slot = self.drivers[i];
            let mut next = if slot.next == 0 { now } else { slot.next };
            if now >= next {
                let period = self.tick_driver(slot.id, now).max(MIN_PERIOD_NSEC);
                next = next.saturating_add(period);
                if next <= now {
                    // fell behind by more than a period
                    next = now.saturating_add(period);
                }
                self.drivers[i].next = next;
            }
            nearest = Some(nearest.map_or(next, |n| n.min(next)));
        }
        nearest
    }

    /// Starts one quantum on `id`. Returns the driver's period.
    fn tick_driver(&mut self, id: NodeId, now: u64) -> u64 {
        let hooks = Arc::clone(&self.hooks);
        match self.runtime_mut(id) {
            Some(runtime) => {
                runtime.drive(&hooks, now);
                runtime.shared.activation.position().clock().period_nsec()
            }
            None => 0,
        }
    }

    fn run(mut self, rx: &Receiver<LoopMessage>) {
        let _ = self.shared.thread.set(std::thread::current());
        tracing::debug!("data loop {} started", self.id.0);
        'outer: loop {
            loop {
                match rx.try_recv() {
                    Ok(message) => {
                        if !self.handle(message) {
                            break 'outer;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => break 'outer,
                }
            }
            self.dispatch();
            let next = self.tick_due(now_nsec());
            self.dispatch();

            let wait = next.map_or(IDLE_PARK, |deadline| {
                Duration::from_nanos(deadline.saturating_sub(now_nsec())).min(IDLE_PARK)
            });
            if !wait.is_zero() && self.shared.is_empty() {
                std::thread::park_timeout(wait);
            }
        }
        tracing::debug!("data loop {} stopped", self.id.0);
    }
}

enum Mode {
    Inline(Box<LoopState>),
    Threaded {
        tx: Sender<LoopMessage>,
        handle: Option<JoinHandle<()>>,
    },
}

/// A data loop, inline or threaded.
pub struct DataLoop {
    id: LoopId,
    shared: Arc<LoopShared>,
    mode: Mode,
}

impl std::fmt::Debug for DataLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoop")
            .field("id", &self.id)
            .field("threaded", &self.is_threaded())
            .finish()
    }
}

impl DataLoop {
    pub(crate) fn inline(id: LoopId, hooks: Arc<Hooks>, capacity: usize) -> Self {
        let shared = Arc::new(LoopShared::new(capacity));
        let state = LoopState::new(id, Arc::clone(&shared), hooks);
        Self {
            id,
            shared,
            mode: Mode::Inline(Box::new(state)),
        }
    }

    pub(crate) fn spawn(id: LoopId, name: String, hooks: Arc<Hooks>, capacity: usize) -> Result<Self, GraphError> {
        let shared = Arc::new(LoopShared::new(capacity));
        let state = LoopState::new(id, Arc::clone(&shared), hooks);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = std::thread::Builder::new()
            .name(name)
            .spawn(move || state.run(&rx))
            .map_err(GraphError::Spawn)?;
        Ok(Self {
            id,
            shared,
            mode: Mode::Threaded {
                tx,
                handle: Some(handle),
            },
        })
    }

    /// Id of this loop.
    pub fn id(&self) -> LoopId {
        self.id
    }

    /// Returns `true` if the loop runs on its own thread.
    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded { .. })
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared> {
        &self.shared
    }

    fn send(&self, tx: &Sender<LoopMessage>, message: LoopMessage) -> Result<(), GraphError> {
        tx.send(message).map_err(|_| GraphError::LoopDisconnected(self.id))?;
        self.shared.unpark();
        Ok(())
    }

    pub(crate) fn add(&mut self, runtime: Box<NodeRuntime>, driver: Arc<NodeShared>) -> Result<(), GraphError> {
        match &mut self.mode {
            Mode::Inline(state) => {
                state.add(runtime, &driver);
                Ok(())
            }
            Mode::Threaded { tx, .. } => {
                let tx = tx.clone();
                self.send(&tx, LoopMessage::Add { runtime, driver })
            }
        }
    }

    /// Takes a runtime back from the loop. Blocks on a threaded loop until
    /// it has finished the current quantum.
    pub(crate) fn remove(
        &mut self,
        node: NodeId,
        driver: Arc<NodeShared>,
    ) -> Result<Option<Box<NodeRuntime>>, GraphError> {
        match &mut self.mode {
            Mode::Inline(state) => Ok(state.remove(node, &driver)),
            Mode::Threaded { tx, .. } => {
                let tx = tx.clone();
                let (reply, rx) = crossbeam_channel::bounded(1);
                self.send(&tx, LoopMessage::Remove { node, driver, reply })?;
                rx.recv().map_err(|_| GraphError::LoopDisconnected(self.id))
            }
        }
    }

    /// Runs `func` against the runtime of `node` on the loop. Inline loops
    /// run it before returning.
    pub(crate) fn invoke(&mut self, node: NodeId, func: InvokeFn) -> Result<(), GraphError> {
        match &mut self.mode {
            Mode::Inline(state) => {
                func(state.runtime_mut(node));
                Ok(())
            }
            Mode::Threaded { tx, .. } => {
                let tx = tx.clone();
                self.send(&tx, LoopMessage::Invoke { node, func })
            }
        }
    }

    /// Ticks every driver of an inline loop. Threaded loops keep their own
    /// time and ignore this.
    pub(crate) fn tick(&mut self, now: u64) {
        if let Mode::Inline(state) = &mut self.mode {
            state.tick_all(now);
        }
    }

    /// Runs the ready nodes of an inline loop. Returns how many ran.
    pub(crate) fn dispatch(&mut self) -> usize {
        match &mut self.mode {
            Mode::Inline(state) => state.dispatch(),
            Mode::Threaded { .. } => 0,
        }
    }
}

impl Drop for DataLoop {
    fn drop(&mut self) {
        if let Mode::Threaded { tx, handle } = &mut self.mode {
            let _ = tx.send(LoopMessage::Quit);
            self.shared.unpark();
            let panicked = handle.take().is_some_and(|h| h.join().is_err());
            if panicked {
                tracing::error!("data loop {} panicked", self.id.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_wakes_queue_in_order() {
        let shared = LoopShared::new(4);
        shared.post(NodeId(2));
        shared.post(NodeId(5));
        assert_eq!(shared.pop(), Some(NodeId(2)));
        assert_eq!(shared.pop(), Some(NodeId(5)));
        assert_eq!(shared.pop(), None);
    }

    #[test]
    fn full_queue_spills_instead_of_dropping() {
        let shared = LoopShared::new(1);
        shared.post(NodeId(1));
        shared.post(NodeId(2));
        shared.post(NodeId(3));
        assert!(!shared.is_empty());
        assert_eq!(shared.pop(), Some(NodeId(1)));
        assert_eq!(shared.pop(), Some(NodeId(2)));
        assert_eq!(shared.pop(), Some(NodeId(3)));
        assert_eq!(shared.pop(), None);
        assert!(shared.is_empty());
    }

    #[test]
    fn threaded_loop_shuts_down_on_drop() {
        let (hooks, _rx) = Hooks::new();
        let data_loop = DataLoop::spawn(LoopId(1), "cauce-test".into(), hooks, 8);
        assert!(data_loop.is_ok_and(|l| l.is_threaded()));
    }

    #[test]
    fn invoke_on_missing_node_sees_none() {
        let (hooks, _rx) = Hooks::new();
        let mut data_loop = DataLoop::inline(LoopId::MAIN, hooks, 8);
        let (tx, rx) = crossbeam_channel::bounded(1);
        data_loop
            .invoke(
                NodeId(3),
                Box::new(move |rt| {
                    let _ = tx.send(rt.is_none());
                }),
            )
            .unwrap();
        assert_eq!(rx.recv().ok(), Some(true));
    }
}
