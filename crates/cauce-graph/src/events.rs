//! Listener traits and the event plumbing between data loops and the
//! control plane.
//!
//! Driver events are delivered on the data thread that observed them, so
//! [`DriverListener`] methods must be quick and must not block. Node state
//! changes are delivered on the control thread from
//! [`Context::dispatch`](crate::Context::dispatch).

use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::error::{NodeError, ProcessError};
use crate::id::NodeId;
use crate::node::NodeState;

/// Capacity of the data-to-control notice queue.
pub const NOTICE_CAPACITY: usize = 1024;

/// Observer of driver cycles. Called from data threads.
pub trait DriverListener: Send + Sync {
    /// A driver began a quantum.
    fn start(&self, _driver: NodeId) {}
    /// Every follower finished the quantum.
    fn complete(&self, _driver: NodeId) {}
    /// A driver ticked before its previous quantum finished.
    fn incomplete(&self, _driver: NodeId) {}
    /// Followers failed to sync within the sync timeout.
    fn timeout(&self, _driver: NodeId) {}
    /// A node missed its deadline.
    fn xrun(&self, _node: NodeId) {}
    /// A node reported the end of its stream.
    fn drained(&self, _node: NodeId) {}
}

/// Observer of node state changes. Called on the control thread.
pub trait NodeListener: Send {
    /// `node` moved from `old` to `new`. `error` is set when `new` is
    /// [`NodeState::Error`].
    fn state_changed(&self, node: NodeId, old: NodeState, new: NodeState, error: Option<&str>);
}

/// Message from a data thread or an implementation to the control plane.
#[derive(Debug)]
pub(crate) enum Notice {
    /// `process` failed.
    ProcessFailed { node: NodeId, error: ProcessError },
    /// An asynchronous operation finished.
    Completed {
        node: NodeId,
        seq: u32,
        result: Result<(), NodeError>,
    },
}

/// Listener registry and notice queue shared by every loop of a context.
pub(crate) struct Hooks {
    listeners: ArcSwap<Vec<Arc<dyn DriverListener>>>,
    notices: Sender<Notice>,
}

impl Hooks {
    pub(crate) fn new() -> (Arc<Self>, Receiver<Notice>) {
        let (tx, rx) = crossbeam_channel::bounded(NOTICE_CAPACITY);
        let hooks = Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
            notices: tx,
        };
        (Arc::new(hooks), rx)
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn DriverListener>) {
        self.listeners.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&listener));
            next
        });
    }

    /// Queues a notice without blocking. Drops it when the queue is full.
    pub(crate) fn notify(&self, notice: Notice) {
        match self.notices.try_send(notice) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => tracing::warn!("notice queue full, dropping {:?}", n),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn each(&self, f: impl Fn(&dyn DriverListener)) {
        for l in self.listeners.load().iter() {
            f(l.as_ref());
        }
    }

    pub(crate) fn emit_start(&self, driver: NodeId) {
        self.each(|l| l.start(driver));
    }

    pub(crate) fn emit_complete(&self, driver: NodeId) {
        self.each(|l| l.complete(driver));
    }

    pub(crate) fn emit_incomplete(&self, driver: NodeId) {
        self.each(|l| l.incomplete(driver));
    }

    pub(crate) fn emit_timeout(&self, driver: NodeId) {
        self.each(|l| l.timeout(driver));
    }

    pub(crate) fn emit_xrun(&self, node: NodeId) {
        self.each(|l| l.xrun(node));
    }

    pub(crate) fn emit_drained(&self, node: NodeId) {
        self.each(|l| l.drained(node));
    }
}
