//! Wakeup counters and trigger targets.
//!
//! A [`Target`] is how one node reaches another on the hot path: the
//! target's activation (to decrement its join counter) and its [`Wakeup`]
//! (to post it on its data loop). It carries no reference to the node
//! itself, so target lists can point in both directions between a driver
//! and its followers without forming ownership cycles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::activation::{Activation, ActivationStatus};
use crate::data_loop::LoopShared;
use crate::id::{LinkId, NodeId};

/// Eventfd-style wakeup counter.
///
/// Signals add to the counter and post the node on its loop's ready queue
/// only on the 0 to 1 edge. The loop swaps the counter back to zero before
/// running the node. A value above 1 at that point means earlier wakeups
/// were coalesced.
#[derive(Debug)]
pub(crate) struct Wakeup {
    id: NodeId,
    count: AtomicU64,
    data_loop: Arc<LoopShared>,
}

impl Wakeup {
    pub(crate) fn new(id: NodeId, data_loop: Arc<LoopShared>) -> Self {
        Self {
            id,
            count: AtomicU64::new(0),
            data_loop,
        }
    }

    /// Posts the node on its loop. Never blocks.
    #[inline]
    pub(crate) fn signal(&self) {
        if self.count.fetch_add(1, Ordering::AcqRel) == 0 {
            self.data_loop.post(self.id);
        }
    }

    /// Consumes all pending signals and returns how many there were.
    #[inline]
    pub(crate) fn read(&self) -> u64 {
        self.count.swap(0, Ordering::AcqRel)
    }
}

/// What put an entry on a target list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TargetKind {
    /// The driver triggering one of its followers.
    Follower,
    /// A link from an output port to the node owning the input port.
    Link(LinkId),
    /// A follower reporting back to its driver.
    Driver,
}

/// Non-owning trigger handle to a node.
#[derive(Debug, Clone)]
pub struct Target {
    pub(crate) id: NodeId,
    pub(crate) name: Arc<str>,
    pub(crate) kind: TargetKind,
    pub(crate) activation: Arc<Activation>,
    pub(crate) wakeup: Arc<Wakeup>,
}

impl Target {
    /// Id of the node this target triggers.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Name of the node this target triggers.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Activation record of the target node.
    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    /// Posts one completion to the target. When that was the last one the
    /// target is marked triggered and signalled. Returns `true` in that case.
    #[inline]
    pub(crate) fn trigger(&self, nsec: u64) -> bool {
        if self.activation.state().dec() {
            self.activation.set_status(ActivationStatus::Triggered);
            self.activation.set_signal_time(nsec);
            self.wakeup.signal();
            true
        } else {
            false
        }
    }
}
