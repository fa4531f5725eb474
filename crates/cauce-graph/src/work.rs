//! Deferred completion of node state changes.
//!
//! A state request queues one item carrying the requested state and the
//! result of the command that was sent. Items whose command finished
//! synchronously are ready at once; items waiting on
//! [`Completion::Pending`] become ready when the implementation reports
//! the matching sequence number. A newer request cancels the older item.

use std::collections::VecDeque;

use crate::error::NodeError;
use crate::id::NodeId;
use crate::implementation::Completion;
use crate::node::NodeState;

/// Handle to a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkId(u32);

#[derive(Debug)]
enum Wait {
    Ready(Result<(), NodeError>),
    Seq(u32),
}

#[derive(Debug)]
struct Item {
    id: WorkId,
    node: NodeId,
    state: NodeState,
    wait: Wait,
}

/// A finished item, to be applied by the node state machine.
#[derive(Debug)]
pub(crate) struct Finished {
    pub(crate) node: NodeId,
    pub(crate) state: NodeState,
    pub(crate) result: Result<(), NodeError>,
}

#[derive(Debug, Default)]
pub(crate) struct WorkQueue {
    items: VecDeque<Item>,
    next: u32,
}

impl WorkQueue {
    pub(crate) fn add(&mut self, node: NodeId, result: Result<Completion, NodeError>, state: NodeState) -> WorkId {
        let id = WorkId(self.next);
        self.next = self.next.wrapping_add(1);
        let wait = match result {
            Ok(Completion::Done) => Wait::Ready(Ok(())),
            Ok(Completion::Pending(seq)) => Wait::Seq(seq),
            Err(e) => Wait::Ready(Err(e)),
        };
        tracing::trace!("work {} for {} -> {}: {:?}", id.0, node, state, wait);
        self.items.push_back(Item { id, node, state, wait });
        id
    }

    pub(crate) fn cancel(&mut self, id: WorkId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        before != self.items.len()
    }

    /// Marks the item of `node` waiting on `seq` as ready. Returns `false`
    /// if no such item is queued.
    pub(crate) fn complete(&mut self, node: NodeId, seq: u32, result: Result<(), NodeError>) -> bool {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.node == node && matches!(item.wait, Wait::Seq(s) if s == seq));
        match item {
            Some(item) => {
                item.wait = Wait::Ready(result);
                true
            }
            None => {
                tracing::debug!("{} completed unknown seq {}", node, seq);
                false
            }
        }
    }

    /// Removes and returns the first ready item.
    pub(crate) fn pop_ready(&mut self) -> Option<Finished> {
        let index = self.items.iter().position(|item| matches!(item.wait, Wait::Ready(_)))?;
        let item = self.items.remove(index)?;
        let Wait::Ready(result) = item.wait else {
            return None;
        };
        Some(Finished {
            node: item.node,
            state: item.state,
            result,
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
