//! Join accounting and the driver/follower trigger protocol.
//!
//! Every node publishes a [`NodeShared`]: its activation, its wakeup and the
//! list of targets it triggers when it finishes. A driver's list holds its
//! followers and the downstream ends of its output links. A follower's list
//! holds the downstream ends of its output links, and it also keeps a
//! separate target back to its driver.
//!
//! Join counts follow from membership:
//!
//! - a driver requires one completion per follower;
//! - a follower requires one trigger from its driver plus one per active
//!   incoming link.
//!
//! Each increment is guarded by a flag so that repeated adds and removes
//! never count an edge twice. Target lists are immutable snapshots behind
//! [`ArcSwap`], so any thread finishing a node can walk them without a lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};

use crate::activation::{Activation, ActivationStatus, DriverCommand, PositionState};
use crate::events::Hooks;
use crate::id::{LinkId, NodeId};
use crate::ratelimit::RateLimit;
use crate::target::{Target, TargetKind, Wakeup};

/// State of one node that other threads may touch.
pub(crate) struct NodeShared {
    pub(crate) id: NodeId,
    pub(crate) name: Arc<str>,
    pub(crate) activation: Arc<Activation>,
    pub(crate) wakeup: Arc<Wakeup>,
    /// Nodes triggered when this one finishes.
    pub(crate) targets: ArcSwap<Vec<Target>>,
    /// The driver, notified when this follower finishes.
    pub(crate) driver_target: ArcSwapOption<Target>,
    /// This node's own `required` counts its driver's trigger.
    target_active: AtomicBool,
    /// The driver's `required` counts this node.
    driver_target_active: AtomicBool,
    /// Limits "graph not finished" lines.
    pub(crate) rate_limit: RateLimit,
    /// Limits xrun lines.
    pub(crate) xrun_limit: RateLimit,
}

impl NodeShared {
    pub(crate) fn new(id: NodeId, name: Arc<str>, wakeup: Arc<Wakeup>) -> Self {
        Self {
            id,
            name,
            activation: Arc::new(Activation::new()),
            wakeup,
            targets: ArcSwap::from_pointee(Vec::new()),
            driver_target: ArcSwapOption::empty(),
            target_active: AtomicBool::new(false),
            driver_target_active: AtomicBool::new(false),
            rate_limit: RateLimit::default(),
            xrun_limit: RateLimit::default(),
        }
    }

    /// A trigger handle to this node.
    pub(crate) fn target(&self, kind: TargetKind) -> Target {
        Target {
            id: self.id,
            name: Arc::clone(&self.name),
            kind,
            activation: Arc::clone(&self.activation),
            wakeup: Arc::clone(&self.wakeup),
        }
    }

    fn push_target(&self, target: Target) {
        self.targets.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.iter().any(|t| t.kind == target.kind && t.id == target.id) {
                next.push(target.clone());
            }
            next
        });
    }

    fn remove_target(&self, kind: TargetKind, id: NodeId) {
        self.targets.rcu(|current| {
            current
                .iter()
                .filter(|t| !(t.kind == kind && t.id == id))
                .cloned()
                .collect::<Vec<_>>()
        });
    }

    /// Marks the node finished and posts a completion to every target and
    /// to the driver.
    pub(crate) fn resume(&self, now: u64) {
        let a = &self.activation;
        a.set_status(ActivationStatus::Finished);
        a.set_finish_time(now);
        a.set_pending_sync(false);
        self.trigger_targets(now);
    }

    /// Posts a completion to every target and to the driver.
    pub(crate) fn trigger_targets(&self, now: u64) {
        for t in self.targets.load().iter() {
            tracing::trace!(
                "({}-{}) trigger {} pending:{}/{}",
                self.name,
                self.id.0,
                t.id,
                t.activation.state().pending(),
                t.activation.state().required()
            );
            t.trigger(now);
        }
        if let Some(driver) = self.driver_target.load().as_ref() {
            driver.trigger(now);
        }
    }

    /// Charges an xrun to this node and its driver.
    pub(crate) fn xrun(&self, hooks: &Hooks, trigger: u64, delay: u64) {
        let a = &self.activation;
        a.record_xrun(trigger, delay);
        let driver = self.driver_target.load();
        let clock = match driver.as_ref() {
            Some(d) => {
                if !Arc::ptr_eq(&d.activation, a) {
                    d.activation.record_xrun(trigger, delay);
                }
                Some(d.activation.position().clock())
            }
            None => None,
        };
        if self.xrun_limit.test(crate::time::now_nsec()) {
            let (num, denom) = clock.map_or((0, 0), |c| (c.duration, c.rate));
            tracing::error!(
                "({}-{}) XRun! rate:{}/{} count:{} time:{} delay:{} max:{}",
                self.name,
                self.id.0,
                num,
                denom,
                a.xrun_count(),
                trigger,
                delay,
                a.max_delay()
            );
        }
        hooks.emit_xrun(self.id);
    }
}

/// Adds `node` to the graph of `driver`. A driver joining its own graph
/// only has its position armed; followers are counted on both sides.
pub(crate) fn add_node(node: &NodeShared, driver: &NodeShared) {
    if node.id == driver.id {
        tracing::trace!("({}-{}) add as driver", node.name, node.id.0);
        return;
    }
    tracing::trace!("({}-{}) add to driver {}", node.name, node.id.0, driver.id);

    driver.push_target(node.target(TargetKind::Follower));
    if !node.target_active.swap(true, Ordering::AcqRel) {
        node.activation.state().add_required();
    }

    node.driver_target.store(Some(Arc::new(driver.target(TargetKind::Driver))));
    if !node.driver_target_active.swap(true, Ordering::AcqRel) {
        driver.activation.state().add_required();
    }
}

/// Undoes exactly the increments [`add_node`] made.
pub(crate) fn remove_node(node: &NodeShared, driver: &NodeShared) {
    if node.id == driver.id {
        return;
    }
    tracing::trace!("({}-{}) remove from driver {}", node.name, node.id.0, driver.id);

    driver.remove_target(TargetKind::Follower, node.id);
    if node.target_active.swap(false, Ordering::AcqRel) {
        node.activation.state().sub_required();
    }

    node.driver_target.store(None);
    if node.driver_target_active.swap(false, Ordering::AcqRel) {
        driver.activation.state().sub_required();
    }
}

/// Makes `input` wait for `output` through link `id`.
pub(crate) fn activate_link(id: LinkId, active: &AtomicBool, output: &NodeShared, input: &NodeShared) {
    if output.id == input.id {
        return;
    }
    output.push_target(input.target(TargetKind::Link(id)));
    if !active.swap(true, Ordering::AcqRel) {
        input.activation.state().add_required();
    }
}

/// Undoes [`activate_link`].
pub(crate) fn deactivate_link(id: LinkId, active: &AtomicBool, output: &NodeShared, input: &NodeShared) {
    if output.id == input.id {
        return;
    }
    output.remove_target(TargetKind::Link(id), input.id);
    if active.swap(false, Ordering::AcqRel) {
        input.activation.state().sub_required();
    }
}

/// Result of consuming a driver's pending commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncType {
    /// Nothing changed; check whether followers are in sync.
    Check,
    /// (Re)start: followers must sync again.
    Start,
    /// Stopped.
    Stop,
}

/// Applies queued transport commands at the start of a quantum.
pub(crate) fn check_updates(node: &NodeShared) -> SyncType {
    let a = &node.activation;
    let position = a.position();
    let mut sync = SyncType::Check;

    match a.take_command() {
        DriverCommand::Stop => {
            tracing::debug!("({}-{}) update command: stop", node.name, node.id.0);
            position.set_state(PositionState::Stopped);
            sync = SyncType::Stop;
        }
        DriverCommand::Start => {
            tracing::debug!("({}-{}) update command: start", node.name, node.id.0);
            position.set_state(PositionState::Starting);
            a.arm_sync();
            sync = SyncType::Start;
        }
        DriverCommand::None => {}
    }
    if a.take_reposition() && position.state() == PositionState::Running {
        tracing::debug!("({}-{}) reposition", node.name, node.id.0);
        position.set_state(PositionState::Starting);
        a.arm_sync();
        sync = SyncType::Start;
    }
    sync
}

/// Advances the transport. Forces `Running` when the sync timeout runs out.
/// Returns `true` if that happened.
pub(crate) fn update_position(node: &NodeShared, hooks: &Hooks, all_ready: bool) -> bool {
    let a = &node.activation;
    let position = a.position();
    let mut all_ready = all_ready;
    let mut timed_out = false;

    if position.state() == PositionState::Starting {
        if !all_ready && a.tick_sync() {
            tracing::warn!("({}-{}) sync timeout, going to RUNNING", node.name, node.id.0);
            hooks.emit_timeout(node.id);
            dump_states(node);
            all_ready = true;
            timed_out = true;
        }
        if all_ready {
            position.set_state(PositionState::Running);
        }
    }
    let duration = position.clock().duration;
    if position.state() != PositionState::Running {
        position.add_offset(duration);
    }
    position.advance(duration);
    timed_out
}

/// Logs the scheduling state of every target of a driver.
pub(crate) fn dump_states(driver: &NodeShared) {
    let clock = driver.activation.position().clock();
    for t in driver.targets.load().iter() {
        let a = &t.activation;
        let state = a.state();
        let status = a.status();
        if matches!(status, ActivationStatus::Triggered | ActivationStatus::Awake) {
            tracing::warn!(
                "({}-{}) client too slow! rate:{}/{} pos:{} status:{}",
                t.name,
                t.id.0,
                clock.duration,
                clock.rate,
                clock.position,
                status
            );
        }
        tracing::debug!(
            "({}-{}) pending:{}/{} s:{} a:{} f:{} waiting:{} process:{} status:{} sync:{}",
            t.name,
            t.id.0,
            state.pending(),
            state.required(),
            a.signal_time(),
            a.awake_time(),
            a.finish_time(),
            a.awake_time().saturating_sub(a.signal_time()),
            a.finish_time().saturating_sub(a.awake_time()),
            status,
            a.pending_sync()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loop::LoopShared;
    use proptest::prelude::*;

    fn shared(id: u32, data_loop: &Arc<LoopShared>) -> NodeShared {
        let wakeup = Arc::new(Wakeup::new(NodeId(id), Arc::clone(data_loop)));
        NodeShared::new(NodeId(id), Arc::from(format!("n{id}")), wakeup)
    }

    #[test]
    fn follower_join_counts() {
        let data_loop = Arc::new(LoopShared::new(16));
        let driver = shared(0, &data_loop);
        let a = shared(1, &data_loop);
        let b = shared(2, &data_loop);

        add_node(&driver, &driver);
        add_node(&a, &driver);
        add_node(&b, &driver);
        assert_eq!(driver.activation.state().required(), 2);
        assert_eq!(a.activation.state().required(), 1);

        let link_active = AtomicBool::new(false);
        activate_link(LinkId(0), &link_active, &a, &b);
        assert_eq!(b.activation.state().required(), 2);
        assert_eq!(a.targets.load().len(), 1);

        // adding twice counts once
        add_node(&a, &driver);
        activate_link(LinkId(0), &link_active, &a, &b);
        assert_eq!(driver.activation.state().required(), 2);
        assert_eq!(b.activation.state().required(), 2);

        deactivate_link(LinkId(0), &link_active, &a, &b);
        remove_node(&a, &driver);
        assert_eq!(driver.activation.state().required(), 1);
        assert_eq!(a.activation.state().required(), 0);
        assert_eq!(b.activation.state().required(), 1);
        assert!(a.driver_target.load().is_none());
    }

    #[test]
    fn resume_triggers_dependents_and_driver() {
        let data_loop = Arc::new(LoopShared::new(16));
        let driver = shared(0, &data_loop);
        let a = shared(1, &data_loop);
        let b = shared(2, &data_loop);
        add_node(&a, &driver);
        add_node(&b, &driver);
        let active = AtomicBool::new(false);
        activate_link(LinkId(7), &active, &a, &b);

        for n in [&driver, &a, &b] {
            n.activation.state().reset();
        }
        // driver tick triggers both followers once
        driver.resume(10);
        assert_eq!(a.activation.status(), ActivationStatus::Triggered);
        assert_eq!(b.activation.state().pending(), 1);
        assert_eq!(data_loop.pop(), Some(NodeId(1)));

        a.resume(20);
        assert_eq!(b.activation.status(), ActivationStatus::Triggered);
        assert_eq!(driver.activation.state().pending(), 1);

        b.resume(30);
        assert_eq!(driver.activation.status(), ActivationStatus::Triggered);
        assert_eq!(driver.activation.signal_time(), 30);
    }

    #[test]
    fn start_command_arms_sync() {
        let data_loop = Arc::new(LoopShared::new(4));
        let (hooks, _rx) = Hooks::new();
        let driver = shared(0, &data_loop);
        let a = &driver.activation;
        a.position().set_clock(48000, 1024);
        a.set_sync_timeout(50_000_000);
        a.request(DriverCommand::Start);

        assert_eq!(check_updates(&driver), SyncType::Start);
        assert_eq!(a.position().state(), PositionState::Starting);
        assert_eq!(a.sync_left(), 2);

        assert!(!update_position(&driver, &hooks, false));
        assert!(update_position(&driver, &hooks, false));
        assert_eq!(a.position().state(), PositionState::Running);
        assert_eq!(a.position().clock().position, 2048);
    }

    #[test]
    fn reposition_restarts_only_when_running() {
        let data_loop = Arc::new(LoopShared::new(4));
        let driver = shared(0, &data_loop);
        let a = &driver.activation;
        a.request_reposition();
        assert_eq!(check_updates(&driver), SyncType::Check);

        a.position().set_state(PositionState::Running);
        a.request_reposition();
        assert_eq!(check_updates(&driver), SyncType::Start);
        assert_eq!(a.position().state(), PositionState::Starting);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize),
        Remove(usize),
        Link(usize, usize),
        Unlink(usize, usize),
        Cycle,
        Trigger(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..5).prop_map(Op::Add),
            (0usize..5).prop_map(Op::Remove),
            (0usize..5, 0usize..5).prop_map(|(a, b)| Op::Link(a, b)),
            (0usize..5, 0usize..5).prop_map(|(a, b)| Op::Unlink(a, b)),
            Just(Op::Cycle),
            (0usize..5).prop_map(Op::Trigger),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        /// `required` always equals the number of active entries pointing at
        /// a node, and no sequence of completions drives `pending` below 0.
        #[test]
        fn join_counter_matches_membership(ops in prop::collection::vec(op(), 1..64)) {
            let data_loop = Arc::new(LoopShared::new(64));
            let driver = shared(100, &data_loop);
            let nodes: Vec<NodeShared> = (0..5).map(|i| shared(i, &data_loop)).collect();
            let links: Vec<Vec<AtomicBool>> =
                (0..5).map(|_| (0..5).map(|_| AtomicBool::new(false)).collect()).collect();
            let mut joined = [false; 5];
            let mut linked = [[false; 5]; 5];

            for op in ops {
                match op {
                    Op::Add(i) => {
                        add_node(&nodes[i], &driver);
                        joined[i] = true;
                    }
                    Op::Remove(i) => {
                        remove_node(&nodes[i], &driver);
                        joined[i] = false;
                    }
                    Op::Link(a, b) if a != b => {
                        let id = LinkId((a * 5 + b) as u32);
                        activate_link(id, &links[a][b], &nodes[a], &nodes[b]);
                        linked[a][b] = true;
                    }
                    Op::Unlink(a, b) if a != b => {
                        let id = LinkId((a * 5 + b) as u32);
                        deactivate_link(id, &links[a][b], &nodes[a], &nodes[b]);
                        linked[a][b] = false;
                    }
                    Op::Link(..) | Op::Unlink(..) => {}
                    Op::Cycle => {
                        driver.activation.state().reset();
                        for n in &nodes {
                            n.activation.state().reset();
                        }
                        driver.resume(1);
                    }
                    Op::Trigger(i) => {
                        nodes[i].resume(2);
                    }
                }
                while data_loop.pop().is_some() {}

                let followers = joined.iter().filter(|j| **j).count() as u32;
                prop_assert_eq!(driver.activation.state().required(), followers);
                prop_assert_eq!(driver.targets.load().len() as u32, followers);
                for (i, n) in nodes.iter().enumerate() {
                    let incoming = (0..5).filter(|&a| linked[a][i]).count() as u32;
                    let expected = u32::from(joined[i]) + incoming;
                    prop_assert_eq!(n.activation.state().required(), expected);
                    prop_assert!(n.activation.state().pending() <= 16);
                }
                prop_assert!(driver.activation.state().pending() <= 16);
            }
        }
    }
}
