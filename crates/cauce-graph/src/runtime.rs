//! The part of a node that moves onto a data loop.
//!
//! A [`NodeRuntime`] owns the implementation, the port IO areas and the
//! link ends that feed them. The control thread owns it while the node is
//! not running; the data loop owns it while it is. Everything here runs on
//! whichever thread currently owns it, so none of it is shared.

use std::sync::Arc;

use crate::activation::{ActivationStatus, Clock};
use crate::error::ProcessError;
use crate::events::{Hooks, Notice};
use crate::implementation::{NodeImpl, ProcessContext, ProcessStatus};
use crate::link::{InputEnd, OutputEnd};
use crate::port::PortIo;
use crate::scheduler::{self, NodeShared, SyncType};
use crate::target::TargetKind;

/// Implementation, ports and link ends of one node.
pub(crate) struct NodeRuntime {
    pub(crate) shared: Arc<NodeShared>,
    pub(crate) node: Box<dyn NodeImpl>,
    pub(crate) inputs: Vec<PortIo>,
    pub(crate) outputs: Vec<PortIo>,
    pub(crate) in_ends: Vec<Option<InputEnd>>,
    pub(crate) out_ends: Vec<Option<OutputEnd>>,
    /// The node paces its own graph.
    pub(crate) driving: bool,
}

impl NodeRuntime {
    pub(crate) fn new(shared: Arc<NodeShared>, node: Box<dyn NodeImpl>, n_inputs: usize, n_outputs: usize) -> Self {
        Self {
            shared,
            node,
            inputs: (0..n_inputs).map(|_| PortIo::default()).collect(),
            outputs: (0..n_outputs).map(|_| PortIo::default()).collect(),
            in_ends: (0..n_inputs).map(|_| None).collect(),
            out_ends: (0..n_outputs).map(|_| None).collect(),
            driving: false,
        }
    }

    /// Handles a wakeup popped from the ready queue.
    pub(crate) fn on_signal(&mut self, hooks: &Hooks, now: u64) {
        let count = self.shared.wakeup.read();
        if count == 0 {
            return;
        }
        if count > 1 {
            tracing::warn!(
                "({}-{}) client missed {} wakeups",
                self.shared.name,
                self.shared.id.0,
                count - 1
            );
        }
        if self.driving {
            self.complete_cycle(hooks, now);
        } else {
            self.follow(hooks, now);
        }
    }

    /// Runs a triggered follower.
    fn follow(&mut self, hooks: &Hooks, now: u64) {
        let result = self.process_node(now);
        let shared = &self.shared;
        match result {
            Ok(status) if status.is_ok() => {
                tracing::trace!("({}-{}) async continue", shared.name, shared.id.0);
            }
            Ok(status) => {
                shared.resume(crate::time::now_nsec());
                if status.contains(ProcessStatus::DRAINED) {
                    hooks.emit_drained(shared.id);
                }
            }
            Err(error) => {
                self.report(hooks, now, error);
                self.shared.resume(crate::time::now_nsec());
            }
        }
    }

    fn report(&self, hooks: &Hooks, now: u64, error: ProcessError) {
        let shared = &self.shared;
        if shared.rate_limit.test(now) {
            tracing::error!("({}-{}) process error: {}", shared.name, shared.id.0, error);
        }
        hooks.notify(Notice::ProcessFailed { node: shared.id, error });
    }

    /// Starts a quantum on a driver: checks the previous one finished,
    /// applies transport commands, re-arms every follower, processes the
    /// driver and triggers its targets.
    pub(crate) fn drive(&mut self, hooks: &Hooks, now: u64) {
        let shared = Arc::clone(&self.shared);
        let a = &shared.activation;
        let state = a.state();

        if state.pending() > 0 {
            hooks.emit_incomplete(shared.id);
            if shared.rate_limit.test(now) {
                let clock = a.position().clock();
                tracing::debug!(
                    "({}-{}) graph not finished: position:{} pending {}/{}",
                    shared.name,
                    shared.id.0,
                    clock.position,
                    state.pending(),
                    state.required()
                );
                scheduler::dump_states(&shared);
            }
            self.charge_stuck_followers(hooks, now);
        }

        let sync = scheduler::check_updates(&shared);
        let update_sync = sync != SyncType::Check;
        let target_sync = sync == SyncType::Start;
        let mut all_ready = !update_sync;
        for t in shared.targets.load().iter() {
            t.activation.set_status(ActivationStatus::NotTriggered);
            t.activation.state().reset();
            if update_sync {
                t.activation.set_pending_sync(target_sync);
            } else {
                all_ready &= !t.activation.pending_sync();
            }
        }
        state.reset();
        a.set_prev_signal_time(a.signal_time());
        a.set_signal_time(now);
        a.set_status(ActivationStatus::Triggered);

        scheduler::update_position(&shared, hooks, all_ready);
        hooks.emit_start(shared.id);

        if let Err(error) = self.process_node(now) {
            self.report(hooks, now, error);
        }
        shared.trigger_targets(crate::time::now_nsec());

        if state.required() == 0 {
            self.complete_cycle(hooks, crate::time::now_nsec());
        }
    }

    fn charge_stuck_followers(&self, hooks: &Hooks, now: u64) {
        let shared = &self.shared;
        let a = &shared.activation;
        let trigger = a.signal_time();
        for t in shared.targets.load().iter() {
            if t.kind != TargetKind::Follower {
                continue;
            }
            if !matches!(t.activation.status(), ActivationStatus::Triggered | ActivationStatus::Awake) {
                continue;
            }
            let delay = now.saturating_sub(trigger);
            t.activation.record_xrun(trigger, delay);
            a.record_xrun(trigger, delay);
            if shared.xrun_limit.test(now) {
                tracing::error!(
                    "({}-{}) XRun! count:{} time:{} delay:{} max:{}",
                    t.name,
                    t.id.0,
                    t.activation.xrun_count(),
                    trigger,
                    delay,
                    t.activation.max_delay()
                );
            }
            hooks.emit_xrun(t.id);
        }
    }

    /// Every follower finished: closes the driver's quantum.
    fn complete_cycle(&mut self, hooks: &Hooks, now: u64) {
        let shared = &self.shared;
        let a = &shared.activation;
        a.set_status(ActivationStatus::Finished);
        a.set_finish_time(now);
        a.update_cpu_load();
        tracing::trace!(
            "({}-{}) graph completed in {}ns",
            shared.name,
            shared.id.0,
            now.saturating_sub(a.signal_time())
        );
        hooks.emit_complete(shared.id);
    }

    /// The clock of the graph this node belongs to.
    pub(crate) fn clock(&self) -> Clock {
        if self.driving {
            return self.shared.activation.position().clock();
        }
        self.shared
            .driver_target
            .load()
            .as_ref()
            .map(|d| d.activation.position().clock())
            .unwrap_or_default()
    }

    /// Port mixing plus the implementation's `process`.
    pub(crate) fn process_node(&mut self, now: u64) -> Result<ProcessStatus, ProcessError> {
        let clock = self.clock();
        let a = Arc::clone(&self.shared.activation);
        a.set_status(ActivationStatus::Awake);
        a.set_awake_time(now);

        self.pull_inputs();
        self.prepare_outputs();

        let mut ctx = ProcessContext {
            inputs: &mut self.inputs,
            outputs: &mut self.outputs,
            clock,
        };
        let result = self.node.process(&mut ctx);
        if let Ok(status) = result {
            a.state().set_status(status.bits());
        }

        self.push_outputs();
        self.recycle_inputs();
        result
    }

    fn pull_inputs(&mut self) {
        for (io, end) in self.inputs.iter_mut().zip(&mut self.in_ends) {
            let Some(end) = end else { continue };
            if io.buffer.is_some() {
                continue;
            }
            match end.ready.pop() {
                Ok(buffer) => {
                    io.buffer = Some(buffer);
                    io.status = ProcessStatus::HAVE_DATA;
                }
                Err(_) => io.status = ProcessStatus::NEED_DATA,
            }
        }
    }

    fn prepare_outputs(&mut self) {
        for (io, end) in self.outputs.iter_mut().zip(&mut self.out_ends) {
            let Some(end) = end else { continue };
            if io.buffer.is_none() {
                io.buffer = end.free.pop().ok();
                io.status = ProcessStatus::NEED_DATA;
            }
        }
    }

    fn push_outputs(&mut self) {
        for (io, end) in self.outputs.iter_mut().zip(&mut self.out_ends) {
            let Some(end) = end else { continue };
            if !io.status.contains(ProcessStatus::HAVE_DATA) {
                continue;
            }
            let Some(buffer) = io.buffer.take() else { continue };
            match end.ready.push(buffer) {
                Ok(()) => io.status = ProcessStatus::NEED_DATA,
                // downstream has not consumed the last one; keep it
                Err(rtrb::PushError::Full(buffer)) => io.buffer = Some(buffer),
            }
        }
    }

    fn recycle_inputs(&mut self) {
        for (io, end) in self.inputs.iter_mut().zip(&mut self.in_ends) {
            let Some(end) = end else { continue };
            if io.status.contains(ProcessStatus::HAVE_DATA) {
                continue;
            }
            if let Some(buffer) = io.buffer.take() {
                if let Err(rtrb::PushError::Full(buffer)) = end.free.push(buffer) {
                    io.buffer = Some(buffer);
                }
            }
        }
    }

    /// Clears every port IO area. Held buffers go back to the input side's
    /// pool; those held by outputs are dropped with the link's pool.
    pub(crate) fn release_buffers(&mut self) {
        for (io, end) in self.inputs.iter_mut().zip(&mut self.in_ends) {
            io.status = ProcessStatus::NEED_DATA;
            if let (Some(buffer), Some(end)) = (io.buffer.take(), end.as_mut()) {
                let _ = end.free.push(buffer);
            }
        }
        for io in &mut self.outputs {
            io.status = ProcessStatus::NEED_DATA;
            io.buffer = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loop::LoopShared;
    use crate::error::NodeError;
    use crate::id::{Direction, NodeId};
    use crate::implementation::{Command, Completion, Param, ParamId};
    use crate::port::AudioInfo;
    use crate::target::Wakeup;

    struct Counting {
        calls: u32,
        status: ProcessStatus,
    }

    impl NodeImpl for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn port_count(&self, _direction: Direction) -> u32 {
            0
        }
        fn send_command(&mut self, _command: Command) -> Result<Completion, NodeError> {
            Ok(Completion::Done)
        }
        fn enum_params(&self, _id: ParamId, _start: u32, _num: u32) -> Result<Vec<Param>, NodeError> {
            Ok(Vec::new())
        }
        fn port_set_format(
            &mut self,
            _direction: Direction,
            _port_id: u32,
            _format: Option<&AudioInfo>,
        ) -> Result<Completion, NodeError> {
            Err(NodeError::NotSupported)
        }
        fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<ProcessStatus, ProcessError> {
            self.calls += 1;
            Ok(self.status)
        }
    }

    fn runtime(id: u32, data_loop: &Arc<LoopShared>, status: ProcessStatus) -> NodeRuntime {
        let wakeup = Arc::new(Wakeup::new(NodeId(id), Arc::clone(data_loop)));
        let shared = Arc::new(NodeShared::new(NodeId(id), Arc::from("t"), wakeup));
        NodeRuntime::new(shared, Box::new(Counting { calls: 0, status }), 0, 0)
    }

    #[test]
    fn lone_driver_completes_in_its_own_tick() {
        let data_loop = Arc::new(LoopShared::new(8));
        let (hooks, _rx) = Hooks::new();
        let mut driver = runtime(0, &data_loop, ProcessStatus::HAVE_DATA);
        driver.driving = true;
        driver.shared.activation.position().set_clock(48000, 256);

        driver.drive(&hooks, 1_000);
        assert_eq!(driver.shared.activation.status(), ActivationStatus::Finished);
        assert_eq!(driver.shared.activation.position().clock().position, 256);
    }

    #[test]
    fn follower_signals_driver_when_done() {
        let data_loop = Arc::new(LoopShared::new(8));
        let (hooks, _rx) = Hooks::new();
        let mut driver = runtime(0, &data_loop, ProcessStatus::HAVE_DATA);
        driver.driving = true;
        let mut follower = runtime(1, &data_loop, ProcessStatus::HAVE_DATA);
        scheduler::add_node(&follower.shared, &driver.shared);

        driver.drive(&hooks, 1_000);
        assert_eq!(data_loop.pop(), Some(NodeId(1)));
        follower.on_signal(&hooks, 2_000);
        assert_eq!(follower.shared.activation.status(), ActivationStatus::Finished);
        assert_eq!(data_loop.pop(), Some(NodeId(0)));
        driver.on_signal(&hooks, 3_000);
        assert_eq!(driver.shared.activation.status(), ActivationStatus::Finished);
        assert_eq!(driver.shared.activation.finish_time(), 3_000);
    }

    #[test]
    fn async_follower_is_not_resumed() {
        let data_loop = Arc::new(LoopShared::new(8));
        let (hooks, _rx) = Hooks::new();
        let mut driver = runtime(0, &data_loop, ProcessStatus::HAVE_DATA);
        driver.driving = true;
        let mut follower = runtime(1, &data_loop, ProcessStatus::OK);
        scheduler::add_node(&follower.shared, &driver.shared);

        driver.drive(&hooks, 1_000);
        assert_eq!(data_loop.pop(), Some(NodeId(1)));
        follower.on_signal(&hooks, 2_000);
        assert_eq!(follower.shared.activation.status(), ActivationStatus::Awake);
        assert_eq!(data_loop.pop(), None);

        // next tick finds the follower stuck and charges an xrun
        driver.drive(&hooks, 30_000_000);
        assert_eq!(follower.shared.activation.xrun_count(), 1);
        assert_eq!(driver.shared.activation.xrun_count(), 1);
    }
}
