//! Integration tests for cauce-graph.
//!
//! Builds small graphs on the inline main loop and runs them quantum by
//! quantum with [`Context::cycle`]: a tone driver through converters into a
//! capture sink, driver/follower sync with an asynchronous follower, and
//! the control-plane error paths.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cauce_dsp::{CpuFlags, Resampler, SampleFormat};
use cauce_graph::nodes::{AudioConvert, CaptureSink, FormatConvert, ToneSource};
use cauce_graph::{
    AudioInfo, Command, Completion, Context, Direction, DriverListener, EngineConfig, GraphError,
    LinkOptions, NodeCallbacks, NodeError, NodeId, NodeImpl, NodeProps, NodeState, Param, ParamId,
    PositionState, ProcessContext, ProcessError, ProcessStatus,
};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{self, Layer, SubscriberExt};

fn config() -> EngineConfig {
    EngineConfig {
        rate: 48000,
        quantum: 1024,
        ..EngineConfig::default()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Records the message of every event so tests can count log lines.
#[derive(Clone, Default)]
struct LogCapture {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    fn count(&self, needle: &str) -> usize {
        self.lines.lock().unwrap().iter().filter(|l| l.contains(needle)).count()
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.lines.lock().unwrap().push(message);
    }
}

/// Counts driver events.
#[derive(Default)]
struct DriverCounts {
    start: AtomicU32,
    complete: AtomicU32,
    incomplete: AtomicU32,
    timeout: AtomicU32,
    xrun: AtomicU32,
}

impl DriverListener for DriverCounts {
    fn start(&self, _driver: NodeId) {
        self.start.fetch_add(1, Ordering::Relaxed);
    }
    fn complete(&self, _driver: NodeId) {
        self.complete.fetch_add(1, Ordering::Relaxed);
    }
    fn incomplete(&self, _driver: NodeId) {
        self.incomplete.fetch_add(1, Ordering::Relaxed);
    }
    fn timeout(&self, _driver: NodeId) {
        self.timeout.fetch_add(1, Ordering::Relaxed);
    }
    fn xrun(&self, _node: NodeId) {
        self.xrun.fetch_add(1, Ordering::Relaxed);
    }
}

/// Portless node returning a fixed status. Hands out its callbacks so a
/// test can finish a quantum on its behalf.
struct Stub {
    status: ProcessStatus,
    callbacks: Arc<Mutex<Option<NodeCallbacks>>>,
}

impl Stub {
    fn new(status: ProcessStatus) -> Self {
        Self {
            status,
            callbacks: Arc::new(Mutex::new(None)),
        }
    }
}

impl NodeImpl for Stub {
    fn name(&self) -> &str {
        "stub"
    }
    fn port_count(&self, _direction: Direction) -> u32 {
        0
    }
    fn set_callbacks(&mut self, callbacks: NodeCallbacks) {
        *self.callbacks.lock().unwrap() = Some(callbacks);
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
        Ok(self.status)
    }
}

/// A stub driver with one stub follower that never finishes on its own.
/// Both are running.
fn async_pair(ctx: &mut Context) -> (NodeId, NodeId, Arc<Mutex<Option<NodeCallbacks>>>) {
    let driver = ctx
        .add_node(NodeProps::new("driver").driver(true), Box::new(Stub::new(ProcessStatus::HAVE_DATA)))
        .unwrap();
    let stub = Stub::new(ProcessStatus::OK);
    let callbacks = Arc::clone(&stub.callbacks);
    let follower = ctx.add_node(NodeProps::new("async"), Box::new(stub)).unwrap();
    ctx.set_driver(follower, driver).unwrap();
    ctx.set_state(follower, NodeState::Running).unwrap();
    ctx.set_state(driver, NodeState::Running).unwrap();
    (driver, follower, callbacks)
}

struct TonePipeline {
    tone: NodeId,
    convert: NodeId,
    capture: NodeId,
    stats: Arc<cauce_graph::nodes::CaptureStats>,
    rings: Vec<rtrb::Consumer<f32>>,
}

/// tone (s16, 44.1 kHz) -> audioconvert -> capture (f32p, 48 kHz), running.
fn tone_pipeline(ctx: &mut Context) -> TonePipeline {
    let tone = ctx
        .add_node(NodeProps::new("tone").driver(true), Box::new(ToneSource::new(440.0, 0.5, 2)))
        .unwrap();
    let convert = ctx
        .add_node(NodeProps::new("convert"), Box::new(AudioConvert::new(ctx.config())))
        .unwrap();
    let (sink, rings) = CaptureSink::new(2, 16384);
    let stats = sink.stats();
    let capture = ctx.add_node(NodeProps::new("capture"), Box::new(sink)).unwrap();
    ctx.set_driver(convert, tone).unwrap();
    ctx.set_driver(capture, tone).unwrap();

    ctx.port_set_format(tone, Direction::Output, 0, Some(AudioInfo::new(SampleFormat::S16, 44100, 2)))
        .unwrap();
    ctx.port_set_format(capture, Direction::Input, 0, Some(AudioInfo::new(SampleFormat::F32P, 48000, 2)))
        .unwrap();
    ctx.link(tone, 0, convert, 0, LinkOptions::default()).unwrap();
    ctx.link(convert, 0, capture, 0, LinkOptions::default()).unwrap();

    for id in [capture, convert, tone] {
        ctx.set_state(id, NodeState::Running).unwrap();
    }
    TonePipeline {
        tone,
        convert,
        capture,
        stats,
        rings,
    }
}

// ============================================================================
// 1. Audio end to end
// ============================================================================

#[test]
fn tone_reaches_capture_resampled() {
    let mut ctx = Context::new(config());
    let counts = Arc::new(DriverCounts::default());
    ctx.add_driver_listener(Arc::clone(&counts) as Arc<dyn DriverListener>);
    let p = tone_pipeline(&mut ctx);

    // negotiated through the links
    assert_eq!(
        ctx.port_format(p.convert, Direction::Input, 0).unwrap(),
        Some(&AudioInfo::new(SampleFormat::S16, 44100, 2))
    );
    assert_eq!(
        ctx.port_format(p.convert, Direction::Output, 0).unwrap(),
        Some(&AudioInfo::new(SampleFormat::F32P, 48000, 2))
    );

    for _ in 0..10 {
        ctx.cycle();
    }

    for id in [p.tone, p.convert, p.capture] {
        assert_eq!(ctx.node_state(id).unwrap(), NodeState::Running, "{:?}", ctx.node_error(id));
    }
    assert_eq!(counts.start.load(Ordering::Relaxed), 10);
    assert_eq!(counts.complete.load(Ordering::Relaxed), 10);
    assert_eq!(counts.incomplete.load(Ordering::Relaxed), 0);
    assert_eq!(ctx.activation(p.tone).unwrap().xrun_count(), 0);

    // 10 quanta of 1024 at 48 kHz are 9408 frames at 44.1 kHz
    let delay = Resampler::new(&ctx.config().resample_config(2, 44100, 48000))
        .unwrap()
        .delay();
    let expected = (9408 - delay) as f64 * 48000.0 / 44100.0;
    let got = p.stats.frames() as f64;
    assert!((got - expected).abs() < 32.0, "captured {got}, expected about {expected}");
    assert_eq!(p.stats.dropped(), 0);
    assert_eq!(p.rings[0].slots() as u64, p.stats.frames());

    let peak = {
        let mut rings = p.rings;
        let mut peak = 0.0f32;
        while let Ok(v) = rings[1].pop() {
            peak = peak.max(v.abs());
        }
        peak
    };
    assert!((peak - 0.5).abs() < 0.02, "peak {peak}");
}

#[test]
fn join_counts_follow_the_graph() {
    let mut ctx = Context::new(config());
    let p = tone_pipeline(&mut ctx);

    // driver: one completion per follower
    assert_eq!(ctx.activation(p.tone).unwrap().state().required(), 2);
    // followers: the driver's trigger plus one per incoming link
    assert_eq!(ctx.activation(p.convert).unwrap().state().required(), 2);
    assert_eq!(ctx.activation(p.capture).unwrap().state().required(), 2);
}

#[test]
fn suspend_twice_is_idempotent() {
    let mut ctx = Context::new(config());
    let p = tone_pipeline(&mut ctx);
    ctx.cycle();

    ctx.set_state(p.capture, NodeState::Suspended).unwrap();
    let capture_required = ctx.activation(p.capture).unwrap().state().required();
    let tone_required = ctx.activation(p.tone).unwrap().state().required();
    assert_eq!(ctx.node_state(p.capture).unwrap(), NodeState::Suspended);
    assert_eq!(capture_required, 0);
    assert_eq!(tone_required, 1);
    assert!(!ctx.is_on_loop(p.capture).unwrap());

    ctx.set_state(p.capture, NodeState::Suspended).unwrap();
    assert_eq!(ctx.node_state(p.capture).unwrap(), NodeState::Suspended);
    assert_eq!(ctx.activation(p.capture).unwrap().state().required(), capture_required);
    assert_eq!(ctx.activation(p.tone).unwrap().state().required(), tone_required);
}

#[test]
fn suspended_node_runs_again_with_remembered_format() {
    let mut ctx = Context::new(config());
    let p = tone_pipeline(&mut ctx);
    ctx.cycle();

    ctx.set_state(p.capture, NodeState::Suspended).unwrap();
    assert_eq!(ctx.port_format(p.capture, Direction::Input, 0).unwrap(), None);

    ctx.set_state(p.capture, NodeState::Running).unwrap();
    assert_eq!(ctx.node_state(p.capture).unwrap(), NodeState::Running);
    assert_eq!(
        ctx.port_format(p.capture, Direction::Input, 0).unwrap(),
        Some(&AudioInfo::new(SampleFormat::F32P, 48000, 2))
    );
    assert_eq!(ctx.activation(p.capture).unwrap().state().required(), 2);
    assert_eq!(ctx.activation(p.tone).unwrap().state().required(), 2);
}

#[test]
fn dynamic_link_passes_buffers_through() {
    let mut ctx = Context::new(config());
    let tone = ctx
        .add_node(NodeProps::new("tone").driver(true), Box::new(ToneSource::new(440.0, 0.5, 2)))
        .unwrap();
    let convert = ctx
        .add_node(NodeProps::new("convert"), Box::new(FormatConvert::new(CpuFlags::NONE)))
        .unwrap();
    let (sink, mut rings) = CaptureSink::new(2, 4096);
    let stats = sink.stats();
    let capture = ctx.add_node(NodeProps::new("capture"), Box::new(sink)).unwrap();
    ctx.set_driver(convert, tone).unwrap();
    ctx.set_driver(capture, tone).unwrap();

    let format = AudioInfo::new(SampleFormat::F32P, 48000, 2);
    ctx.port_set_format(tone, Direction::Output, 0, Some(format.clone())).unwrap();
    ctx.port_set_format(capture, Direction::Input, 0, Some(format)).unwrap();
    ctx.link(tone, 0, convert, 0, LinkOptions::default()).unwrap();
    let dynamic = LinkOptions {
        dynamic: true,
        ..LinkOptions::default()
    };
    ctx.link(convert, 0, capture, 0, dynamic).unwrap();
    for id in [capture, convert, tone] {
        ctx.set_state(id, NodeState::Running).unwrap();
    }

    for _ in 0..3 {
        ctx.cycle();
    }
    assert_eq!(ctx.node_state(convert).unwrap(), NodeState::Running);
    assert_eq!(stats.frames(), 3 * 1024);

    let step = std::f64::consts::TAU * 440.0 / 48000.0;
    for k in 0..3 * 1024 {
        let expected = ((k as f64 * step).sin() * 0.5) as f32;
        let got = rings[0].pop().unwrap();
        assert!((got - expected).abs() < 1e-4, "frame {k}: {got} vs {expected}");
    }
}

// ============================================================================
// 2. Driver sync and xruns
// ============================================================================

#[test]
fn sync_timeout_forces_running() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, || {
        let mut ctx = Context::new(EngineConfig {
            sync_timeout: Duration::from_millis(100),
            ..config()
        });
        let counts = Arc::new(DriverCounts::default());
        ctx.add_driver_listener(Arc::clone(&counts) as Arc<dyn DriverListener>);
        let (driver, _follower, _) = async_pair(&mut ctx);
        let a = ctx.activation(driver).unwrap();

        // 100 ms over 21.3 ms quanta
        ctx.cycle();
        assert_eq!(a.position().state(), PositionState::Starting);
        assert_eq!(a.sync_left(), 3);
        ctx.cycle();
        ctx.cycle();
        assert_eq!(a.position().state(), PositionState::Starting);
        ctx.cycle();
        assert_eq!(a.position().state(), PositionState::Running);
        ctx.cycle();
        ctx.cycle();

        assert_eq!(counts.timeout.load(Ordering::Relaxed), 1);
        assert_eq!(counts.incomplete.load(Ordering::Relaxed), 5);
    });
    assert_eq!(capture.count("sync timeout"), 1);
}

#[test]
fn xruns_are_counted_and_logged_once() {
    let capture = LogCapture::default();
    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, || {
        let mut ctx = Context::new(config());
        let counts = Arc::new(DriverCounts::default());
        ctx.add_driver_listener(Arc::clone(&counts) as Arc<dyn DriverListener>);
        let (driver, follower, _) = async_pair(&mut ctx);

        for _ in 0..5 {
            ctx.cycle();
        }
        // the first quantum was on time
        assert_eq!(ctx.activation(follower).unwrap().xrun_count(), 4);
        assert_eq!(ctx.activation(driver).unwrap().xrun_count(), 4);
        assert_eq!(counts.xrun.load(Ordering::Relaxed), 4);
        assert_eq!(ctx.node_state(follower).unwrap(), NodeState::Running);
    });
    assert_eq!(capture.count("XRun"), 1);
}

#[test]
fn small_ready_queue_runs_every_follower() {
    let mut ctx = Context::new(EngineConfig {
        queue_capacity: 1,
        ..config()
    });
    let counts = Arc::new(DriverCounts::default());
    ctx.add_driver_listener(Arc::clone(&counts) as Arc<dyn DriverListener>);
    let driver = ctx
        .add_node(NodeProps::new("driver").driver(true), Box::new(Stub::new(ProcessStatus::HAVE_DATA)))
        .unwrap();
    let followers: Vec<NodeId> = (0..3)
        .map(|i| {
            let id = ctx
                .add_node(NodeProps::new(format!("f{i}")), Box::new(Stub::new(ProcessStatus::HAVE_DATA)))
                .unwrap();
            ctx.set_driver(id, driver).unwrap();
            ctx.set_state(id, NodeState::Running).unwrap();
            id
        })
        .collect();
    ctx.set_state(driver, NodeState::Running).unwrap();

    for _ in 0..20 {
        ctx.cycle();
    }
    for &id in &followers {
        assert_eq!(ctx.activation(id).unwrap().xrun_count(), 0, "{id}");
    }
    assert_eq!(ctx.activation(driver).unwrap().xrun_count(), 0);
    assert_eq!(counts.complete.load(Ordering::Relaxed), 20);
    assert_eq!(counts.incomplete.load(Ordering::Relaxed), 0);
}

#[test]
fn async_follower_syncs_through_callbacks() {
    let mut ctx = Context::new(config());
    let counts = Arc::new(DriverCounts::default());
    ctx.add_driver_listener(Arc::clone(&counts) as Arc<dyn DriverListener>);
    let (driver, follower, callbacks) = async_pair(&mut ctx);

    ctx.cycle();
    assert!(ctx.activation(follower).unwrap().pending_sync());
    let cb = callbacks.lock().unwrap().clone().unwrap();
    assert_eq!(cb.node(), follower);
    cb.ready(ProcessStatus::HAVE_DATA);
    assert!(!ctx.activation(follower).unwrap().pending_sync());
    assert_eq!(ctx.activation(driver).unwrap().state().pending(), 0);

    ctx.cycle();
    assert_eq!(ctx.activation(driver).unwrap().position().state(), PositionState::Running);
    assert_eq!(counts.incomplete.load(Ordering::Relaxed), 0);
    assert_eq!(counts.timeout.load(Ordering::Relaxed), 0);
}

// ============================================================================
// 3. Control-plane errors
// ============================================================================

#[test]
fn creating_cannot_be_requested() {
    let mut ctx = Context::new(config());
    let id = ctx
        .add_node(NodeProps::new("n"), Box::new(Stub::new(ProcessStatus::HAVE_DATA)))
        .unwrap();
    assert_eq!(ctx.node_state(id).unwrap(), NodeState::Suspended);
    assert!(matches!(
        ctx.set_state(id, NodeState::Creating),
        Err(GraphError::InvalidState(NodeState::Creating))
    ));
}

#[test]
fn follower_without_driver_cannot_run() {
    let mut ctx = Context::new(config());
    let id = ctx
        .add_node(NodeProps::new("n"), Box::new(Stub::new(ProcessStatus::HAVE_DATA)))
        .unwrap();
    assert!(matches!(ctx.set_state(id, NodeState::Running), Err(GraphError::NoDriver(n)) if n == id));
    assert_eq!(ctx.node_state(id).unwrap(), NodeState::Suspended);

    // inactive nodes accept the request without starting
    ctx.set_active(id, false).unwrap();
    ctx.set_state(id, NodeState::Running).unwrap();
    assert_eq!(ctx.node_state(id).unwrap(), NodeState::Running);
    assert!(!ctx.is_on_loop(id).unwrap());
    assert!(matches!(ctx.set_active(id, true), Err(GraphError::NoDriver(_))));
}

#[test]
fn activating_starts_an_accepted_node() {
    let mut ctx = Context::new(config());
    let (driver, follower, _) = async_pair(&mut ctx);
    let stub = ctx
        .add_node(NodeProps::new("late"), Box::new(Stub::new(ProcessStatus::HAVE_DATA)))
        .unwrap();
    ctx.set_driver(stub, driver).unwrap();
    ctx.set_active(stub, false).unwrap();
    ctx.set_state(stub, NodeState::Running).unwrap();
    assert!(!ctx.is_on_loop(stub).unwrap());
    assert_eq!(ctx.activation(driver).unwrap().state().required(), 1);

    ctx.set_active(stub, true).unwrap();
    assert!(ctx.is_on_loop(stub).unwrap());
    assert_eq!(ctx.activation(driver).unwrap().state().required(), 2);

    // deactivating pauses it again
    ctx.set_active(follower, false).unwrap();
    assert_eq!(ctx.node_state(follower).unwrap(), NodeState::Idle);
    assert_eq!(ctx.activation(driver).unwrap().state().required(), 1);
}

#[test]
fn running_nodes_refuse_reconfiguration() {
    let mut ctx = Context::new(config());
    let p = tone_pipeline(&mut ctx);
    assert!(ctx.is_on_loop(p.capture).unwrap());

    let format = AudioInfo::new(SampleFormat::F32P, 44100, 2);
    assert!(matches!(
        ctx.port_set_format(p.capture, Direction::Input, 0, Some(format)),
        Err(GraphError::Busy(n)) if n == p.capture
    ));
    assert!(matches!(ctx.set_driver(p.capture, p.tone), Err(GraphError::Busy(_))));
    assert!(matches!(
        ctx.set_driver(p.tone, p.capture),
        Err(GraphError::NotADriver(n)) if n == p.capture
    ));
}

#[test]
fn params_reach_running_nodes() {
    let mut ctx = Context::new(config());
    let p = tone_pipeline(&mut ctx);
    let params = ctx.enum_params(p.convert, ParamId::Format, 0, u32::MAX).unwrap();
    assert_eq!(params.len(), 2);

    let bad = Param::Props(vec![cauce_graph::Prop::Frequency(0.0)]);
    assert!(matches!(
        ctx.set_param(p.tone, ParamId::Props, 0, Some(bad)),
        Err(GraphError::Node {
            source: NodeError::InvalidArgument(_),
            ..
        })
    ));
}

#[test]
fn link_errors() {
    let mut ctx = Context::new(config());
    let tone = ctx
        .add_node(NodeProps::new("tone").driver(true), Box::new(ToneSource::new(440.0, 0.5, 2)))
        .unwrap();
    let (sink, _rings) = CaptureSink::new(2, 64);
    let capture = ctx.add_node(NodeProps::new("capture"), Box::new(sink)).unwrap();

    assert!(matches!(
        ctx.link(tone, 0, capture, 0, LinkOptions::default()),
        Err(GraphError::NoFormat { .. })
    ));
    assert!(matches!(
        ctx.link(tone, 0, tone, 0, LinkOptions::default()),
        Err(GraphError::SelfLink(_))
    ));

    ctx.port_set_format(tone, Direction::Output, 0, Some(AudioInfo::new(SampleFormat::F32P, 44100, 2)))
        .unwrap();
    ctx.port_set_format(capture, Direction::Input, 0, Some(AudioInfo::new(SampleFormat::F32P, 48000, 2)))
        .unwrap();
    assert!(matches!(
        ctx.link(tone, 0, capture, 0, LinkOptions::default()),
        Err(GraphError::FormatMismatch { .. })
    ));

    ctx.port_set_format(tone, Direction::Output, 0, Some(AudioInfo::new(SampleFormat::F32P, 48000, 2)))
        .unwrap();
    let link = ctx.link(tone, 0, capture, 0, LinkOptions::default()).unwrap();
    assert!(!ctx.link_is_active(link).unwrap());
    assert!(matches!(
        ctx.link(tone, 0, capture, 0, LinkOptions::default()),
        Err(GraphError::PortBusy { .. })
    ));
    ctx.unlink(link).unwrap();
    assert!(matches!(ctx.link_format(link), Err(GraphError::LinkNotFound(_))));
}
