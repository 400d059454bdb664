//! Stream supervision.
//!
//! `StreamSupervisor::start` opens a frame source and spawns the processing
//! loop on its own thread. Per frame the loop runs detection, picks the
//! highest danger tier, annotates a copy of the frame, updates the alarm,
//! publishes a `FrameEvent` and, when the persistence gate admits it, saves
//! the annotated frame and its detections.
//!
//! The returned `SessionHandle` pauses, resumes and stops the loop. Once
//! `stop` returns the loop has exited: nothing else is published or written,
//! the source is released and the alarm is silent.

mod publish;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use serde::Serialize;

use crate::alarm::{asset_factory, AlarmController, AlarmState, SinkFactory};
use crate::annotate::FrameAnnotator;
use crate::config::EngineConfig;
use crate::danger::{DangerTier, TierTable};
use crate::detect::{Detection, Detector};
use crate::error::StreamError;
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::persist::{PersistenceGate, PersistenceWriter};
use crate::storage::DetectionStore;

pub use publish::FrameSubscriber;
use publish::FramePublisher;

/// One processed frame as seen by consumers.
#[derive(Clone, Debug)]
pub struct FrameEvent {
    /// 1-based position in the session.
    pub sequence: u64,
    /// Annotated copy of the captured frame.
    pub frame: Frame,
    pub detections: Vec<Detection>,
    pub highest_tier: Option<DangerTier>,
    /// Alarm state after this frame was evaluated.
    pub alarm: AlarmState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorState {
    Running,
    Paused,
    Stopped,
}

impl SupervisorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Paused,
            _ => Self::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Running => 0,
            Self::Paused => 1,
            Self::Stopped => 2,
        }
    }
}

/// Who is running the session; recorded with every persisted row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    pub operator: String,
    pub role: String,
}

impl SessionOptions {
    pub fn new(operator: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            role: role.into(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new("unknown", "operator")
    }
}

/// Counter snapshot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames_read: u64,
    pub detector_calls: u64,
    pub detector_failures: u64,
    pub frames_published: u64,
    pub frames_dropped: u64,
    pub persisted: u64,
    pub persistence_failures: u64,
    pub alarm_activations: u64,
    pub alarm_playing: bool,
}

/// Why the loop exited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// `stop` was called.
    Stopped,
    /// The source ran out of frames.
    EndOfStream,
    /// The source failed mid-stream.
    SourceError(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub source: String,
    pub end: SessionEnd,
    pub stats: SessionStats,
}

#[derive(Default)]
struct Counters {
    frames_read: AtomicU64,
    detector_calls: AtomicU64,
    detector_failures: AtomicU64,
    frames_published: AtomicU64,
    frames_dropped: AtomicU64,
    persisted: AtomicU64,
    persistence_failures: AtomicU64,
    alarm_activations: AtomicU64,
    alarm_playing: AtomicBool,
}

impl Counters {
    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_read: self.frames_read.load(Ordering::SeqCst),
            detector_calls: self.detector_calls.load(Ordering::SeqCst),
            detector_failures: self.detector_failures.load(Ordering::SeqCst),
            frames_published: self.frames_published.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            persisted: self.persisted.load(Ordering::SeqCst),
            persistence_failures: self.persistence_failures.load(Ordering::SeqCst),
            alarm_activations: self.alarm_activations.load(Ordering::SeqCst),
            alarm_playing: self.alarm_playing.load(Ordering::SeqCst),
        }
    }
}

struct Shared {
    source: String,
    running: AtomicBool,
    paused: AtomicBool,
    state: AtomicU8,
    counters: Counters,
    loop_thread: OnceLock<Thread>,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    join: Option<JoinHandle<SessionReport>>,
    report: Option<SessionReport>,
}

impl Shared {
    fn state(&self) -> SupervisorState {
        SupervisorState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SupervisorState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    fn wake(&self) {
        if let Some(thread) = self.loop_thread.get() {
            thread.unpark();
        }
    }
}

/// Settings a session needs from the engine configuration.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub results_dir: std::path::PathBuf,
    pub persist_interval: Duration,
    pub publish_capacity: usize,
    pub idle_wait: Duration,
    pub tiers: TierTable,
}

impl From<&EngineConfig> for SessionConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            results_dir: config.results_dir.clone(),
            persist_interval: config.persist_interval,
            publish_capacity: config.stream.publish_capacity,
            idle_wait: config.stream.idle_wait,
            tiers: config.tiers.clone(),
        }
    }
}

/// Owns everything one session needs until `start` hands it to the loop.
pub struct StreamSupervisor {
    config: SessionConfig,
    options: SessionOptions,
    detector: Detector,
    store: Box<dyn DetectionStore>,
    alarm: SinkFactory,
}

impl StreamSupervisor {
    pub fn new(
        config: &EngineConfig,
        options: SessionOptions,
        detector: Detector,
        store: Box<dyn DetectionStore>,
    ) -> Self {
        Self {
            config: SessionConfig::from(config),
            options,
            detector,
            store,
            alarm: asset_factory(config.alarm_asset.clone()),
        }
    }

    /// Replace the alarm sink factory (default: the configured asset).
    pub fn with_alarm(mut self, alarm: SinkFactory) -> Self {
        self.alarm = alarm;
        self
    }

    /// Open `locator` and start processing. An unopenable source is reported
    /// once and nothing is spawned.
    pub fn start(self, locator: &str) -> Result<(SessionHandle, FrameSubscriber), StreamError> {
        match FrameSource::open(locator) {
            Ok(source) => Ok(self.start_source(source)),
            Err(e) => {
                let err = StreamError::source_open(locator, &e);
                log::error!("stream: {}", err);
                Err(err)
            }
        }
    }

    /// Start processing an already opened source.
    pub fn start_source(self, source: FrameSource) -> (SessionHandle, FrameSubscriber) {
        let (publisher, subscriber) = publish::channel(self.config.publish_capacity);
        let shared = Arc::new(Shared {
            source: source.describe().to_string(),
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            state: AtomicU8::new(SupervisorState::Running.as_u8()),
            counters: Counters::default(),
            loop_thread: OnceLock::new(),
            control: Mutex::new(Control::default()),
        });

        let writer = PersistenceWriter::new(
            self.config.results_dir.clone(),
            self.store,
            self.options.operator.clone(),
            self.options.role.clone(),
            source.mode(),
        );
        let session = SessionLoop {
            shared: shared.clone(),
            source,
            detector: self.detector,
            annotator: FrameAnnotator::new(self.config.tiers.clone()),
            tiers: self.config.tiers,
            gate: PersistenceGate::new(self.config.persist_interval),
            writer,
            publisher,
            idle_wait: self.config.idle_wait,
        };
        let alarm = self.alarm;

        log::info!(
            "stream: starting {} for {} ({})",
            shared.source,
            self.options.operator,
            self.options.role
        );
        let join = thread::spawn(move || session.run(alarm));
        let _ = shared.loop_thread.set(join.thread().clone());
        if let Ok(mut control) = shared.control.lock() {
            control.join = Some(join);
        }

        (SessionHandle { shared }, subscriber)
    }
}

/// Control side of a running session. Clones refer to the same session.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn state(&self) -> SupervisorState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot()
    }

    pub fn source(&self) -> &str {
        &self.shared.source
    }

    /// Suspend reading and detection; the alarm is silenced.
    pub fn pause(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.paused.store(true, Ordering::SeqCst);
            self.shared.wake();
        }
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.wake();
    }

    /// End the session and wait for the loop to exit. Safe to call more
    /// than once and from several handles; all get the same report.
    pub fn stop(&self) -> SessionReport {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake();
        self.join()
    }

    /// Wait for the session to end on its own (source exhausted or failed).
    pub fn wait(&self) -> SessionReport {
        self.join()
    }

    fn join(&self) -> SessionReport {
        let mut control = match self.shared.control.lock() {
            Ok(control) => control,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(report) = &control.report {
            return report.clone();
        }
        let Some(join) = control.join.take() else {
            return self.fallback_report(SessionEnd::Stopped);
        };
        if join.thread().id() == thread::current().id() {
            // Called from the loop thread; the loop exits on its own.
            control.join = Some(join);
            return self.fallback_report(SessionEnd::Stopped);
        }
        let report = match join.join() {
            Ok(report) => report,
            Err(_) => {
                log::error!("stream: session thread for {} panicked", self.shared.source);
                self.shared.set_state(SupervisorState::Stopped);
                self.fallback_report(SessionEnd::SourceError("session thread panicked".into()))
            }
        };
        control.report = Some(report.clone());
        report
    }

    fn fallback_report(&self, end: SessionEnd) -> SessionReport {
        SessionReport {
            source: self.shared.source.clone(),
            end,
            stats: self.stats(),
        }
    }
}

struct SessionLoop {
    shared: Arc<Shared>,
    source: FrameSource,
    detector: Detector,
    annotator: FrameAnnotator,
    tiers: TierTable,
    gate: PersistenceGate,
    writer: PersistenceWriter,
    publisher: FramePublisher,
    idle_wait: Duration,
}

impl SessionLoop {
    fn run(mut self, alarm: SinkFactory) -> SessionReport {
        // The audio handle lives and dies on this thread.
        let mut alarm = AlarmController::new(alarm());
        self.detector.warm_up();
        log::debug!(
            "stream: persisting at most once per {:?}",
            self.gate.interval()
        );

        let shared = self.shared.clone();
        let counters = &shared.counters;
        let mut sequence = 0u64;
        let mut paused_seen = false;
        let mut end = SessionEnd::Stopped;

        while shared.running.load(Ordering::SeqCst) {
            if shared.paused.load(Ordering::SeqCst) {
                if !paused_seen {
                    paused_seen = true;
                    alarm.pause();
                    counters.alarm_playing.store(false, Ordering::SeqCst);
                    shared.set_state(SupervisorState::Paused);
                    log::info!("stream: paused {}", shared.source);
                }
                thread::park_timeout(self.idle_wait);
                continue;
            }
            if paused_seen {
                paused_seen = false;
                alarm.resume();
                shared.set_state(SupervisorState::Running);
                log::info!("stream: resumed {}", shared.source);
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("stream: {} reached end of stream", shared.source);
                    end = SessionEnd::EndOfStream;
                    break;
                }
                Err(e) => {
                    log::warn!("stream: {} read failed: {:#}", shared.source, e);
                    end = SessionEnd::SourceError(format!("{:#}", e));
                    break;
                }
            };
            sequence += 1;
            counters.frames_read.fetch_add(1, Ordering::SeqCst);

            let detections = self.detector.detect(&frame);
            counters.detector_calls.fetch_add(1, Ordering::SeqCst);
            counters
                .detector_failures
                .store(self.detector.failures(), Ordering::SeqCst);

            let highest = self
                .tiers
                .highest_tier(detections.iter().map(|d| d.class_label()));
            let annotated = self.annotator.annotate(&frame, &detections);
            let alarm_state = alarm.evaluate(highest, false);
            counters
                .alarm_playing
                .store(alarm_state == AlarmState::Playing, Ordering::SeqCst);
            counters
                .alarm_activations
                .store(alarm.activations(), Ordering::SeqCst);

            if !shared.running.load(Ordering::SeqCst) {
                break;
            }

            let dropped = self.publisher.publish(FrameEvent {
                sequence,
                frame: annotated.clone(),
                detections: detections.clone(),
                highest_tier: highest,
                alarm: alarm_state,
            });
            counters.frames_published.fetch_add(1, Ordering::SeqCst);
            counters.frames_dropped.fetch_add(dropped, Ordering::SeqCst);

            if self.gate.admit(frame.captured_at(), !detections.is_empty()) {
                if self.writer.persist(&annotated, &detections) {
                    counters.persisted.fetch_add(1, Ordering::SeqCst);
                } else {
                    counters.persistence_failures.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        self.source.release();
        alarm.stop();
        counters.alarm_playing.store(false, Ordering::SeqCst);
        shared.running.store(false, Ordering::SeqCst);
        shared.set_state(SupervisorState::Stopped);

        let report = SessionReport {
            source: shared.source.clone(),
            end,
            stats: counters.snapshot(),
        };
        log::info!(
            "stream: {} stopped ({:?}): {} frames, {} persisted, {} dropped",
            report.source,
            report.end,
            report.stats.frames_read,
            report.stats.persisted,
            report.stats.frames_dropped
        );
        report
    }
}
