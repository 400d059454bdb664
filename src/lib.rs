//! DidRay stream engine
//!
//! This crate screens a stream of frames for dangerous objects.
//!
//! # Architecture
//!
//! Each frame moves through one pipeline, on one thread per session:
//!
//! 1. **Ingest**: a still image, video file, camera or synthetic source.
//! 2. **Detect**: a pluggable backend returns labelled boxes.
//! 3. **Classify**: every label maps to a danger tier, unknown labels to `Low`.
//! 4. **Annotate**: boxes and captions are drawn on a copy of the frame.
//! 5. **Alarm**: a looping alarm plays while a `Critical` threat is in view.
//! 6. **Publish**: consumers receive the annotated frame over a bounded channel.
//! 7. **Persist**: at most one snapshot per interval is written to disk and
//!    recorded in the detection store with an audit entry.
//!
//! # Module Structure
//!
//! - `frame`: `Frame` and `DetectionMode`
//! - `ingest`: frame sources selected by locator
//! - `detect`: `Detection`, `DetectorBackend`, the failure-absorbing `Detector`
//! - `danger`: `DangerTier` and the label → tier table
//! - `annotate`, `alarm`, `persist`: per-frame side effects
//! - `storage`: `DetectionStore` (SQLite, in-memory)
//! - `stream`: `StreamSupervisor` and `SessionHandle`
//! - `config`: `EngineConfig` (TOML + `DIDRAY_*` environment)

pub mod alarm;
pub mod annotate;
pub mod config;
pub mod danger;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod persist;
pub mod storage;
pub mod stream;

pub use alarm::{AlarmController, AlarmSink, AlarmState, SilentSink, SinkFactory};
pub use annotate::FrameAnnotator;
pub use config::{DetectorSettings, EngineConfig, StreamSettings};
pub use danger::{DangerTier, TierEntry, TierTable};
pub use detect::{BoundingBox, Detection, Detector, DetectorBackend, StubBackend};
pub use error::StreamError;
pub use frame::{DetectionMode, Frame};
pub use ingest::{FrameSource, SourceLocator};
pub use persist::{PersistenceGate, PersistenceWriter};
pub use storage::{
    AuditEntry, DetectionEvent, DetectionStore, InMemoryDetectionStore, SqliteDetectionStore,
};
pub use stream::{
    FrameEvent, FrameSubscriber, SessionHandle, SessionOptions, SessionReport, SessionStats,
    StreamSupervisor, SupervisorState,
};
