use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use image::{Rgb, RgbImage};

use didray::{
    alarm::silent_factory, stream::SessionEnd, AlarmState, BoundingBox, DangerTier, Detection,
    DetectionMode, Detector, DetectorBackend, EngineConfig, Frame, FrameSource, InMemoryDetectionStore,
    SessionHandle, SessionOptions, SqliteDetectionStore, StreamError, StreamSupervisor,
    StubBackend, SupervisorState,
};

fn det(x1: i32, y1: i32, x2: i32, y2: i32, conf: f32, label: &str) -> Detection {
    Detection::new(BoundingBox::new(x1, y1, x2, y2).unwrap(), conf, label).unwrap()
}

fn config(results: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.results_dir = results.to_path_buf();
    config.stream.idle_wait = Duration::from_millis(10);
    config
}

fn supervisor(
    config: &EngineConfig,
    backend: impl DetectorBackend + 'static,
    store: &InMemoryDetectionStore,
) -> StreamSupervisor {
    StreamSupervisor::new(
        config,
        SessionOptions::new("ayse", "operator"),
        Detector::new(Box::new(backend)),
        Box::new(store.clone()),
    )
    .with_alarm(silent_factory())
}

struct FailingBackend;

impl DetectorBackend for FailingBackend {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        Err(anyhow::anyhow!("model crashed"))
    }
}

/// Frames captured `offsets` seconds after `t0`.
fn timed_frames(t0: Instant, offsets: &[u64]) -> Vec<Frame> {
    offsets
        .iter()
        .map(|s| {
            Frame::filled(640, 480, [20, 20, 20]).with_captured_at(t0 + Duration::from_secs(*s))
        })
        .collect()
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn wait_for_frames(handle: &SessionHandle, at_least: u64) {
    assert!(
        wait_until(Duration::from_secs(5), || handle.stats().frames_read >= at_least),
        "session never read {} frames",
        at_least
    );
}

#[test]
fn timed_video_drives_alarm_and_persists_once_per_interval() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryDetectionStore::new();
    let backend = StubBackend::new(vec![
        vec![],
        vec![det(40, 40, 200, 160, 0.92, "Gun")],
        vec![det(300, 200, 420, 300, 0.5, "Scissor")],
        vec![det(100, 100, 180, 180, 0.81, "Gun")],
    ]);
    // The last frame lands after the 5 s interval, so the gate opens again.
    let frames = timed_frames(Instant::now(), &[0, 1, 2, 7]);

    let (handle, subscriber) = supervisor(&config(dir.path()), backend, &store)
        .start_source(FrameSource::scripted(frames));
    let report = handle.wait();

    assert_eq!(report.end, SessionEnd::EndOfStream);
    assert_eq!(report.stats.frames_read, 4);
    assert_eq!(report.stats.frames_published, 4);
    assert_eq!(report.stats.persisted, 2);
    assert_eq!(report.stats.persistence_failures, 0);
    assert_eq!(report.stats.alarm_activations, 2);
    assert!(!report.stats.alarm_playing);
    assert_eq!(handle.state(), SupervisorState::Stopped);

    let events: Vec<_> = subscriber.try_iter().collect();
    let alarms: Vec<AlarmState> = events.iter().map(|e| e.alarm).collect();
    assert_eq!(
        alarms,
        vec![
            AlarmState::Idle,
            AlarmState::Playing,
            AlarmState::Idle,
            AlarmState::Playing
        ]
    );
    let tiers: Vec<Option<DangerTier>> = events.iter().map(|e| e.highest_tier).collect();
    assert_eq!(
        tiers,
        vec![
            None,
            Some(DangerTier::Critical),
            Some(DangerTier::Low),
            Some(DangerTier::Critical)
        ]
    );
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);

    // Frame one has nothing to draw; frame two carries a box.
    assert!(events[0].frame.pixels().iter().all(|&p| p == 20));
    assert!(events[1].frame.pixels().iter().any(|&p| p != 20));

    // Frame three (Scissor, 1 s after the first write) is inside the interval.
    let rows = store.events();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].class_labels, vec!["Gun"]);
    assert_eq!(rows[0].bounding_boxes[0].as_array(), [40, 40, 200, 160]);
    assert_eq!(rows[0].mode, DetectionMode::Video);
    assert_eq!(rows[0].operator, "ayse");
    assert!(Path::new(&rows[0].image_path).exists());
    assert_eq!(rows[1].bounding_boxes[0].as_array(), [100, 100, 180, 180]);
    assert_ne!(rows[0].image_path, rows[1].image_path);

    let audit = store.audit_entries();
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].action, "video detection saved: [Gun]");
    Ok(())
}

#[test]
fn gate_stays_shut_at_exactly_the_interval() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryDetectionStore::new();
    let backend = StubBackend::new(vec![vec![det(1, 1, 50, 50, 0.9, "Gun")]]).cycling();
    let frames = timed_frames(Instant::now(), &[0, 1, 5, 6]);

    let (handle, _subscriber) = supervisor(&config(dir.path()), backend, &store)
        .start_source(FrameSource::scripted(frames));
    let report = handle.wait();

    assert_eq!(report.stats.frames_published, 4);
    // Admitted at 0 s and 6 s; 5 s is not past the interval.
    assert_eq!(report.stats.persisted, 2);
    assert_eq!(store.events().len(), 2);
    Ok(())
}

#[test]
fn detector_failures_do_not_stop_the_stream() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryDetectionStore::new();
    let frames = timed_frames(Instant::now(), &[0, 1, 2, 3]);

    let (handle, subscriber) = supervisor(&config(dir.path()), FailingBackend, &store)
        .start_source(FrameSource::scripted(frames));
    let report = handle.wait();

    assert_eq!(report.end, SessionEnd::EndOfStream);
    assert_eq!(report.stats.frames_read, 4);
    assert_eq!(report.stats.detector_calls, 4);
    assert_eq!(report.stats.detector_failures, 4);
    assert_eq!(report.stats.frames_published, 4);
    assert_eq!(report.stats.alarm_activations, 0);

    let events: Vec<_> = subscriber.try_iter().collect();
    assert_eq!(events.len(), 4);
    assert!(events.iter().all(|e| e.detections.is_empty()));
    assert!(events.iter().all(|e| e.highest_tier.is_none()));
    assert!(store.events().is_empty());
    Ok(())
}

#[test]
fn persistence_failure_is_counted_once_per_interval() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // A regular file where the results directory should be.
    let blocked = dir.path().join("results");
    std::fs::write(&blocked, b"not a directory")?;
    let store = InMemoryDetectionStore::new();
    let backend = StubBackend::new(vec![vec![det(10, 10, 90, 90, 0.95, "Gun")]]).cycling();
    let frames = timed_frames(Instant::now(), &[0, 1, 2, 3, 4]);

    let (handle, subscriber) = supervisor(&config(&blocked), backend, &store)
        .start_source(FrameSource::scripted(frames));
    let report = handle.wait();

    assert_eq!(report.end, SessionEnd::EndOfStream);
    assert_eq!(report.stats.frames_published, 5);
    assert_eq!(subscriber.try_iter().count(), 5);
    // The failed write still closed the gate for the interval.
    assert_eq!(report.stats.persistence_failures, 1);
    assert_eq!(report.stats.persisted, 0);
    assert!(store.events().is_empty());
    assert!(store.audit_entries().is_empty());
    assert!(blocked.is_file());
    Ok(())
}

#[test]
fn pause_freezes_the_loop_until_resume() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryDetectionStore::new();
    let backend = StubBackend::new(vec![vec![det(1, 1, 10, 10, 0.9, "Gun")]]).cycling();

    let (handle, subscriber) = supervisor(&config(dir.path()), backend, &store)
        .start("stub://pause-test?fps=200&size=32x24")
        .map_err(anyhow::Error::new)?;

    wait_for_frames(&handle, 3);
    assert!(handle.stats().alarm_playing);

    handle.pause();
    assert!(wait_until(Duration::from_secs(5), || {
        handle.state() == SupervisorState::Paused
    }));
    let frozen = handle.stats();
    assert!(!frozen.alarm_playing);
    let _ = subscriber.try_iter().count();

    thread::sleep(Duration::from_millis(150));
    let later = handle.stats();
    assert_eq!(later.frames_read, frozen.frames_read);
    assert_eq!(later.detector_calls, frozen.detector_calls);
    assert_eq!(later.frames_published, frozen.frames_published);
    assert_eq!(subscriber.try_iter().count(), 0);

    handle.resume();
    wait_for_frames(&handle, frozen.frames_read + 2);
    assert_eq!(handle.state(), SupervisorState::Running);

    let report = handle.stop();
    assert_eq!(report.end, SessionEnd::Stopped);
    assert!(!report.stats.alarm_playing);
    // Gun on every frame, but the gate admits one write per interval.
    assert_eq!(store.events().len(), 1);
    Ok(())
}

#[test]
fn stop_is_idempotent_and_final() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryDetectionStore::new();

    let (handle, subscriber) = supervisor(&config(dir.path()), StubBackend::empty(), &store)
        .start("stub://idle?fps=200&size=16x16")
        .map_err(anyhow::Error::new)?;
    wait_for_frames(&handle, 1);

    let other = handle.clone();
    let first = handle.stop();
    let second = other.stop();
    assert_eq!(first, second);
    assert_eq!(handle.state(), SupervisorState::Stopped);

    let published = first.stats.frames_published;
    let drained = subscriber.try_iter().count() as u64;
    assert!(drained <= published);
    assert!(subscriber.recv().is_none());
    assert_eq!(handle.stats().frames_read, first.stats.frames_read);
    Ok(())
}

#[test]
fn slow_consumer_never_blocks_the_loop() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let store = InMemoryDetectionStore::new();
    let mut config = config(dir.path());
    config.stream.publish_capacity = 1;
    let frames = (0..20).map(|_| Frame::filled(8, 8, [0, 0, 0])).collect();

    let (handle, subscriber) = supervisor(&config, StubBackend::empty(), &store)
        .start_source(FrameSource::scripted(frames));
    let report = handle.wait();

    assert_eq!(report.stats.frames_published, 20);
    assert_eq!(report.stats.frames_dropped, 19);
    let last = subscriber.recv().expect("newest frame is kept");
    assert_eq!(last.sequence, 20);
    Ok(())
}

#[test]
fn still_image_is_saved_in_image_mode() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let image_path = dir.path().join("bag.png");
    RgbImage::from_pixel(64, 48, Rgb([200, 200, 200])).save(&image_path)?;
    let db_path = dir.path().join("detections.db");
    let db_path = db_path.to_string_lossy().to_string();

    let backend = StubBackend::new(vec![vec![det(5, 20, 30, 40, 0.77, "Folding_Knife")]]);
    let (handle, _subscriber) = StreamSupervisor::new(
        &config(&dir.path().join("results")),
        SessionOptions::new("mehmet", "admin"),
        Detector::new(Box::new(backend)),
        Box::new(SqliteDetectionStore::open(&db_path)?),
    )
    .with_alarm(silent_factory())
    .start(&image_path.to_string_lossy())
    .map_err(anyhow::Error::new)?;

    let report = handle.wait();
    assert_eq!(report.end, SessionEnd::EndOfStream);
    assert_eq!(report.stats.frames_read, 1);
    assert_eq!(report.stats.alarm_activations, 0);

    let store = SqliteDetectionStore::open(&db_path)?;
    let rows = store.fetch_detections(10)?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].mode, DetectionMode::Image);
    assert_eq!(rows[0].role, "admin");
    assert_eq!(rows[0].confidences, vec![0.77]);
    let file_name = Path::new(&rows[0].image_path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    assert!(file_name.starts_with("detect_"));

    let audit = store.audit_log(10)?;
    assert_eq!(audit[0].actor, "mehmet");
    assert_eq!(audit[0].action, "image detection saved: [Folding_Knife]");
    Ok(())
}

#[test]
fn unopenable_source_reports_source_open_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = InMemoryDetectionStore::new();
    let result = supervisor(&config(dir.path()), StubBackend::empty(), &store)
        .start("/nonexistent/camera_dump.png");

    match result {
        Err(StreamError::SourceOpen { source, .. }) => {
            assert_eq!(source, "/nonexistent/camera_dump.png");
        }
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("opening a missing image must fail"),
    }
    assert!(store.events().is_empty());
}
