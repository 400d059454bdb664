//! Audible alarm.
//!
//! `AlarmController` is a two-state machine (`Idle`, `Playing`) driven once
//! per frame by the highest danger tier in view. The sound itself goes
//! through an `AlarmSink` handle that is acquired when a session starts and
//! released when it ends. Without audio the controller still tracks state.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::danger::DangerTier;
use crate::error::StreamError;

/// Audio output capable of looping one alarm sound.
///
/// Sinks are created on the session thread and never leave it, so they
/// need not be `Send`.
pub trait AlarmSink {
    fn name(&self) -> &'static str;

    /// Begin looping playback. Only called while the controller is idle.
    fn start_loop(&mut self) -> Result<()>;

    /// Halt playback. Only called while the controller is playing.
    fn stop(&mut self) -> Result<()>;
}

/// Builds the session's alarm sink on the session thread.
pub type SinkFactory = Box<dyn FnOnce() -> Box<dyn AlarmSink> + Send>;

/// No-op sink for hosts without audio.
#[derive(Debug, Default)]
pub struct SilentSink;

impl AlarmSink for SilentSink {
    fn name(&self) -> &'static str {
        "silent"
    }

    fn start_loop(&mut self) -> Result<()> {
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory that always yields a `SilentSink`.
pub fn silent_factory() -> SinkFactory {
    Box::new(|| Box::new(SilentSink) as Box<dyn AlarmSink>)
}

/// Factory for the configured alarm asset. Any failure to open audio or the
/// asset degrades to silent mode.
pub fn asset_factory(asset: Option<PathBuf>) -> SinkFactory {
    Box::new(move || acquire_sink(asset.as_deref()))
}

/// Open the audio device for `asset`, or fall back to `SilentSink`.
pub fn acquire_sink(asset: Option<&Path>) -> Box<dyn AlarmSink> {
    let Some(asset) = asset else {
        log::info!("alarm: no asset configured, running silent");
        return Box::new(SilentSink);
    };
    match open_audio(asset) {
        Ok(sink) => {
            log::info!("alarm: loaded {} ({})", asset.display(), sink.name());
            sink
        }
        Err(e) => {
            let err = StreamError::AlarmAsset {
                reason: format!("{}: {:#}", asset.display(), e),
            };
            log::warn!("alarm: {}; running silent", err);
            Box::new(SilentSink)
        }
    }
}

#[cfg(feature = "alarm-rodio")]
fn open_audio(asset: &Path) -> Result<Box<dyn AlarmSink>> {
    Ok(Box::new(rodio_sink::RodioSink::open(asset)?))
}

#[cfg(not(feature = "alarm-rodio"))]
fn open_audio(asset: &Path) -> Result<Box<dyn AlarmSink>> {
    if !asset.is_file() {
        anyhow::bail!("alarm asset not found");
    }
    anyhow::bail!("audio output requires the alarm-rodio feature")
}

#[cfg(feature = "alarm-rodio")]
mod rodio_sink {
    use anyhow::{Context, Result};
    use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
    use std::io::Cursor;
    use std::path::Path;

    use super::AlarmSink;

    /// Loops a decoded WAV asset on the default output device.
    pub(super) struct RodioSink {
        _stream: OutputStream,
        handle: OutputStreamHandle,
        sound: Vec<u8>,
        sink: Option<Sink>,
    }

    impl RodioSink {
        pub(super) fn open(asset: &Path) -> Result<Self> {
            let sound = std::fs::read(asset)
                .with_context(|| format!("read alarm asset {}", asset.display()))?;
            // Reject undecodable assets now rather than on the first threat.
            Decoder::new(Cursor::new(sound.clone())).context("decode alarm asset")?;
            let (stream, handle) =
                OutputStream::try_default().context("open default audio output")?;
            Ok(Self {
                _stream: stream,
                handle,
                sound,
                sink: None,
            })
        }
    }

    impl AlarmSink for RodioSink {
        fn name(&self) -> &'static str {
            "rodio"
        }

        fn start_loop(&mut self) -> Result<()> {
            let sink = Sink::try_new(&self.handle).context("create audio sink")?;
            let source = Decoder::new(Cursor::new(self.sound.clone()))
                .context("decode alarm asset")?
                .repeat_infinite();
            sink.append(source);
            sink.play();
            self.sink = Some(sink);
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            if let Some(sink) = self.sink.take() {
                sink.stop();
            }
            Ok(())
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlarmState {
    Idle,
    Playing,
}

/// Continuous alarm while a critical threat is in view.
pub struct AlarmController {
    sink: Box<dyn AlarmSink>,
    state: AlarmState,
    paused: bool,
    activations: u64,
}

impl AlarmController {
    pub fn new(sink: Box<dyn AlarmSink>) -> Self {
        Self {
            sink,
            state: AlarmState::Idle,
            paused: false,
            activations: 0,
        }
    }

    /// Controller with no audio output; state is still tracked.
    pub fn silent() -> Self {
        Self::new(Box::new(SilentSink))
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    /// Number of `Idle -> Playing` transitions so far.
    pub fn activations(&self) -> u64 {
        self.activations
    }

    /// Per-frame update: play iff the highest tier is critical and neither
    /// the caller nor the controller is paused.
    pub fn evaluate(&mut self, highest: Option<DangerTier>, paused: bool) -> AlarmState {
        if highest == Some(DangerTier::Critical) && !paused && !self.paused {
            self.start();
        } else {
            self.stop();
        }
        self.state
    }

    /// Silence now and refuse to start until `resume`.
    pub fn pause(&mut self) {
        self.paused = true;
        self.stop();
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Silence now. No-op when idle.
    pub fn stop(&mut self) {
        if self.state == AlarmState::Idle {
            return;
        }
        if let Err(e) = self.sink.stop() {
            log::warn!("alarm: {} failed to stop: {:#}", self.sink.name(), e);
        }
        self.state = AlarmState::Idle;
        log::info!("alarm: stopped");
    }

    fn start(&mut self) {
        if self.state == AlarmState::Playing || self.paused {
            return;
        }
        if let Err(e) = self.sink.start_loop() {
            log::warn!("alarm: {} failed to start: {:#}", self.sink.name(), e);
        }
        self.state = AlarmState::Playing;
        self.activations += 1;
        log::warn!("alarm: critical threat in view");
    }
}

impl Drop for AlarmController {
    fn drop(&mut self) {
        self.stop();
    }
}
