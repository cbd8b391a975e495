use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::Duration;

use log::warn;

use crate::error::{Error, Result};

use super::chain::DspChain;
use super::dsp::filters::{EqControl, Equalizer};
use super::dsp::spectrum::{SpectrumAnalyzer, DEFAULT_FFT_SIZE};
use super::events::EventSink;
use super::output::{AudioBackend, OutputDevice, SharedParams, StoppedCallback};
use super::playlist::{Advance, PlaylistController};
use super::sentinel::{EndOfStreamCallback, EndOfStreamSentinel};
use super::source::{PcmSource, SampleSource, SourceProvider};
use super::types::{EqualizerBand, SourceFormat, Track};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Loading,
    Playing,
    Paused,
    Stopping,
}

/// Delays used by the asynchronous parts of the engine. Production code uses
/// the defaults; tests shorten them to keep race scenarios fast.
#[derive(Clone, Copy, Debug)]
pub struct EngineTimings {
    /// Wait after an end-of-stream signal before advancing, so the final
    /// buffer can finish rendering.
    pub end_of_stream_debounce: Duration,
    /// Wait before probing the device for the post-transport state report.
    pub state_settle: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            end_of_stream_debounce: Duration::from_millis(500),
            state_settle: Duration::from_millis(100),
        }
    }
}

/// Top-level orchestrator: owns the playlist controller, the session
/// generation counter and the currently open device, wires the pull chain
/// (decode → equalizer → spectrum analyzer → sentinel → output) and exposes
/// the public control surface.
///
/// All engine-owned state lives behind one coarse lock held only for handle
/// swaps. Asynchronous continuations (end-of-stream advance, device-stopped
/// handling, settle probes) re-validate their captured session generation
/// before touching anything; a mismatch means the continuation is stale and
/// is silently dropped.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    core: Mutex<EngineCore>,
    events: Arc<dyn EventSink>,
    provider: Box<dyn SourceProvider>,
    backend: Box<dyn AudioBackend>,
    eq: Arc<EqControl>,
    params: Arc<SharedParams>,
    timings: EngineTimings,
}

struct EngineCore {
    controller: PlaylistController,
    device: Option<Box<dyn OutputDevice>>,
    state: EngineState,
    generation: u64,
    stop_requested: bool,
    was_playing_before_seek: bool,
    format: Option<SourceFormat>,
    total_frames: u64,
}

impl PlaybackEngine {
    pub fn new(
        provider: Box<dyn SourceProvider>,
        backend: Box<dyn AudioBackend>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_timings(provider, backend, events, EngineTimings::default())
    }

    pub fn with_timings(
        provider: Box<dyn SourceProvider>,
        backend: Box<dyn AudioBackend>,
        events: Arc<dyn EventSink>,
        timings: EngineTimings,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                core: Mutex::new(EngineCore {
                    controller: PlaylistController::new(),
                    device: None,
                    state: EngineState::Idle,
                    generation: 0,
                    stop_requested: false,
                    was_playing_before_seek: false,
                    format: None,
                    total_frames: 0,
                }),
                events,
                provider,
                backend,
                eq: Arc::new(EqControl::new()),
                params: Arc::new(SharedParams::new()),
                timings,
            }),
        }
    }

    pub fn set_playlist(&self, tracks: Vec<Arc<Track>>) {
        self.lock().controller.set_playlist(tracks);
    }

    pub fn set_shuffle(&self, enabled: bool) {
        self.lock().controller.set_shuffle(enabled);
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.lock().controller.shuffle_enabled()
    }

    pub fn set_repeat(&self, enabled: bool) {
        self.lock().controller.set_repeat(enabled);
    }

    pub fn repeat_enabled(&self) -> bool {
        self.lock().controller.repeat_enabled()
    }

    pub fn current_track(&self) -> Option<Arc<Track>> {
        self.lock().controller.current_track()
    }

    pub fn tracks(&self) -> Vec<Arc<Track>> {
        self.lock().controller.tracks().to_vec()
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.lock()
            .device
            .as_ref()
            .map(|device| device.is_playing())
            .unwrap_or(false)
    }

    /// Makes `track` current and starts playing it.
    pub fn play_track(&self, track: &Track) -> Result<()> {
        {
            let mut core = self.lock();
            if !core.controller.select(track) {
                return Err(Error::TrackNotFound(track.path.display().to_string()));
            }
            self.play_current_locked(&mut core);
        }
        self.schedule_state_probe();
        Ok(())
    }

    /// Pauses when playing, resumes when paused. With no device open and a
    /// non-empty playlist without a current track, starts at index 0.
    pub fn toggle_play_pause(&self) {
        let mut probe = false;
        {
            let mut core = self.lock();
            if core.device.is_none() {
                if !core.controller.is_empty() && core.controller.current_index().is_none() {
                    core.controller.select_index(0);
                    self.play_current_locked(&mut core);
                    probe = true;
                }
            } else {
                let playing = core
                    .device
                    .as_ref()
                    .map(|device| device.is_playing())
                    .unwrap_or(false);
                let result = if playing {
                    core.device.as_mut().map(|device| device.pause())
                } else {
                    core.device.as_mut().map(|device| device.play())
                };
                match result {
                    Some(Ok(())) => {
                        core.state = if playing {
                            EngineState::Paused
                        } else {
                            EngineState::Playing
                        };
                        self.shared.events.playback_state_changed(!playing);
                    }
                    Some(Err(err)) => {
                        warn!("transport toggle failed: {err}");
                        self.stop_internal_locked(&mut core);
                        core.generation += 1;
                        core.state = EngineState::Idle;
                        self.shared.events.playback_state_changed(false);
                    }
                    None => {}
                }
            }
        }
        if probe {
            self.schedule_state_probe();
        }
    }

    /// Advances to the next track; at the end of the playlist with repeat
    /// off, stops and reports the end instead.
    pub fn next(&self) {
        {
            let mut core = self.lock();
            if core.controller.is_empty() {
                return;
            }
            self.advance_locked(&mut core);
        }
        self.schedule_state_probe();
    }

    /// Steps back one track; wraps from the first to the last.
    pub fn previous(&self) {
        {
            let mut core = self.lock();
            if core.controller.is_empty() {
                return;
            }
            core.controller.previous();
            self.play_current_locked(&mut core);
        }
        self.schedule_state_probe();
    }

    /// Explicit caller-initiated stop. A second consecutive call is a no-op
    /// and emits nothing.
    pub fn stop(&self) {
        let stopped = {
            let mut core = self.lock();
            let active = core.device.is_some() || core.state != EngineState::Idle;
            if active {
                core.state = EngineState::Stopping;
                self.stop_internal_locked(&mut core);
                core.generation += 1;
                core.state = EngineState::Idle;
            }
            active
        };
        if stopped {
            self.shared.events.playback_stopped();
            self.shared.events.playback_state_changed(false);
        }
    }

    /// Repositions playback to `percentage` (0..100) of the track length.
    /// Out-of-range or non-finite input is clamped, never an error.
    pub fn seek_to(&self, percentage: f64) {
        let mut core = self.lock();
        if core.total_frames == 0 {
            return;
        }
        let pct = if percentage.is_finite() {
            percentage.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let frame = ((pct / 100.0) * core.total_frames as f64) as u64;
        let frame = frame.min(core.total_frames);
        if let Some(device) = core.device.as_mut() {
            device.request_seek(frame);
        }
    }

    /// Suspends output for the duration of a drag-seek gesture.
    pub fn pause_for_seek(&self) {
        let mut core = self.lock();
        let playing = core
            .device
            .as_ref()
            .map(|device| device.is_playing())
            .unwrap_or(false);
        core.was_playing_before_seek = playing;
        if playing {
            if let Some(device) = core.device.as_mut() {
                let _ = device.pause();
            }
        }
    }

    pub fn resume_after_seek(&self) {
        let mut core = self.lock();
        if core.was_playing_before_seek {
            if let Some(device) = core.device.as_mut() {
                let _ = device.play();
            }
        }
    }

    /// Updates one band of the engine-lifetime equalizer table. Out-of-range
    /// indices are ignored; the active chain picks the change up at its next
    /// buffer boundary.
    pub fn set_gain(&self, band_index: usize, gain_db: f32) {
        self.shared.eq.set_gain(band_index, gain_db);
    }

    pub fn equalizer_bands(&self) -> Vec<EqualizerBand> {
        self.shared.eq.bands()
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.params.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.shared.params.volume()
    }

    /// Current playback position; zero when idle.
    pub fn position(&self) -> Duration {
        let core = self.lock();
        match (core.device.as_ref(), core.format) {
            (Some(device), Some(format)) if format.sample_rate > 0 => Duration::from_secs_f64(
                device.position_frames() as f64 / format.sample_rate as f64,
            ),
            _ => Duration::ZERO,
        }
    }

    /// Length of the loaded track; zero when idle.
    pub fn duration(&self) -> Duration {
        let core = self.lock();
        match core.format {
            Some(format) if format.sample_rate > 0 => {
                Duration::from_secs_f64(core.total_frames as f64 / format.sample_rate as f64)
            }
            _ => Duration::ZERO,
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineCore> {
        self.shared
            .core
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens the controller's current track and starts a fresh session.
    /// Any failure logs, tears down and leaves the engine idle; nothing
    /// propagates to the caller.
    fn play_current_locked(&self, core: &mut EngineCore) {
        core.state = EngineState::Loading;
        self.stop_internal_locked(core);
        core.generation += 1;
        core.stop_requested = false;
        let generation = core.generation;

        let Some(track) = core.controller.current_track() else {
            core.state = EngineState::Idle;
            return;
        };

        let source = match self.shared.provider.open(&track.path) {
            Ok(source) => source,
            Err(err) => {
                warn!("cannot open {}: {err}", track.path.display());
                core.state = EngineState::Idle;
                return;
            }
        };

        let format = source.format();
        core.format = Some(format);
        core.total_frames = source.total_frames();

        let equalizer = Equalizer::new(format.channels, format.sample_rate, Arc::clone(&self.shared.eq));
        let spectrum_events = Arc::clone(&self.shared.events);
        let analyzer = SpectrumAnalyzer::new(
            format.channels,
            DEFAULT_FFT_SIZE,
            Box::new(move |frame| spectrum_events.spectrum_frame(frame)),
        );

        // The sentinel fires on the producer thread; the advance itself runs
        // on a worker after the debounce so it can never hold up audio or
        // deadlock against a concurrent explicit stop.
        let end_weak = Arc::downgrade(&self.shared);
        let debounce = self.shared.timings.end_of_stream_debounce;
        let on_end: EndOfStreamCallback = Box::new(move || {
            let weak = Weak::clone(&end_weak);
            thread::spawn(move || {
                thread::sleep(debounce);
                if let Some(shared) = weak.upgrade() {
                    PlaybackEngine { shared }.advance_after_end(generation);
                }
            });
        });

        let chain = Box::new(EndOfStreamSentinel::new(
            DspChain::new(source, equalizer, analyzer),
            on_end,
        ));

        let stopped_weak = Arc::downgrade(&self.shared);
        let on_stopped: StoppedCallback = Box::new(move |error| {
            let weak = Weak::clone(&stopped_weak);
            thread::spawn(move || {
                if let Some(shared) = weak.upgrade() {
                    PlaybackEngine { shared }.handle_device_stopped(generation, error);
                }
            });
        });

        match self
            .shared
            .backend
            .open(chain, Arc::clone(&self.shared.params), on_stopped)
        {
            Ok(mut device) => {
                self.shared.events.track_changed(&track);
                if let Err(err) = device.play() {
                    warn!("failed to start playback of {}: {err}", track.path.display());
                    core.device = Some(device);
                    self.stop_internal_locked(core);
                    core.state = EngineState::Idle;
                    return;
                }
                core.device = Some(device);
                core.state = EngineState::Playing;
                self.shared.events.playback_state_changed(true);
            }
            Err(err) => {
                warn!("cannot open output for {}: {err}", track.path.display());
                core.state = EngineState::Idle;
            }
        }
    }

    /// Tears down device and source without emitting the public stopped
    /// notifications. Used as a setup step before loading the next track and
    /// by the explicit stop path.
    fn stop_internal_locked(&self, core: &mut EngineCore) {
        if core.device.is_some() {
            core.stop_requested = true;
            core.device = None;
        }
        self.shared.params.set_playing(false);
        core.format = None;
        core.total_frames = 0;
    }

    fn advance_locked(&self, core: &mut EngineCore) {
        match core.controller.next() {
            Advance::Next(_) => self.play_current_locked(core),
            Advance::Ended => {
                self.stop_internal_locked(core);
                core.generation += 1;
                core.state = EngineState::Idle;
                self.shared.events.playlist_ended();
            }
        }
    }

    /// End-of-stream continuation, invoked after the debounce. Advances only
    /// when the captured generation is still the live one.
    fn advance_after_end(&self, generation: u64) {
        {
            let mut core = self.lock();
            if core.generation != generation {
                return;
            }
            if core.controller.is_empty() {
                return;
            }
            self.advance_locked(&mut core);
        }
        self.schedule_state_probe();
    }

    /// Device-stopped continuation. Internally requested stops are swallowed,
    /// errors halt playback, and a clean unrequested stop is a secondary
    /// end-of-track signal feeding the same generation-checked advance.
    fn handle_device_stopped(&self, generation: u64, error: Option<String>) {
        let mut advanced = false;
        {
            let mut core = self.lock();
            if core.stop_requested {
                core.stop_requested = false;
            } else if core.generation != generation {
                // Stale: a newer session owns the engine now.
            } else if let Some(message) = error {
                warn!("output device stopped with error: {message}");
                self.stop_internal_locked(&mut core);
                core.generation += 1;
                core.state = EngineState::Idle;
                self.shared.events.playback_stopped();
                self.shared.events.playback_state_changed(false);
            } else if !core.controller.is_empty() {
                self.advance_locked(&mut core);
                advanced = true;
            }
        }
        if advanced {
            self.schedule_state_probe();
        }
    }

    /// Reports the device's actual transport state after a short settle
    /// delay, so callers converge on the truth after next/previous/play.
    fn schedule_state_probe(&self) {
        let weak = Arc::downgrade(&self.shared);
        let settle = self.shared.timings.state_settle;
        thread::spawn(move || {
            thread::sleep(settle);
            if let Some(shared) = weak.upgrade() {
                let engine = PlaybackEngine { shared };
                let playing = engine.is_playing();
                engine.shared.events.playback_state_changed(playing);
            }
        });
    }
}

impl Clone for PlaybackEngine {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
