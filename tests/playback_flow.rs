//! Engine scenario tests driven by a synthetic backend and decode provider,
//! so no audio hardware is involved. The driver thread pulls the chain the
//! way a real output would, just faster.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rustfft::num_complex::Complex;

use resound::audio::engine::{EngineState, EngineTimings, PlaybackEngine};
use resound::audio::events::EventSink;
use resound::audio::output::{
    AudioBackend, OutputDevice, SharedParams, StoppedCallback, StoppedHook,
};
use resound::audio::source::{MemorySource, PcmSource, SampleSource, SourceProvider};
use resound::audio::types::{SourceFormat, Track};
use resound::error::{Error, Result};

/// Decodes every path into a fixed-length stereo ramp; paths containing
/// "missing" fail to open.
struct TestProvider {
    frames: usize,
}

impl SourceProvider for TestProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn PcmSource>> {
        if path.to_string_lossy().contains("missing") {
            return Err(Error::Decode(format!("cannot open {}", path.display())));
        }
        let samples: Vec<f32> = (0..self.frames * 2)
            .map(|i| ((i % 100) as f32 / 100.0) - 0.5)
            .collect();
        Ok(Box::new(MemorySource::new(
            SourceFormat::new(44_100, 2),
            samples,
        )))
    }
}

/// Pulls the chain in 256-frame chunks on a driver thread. Optionally reports
/// the clean device-stopped signal once the source drains.
struct TestBackend {
    report_drain: bool,
}

struct TestDevice {
    stop: Arc<AtomicBool>,
    seek: Arc<AtomicU64>,
    position: Arc<AtomicU64>,
    params: Arc<SharedParams>,
    driver: Option<thread::JoinHandle<()>>,
}

impl AudioBackend for TestBackend {
    fn open(
        &self,
        mut chain: Box<dyn PcmSource>,
        params: Arc<SharedParams>,
        on_stopped: StoppedCallback,
    ) -> Result<Box<dyn OutputDevice>> {
        let stop = Arc::new(AtomicBool::new(false));
        let seek = Arc::new(AtomicU64::new(u64::MAX));
        let position = Arc::new(AtomicU64::new(0));
        let hook = Arc::new(StoppedHook::new(on_stopped));

        let driver_stop = Arc::clone(&stop);
        let driver_seek = Arc::clone(&seek);
        let driver_position = Arc::clone(&position);
        let driver_params = Arc::clone(&params);
        let report_drain = self.report_drain;
        let driver = thread::spawn(move || {
            let channels = chain.format().channels.max(1) as usize;
            let mut buffer = vec![0.0_f32; 256 * channels];
            let mut drained = false;
            loop {
                if driver_stop.load(Ordering::SeqCst) {
                    break;
                }
                let requested = driver_seek.swap(u64::MAX, Ordering::SeqCst);
                if requested != u64::MAX {
                    chain.seek_to_frame(requested);
                    drained = false;
                }
                if !driver_params.is_playing() {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                let read = chain.read(&mut buffer);
                driver_position.store(chain.position_frames(), Ordering::SeqCst);
                if read == 0 {
                    if !drained {
                        drained = true;
                        if report_drain {
                            hook.fire(None);
                        }
                    }
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                thread::sleep(Duration::from_millis(1));
            }
        });

        Ok(Box::new(TestDevice {
            stop,
            seek,
            position,
            params,
            driver: Some(driver),
        }))
    }
}

impl OutputDevice for TestDevice {
    fn play(&mut self) -> Result<()> {
        self.params.set_playing(true);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.params.set_playing(false);
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.params.is_playing()
    }

    fn request_seek(&mut self, frame: u64) {
        self.seek.store(frame, Ordering::SeqCst);
    }

    fn position_frames(&self) -> u64 {
        self.position.load(Ordering::SeqCst)
    }
}

impl Drop for TestDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    spectra: AtomicUsize,
}

impl Recorder {
    fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn tracks(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| e.strip_prefix("track:").map(str::to_string))
            .collect()
    }

    fn count(&self, event: &str) -> usize {
        self.snapshot().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl EventSink for Recorder {
    fn track_changed(&self, track: &Track) {
        let name = track
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.push(format!("track:{name}"));
    }

    fn playback_state_changed(&self, is_playing: bool) {
        self.push(format!("state:{is_playing}"));
    }

    fn playback_stopped(&self) {
        self.push("stopped".to_string());
    }

    fn playlist_ended(&self) {
        self.push("ended".to_string());
    }

    fn spectrum_frame(&self, _frame: &[Complex<f32>]) {
        self.spectra.fetch_add(1, Ordering::SeqCst);
    }
}

fn tracks(names: &[&str]) -> Vec<Arc<Track>> {
    names
        .iter()
        .map(|name| {
            Arc::new(Track::new(
                PathBuf::from(format!("/music/{name}")),
                Duration::from_secs(3),
            ))
        })
        .collect()
}

fn engine_with(
    frames: usize,
    report_drain: bool,
    debounce_ms: u64,
) -> (PlaybackEngine, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let engine = PlaybackEngine::with_timings(
        Box::new(TestProvider { frames }),
        Box::new(TestBackend { report_drain }),
        Arc::clone(&recorder) as Arc<dyn EventSink>,
        EngineTimings {
            end_of_stream_debounce: Duration::from_millis(debounce_ms),
            state_settle: Duration::from_millis(5),
        },
    );
    (engine, recorder)
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
fn playlist_plays_through_in_order_and_ends_once() {
    let (engine, recorder) = engine_with(2048, true, 10);
    let list = tracks(&["a.flac", "b.flac", "c.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || recorder.count("ended") >= 1),
        "playlist never ended; events: {:?}",
        recorder.snapshot()
    );
    // Let any straggling continuations settle, then check nothing re-fired.
    thread::sleep(Duration::from_millis(100));

    assert_eq!(recorder.tracks(), vec!["a.flac", "b.flac", "c.flac"]);
    assert_eq!(recorder.count("ended"), 1);
    assert!(engine.current_track().is_none());
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn stale_end_of_stream_signal_does_not_advance() {
    // Only the sentinel path advances here, and its debounce is long enough
    // for the user to change tracks underneath it.
    let (engine, recorder) = engine_with(256, false, 200);
    let list = tracks(&["a.flac", "b.flac", "c.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();

    // Track a drains almost immediately; its end-of-stream worker is now
    // sleeping through the debounce with generation G captured.
    thread::sleep(Duration::from_millis(60));
    engine.play_track(&list[2]).unwrap();

    thread::sleep(Duration::from_millis(400));
    assert_eq!(
        recorder.tracks(),
        vec!["a.flac", "c.flac"],
        "the stale signal must not advance to b.flac"
    );
}

#[test]
fn explicit_stop_invalidates_pending_advance() {
    let (engine, recorder) = engine_with(256, false, 150);
    let list = tracks(&["a.flac", "b.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();

    thread::sleep(Duration::from_millis(50));
    engine.stop();

    thread::sleep(Duration::from_millis(300));
    assert_eq!(recorder.tracks(), vec!["a.flac"]);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn stop_twice_emits_no_duplicate_notifications() {
    let (engine, recorder) = engine_with(441_000, true, 10);
    let list = tracks(&["a.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.is_playing()));

    engine.stop();
    let stopped = recorder.count("stopped");
    assert_eq!(stopped, 1);

    engine.stop();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(recorder.count("stopped"), stopped);
    assert_eq!(engine.state(), EngineState::Idle);
}

#[test]
fn repeat_wraps_back_to_the_first_track() {
    let (engine, recorder) = engine_with(512, true, 5);
    let list = tracks(&["a.flac", "b.flac"]);
    engine.set_playlist(list.clone());
    engine.set_repeat(true);
    engine.play_track(&list[0]).unwrap();

    assert!(
        wait_until(Duration::from_secs(10), || recorder.tracks().len() >= 4),
        "repeat never wrapped; events: {:?}",
        recorder.snapshot()
    );
    engine.stop();

    let seen = recorder.tracks();
    assert_eq!(&seen[..4], &["a.flac", "b.flac", "a.flac", "b.flac"]);
    assert_eq!(recorder.count("ended"), 0);
}

#[test]
fn toggle_starts_first_track_then_pauses() {
    let (engine, recorder) = engine_with(441_000, true, 10);
    engine.set_playlist(tracks(&["a.flac", "b.flac"]));

    engine.toggle_play_pause();
    assert!(wait_until(Duration::from_secs(5), || engine.is_playing()));
    assert_eq!(recorder.tracks(), vec!["a.flac"]);
    assert_eq!(engine.state(), EngineState::Playing);

    engine.toggle_play_pause();
    assert!(!engine.is_playing());
    assert_eq!(engine.state(), EngineState::Paused);

    engine.toggle_play_pause();
    assert!(engine.is_playing());
}

#[test]
fn previous_restarts_the_prior_track() {
    let (engine, recorder) = engine_with(441_000, true, 10);
    let list = tracks(&["a.flac", "b.flac", "c.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[1]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.is_playing()));

    engine.previous();
    assert!(wait_until(Duration::from_secs(5), || {
        recorder.tracks() == vec!["b.flac", "a.flac"]
    }));
}

#[test]
fn seek_is_clamped_and_survives_nonsense_input() {
    let (engine, recorder) = engine_with(441_000, true, 10);
    let list = tracks(&["a.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.is_playing()));

    engine.seek_to(f64::NAN);
    engine.seek_to(-25.0);
    engine.seek_to(50.0);
    assert!(wait_until(Duration::from_secs(5), || {
        engine.position() > Duration::ZERO
    }));
    assert!(engine.position() <= engine.duration() + Duration::from_secs(1));
    assert!(engine.is_playing());

    // Past-the-end input clamps to 100%, which simply finishes the track.
    engine.seek_to(150.0);
    assert!(wait_until(Duration::from_secs(5), || {
        engine.state() == EngineState::Idle
    }));
    assert_eq!(recorder.count("ended"), 1);
}

#[test]
fn pause_for_seek_round_trip_keeps_playing() {
    let (engine, _recorder) = engine_with(441_000, true, 10);
    let list = tracks(&["a.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.is_playing()));

    engine.pause_for_seek();
    assert!(!engine.is_playing());
    engine.seek_to(10.0);
    engine.resume_after_seek();
    assert!(engine.is_playing());

    // When paused before the gesture, the round trip must stay paused.
    engine.toggle_play_pause();
    assert!(!engine.is_playing());
    engine.pause_for_seek();
    engine.resume_after_seek();
    assert!(!engine.is_playing());
}

#[test]
fn spectrum_frames_flow_while_playing() {
    let (engine, recorder) = engine_with(8192, true, 10);
    let list = tracks(&["a.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();

    assert!(
        wait_until(Duration::from_secs(5), || {
            recorder.spectra.load(Ordering::SeqCst) > 0
        }),
        "no spectrum frames were emitted"
    );
}

#[test]
fn open_failure_reports_nothing_and_stays_idle() {
    let (engine, recorder) = engine_with(2048, true, 10);
    let list = tracks(&["missing.flac", "b.flac"]);
    engine.set_playlist(list.clone());
    engine.play_track(&list[0]).unwrap();

    thread::sleep(Duration::from_millis(50));
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(recorder.tracks().is_empty());
    assert!(!engine.is_playing());
}
