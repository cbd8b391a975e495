use rustfft::num_complex::Complex;

use super::types::Track;

/// Notification port for everything the engine reports back to its embedder.
///
/// Callbacks are invoked synchronously on whatever thread raised them: control
/// methods fire from the calling thread, spectrum frames from the audio
/// producer thread, end-of-playlist from a worker. A UI owning a dispatcher
/// re-dispatches itself. Implementations must not call back into the engine
/// from inside a callback.
pub trait EventSink: Send + Sync {
    fn track_changed(&self, _track: &Track) {}

    fn playback_state_changed(&self, _is_playing: bool) {}

    /// Playback was stopped, either by the caller or by a device failure.
    fn playback_stopped(&self) {}

    /// `next()` ran past the last track with repeat disabled.
    fn playlist_ended(&self) {}

    /// A full FFT frame is ready. The slice is only valid for the duration of
    /// the call; copy out whatever should be kept.
    fn spectrum_frame(&self, _frame: &[Complex<f32>]) {}
}

/// Sink that discards every notification.
pub struct NullSink;

impl EventSink for NullSink {}
