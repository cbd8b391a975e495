//! Real-time audio playback engine with an embedded DSP chain: a ten-band
//! parametric equalizer, a windowed-FFT spectrum analyzer and a playlist-aware
//! playback state machine.
//!
//! The engine consumes tracks (path + duration) and control commands, and
//! reports back through a synchronous [`EventSink`] notification port. Decode
//! and output are injected collaborators; [`SymphoniaProvider`] and
//! [`CpalBackend`] are the defaults shipped with the crate.
//!
//! [`SymphoniaProvider`]: audio::decoder::SymphoniaProvider
//! [`CpalBackend`]: audio::output::CpalBackend

pub mod audio;
pub mod error;

pub use audio::engine::{EngineState, EngineTimings, PlaybackEngine};
pub use audio::events::{EventSink, NullSink};
pub use audio::types::{EqualizerBand, SourceFormat, Track, BAND_FREQUENCIES};
pub use error::{Error, Result};
