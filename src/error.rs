use thiserror::Error;

/// Errors surfaced by the playback engine and its collaborators.
#[derive(Debug, Error)]
pub enum Error {
    /// A decode source could not be opened or produced malformed data.
    #[error("decode error: {0}")]
    Decode(String),

    /// The output device failed to open, start, or keep streaming.
    #[error("audio output error: {0}")]
    Device(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested track is not part of the current playlist.
    #[error("track not found in playlist: {0}")]
    TrackNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
