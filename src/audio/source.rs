use std::path::Path;

use crate::error::Result;

use super::types::SourceFormat;

/// A pulled sample source: interleaved f32 frames at a fixed format.
pub trait SampleSource: Send {
    fn format(&self) -> SourceFormat;

    /// Fills `buffer` with interleaved samples and returns how many were
    /// written, always a whole number of frames. Zero means the stream is
    /// exhausted.
    fn read(&mut self, buffer: &mut [f32]) -> usize;
}

/// A seekable decoded source, the engine's view of a decode collaborator.
pub trait PcmSource: SampleSource {
    fn total_frames(&self) -> u64;

    fn position_frames(&self) -> u64;

    /// Repositions the read cursor. Positions past the end clamp to the end.
    fn seek_to_frame(&mut self, frame: u64);
}

/// Opens a decode source for a track path. The engine never decodes itself;
/// it asks its provider whenever a track starts.
pub trait SourceProvider: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn PcmSource>>;
}

/// In-memory PCM source over a fully decoded track.
pub struct MemorySource {
    format: SourceFormat,
    samples: Vec<f32>,
    cursor: u64,
}

impl MemorySource {
    pub fn new(format: SourceFormat, samples: Vec<f32>) -> Self {
        Self {
            format,
            samples,
            cursor: 0,
        }
    }

    fn channels(&self) -> usize {
        self.format.channels.max(1) as usize
    }
}

impl SampleSource for MemorySource {
    fn format(&self) -> SourceFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let channels = self.channels();
        let start = (self.cursor as usize).saturating_mul(channels);
        if start >= self.samples.len() {
            return 0;
        }

        let want_frames = buffer.len() / channels;
        let have_frames = (self.samples.len() - start) / channels;
        let frames = want_frames.min(have_frames);
        let count = frames * channels;
        buffer[..count].copy_from_slice(&self.samples[start..start + count]);
        self.cursor += frames as u64;
        count
    }
}

impl PcmSource for MemorySource {
    fn total_frames(&self) -> u64 {
        (self.samples.len() / self.channels()) as u64
    }

    fn position_frames(&self) -> u64 {
        self.cursor
    }

    fn seek_to_frame(&mut self, frame: u64) {
        self.cursor = frame.min(self.total_frames());
    }
}
