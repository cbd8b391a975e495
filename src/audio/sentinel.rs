use super::source::{PcmSource, SampleSource};
use super::types::SourceFormat;

/// Callback invoked when the wrapped source first reports a zero-length read.
pub type EndOfStreamCallback = Box<dyn FnMut() + Send>;

/// Wraps a sample source and raises exactly one "stream ended" notification
/// per playback instance, triggered by the first zero-length read. The latch
/// survives later seeks; a new playback instance gets a new sentinel.
pub struct EndOfStreamSentinel<S> {
    inner: S,
    ended: bool,
    on_end: EndOfStreamCallback,
}

impl<S: SampleSource> EndOfStreamSentinel<S> {
    pub fn new(inner: S, on_end: EndOfStreamCallback) -> Self {
        Self {
            inner,
            ended: false,
            on_end,
        }
    }
}

impl<S: SampleSource> SampleSource for EndOfStreamSentinel<S> {
    fn format(&self) -> SourceFormat {
        self.inner.format()
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let read = self.inner.read(buffer);
        if read == 0 && !self.ended {
            self.ended = true;
            (self.on_end)();
        }
        read
    }
}

impl<S: PcmSource> PcmSource for EndOfStreamSentinel<S> {
    fn total_frames(&self) -> u64 {
        self.inner.total_frames()
    }

    fn position_frames(&self) -> u64 {
        self.inner.position_frames()
    }

    fn seek_to_frame(&mut self, frame: u64) {
        self.inner.seek_to_frame(frame);
    }
}
