use super::dsp::filters::Equalizer;
use super::dsp::spectrum::SpectrumAnalyzer;
use super::source::{PcmSource, SampleSource};
use super::types::SourceFormat;

/// The pull chain between decode source and sentinel:
/// every buffer read from the source is equalized in place and then fed to
/// the spectrum analyzer.
pub struct DspChain {
    source: Box<dyn PcmSource>,
    equalizer: Equalizer,
    analyzer: SpectrumAnalyzer,
}

impl DspChain {
    pub fn new(
        source: Box<dyn PcmSource>,
        equalizer: Equalizer,
        analyzer: SpectrumAnalyzer,
    ) -> Self {
        Self {
            source,
            equalizer,
            analyzer,
        }
    }
}

impl SampleSource for DspChain {
    fn format(&self) -> SourceFormat {
        self.source.format()
    }

    fn read(&mut self, buffer: &mut [f32]) -> usize {
        let read = self.source.read(buffer);
        if read > 0 {
            self.equalizer.process(&mut buffer[..read]);
            self.analyzer.process(&buffer[..read]);
        }
        read
    }
}

impl PcmSource for DspChain {
    fn total_frames(&self) -> u64 {
        self.source.total_frames()
    }

    fn position_frames(&self) -> u64 {
        self.source.position_frames()
    }

    fn seek_to_frame(&mut self, frame: u64) {
        self.source.seek_to_frame(frame);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::audio::dsp::filters::EqControl;
    use crate::audio::source::MemorySource;

    #[test]
    fn read_pulls_through_equalizer_and_analyzer() {
        let format = SourceFormat::new(44_100, 1);
        let source = MemorySource::new(format, vec![0.25; 512]);
        let control = Arc::new(EqControl::new());
        let frames = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&frames);

        let mut chain = DspChain::new(
            Box::new(source),
            Equalizer::new(1, 44_100, control),
            SpectrumAnalyzer::new(
                1,
                256,
                Box::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ),
        );

        let mut buffer = [0.0_f32; 512];
        assert_eq!(chain.read(&mut buffer), 512);
        assert_eq!(frames.load(Ordering::SeqCst), 2);
        assert_eq!(chain.read(&mut buffer), 0);
        assert_eq!(chain.position_frames(), 512);
    }
}
