use std::{fs::File, path::Path};

use symphonia::core::{
    audio::SampleBuffer,
    codecs::DecoderOptions,
    errors::Error as SymphoniaError,
    formats::FormatOptions,
    io::MediaSourceStream,
    meta::MetadataOptions,
    probe::Hint,
};

use crate::error::{Error, Result};

use super::source::{MemorySource, PcmSource, SourceProvider};
use super::types::SourceFormat;

/// A fully decoded track: interleaved f32 PCM plus its format.
#[derive(Debug)]
pub struct DecodedTrack {
    pub format: SourceFormat,
    pub samples: Vec<f32>,
}

/// Decodes an audio file in one pass into interleaved f32 samples.
pub fn decode_file(path: &Path) -> Result<DecodedTrack> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("format probe failed: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode("no default audio track".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("decoder creation failed: {e}")))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| Error::Decode("track has no sample-rate metadata".into()))?;
    let channels = track
        .codec_params
        .channels
        .ok_or_else(|| Error::Decode("track has no channel metadata".into()))?
        .count() as u16;

    let mut samples = Vec::<f32>::new();
    let mut sample_buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                return Err(Error::Decode(
                    "decoder reset required; unsupported stream transition".into(),
                ))
            }
            Err(SymphoniaError::IoError(_)) => break,
            Err(err) => return Err(Error::Decode(format!("packet read failed: {err}"))),
        };

        let decoded = decoder
            .decode(&packet)
            .map_err(|e| Error::Decode(format!("decode failure: {e}")))?;

        let spec = *decoded.spec();
        let capacity = decoded.capacity() as u64;
        let buffer = sample_buffer.get_or_insert_with(|| SampleBuffer::<f32>::new(capacity, spec));
        buffer.copy_interleaved_ref(decoded);
        samples.extend_from_slice(buffer.samples());
    }

    Ok(DecodedTrack {
        format: SourceFormat::new(sample_rate, channels),
        samples,
    })
}

/// Default decode collaborator: symphonia-decoded tracks served from memory.
pub struct SymphoniaProvider;

impl SourceProvider for SymphoniaProvider {
    fn open(&self, path: &Path) -> Result<Box<dyn PcmSource>> {
        let decoded = decode_file(path)?;
        Ok(Box::new(MemorySource::new(decoded.format, decoded.samples)))
    }
}
