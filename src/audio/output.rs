use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig,
};
use log::{info, warn};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapProd, HeapRb,
};

use crate::error::{Error, Result};

use super::source::{PcmSource, SampleSource};
use super::types::SourceFormat;

/// Ring capacity in output frames: headroom against producer jitter while
/// keeping pause/seek latency short. Underruns render as silence.
const RING_BUFFER_FRAMES: usize = 4096;
/// Frames pulled through the chain per producer iteration.
const PRODUCER_CHUNK_FRAMES: usize = 256;

/// Play/pause state and volume shared between the engine and the output
/// callback. The callback reads these without locking.
pub struct SharedParams {
    playing: AtomicBool,
    volume_bits: AtomicU32,
}

impl SharedParams {
    pub fn new() -> Self {
        Self {
            playing: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
        }
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_volume(&self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        self.volume_bits.store(clamped.to_bits(), Ordering::SeqCst);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }
}

impl Default for SharedParams {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoked once per device lifetime when the stream stops on its own:
/// `None` after the source drained cleanly, `Some(message)` on a stream
/// error. Never invoked for engine-initiated teardown.
pub type StoppedCallback = Box<dyn FnMut(Option<String>) + Send>;

/// Fire-once wrapper around the stopped callback; drain and stream-error
/// paths race and only the first report wins.
pub struct StoppedHook {
    callback: Mutex<Option<StoppedCallback>>,
}

impl StoppedHook {
    pub fn new(callback: StoppedCallback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    pub fn fire(&self, error: Option<String>) {
        let taken = self.callback.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut callback) = taken {
            callback(error);
        }
    }
}

/// A running output stream bound to one playback chain.
pub trait OutputDevice: Send {
    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    fn is_playing(&self) -> bool;

    /// Asks the producer side to reposition the chain. Takes effect within
    /// one producer iteration; queued audio is flushed.
    fn request_seek(&mut self, frame: u64);

    /// Current chain position in source frames.
    fn position_frames(&self) -> u64;
}

/// Opens output devices for playback chains. The engine owns exactly one
/// device at a time and tears it down by dropping it.
pub trait AudioBackend: Send + Sync {
    fn open(
        &self,
        chain: Box<dyn PcmSource>,
        params: Arc<SharedParams>,
        on_stopped: StoppedCallback,
    ) -> Result<Box<dyn OutputDevice>>;
}

/// Default backend: cpal output stream fed from a heap ring buffer by a
/// producer thread that pulls the chain in fixed-size chunks.
pub struct CpalBackend;

struct CpalDevice {
    stop: Arc<AtomicBool>,
    seek: Arc<AtomicU64>,
    position: Arc<AtomicU64>,
    params: Arc<SharedParams>,
    producer_thread: Option<thread::JoinHandle<()>>,
    stream_thread: Option<thread::JoinHandle<()>>,
}

impl AudioBackend for CpalBackend {
    fn open(
        &self,
        chain: Box<dyn PcmSource>,
        params: Arc<SharedParams>,
        on_stopped: StoppedCallback,
    ) -> Result<Box<dyn OutputDevice>> {
        let format = chain.format();
        let stop = Arc::new(AtomicBool::new(false));
        let seek = Arc::new(AtomicU64::new(u64::MAX));
        let flush = Arc::new(AtomicBool::new(false));
        let position = Arc::new(AtomicU64::new(chain.position_frames()));
        let hook = Arc::new(StoppedHook::new(on_stopped));

        // cpal streams are not Send; the stream lives on its own thread and
        // everything else talks to it through the ring and the atomics.
        let (ready_tx, ready_rx) = mpsc::channel();
        let stream_stop = Arc::clone(&stop);
        let stream_params = Arc::clone(&params);
        let stream_flush = Arc::clone(&flush);
        let stream_hook = Arc::clone(&hook);
        let stream_thread = thread::spawn(move || {
            run_stream_thread(format, stream_params, stream_flush, stream_hook, stream_stop, ready_tx)
        });

        let (out_rate, out_channels, ring_producer) = match ready_rx.recv() {
            Ok(Ok(ready)) => ready,
            Ok(Err(err)) => {
                stop.store(true, Ordering::SeqCst);
                let _ = stream_thread.join();
                return Err(err);
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                let _ = stream_thread.join();
                return Err(Error::Device("output thread terminated during open".into()));
            }
        };

        let producer_stop = Arc::clone(&stop);
        let producer_seek = Arc::clone(&seek);
        let producer_flush = Arc::clone(&flush);
        let producer_position = Arc::clone(&position);
        let producer_hook = Arc::clone(&hook);
        let producer_thread = thread::spawn(move || {
            run_producer_thread(
                chain,
                ring_producer,
                out_rate,
                out_channels,
                producer_stop,
                producer_seek,
                producer_flush,
                producer_position,
                producer_hook,
            )
        });

        Ok(Box::new(CpalDevice {
            stop,
            seek,
            position,
            params,
            producer_thread: Some(producer_thread),
            stream_thread: Some(stream_thread),
        }))
    }
}

impl OutputDevice for CpalDevice {
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

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.params.set_playing(false);
        if let Some(handle) = self.producer_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.stream_thread.take() {
            let _ = handle.join();
        }
    }
}

type StreamReady = Result<(u32, u16, HeapProd<f32>)>;

fn run_stream_thread(
    format: SourceFormat,
    params: Arc<SharedParams>,
    flush: Arc<AtomicBool>,
    hook: Arc<StoppedHook>,
    stop: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<StreamReady>,
) {
    let opened = (|| {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no default output device available".into()))?;

        let (config, sample_format, exact_rate) = select_output_config(&device, format)?;
        info!(
            "output stream: {} Hz x{} {:?} (exact rate match: {exact_rate})",
            config.sample_rate.0, config.channels, sample_format
        );

        let ring = HeapRb::<f32>::new(RING_BUFFER_FRAMES * config.channels as usize);
        let (producer, consumer) = ring.split();

        let stream = match sample_format {
            SampleFormat::F32 => build_stream::<f32>(
                &device,
                &config,
                consumer,
                Arc::clone(&params),
                Arc::clone(&flush),
                Arc::clone(&hook),
            ),
            SampleFormat::I16 => build_stream::<i16>(
                &device,
                &config,
                consumer,
                Arc::clone(&params),
                Arc::clone(&flush),
                Arc::clone(&hook),
            ),
            SampleFormat::U16 => build_stream::<u16>(
                &device,
                &config,
                consumer,
                Arc::clone(&params),
                Arc::clone(&flush),
                Arc::clone(&hook),
            ),
            other => Err(Error::Device(format!(
                "unsupported output sample format {other:?}; expected f32/i16/u16"
            ))),
        }?;

        stream
            .play()
            .map_err(|e| Error::Device(format!("failed to start stream: {e}")))?;
        Ok((config.sample_rate.0, config.channels, producer, stream))
    })();

    match opened {
        Ok((rate, channels, producer, stream)) => {
            let _ = ready_tx.send(Ok((rate, channels, producer)));
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(10));
            }
            drop(stream);
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: impl Consumer<Item = f32> + Send + 'static,
    params: Arc<SharedParams>,
    flush: Arc<AtomicBool>,
    hook: Arc<StoppedHook>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |output: &mut [T], _| {
                if flush.swap(false, Ordering::Relaxed) {
                    consumer.clear();
                }
                if !params.is_playing() {
                    output.fill(T::EQUILIBRIUM);
                    return;
                }
                let volume = params.volume();
                for sample in output.iter_mut() {
                    *sample =
                        T::from_sample(consumer.try_pop().unwrap_or(0.0) * volume);
                }
            },
            move |err| {
                warn!("audio stream error: {err}");
                hook.fire(Some(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Device(format!("failed to build output stream: {e}")))
}

#[allow(clippy::too_many_arguments)]
fn run_producer_thread(
    mut chain: Box<dyn PcmSource>,
    mut producer: HeapProd<f32>,
    out_rate: u32,
    out_channels: u16,
    stop: Arc<AtomicBool>,
    seek: Arc<AtomicU64>,
    flush: Arc<AtomicBool>,
    position: Arc<AtomicU64>,
    hook: Arc<StoppedHook>,
) {
    let format = chain.format();
    let src_channels = format.channels.max(1) as usize;
    let out_channels = out_channels.max(1) as usize;

    if format.sample_rate != out_rate {
        warn!(
            "device rate {out_rate} Hz differs from source {} Hz; linear resampling engaged",
            format.sample_rate
        );
    }
    if src_channels != out_channels {
        warn!("channel adaptation engaged: source {src_channels} -> output {out_channels}");
    }

    let mut pull = vec![0.0_f32; PRODUCER_CHUNK_FRAMES * src_channels];
    let mut resampler = (format.sample_rate != out_rate)
        .then(|| LinearResampler::new(format.sample_rate, out_rate, src_channels));
    let mut pending: Vec<f32> = Vec::new();
    let mut pending_offset = 0;
    let mut drained = false;

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let requested = seek.swap(u64::MAX, Ordering::SeqCst);
        if requested != u64::MAX {
            chain.seek_to_frame(requested);
            position.store(chain.position_frames(), Ordering::SeqCst);
            pending.clear();
            pending_offset = 0;
            if let Some(resampler) = resampler.as_mut() {
                resampler.reset();
            }
            flush.store(true, Ordering::SeqCst);
            drained = false;
        }

        if pending_offset >= pending.len() {
            let read = chain.read(&mut pull);
            if read == 0 {
                // Source exhausted: report once after the ring drains, then
                // idle until the engine tears the device down.
                if !drained && producer.occupied_len() == 0 {
                    drained = true;
                    hook.fire(None);
                }
                thread::sleep(Duration::from_millis(10));
                continue;
            }
            position.store(chain.position_frames(), Ordering::SeqCst);

            let block: &[f32] = match resampler.as_mut() {
                Some(resampler) => resampler.process(&pull[..read]),
                None => &pull[..read],
            };
            pending.clear();
            if src_channels != out_channels {
                adapt_channels(block, src_channels, out_channels, &mut pending);
            } else {
                pending.extend_from_slice(block);
            }
            pending_offset = 0;
            if pending.is_empty() {
                continue;
            }
        }

        let pushed = producer.push_slice(&pending[pending_offset..]);
        pending_offset += pushed;
        if pushed == 0 {
            thread::sleep(Duration::from_millis(2));
        }
    }
}

fn select_output_config(
    device: &cpal::Device,
    format: SourceFormat,
) -> Result<(StreamConfig, SampleFormat, bool)> {
    let mut preferred: Option<(StreamConfig, SampleFormat, bool)> = None;
    let mut fallback: Option<(StreamConfig, SampleFormat, bool)> = None;

    let ranges = device
        .supported_output_configs()
        .map_err(|e| Error::Device(format!("cannot query output configs: {e}")))?;

    for range in ranges {
        let channels = range.channels();
        let sample_format = range.sample_format();
        let min = range.min_sample_rate().0;
        let max = range.max_sample_rate().0;

        let exact_rate = format.sample_rate >= min && format.sample_rate <= max;
        let f32_preferred = matches!(sample_format, SampleFormat::F32);

        if channels == format.channels && exact_rate {
            let chosen = (
                StreamConfig {
                    channels,
                    sample_rate: SampleRate(format.sample_rate),
                    buffer_size: cpal::BufferSize::Default,
                },
                sample_format,
                true,
            );
            if f32_preferred {
                return Ok(chosen);
            }
            preferred = Some(chosen);
        }

        if fallback.is_none() || f32_preferred {
            fallback = Some((
                StreamConfig {
                    channels,
                    sample_rate: range.max_sample_rate(),
                    buffer_size: cpal::BufferSize::Default,
                },
                sample_format,
                false,
            ));
        }
    }

    preferred
        .or(fallback)
        .ok_or_else(|| Error::Device("no output stream configuration available".into()))
}

/// Streaming linear-interpolation resampler. Quality is below dedicated sinc
/// resamplers; it exists for the fallback case where device and source rates
/// differ and keeps memory behavior predictable.
struct LinearResampler {
    ratio: f64,
    channels: usize,
    // Fractional source-frame position of the next output frame, relative to
    // the first frame of the current input block; may dip below zero when an
    // output frame interpolates across the block boundary.
    pos: f64,
    carry: Vec<f32>,
    has_carry: bool,
    out: Vec<f32>,
}

impl LinearResampler {
    fn new(in_rate: u32, out_rate: u32, channels: usize) -> Self {
        let ratio = out_rate as f64 / in_rate as f64;
        Self {
            ratio,
            channels,
            pos: 0.0,
            carry: vec![0.0; channels],
            has_carry: false,
            out: Vec::with_capacity(
                ((PRODUCER_CHUNK_FRAMES as f64 * ratio) as usize + 2) * channels,
            ),
        }
    }

    fn reset(&mut self) {
        self.pos = 0.0;
        self.has_carry = false;
    }

    fn process(&mut self, input: &[f32]) -> &[f32] {
        self.out.clear();
        let channels = self.channels;
        let in_frames = input.len() / channels;
        if in_frames == 0 {
            return &self.out;
        }

        let step = 1.0 / self.ratio;
        while self.pos < (in_frames - 1) as f64 {
            let base = self.pos.floor();
            let frac = (self.pos - base) as f32;
            let i0 = base as isize;
            let i1 = (i0 + 1).min(in_frames as isize - 1);
            for ch in 0..channels {
                let a = if i0 < 0 {
                    if self.has_carry {
                        self.carry[ch]
                    } else {
                        input[ch]
                    }
                } else {
                    input[i0 as usize * channels + ch]
                };
                let b = input[i1 as usize * channels + ch];
                self.out.push(a + (b - a) * frac);
            }
            self.pos += step;
        }

        self.carry
            .copy_from_slice(&input[(in_frames - 1) * channels..]);
        self.has_carry = true;
        self.pos -= in_frames as f64;
        &self.out
    }
}

/// Copy/fold strategy for channel-count mismatches, per output frame.
fn adapt_channels(input: &[f32], in_channels: usize, out_channels: usize, out: &mut Vec<f32>) {
    let frames = input.len() / in_channels;
    out.reserve(frames * out_channels);
    for frame in 0..frames {
        for ch in 0..out_channels {
            out.push(input[frame * in_channels + (ch % in_channels)]);
        }
    }
}
