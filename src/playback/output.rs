//! Audio output to speakers
//!
//! One `cpal` stream runs for the life of the sink and pulls samples from a
//! shared timeline. Each played buffer is appended to the timeline, so the
//! next chunk starts on the sample right after the previous one ends.
//!
//! `cpal` streams are not `Send`, so the stream lives on a dedicated output
//! thread. That thread also holds the pending completions and fires each one
//! as soon as the device callback has consumed its buffer.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};

use super::sink::{OutputSink, PlaybackCompletion};
use super::types::PlayableBuffer;
use crate::error::OutputError;

/// Samples in the silent buffer used to prime the device
const PRIME_SAMPLES: usize = 1024;

enum OutputCommand {
    /// Hold a completion until its segment has been consumed
    Register {
        id: u64,
        completion: PlaybackCompletion,
    },
    /// The device callback finished one or more segments
    Consumed,
    /// Fire every pending completion
    Stop,
    Shutdown,
}

/// One buffer queued for output
struct Segment {
    id: u64,
    samples: Arc<[f32]>,
    position: usize,
}

/// Mono samples waiting to be pulled by the device callback
#[derive(Default)]
struct Timeline {
    segments: VecDeque<Segment>,
    /// Segments fully handed to the device, oldest first
    consumed: Vec<u64>,
}

impl Timeline {
    /// Queue `samples` after everything already queued
    fn push(&mut self, id: u64, samples: Arc<[f32]>) {
        self.segments.push_back(Segment {
            id,
            samples,
            position: 0,
        });
    }

    /// Drop every queued segment, reporting them as consumed
    ///
    /// Returns `true` if anything was dropped.
    fn drop_queued(&mut self) -> bool {
        let dropped = !self.segments.is_empty();
        self.consumed
            .extend(self.segments.drain(..).map(|segment| segment.id));
        dropped
    }

    /// Forget everything, including unreported segments
    fn clear(&mut self) {
        self.segments.clear();
        self.consumed.clear();
    }

    fn next_sample(&mut self) -> f32 {
        while let Some(front) = self.segments.front_mut() {
            if let Some(&sample) = front.samples.get(front.position) {
                front.position += 1;
                if front.position == front.samples.len() {
                    let id = front.id;
                    self.segments.pop_front();
                    self.consumed.push(id);
                }
                return sample;
            }
            let id = front.id;
            self.segments.pop_front();
            self.consumed.push(id);
        }
        0.0
    }

    /// Fill one interleaved device block, silence once the timeline runs dry
    ///
    /// Returns `true` if any segment was finished during this block.
    fn fill(&mut self, data: &mut [f32], channels: usize) -> bool {
        let before = self.consumed.len();
        for frame in data.chunks_mut(channels.max(1)) {
            frame.fill(self.next_sample());
        }
        self.consumed.len() > before
    }

    fn take_consumed(&mut self) -> Vec<u64> {
        std::mem::take(&mut self.consumed)
    }
}

fn lock(timeline: &Mutex<Timeline>) -> MutexGuard<'_, Timeline> {
    timeline.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Plays buffers on the default output device
pub struct CpalSink {
    commands: Sender<OutputCommand>,
    timeline: Arc<Mutex<Timeline>>,
    next_id: u64,
    sample_rate: u32,
    worker: Option<JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default output device at `sample_rate` and start its stream
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the rate or the stream
    /// cannot be started
    pub fn new(sample_rate: u32) -> Result<Self, OutputError> {
        let (commands, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let timeline = Arc::new(Mutex::new(Timeline::default()));

        let worker = {
            let timeline = Arc::clone(&timeline);
            let notify = commands.clone();
            std::thread::Builder::new()
                .name("voxline-output".to_string())
                .spawn(move || {
                    let stream = OutputDevice::open(sample_rate)
                        .and_then(|device| device.start(Arc::clone(&timeline), notify));
                    match stream {
                        Ok(stream) => {
                            let _ = ready_tx.send(Ok(()));
                            run_output_thread(&timeline, &rx);
                            drop(stream);
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                })
                .map_err(|e| OutputError::Device(format!("failed to spawn output thread: {e}")))?
        };

        ready_rx.recv().map_err(|_| OutputError::Closed)??;

        Ok(Self {
            commands,
            timeline,
            next_id: 0,
            sample_rate,
            worker: Some(worker),
        })
    }

    fn send(&self, command: OutputCommand) -> Result<(), OutputError> {
        self.commands.send(command).map_err(|_| OutputError::Closed)
    }
}

impl OutputSink for CpalSink {
    fn play(
        &mut self,
        buffer: PlayableBuffer,
        completion: PlaybackCompletion,
    ) -> Result<(), OutputError> {
        if buffer.sample_rate() != self.sample_rate {
            return Err(OutputError::Device(format!(
                "buffer is {} Hz, device runs at {} Hz",
                buffer.sample_rate(),
                self.sample_rate
            )));
        }

        let id = self.next_id;
        self.next_id += 1;

        // Registered before the samples are visible to the callback
        self.send(OutputCommand::Register { id, completion })?;

        let replaced = {
            let mut timeline = lock(&self.timeline);
            let replaced = timeline.drop_queued();
            timeline.push(id, buffer.shared_samples());
            replaced
        };
        if replaced {
            self.send(OutputCommand::Consumed)?;
        }
        Ok(())
    }

    fn stop(&mut self) {
        lock(&self.timeline).clear();
        let _ = self.send(OutputCommand::Stop);
    }

    fn prime(&mut self) {
        let silence = PlayableBuffer::new(vec![0.0; PRIME_SAMPLES], self.sample_rate);
        if let Err(e) = self.play(silence, PlaybackCompletion::detached(0)) {
            tracing::debug!(error = %e, "output prime failed");
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.stop();
        let _ = self.send(OutputCommand::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Device and stream configuration owned by the output thread
struct OutputDevice {
    device: Device,
    config: StreamConfig,
}

impl OutputDevice {
    fn open(sample_rate: u32) -> Result<Self, OutputError> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| OutputError::Device("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| OutputError::Device(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(sample_rate)
                    && c.max_sample_rate() >= SampleRate(sample_rate)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(sample_rate)
                        && c.max_sample_rate() >= SampleRate(sample_rate)
                })
            })
            .ok_or_else(|| OutputError::Device("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(sample_rate))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels = config.channels,
            "audio output initialized"
        );

        Ok(Self { device, config })
    }

    /// Build and start the stream that drains `timeline` for the sink's life
    fn start(
        &self,
        timeline: Arc<Mutex<Timeline>>,
        notify: Sender<OutputCommand>,
    ) -> Result<Stream, OutputError> {
        let channels = usize::from(self.config.channels);

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if lock(&timeline).fill(data, channels) {
                        let _ = notify.send(OutputCommand::Consumed);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio output error");
                },
                None,
            )
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| OutputError::Stream(e.to_string()))?;

        Ok(stream)
    }
}

/// Output thread loop: fires completions as their segments are consumed
fn run_output_thread(timeline: &Mutex<Timeline>, commands: &Receiver<OutputCommand>) {
    let mut pending: HashMap<u64, PlaybackCompletion> = HashMap::new();

    while let Ok(command) = commands.recv() {
        match command {
            OutputCommand::Register { id, completion } => {
                pending.insert(id, completion);
            }
            OutputCommand::Consumed => {
                let consumed = lock(timeline).take_consumed();
                for id in consumed {
                    if let Some(completion) = pending.remove(&id) {
                        tracing::trace!(index = completion.index(), "output buffer consumed");
                        completion.finish();
                    }
                }
            }
            OutputCommand::Stop => pending.clear(),
            OutputCommand::Shutdown => break,
        }
    }

    tracing::debug!("audio output thread exiting");
}
