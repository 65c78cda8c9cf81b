//! PCM output on top of cpal
//!
//! cpal is callback driven while the player pushes bytes, so the backend keeps
//! a lock-free sample queue between the two. The stream itself lives on a
//! dedicated thread because `cpal::Stream` is not `Send` on every host.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, StreamConfig};
use crossbeam::queue::ArrayQueue;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::backend::PcmBackend;
use crate::audio::device::{self, find_output_device};
use crate::audio::format::PcmFormat;
use crate::error::{AudioError, HwParamStage};

/// Poll interval while waiting on the output callback
const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// State shared with the real-time callback
struct StreamShared {
    queue: ArrayQueue<f32>,
    channels: usize,
    paused: AtomicBool,
    /// Set once audio has been queued; an empty queue after that is an underrun
    primed: AtomicBool,
    xrun: AtomicBool,
    gain_left: AtomicU32,
    gain_right: AtomicU32,
}

impl StreamShared {
    fn new(capacity_frames: usize, channels: usize, gain: (f32, f32)) -> Self {
        Self {
            queue: ArrayQueue::new(capacity_frames.max(1) * channels),
            channels,
            paused: AtomicBool::new(false),
            primed: AtomicBool::new(false),
            xrun: AtomicBool::new(false),
            gain_left: AtomicU32::new(gain.0.to_bits()),
            gain_right: AtomicU32::new(gain.1.to_bits()),
        }
    }

    fn queued_frames(&self) -> usize {
        self.queue.len() / self.channels
    }

    fn free_frames(&self) -> usize {
        (self.queue.capacity() - self.queue.len()) / self.channels
    }

    fn discard_frames(&self, frames: usize) -> usize {
        let mut discarded = 0;
        while discarded < frames && self.queue.len() >= self.channels {
            for _ in 0..self.channels {
                let _ = self.queue.pop();
            }
            discarded += 1;
        }
        discarded
    }

    fn fill<T>(&self, data: &mut [T])
    where
        T: SizedSample + FromSample<f32>,
    {
        if self.paused.load(Ordering::Relaxed) {
            for sample in data.iter_mut() {
                *sample = T::from_sample(0.0f32);
            }
            return;
        }

        let left = f32::from_bits(self.gain_left.load(Ordering::Relaxed));
        let right = f32::from_bits(self.gain_right.load(Ordering::Relaxed));

        for frame in data.chunks_mut(self.channels) {
            // Only pop complete frames so channels never shift
            if self.queue.len() < self.channels {
                if self.primed.swap(false, Ordering::Relaxed) {
                    self.xrun.store(true, Ordering::Relaxed);
                }
                for sample in frame.iter_mut() {
                    *sample = T::from_sample(0.0f32);
                }
                continue;
            }

            for (index, sample) in frame.iter_mut().enumerate() {
                let value = self.queue.pop().unwrap_or(0.0);
                let gain = if index % 2 == 0 { left } else { right };
                *sample = T::from_sample(value * gain);
            }
        }
    }
}

enum StreamControl {
    Play,
    Pause,
    Shutdown,
}

/// Output stream running on its own thread
struct StreamThread {
    shared: Arc<StreamShared>,
    control: Sender<StreamControl>,
    errors: Receiver<String>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn(
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
        shared: Arc<StreamShared>,
    ) -> Result<Self, AudioError> {
        let (control_tx, control_rx) = bounded::<StreamControl>(8);
        let (error_tx, error_rx) = bounded::<String>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let callback_shared = shared.clone();

        let handle = thread::Builder::new()
            .name("pcm-output".to_string())
            .spawn(move || {
                let stream = match build_stream(&device, &config, sample_format, callback_shared, error_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::HardwareParams {
                        stage: HwParamStage::Commit,
                        reason: e.to_string(),
                    }));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                for control in control_rx.iter() {
                    let result = match control {
                        StreamControl::Play => stream.play().map_err(|e| e.to_string()),
                        StreamControl::Pause => stream.pause().map_err(|e| e.to_string()),
                        StreamControl::Shutdown => break,
                    };
                    if let Err(e) = result {
                        tracing::warn!("Output stream control failed: {}", e);
                    }
                }
                // Stream is dropped here, closing the device
            })
            .map_err(|e| AudioError::HardwareParams {
                stage: HwParamStage::Malloc,
                reason: e.to_string(),
            })?;

        let ready = ready_rx.recv().unwrap_or_else(|_| {
            Err(AudioError::HardwareParams {
                stage: HwParamStage::Commit,
                reason: "output thread exited".to_string(),
            })
        });

        let mut thread = Self {
            shared,
            control: control_tx,
            errors: error_rx,
            handle: Some(handle),
        };

        match ready {
            Ok(()) => Ok(thread),
            Err(e) => {
                thread.stop();
                Err(e)
            }
        }
    }

    fn send(&self, control: StreamControl) {
        let _ = self.control.send(control);
    }

    fn stop(&mut self) {
        self.send(StreamControl::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    shared: Arc<StreamShared>,
    errors: Sender<String>,
) -> Result<cpal::Stream, AudioError> {
    match sample_format {
        SampleFormat::F32 => build_typed_stream::<f32>(device, config, shared, errors),
        SampleFormat::I16 => build_typed_stream::<i16>(device, config, shared, errors),
        SampleFormat::U16 => build_typed_stream::<u16>(device, config, shared, errors),
        SampleFormat::I32 => build_typed_stream::<i32>(device, config, shared, errors),
        other => Err(AudioError::HardwareParams {
            stage: HwParamStage::Format,
            reason: format!("device sample format {:?} not handled", other),
        }),
    }
}

fn build_typed_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    shared: Arc<StreamShared>,
    errors: Sender<String>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| shared.fill(data),
            move |err| {
                let _ = errors.try_send(err.to_string());
            },
            None,
        )
        .map_err(|e| AudioError::HardwareParams {
            stage: HwParamStage::Commit,
            reason: e.to_string(),
        })
}

/// cpal implementation of [`PcmBackend`]
pub struct CpalBackend {
    device: Option<cpal::Device>,
    device_name: String,
    buffer_frames: usize,
    format: Option<PcmFormat>,
    stream: Option<StreamThread>,
    gain: (f32, f32),
}

impl CpalBackend {
    /// Create a backend whose output queue holds `buffer_frames` frames
    pub fn new(buffer_frames: usize) -> Self {
        Self {
            device: None,
            device_name: String::new(),
            buffer_frames,
            format: None,
            stream: None,
            gain: (1.0, 1.0),
        }
    }

    fn stream(&self) -> Result<&StreamThread, AudioError> {
        self.stream.as_ref().ok_or(AudioError::NotConfigured)
    }

    fn select_config(
        device: &cpal::Device,
        format: &PcmFormat,
    ) -> Result<(StreamConfig, SampleFormat), AudioError> {
        let configs: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| AudioError::HardwareParams {
                stage: HwParamStage::Init,
                reason: e.to_string(),
            })?
            .collect();

        if configs.is_empty() {
            return Err(AudioError::HardwareParams {
                stage: HwParamStage::Init,
                reason: "device reports no output configurations".to_string(),
            });
        }

        let mut matching: Vec<_> = configs
            .iter()
            .filter(|c| c.channels() == format.channels)
            .collect();
        if matching.is_empty() {
            return Err(AudioError::HardwareParams {
                stage: HwParamStage::Channels,
                reason: format!("{} channels not supported", format.channels),
            });
        }

        // No resampling happens here, so the nearest acceptable rate is the exact one
        let rate = cpal::SampleRate(format.sample_rate);
        matching.retain(|c| rate >= c.min_sample_rate() && rate <= c.max_sample_rate());
        let range = matching
            .iter()
            .find(|c| c.sample_format() == SampleFormat::F32)
            .or_else(|| matching.first())
            .ok_or_else(|| AudioError::HardwareParams {
                stage: HwParamStage::Rate,
                reason: format!("{} Hz not supported", format.sample_rate),
            })?;

        let config = StreamConfig {
            channels: format.channels,
            sample_rate: rate,
            buffer_size: cpal::BufferSize::Default,
        };
        Ok((config, range.sample_format()))
    }

    fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }
}

impl PcmBackend for CpalBackend {
    fn open(&mut self, device: &str) -> Result<(), AudioError> {
        self.close();
        self.device = Some(find_output_device(device)?);
        self.device_name = device.to_string();
        tracing::debug!("Output device {} opened", device);
        Ok(())
    }

    fn apply_params(&mut self, format: &PcmFormat) -> Result<(), AudioError> {
        let device = self.device.clone().ok_or(AudioError::NotOpen)?;
        self.stop_stream();
        self.format = None;

        let (config, sample_format) = Self::select_config(&device, format)?;
        let shared = Arc::new(StreamShared::new(
            self.buffer_frames,
            format.channels as usize,
            self.gain,
        ));
        self.stream = Some(StreamThread::spawn(device, config, sample_format, shared)?);
        self.format = Some(*format);

        tracing::debug!(
            "Output {} configured for {} (device samples {:?})",
            self.device_name,
            format,
            sample_format
        );
        Ok(())
    }

    fn prepare(&mut self) -> Result<(), AudioError> {
        let stream = self.stream()?;
        stream.shared.xrun.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, AudioError> {
        let format = self.format.ok_or(AudioError::NotConfigured)?;
        let stream = self.stream()?;

        if let Ok(reason) = stream.errors.try_recv() {
            return Err(AudioError::Write(reason));
        }
        if stream.shared.xrun.load(Ordering::Relaxed) {
            return Err(AudioError::Underrun);
        }

        let shared = &stream.shared;
        let frame_bytes = format.frame_bytes();
        let sample_bytes = format.encoding.bytes();
        let frames = (data.len() / frame_bytes).min(shared.free_frames());

        for frame in data.chunks_exact(frame_bytes).take(frames) {
            for sample in frame.chunks_exact(sample_bytes) {
                let _ = shared.queue.push(format.encoding.decode(sample));
            }
        }
        if frames > 0 {
            shared.primed.store(true, Ordering::Relaxed);
        }

        Ok(frames)
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        let stream = self.stream()?;
        stream.shared.paused.store(true, Ordering::Relaxed);
        stream.send(StreamControl::Pause);
        Ok(())
    }

    fn unpause(&mut self) -> Result<(), AudioError> {
        let stream = self.stream()?;
        stream.shared.paused.store(false, Ordering::Relaxed);
        stream.send(StreamControl::Play);
        Ok(())
    }

    fn drop_pending(&mut self) -> Result<(), AudioError> {
        if let Some(stream) = &self.stream {
            while stream.shared.queue.pop().is_some() {}
            stream.shared.primed.store(false, Ordering::Relaxed);
            stream.shared.xrun.store(false, Ordering::Relaxed);
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), AudioError> {
        let Some(stream) = &self.stream else {
            return Ok(());
        };
        let Some(format) = self.format else {
            return Ok(());
        };

        let capacity_ms = (self.buffer_frames as u64 * 1000) / format.sample_rate.max(1) as u64;
        let deadline = Instant::now() + Duration::from_millis(capacity_ms * 2 + 100);

        while stream.shared.queued_frames() > 0 {
            if stream.shared.paused.load(Ordering::Relaxed) {
                return Err(AudioError::device("drain", "device is paused"));
            }
            if Instant::now() >= deadline {
                return Err(AudioError::device("drain", "timed out"));
            }
            thread::sleep(POLL_INTERVAL);
        }
        stream.shared.primed.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn delay(&mut self) -> Result<u64, AudioError> {
        Ok(self.stream()?.shared.queued_frames() as u64)
    }

    fn forwardable(&mut self) -> Result<u64, AudioError> {
        Ok(self.stream()?.shared.queued_frames() as u64)
    }

    fn forward(&mut self, frames: u64) -> Result<u64, AudioError> {
        let stream = self.stream()?;
        Ok(stream.shared.discard_frames(frames as usize) as u64)
    }

    fn max_sample_rate(&mut self) -> Result<u32, AudioError> {
        let device = self.device.as_ref().ok_or(AudioError::NotOpen)?;
        device::max_sample_rate(device)
    }

    fn set_gain(&mut self, left: f32, right: f32) {
        self.gain = (left, right);
        if let Some(stream) = &self.stream {
            stream.shared.gain_left.store(left.to_bits(), Ordering::Relaxed);
            stream.shared.gain_right.store(right.to_bits(), Ordering::Relaxed);
        }
    }

    fn close(&mut self) {
        self.stop_stream();
        self.format = None;
        if self.device.take().is_some() {
            tracing::debug!("Output device {} closed", self.device_name);
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_pops_whole_frames() {
        let shared = StreamShared::new(4, 2, (1.0, 0.5));
        shared.queue.push(0.5).unwrap();
        shared.queue.push(0.5).unwrap();
        shared.queue.push(0.25).unwrap();
        shared.primed.store(true, Ordering::Relaxed);

        let mut out = [1.0f32; 4];
        shared.fill(&mut out);

        assert_eq!(out, [0.5, 0.25, 0.0, 0.0]);
        // Lone sample of an incomplete frame stays queued
        assert_eq!(shared.queue.len(), 1);
        assert!(shared.xrun.load(Ordering::Relaxed));
    }

    #[test]
    fn test_paused_outputs_silence() {
        let shared = StreamShared::new(4, 1, (1.0, 1.0));
        shared.queue.push(0.75).unwrap();
        shared.paused.store(true, Ordering::Relaxed);

        let mut out = [1i16; 2];
        shared.fill(&mut out);

        assert_eq!(out, [0, 0]);
        assert_eq!(shared.queued_frames(), 1);
    }

    #[test]
    fn test_discard_frames_clamped() {
        let shared = StreamShared::new(8, 2, (1.0, 1.0));
        for _ in 0..6 {
            shared.queue.push(0.0).unwrap();
        }
        assert_eq!(shared.discard_frames(10), 3);
        assert_eq!(shared.queued_frames(), 0);
    }
}
