//! Audio output targets that pull samples from a mixer.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::thread::JoinHandle;

use chime_core::{Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, SampleFormat, Stream, StreamConfig,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::mixer::SharedMixer;

/// Format negotiated with the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub device_name: String,
}

/// Something that drives a mixer's `render`.
pub trait OutputTarget: Send {
    /// Connect the mixer and start the output.
    fn open(&mut self, mixer: SharedMixer) -> Result<OutputInfo>;

    /// Whether the output is currently connected.
    fn is_open(&self) -> bool;

    /// Release the device. Safe to call repeatedly.
    fn close(&mut self);
}

/// Output through the default cpal device.
///
/// `cpal::Stream` is not `Send`, so the stream lives on a dedicated thread
/// that is parked until `close`.
pub struct CpalOutput {
    worker: Option<(Sender<()>, JoinHandle<()>)>,
}

impl CpalOutput {
    pub const fn new() -> Self {
        Self { worker: None }
    }
}

impl Default for CpalOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputTarget for CpalOutput {
    fn open(&mut self, mixer: SharedMixer) -> Result<OutputInfo> {
        self.close();

        let (ready_tx, ready_rx) = bounded::<Result<OutputInfo>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name("chime-output".to_string())
            .spawn(move || match open_default_stream(&mixer) {
                Ok((stream, info)) => {
                    let _ = ready_tx.send(Ok(info));
                    // Park until asked to shut down; dropping the stream stops it.
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Output stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        let info = ready_rx
            .recv()
            .map_err(|e| Error::AudioOutput(format!("Output thread exited early: {e}")))??;

        info!(
            "Audio output opened: {} Hz, {} channels, device: {}",
            info.sample_rate, info.channels, info.device_name
        );
        self.worker = Some((shutdown_tx, handle));
        Ok(info)
    }

    fn is_open(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    fn close(&mut self) {
        if let Some((shutdown, handle)) = self.worker.take() {
            let _ = shutdown.send(());
            if handle.join().is_err() {
                warn!("Output thread panicked");
            }
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn default_device() -> Result<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| Error::Unsupported("No output device found".to_string()))
}

fn open_default_stream(mixer: &SharedMixer) -> Result<(Stream, OutputInfo)> {
    let device = default_device()?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Unsupported(format!("Failed to get output config: {e}")))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();

    mixer.configure(config.sample_rate.0, config.channels);

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, mixer.clone())?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, mixer.clone())?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, mixer.clone())?,
        _ => {
            return Err(Error::Unsupported(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

    Ok((
        stream,
        OutputInfo {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            device_name,
        },
    ))
}

fn build_stream<T: cpal::SizedSample + cpal::FromSample<f32>>(
    device: &Device,
    config: &StreamConfig,
    mixer: SharedMixer,
) -> Result<Stream> {
    let mut scratch: Vec<f32> = Vec::new();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                mixer.render(&mut scratch);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = T::from_sample(*sample);
                }
            },
            |err| error!("Audio stream error: {err}"),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))
}

/// Build a silent stream on the default device and release it immediately.
///
/// With `start` set the stream is also started, which is how autoplay is
/// classified on hosts that gate output.
pub fn probe_default_stream(start: bool) -> Result<()> {
    let device = default_device()?;
    let supported = device
        .default_output_config()
        .map_err(|e| Error::Unsupported(format!("Failed to get output config: {e}")))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.into();
    let probe = crate::mixer::Mixer::shared(config.sample_rate.0, config.channels);
    probe.set_master_volume(0.0);

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, probe)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, probe)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, probe)?,
        _ => {
            return Err(Error::Unsupported(format!(
                "Unsupported sample format: {sample_format:?}"
            )));
        }
    };

    if start {
        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Trial playback rejected: {e}")))?;
    }
    drop(stream);
    Ok(())
}

/// True if the host reports at least one output device.
pub fn has_output_device() -> bool {
    cpal::default_host()
        .output_devices()
        .map(|mut devices| devices.next().is_some())
        .unwrap_or(false)
}

/// Output driven by the caller instead of a device.
///
/// Useful for offline rendering and for hosts that own their own audio
/// callback. Clones share the same connection.
#[derive(Clone)]
pub struct ManualOutput {
    sample_rate: u32,
    channels: u16,
    mixer: Arc<Mutex<Option<SharedMixer>>>,
}

impl ManualOutput {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
            mixer: Arc::new(Mutex::new(None)),
        }
    }

    /// Render `frames` frames of interleaved output. Silence when closed.
    pub fn pull(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * usize::from(self.channels)];
        if let Some(mixer) = self.mixer.lock().as_ref() {
            mixer.render(&mut out);
        }
        out
    }
}

impl OutputTarget for ManualOutput {
    fn open(&mut self, mixer: SharedMixer) -> Result<OutputInfo> {
        mixer.configure(self.sample_rate, self.channels);
        *self.mixer.lock() = Some(mixer);
        Ok(OutputInfo {
            sample_rate: self.sample_rate,
            channels: self.channels,
            device_name: "manual".to_string(),
        })
    }

    fn is_open(&self) -> bool {
        self.mixer.lock().is_some()
    }

    fn close(&mut self) {
        self.mixer.lock().take();
    }
}
