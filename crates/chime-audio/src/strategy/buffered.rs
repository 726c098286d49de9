//! High-fidelity strategy: decode once, mix fresh voices per play.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chime_core::{
    ActiveSoundHandle, AutoplayPolicy, CapabilitySnapshot, Error, PlayOptions, Result, SoundKey,
    StrategyState,
};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::PlaybackStrategy;
use crate::decode::{self, DecodedSound};
use crate::mixer::{Mixer, SharedMixer, VoiceParams};
use crate::output::{CpalOutput, OutputTarget};
use crate::resample;

const NAME: &str = "buffered";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    #[default]
    Idle,
    Ready,
    Disposed,
}

/// Low-latency strategy with unlimited overlap of the same sound.
pub struct BufferedStrategy {
    output: Mutex<Box<dyn OutputTarget>>,
    mixer: SharedMixer,
    buffers: RwLock<HashMap<SoundKey, Arc<DecodedSound>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl BufferedStrategy {
    pub fn new(output: Box<dyn OutputTarget>) -> Self {
        Self {
            output: Mutex::new(output),
            mixer: Mixer::shared(48000, 2),
            buffers: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Strategy playing through the default cpal device.
    pub fn system() -> Self {
        Self::new(Box::new(CpalOutput::new()))
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.lifecycle.lock() {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Idle => Err(Error::Unsupported("buffered output not initialized".into())),
            Lifecycle::Disposed => Err(Error::Disposed(NAME)),
        }
    }
}

impl PlaybackStrategy for BufferedStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self, capabilities: &CapabilitySnapshot) -> bool {
        capabilities.supports_high_fidelity_output
            && capabilities.autoplay_policy != AutoplayPolicy::Blocked
    }

    fn initialize(&self, capabilities: &CapabilitySnapshot) -> Result<()> {
        if !self.is_available(capabilities) {
            return Err(Error::Unsupported("high-fidelity output unavailable".into()));
        }

        let info = self.output.lock().open(self.mixer.clone())?;
        let suspended = capabilities.autoplay_policy == AutoplayPolicy::RequiresGesture;
        self.mixer.set_suspended(suspended);

        // Buffers decoded for a previous output format no longer match.
        let stale: Vec<SoundKey> = self
            .buffers
            .read()
            .iter()
            .filter(|(_, b)| b.sample_rate != info.sample_rate || b.channels != info.channels)
            .map(|(k, _)| *k)
            .collect();
        if !stale.is_empty() {
            let mut buffers = self.buffers.write();
            for key in stale {
                buffers.remove(&key);
            }
        }

        *self.lifecycle.lock() = Lifecycle::Ready;
        info!(
            "Buffered strategy ready on {} ({} Hz){}",
            info.device_name,
            info.sample_rate,
            if suspended { ", suspended until user gesture" } else { "" }
        );
        Ok(())
    }

    fn self_test(&self) -> Result<()> {
        self.ensure_ready()?;

        let probe = decode::decode_bytes(&decode::silent_wav(8000, 1, 64), Some("wav"))?;
        let probe = resample::conform(&probe, self.mixer.sample_rate(), self.mixer.channels())?;
        let handle = ActiveSoundHandle::new(SoundKey::PieceMove, NAME);
        let params = VoiceParams {
            volume: 0.0,
            looped: false,
            rate: 1.0,
            fade_in: None,
            fade_out: None,
        };
        if !self
            .mixer
            .start_voice(handle.id, handle.sound_key, Arc::new(probe), params)
        {
            return Err(Error::AudioOutput("mixer rejected self-test voice".into()));
        }
        self.mixer.stop_voice(handle.id);

        if self.output.lock().is_open() {
            Ok(())
        } else {
            Err(Error::AudioOutput("output closed during self-test".into()))
        }
    }

    fn play_sound(&self, key: SoundKey, options: &PlayOptions) -> Result<ActiveSoundHandle> {
        self.ensure_ready()?;

        if self.mixer.is_suspended() {
            return Err(Error::PermissionPending);
        }

        let sound = self
            .buffers
            .read()
            .get(&key)
            .cloned()
            .ok_or(Error::NotLoaded(key))?;

        let handle = ActiveSoundHandle::new(key, NAME);
        let params = VoiceParams {
            volume: options.clamped_volume(),
            looped: options.looped,
            rate: options.clamped_rate(),
            fade_in: options.fade_in,
            fade_out: options.fade_out,
        };

        if !self.mixer.start_voice(handle.id, key, sound, params) {
            return Err(Error::InstanceExhausted(key));
        }

        debug!("Playing {key} (voice {})", handle.id);
        Ok(handle)
    }

    fn stop_sound(&self, key: SoundKey) {
        let stopped = self.mixer.stop_key(key);
        debug!("Stopped {stopped} voices of {key}");
    }

    fn stop_sound_with_fade(&self, key: SoundKey, fade: Duration) {
        if fade.is_zero() {
            self.mixer.stop_key(key);
        } else {
            self.mixer.fade_out_key(key, fade);
        }
    }

    fn stop_all_sounds(&self) {
        self.mixer.stop_all();
    }

    fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64> {
        if *self.lifecycle.lock() == Lifecycle::Disposed {
            return Err(Error::Disposed(NAME));
        }

        let decoded = decode::decode_bytes(data, None)?;
        let conformed =
            resample::conform(&decoded, self.mixer.sample_rate(), self.mixer.channels())?;
        let size = conformed.size_bytes();

        debug!(
            "Loaded {key}: {:.2}s, {} bytes decoded",
            conformed.duration_secs(),
            size
        );
        self.buffers.write().insert(key, Arc::new(conformed));
        Ok(size)
    }

    fn set_volume(&self, volume: f32) {
        self.mixer.set_master_volume(volume);
    }

    fn set_muted(&self, muted: bool) {
        self.mixer.set_muted(muted);
    }

    fn state(&self) -> StrategyState {
        let mut loaded_sounds: Vec<SoundKey> = self.buffers.read().keys().copied().collect();
        loaded_sounds.sort();
        StrategyState {
            initialized: *self.lifecycle.lock() == Lifecycle::Ready,
            suspended: self.mixer.is_suspended(),
            loaded_sounds,
            active_count: self.mixer.active_count(),
            master_volume: self.mixer.master_volume(),
            is_muted: self.mixer.is_muted(),
        }
    }

    fn resume(&self) -> Result<()> {
        self.ensure_ready()?;
        if !self.output.lock().is_open() {
            return Err(Error::AudioOutput("output is closed".into()));
        }
        if self.mixer.is_suspended() {
            info!("Buffered output resumed after user gesture");
            self.mixer.set_suspended(false);
        }
        Ok(())
    }

    fn dispose(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Disposed {
            return;
        }
        self.mixer.stop_all();
        self.output.lock().close();
        self.buffers.write().clear();
        *lifecycle = Lifecycle::Disposed;
        warn!("Buffered strategy disposed");
    }
}
