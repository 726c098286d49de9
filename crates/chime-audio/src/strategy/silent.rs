//! Terminal strategy. Always available, never fails, never makes a sound.

use bytes::Bytes;
use chime_core::{
    ActiveSoundHandle, CapabilitySnapshot, PlayOptions, Result, SoundKey, StrategyState,
};
use parking_lot::Mutex;

use super::{Gain, PlaybackStrategy};

const NAME: &str = "silent";

#[derive(Default)]
pub struct SilentStrategy {
    gain: Mutex<Gain>,
}

impl SilentStrategy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackStrategy for SilentStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self, _capabilities: &CapabilitySnapshot) -> bool {
        true
    }

    fn initialize(&self, _capabilities: &CapabilitySnapshot) -> Result<()> {
        Ok(())
    }

    fn play_sound(&self, key: SoundKey, _options: &PlayOptions) -> Result<ActiveSoundHandle> {
        Ok(ActiveSoundHandle::new(key, NAME))
    }

    fn stop_sound(&self, _key: SoundKey) {}

    fn stop_all_sounds(&self) {}

    fn load_sound(&self, _key: SoundKey, _data: &Bytes) -> Result<u64> {
        Ok(0)
    }

    fn set_volume(&self, volume: f32) {
        self.gain.lock().volume = volume;
    }

    fn set_muted(&self, muted: bool) {
        self.gain.lock().muted = muted;
    }

    fn state(&self) -> StrategyState {
        let gain = *self.gain.lock();
        StrategyState {
            initialized: true,
            master_volume: gain.volume,
            is_muted: gain.muted,
            ..StrategyState::default()
        }
    }

    fn dispose(&self) {}
}
