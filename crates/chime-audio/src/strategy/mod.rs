//! Interchangeable playback backends.
//!
//! Each strategy is a flat implementation of [`PlaybackStrategy`]. Volume and
//! mute are imposed from outside by the volume controller; strategies apply
//! them but never change them on their own.

pub mod buffered;
pub mod element;
pub mod silent;
pub mod visual;

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use chime_core::{
    ActiveSoundHandle, CapabilitySnapshot, Error, PlayOptions, Result, SoundKey, StrategyState,
};

pub use buffered::BufferedStrategy;
pub use element::{ElementBackend, ElementStrategy, PlaybackElement, RodioBackend};
pub use silent::SilentStrategy;
pub use visual::VisualStrategy;

/// Outcome of a bulk preload.
#[derive(Debug, Default)]
pub struct PreloadReport {
    pub loaded: Vec<SoundKey>,
    pub failed: Vec<(SoundKey, Error)>,
    /// Memory taken by the loaded sounds.
    pub bytes: u64,
}

impl PreloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Shared playback contract.
pub trait PlaybackStrategy: Send + Sync {
    /// Stable name, unique within a chain.
    fn name(&self) -> &'static str;

    /// Whether the capability snapshot allows this strategy at all.
    fn is_available(&self, capabilities: &CapabilitySnapshot) -> bool;

    /// Acquire backend resources. Fails with a recoverable error if the
    /// backend is unusable.
    fn initialize(&self, capabilities: &CapabilitySnapshot) -> Result<()>;

    /// A trivial operation with no audible effect that proves the backend works.
    fn self_test(&self) -> Result<()> {
        Ok(())
    }

    /// Start one playback instance.
    fn play_sound(&self, key: SoundKey, options: &PlayOptions) -> Result<ActiveSoundHandle>;

    /// Best-effort stop of every instance of `key`.
    fn stop_sound(&self, key: SoundKey);

    /// Ramp every instance of `key` down over `fade`, then stop it.
    /// Backends without gain automation stop immediately.
    fn stop_sound_with_fade(&self, key: SoundKey, fade: Duration) {
        let _ = fade;
        self.stop_sound(key);
    }

    /// Best-effort stop of everything.
    fn stop_all_sounds(&self);

    /// Make one asset playable. Returns the memory it occupies.
    fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64>;

    /// Load every asset, tolerating individual failures.
    fn preload_sounds(&self, assets: &HashMap<SoundKey, Bytes>) -> PreloadReport {
        let mut report = PreloadReport::default();
        for (key, data) in assets {
            match self.load_sound(*key, data) {
                Ok(bytes) => {
                    report.loaded.push(*key);
                    report.bytes += bytes;
                }
                Err(e) => report.failed.push((*key, e)),
            }
        }
        report
    }

    /// Apply a master volume to live and future instances.
    fn set_volume(&self, volume: f32);

    /// Apply mute to live and future instances.
    fn set_muted(&self, muted: bool);

    fn state(&self) -> StrategyState;

    /// Leave a suspended state after a user gesture.
    fn resume(&self) -> Result<()> {
        Ok(())
    }

    /// Release all backend resources. Safe to call repeatedly.
    fn dispose(&self);
}

/// Fixed chain priorities. Higher is preferred.
pub mod priority {
    pub const BUFFERED: u32 = 300;
    pub const ELEMENT: u32 = 200;
    pub const VISUAL: u32 = 100;
    pub const SILENT: u32 = 0;
}

/// Volume/mute pair kept by every strategy.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Gain {
    pub volume: f32,
    pub muted: bool,
}

impl Default for Gain {
    fn default() -> Self {
        Self {
            volume: 1.0,
            muted: false,
        }
    }
}

impl Gain {
    pub fn effective(self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}
