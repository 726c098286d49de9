//! Playback requests, live instances and per-strategy state.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use super::SoundKey;

/// Per-call playback options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayOptions {
    /// Instance volume (0.0 to 1.0), multiplied with the master volume.
    pub volume: f32,
    #[serde(rename = "loop")]
    pub looped: bool,
    /// Playback speed multiplier. Backends without rate control ignore it.
    pub playback_rate: f32,
    /// Linear fade-in length.
    #[serde(with = "millis_opt")]
    pub fade_in: Option<Duration>,
    /// Linear fade-out applied at the natural end of a non-looping sound.
    #[serde(with = "millis_opt")]
    pub fade_out: Option<Duration>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            volume: 1.0,
            looped: false,
            playback_rate: 1.0,
            fade_in: None,
            fade_out: None,
        }
    }
}

impl PlayOptions {
    #[must_use]
    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume.clamp(0.0, 1.0);
        self
    }

    #[must_use]
    pub const fn looped(mut self, looped: bool) -> Self {
        self.looped = looped;
        self
    }

    #[must_use]
    pub const fn with_fade_in(mut self, fade: Duration) -> Self {
        self.fade_in = Some(fade);
        self
    }

    #[must_use]
    pub const fn with_fade_out(mut self, fade: Duration) -> Self {
        self.fade_out = Some(fade);
        self
    }

    /// Volume clamped to the valid range.
    pub fn clamped_volume(&self) -> f32 {
        if self.volume.is_finite() {
            self.volume.clamp(0.0, 1.0)
        } else {
            1.0
        }
    }

    /// Playback rate clamped to a sane range.
    pub fn clamped_rate(&self) -> f32 {
        if self.playback_rate.is_finite() && self.playback_rate > 0.0 {
            self.playback_rate.clamp(0.25, 4.0)
        } else {
            1.0
        }
    }
}

mod millis_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// One in-flight playback instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSoundHandle {
    pub id: u64,
    pub sound_key: SoundKey,
    pub started_at: Instant,
    pub strategy_name: &'static str,
}

impl ActiveSoundHandle {
    pub fn new(sound_key: SoundKey, strategy_name: &'static str) -> Self {
        Self {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            sound_key,
            started_at: Instant::now(),
            strategy_name,
        }
    }
}

/// Snapshot returned by a strategy's `state()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StrategyState {
    pub initialized: bool,
    /// The backend's execution context is waiting for a user gesture.
    pub suspended: bool,
    pub loaded_sounds: Vec<SoundKey>,
    pub active_count: usize,
    pub master_volume: f32,
    pub is_muted: bool,
}
