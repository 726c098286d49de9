//! Visual feedback strategy: short-lived indicators instead of sound.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chime_core::{
    ActiveSoundHandle, CapabilitySnapshot, EngineEvent, EventSink, Indicator, PlayOptions, Result,
    SoundKey, StrategyState,
};
use parking_lot::Mutex;

use super::{Gain, PlaybackStrategy};

const NAME: &str = "visual";

struct VisualState {
    indicators: Vec<Indicator>,
    loaded: BTreeSet<SoundKey>,
    gain: Gain,
    initialized: bool,
}

/// Works with no audio hardware at all. `play_sound` never fails.
pub struct VisualStrategy {
    lifetime: Duration,
    events: Option<EventSink>,
    state: Mutex<VisualState>,
}

impl VisualStrategy {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            events: None,
            state: Mutex::new(VisualState {
                indicators: Vec::new(),
                loaded: BTreeSet::new(),
                gain: Gain::default(),
                initialized: false,
            }),
        }
    }

    /// Publish every new indicator as [`EngineEvent::Indicator`] so the
    /// game can draw it.
    #[must_use]
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Indicators still on screen. Expired ones are dropped.
    pub fn visible(&self) -> Vec<Indicator> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.indicators.retain(|i| !i.is_expired(now));
        state.indicators.clone()
    }
}

impl PlaybackStrategy for VisualStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self, _capabilities: &CapabilitySnapshot) -> bool {
        true
    }

    fn initialize(&self, _capabilities: &CapabilitySnapshot) -> Result<()> {
        self.state.lock().initialized = true;
        Ok(())
    }

    fn play_sound(&self, key: SoundKey, _options: &PlayOptions) -> Result<ActiveSoundHandle> {
        let now = Instant::now();
        let indicator = Indicator::new(key, now, self.lifetime);

        {
            let mut state = self.state.lock();
            state.indicators.retain(|i| !i.is_expired(now));
            state.indicators.push(indicator.clone());
        }

        if let Some(events) = &self.events {
            events.emit(EngineEvent::Indicator(indicator));
        }

        Ok(ActiveSoundHandle::new(key, NAME))
    }

    fn stop_sound(&self, key: SoundKey) {
        self.state.lock().indicators.retain(|i| i.key != key);
    }

    fn stop_all_sounds(&self) {
        self.state.lock().indicators.clear();
    }

    fn load_sound(&self, key: SoundKey, _data: &Bytes) -> Result<u64> {
        self.state.lock().loaded.insert(key);
        Ok(0)
    }

    fn set_volume(&self, volume: f32) {
        self.state.lock().gain.volume = volume;
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().gain.muted = muted;
    }

    fn state(&self) -> StrategyState {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.indicators.retain(|i| !i.is_expired(now));
        StrategyState {
            initialized: state.initialized,
            suspended: false,
            loaded_sounds: state.loaded.iter().copied().collect(),
            active_count: state.indicators.len(),
            master_volume: state.gain.volume,
            is_muted: state.gain.muted,
        }
    }

    fn dispose(&self) {
        let mut state = self.state.lock();
        state.indicators.clear();
        state.loaded.clear();
        state.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_shows_indicator() {
        let (events, rx) = EventSink::new();
        let strategy = VisualStrategy::new(Duration::from_secs(60)).with_events(events);
        strategy.initialize(&CapabilitySnapshot::none()).unwrap();

        strategy
            .play_sound(SoundKey::LineClear, &PlayOptions::default())
            .unwrap();

        let EngineEvent::Indicator(shown) = rx.try_recv().unwrap() else {
            panic!("expected an indicator event");
        };
        assert_eq!(shown.key, SoundKey::LineClear);
        assert_eq!(shown.label, SoundKey::LineClear.label());
        assert_eq!(strategy.visible().len(), 1);
    }

    #[test]
    fn test_indicators_expire() {
        let strategy = VisualStrategy::new(Duration::ZERO);
        strategy
            .play_sound(SoundKey::Tetris, &PlayOptions::default())
            .unwrap();
        assert!(strategy.visible().is_empty());
        assert_eq!(strategy.state().active_count, 0);
    }

    #[test]
    fn test_never_fails_without_load() {
        let strategy = VisualStrategy::new(Duration::from_secs(1));
        assert!(strategy.is_available(&CapabilitySnapshot::none()));
        for key in SoundKey::ALL {
            strategy.play_sound(key, &PlayOptions::default()).unwrap();
        }
        strategy.stop_sound(SoundKey::PieceMove);
        assert_eq!(strategy.visible().len(), SoundKey::ALL.len() - 1);
        strategy.stop_all_sounds();
        assert!(strategy.visible().is_empty());
    }

    #[test]
    fn test_dropped_receiver_is_harmless() {
        let (events, rx) = EventSink::new();
        drop(rx);
        let strategy = VisualStrategy::new(Duration::from_secs(1)).with_events(events);
        strategy
            .play_sound(SoundKey::GameOver, &PlayOptions::default())
            .unwrap();
    }
}
