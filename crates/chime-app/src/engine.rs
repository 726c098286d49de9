//! Composition root: builds and owns every engine component.

use std::sync::Arc;
use std::time::Duration;

use chime_audio::{
    priority, BufferedStrategy, CapabilityDetector, ElementStrategy, PlaybackStrategy,
    StrategyOrchestrator, VisualStrategy, VolumeController,
};
use chime_core::{
    ChimeConfig, EngineEvent, EventSink, FallbackStatus, PlayOptions, PreloadProfile,
    PreloadProgress, PreloadRecord, Result, SoundKey, VolumeState,
};
use chime_preload::{AssetFetcher, ConnectionInfo, DefaultFetcher, Preloader};
use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::state::{DetailedAudioState, PlayOutcome};

/// The sound effect engine as the game sees it.
///
/// Nothing here returns an error from the gameplay path. Failures are
/// reported on [`SoundEngine::events`].
pub struct SoundEngine<F = DefaultFetcher> {
    config: ChimeConfig,
    orchestrator: Arc<StrategyOrchestrator>,
    volume: Arc<VolumeController>,
    preloader: Preloader<F>,
    events: Receiver<EngineEvent>,
}

impl SoundEngine<DefaultFetcher> {
    /// Engine on the real audio host with the full strategy chain.
    pub fn new(config: ChimeConfig) -> Result<Self> {
        let (sink, events) = EventSink::new();
        let strategies: Vec<(u32, Arc<dyn PlaybackStrategy>)> = vec![
            (priority::BUFFERED, Arc::new(BufferedStrategy::system())),
            (
                priority::ELEMENT,
                Arc::new(ElementStrategy::system(config.element_pool_size())),
            ),
            (
                priority::VISUAL,
                Arc::new(
                    VisualStrategy::new(Duration::from_millis(config.visual_indicator_ms))
                        .with_events(sink.clone()),
                ),
            ),
        ];
        let detector = CapabilityDetector::system();
        let fetcher = DefaultFetcher::new()?;
        Self::with_event_channel(config, strategies, detector, fetcher, (sink, events))
    }
}

impl<F: AssetFetcher> SoundEngine<F> {
    /// Wire an engine from explicit parts. The silent strategy is added
    /// automatically.
    pub fn with_parts(
        config: ChimeConfig,
        strategies: Vec<(u32, Arc<dyn PlaybackStrategy>)>,
        detector: CapabilityDetector,
        fetcher: F,
    ) -> Result<Self> {
        Self::with_event_channel(config, strategies, detector, fetcher, EventSink::new())
    }

    /// Like [`SoundEngine::with_parts`], publishing on a channel the caller
    /// already handed to some of the strategies.
    pub fn with_event_channel(
        config: ChimeConfig,
        strategies: Vec<(u32, Arc<dyn PlaybackStrategy>)>,
        detector: CapabilityDetector,
        fetcher: F,
        (sink, events): (EventSink, Receiver<EngineEvent>),
    ) -> Result<Self> {
        config.validate()?;

        let volume = Arc::new(VolumeController::new(
            config.initial_volume,
            config.start_muted,
        ));
        let detector = match config.autoplay_policy {
            Some(policy) => detector.with_policy_override(Some(policy)),
            None => detector,
        };

        let orchestrator =
            StrategyOrchestrator::new(strategies, Arc::new(detector), volume.clone(), sink.clone())?
                .with_disabled(config.disabled_strategies.iter().cloned());
        let preloader = Preloader::new(&config, fetcher, sink);

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            volume,
            preloader,
            events,
        })
    }

    /// Probe and pick the initial strategy. Called lazily by the first play
    /// or preload if skipped.
    pub fn initialize(&self) -> FallbackStatus {
        let status = self.orchestrator.initialize();
        info!(
            "Sound engine ready at level {} ({})",
            status.current_level,
            self.orchestrator.current_strategy().name()
        );
        status
    }

    pub const fn config(&self) -> &ChimeConfig {
        &self.config
    }

    /// Fire and forget. Never fails the caller.
    pub fn play_sound(&self, key: SoundKey, options: &PlayOptions) -> PlayOutcome {
        match self.orchestrator.play_sound(key, options) {
            Ok(handle) => PlayOutcome::Played {
                id: handle.id,
                strategy: handle.strategy_name,
            },
            Err(e) => {
                debug!("play_sound({key}) swallowed: {e}");
                PlayOutcome::Dropped { kind: e.kind() }
            }
        }
    }

    pub fn play(&self, key: SoundKey) -> PlayOutcome {
        self.play_sound(key, &PlayOptions::default())
    }

    pub fn stop_sound(&self, key: SoundKey) {
        self.orchestrator.stop_sound(key);
    }

    pub fn stop_sound_with_fade(&self, key: SoundKey, fade: Duration) {
        self.orchestrator.stop_sound_with_fade(key, fade);
    }

    pub fn stop_all(&self) {
        self.orchestrator.stop_all();
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.set_volume(volume);
    }

    /// Returns the new mute flag.
    pub fn toggle_mute(&self) -> bool {
        self.volume.toggle_mute()
    }

    pub fn set_muted(&self, muted: bool) {
        self.volume.set_muted(muted);
    }

    pub fn volume_state(&self) -> VolumeState {
        self.volume.state()
    }

    /// Preload with an explicit profile, or the configured one, or normal.
    pub async fn preload_audio(&self, profile: Option<PreloadProfile>) -> PreloadProgress {
        let profile = profile
            .or(self.config.preload_profile)
            .unwrap_or_default();
        self.preloader
            .preload_with_profile(profile, &self.orchestrator)
            .await
    }

    /// Preload with a profile derived from the connection. A profile set in
    /// the config wins over the signal.
    pub async fn preload_based_on_network(
        &self,
        connection: Option<&ConnectionInfo>,
    ) -> PreloadProgress {
        if let Some(profile) = self.config.preload_profile {
            return self.preload_audio(Some(profile)).await;
        }
        self.preloader
            .preload_based_on_network(connection, &self.orchestrator)
            .await
    }

    pub fn preload_progress(&self) -> PreloadProgress {
        self.preloader.progress()
    }

    pub fn preload_record(&self, key: SoundKey) -> Option<PreloadRecord> {
        self.preloader.record(key)
    }

    /// Forget preload results. Already decoded sounds stay playable.
    pub fn reset_preload(&self) {
        self.preloader.reset();
    }

    pub fn fallback_status(&self) -> FallbackStatus {
        self.orchestrator.fallback_status()
    }

    pub fn detailed_audio_state(&self) -> DetailedAudioState {
        let strategy = self.orchestrator.current_state();
        let volume = self.volume.state();
        DetailedAudioState {
            initialized: self.orchestrator.is_initialized() && strategy.initialized,
            suspended: strategy.suspended,
            loaded_sounds: strategy.loaded_sounds,
            active_sounds: strategy.active_count,
            master_volume: volume.master_volume,
            is_muted: volume.is_muted,
        }
    }

    /// Call from a user gesture handler. Returns true if output is running.
    pub fn resume_after_gesture(&self) -> bool {
        self.orchestrator.resume().is_ok()
    }

    pub fn switch_to_strategy(&self, name: &str) -> Result<()> {
        self.orchestrator.switch_to_strategy(name)
    }

    pub fn reset_fallback(&self) -> FallbackStatus {
        self.orchestrator.reset_fallback()
    }

    /// Errors, strategy changes, interaction prompts, visual indicators and
    /// preload results.
    pub const fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn dispose(&self) {
        self.orchestrator.dispose();
    }
}

impl<F> Drop for SoundEngine<F> {
    fn drop(&mut self) {
        self.orchestrator.dispose();
    }
}
