//! Prioritized, staggered, budgeted preloading with retry.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use chime_audio::StrategyOrchestrator;
use chime_core::{
    AssetLocation, ChimeConfig, EngineEvent, Error, EventSink, PreloadProfile, PreloadProgress,
    PreloadRecord, PreloadState, Result, SoundKey,
};
use futures::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::fetch::AssetFetcher;
use crate::network::{profile_for, ConnectionInfo};
use crate::profile::{ProfileSettings, DEFAULT_SIZE_ESTIMATE};

const COMPONENT: &str = "preloader";

/// Where fetched assets are decoded and kept.
pub trait LoadTarget: Send + Sync {
    /// Make `data` playable for `key`. Returns the memory it occupies.
    fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64>;
}

impl LoadTarget for StrategyOrchestrator {
    fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64> {
        Self::load_sound(self, key, data)
    }
}

struct Asset {
    location: AssetLocation,
    estimate: u64,
}

/// Warms sounds in gameplay-frequency order.
///
/// Every key has an explicit [`PreloadRecord`]. `Loaded` and `Failed` are
/// sticky until [`Preloader::reset`].
pub struct Preloader<F> {
    fetcher: F,
    assets: BTreeMap<SoundKey, Asset>,
    records: Mutex<BTreeMap<SoundKey, PreloadRecord>>,
    events: EventSink,
}

impl<F: AssetFetcher> Preloader<F> {
    pub fn new(config: &ChimeConfig, fetcher: F, events: EventSink) -> Self {
        let assets: BTreeMap<SoundKey, Asset> = config
            .sounds
            .iter()
            .filter_map(|(key, entry)| {
                let location = config.location(*key)?;
                Some((
                    *key,
                    Asset {
                        location,
                        estimate: entry.size_hint.unwrap_or(DEFAULT_SIZE_ESTIMATE),
                    },
                ))
            })
            .collect();

        let records = assets
            .keys()
            .map(|key| (*key, PreloadRecord::default()))
            .collect();

        Self {
            fetcher,
            assets,
            records: Mutex::new(records),
            events,
        }
    }

    /// Load everything not yet loaded or failed, using `profile`'s limits.
    ///
    /// Decoding runs on the blocking pool, so `target` is shared.
    pub async fn preload_with_profile<T>(
        &self,
        profile: PreloadProfile,
        target: &Arc<T>,
    ) -> PreloadProgress
    where
        T: LoadTarget + ?Sized + 'static,
    {
        let settings = ProfileSettings::from(profile);
        let scheduled = self.schedule(&settings);
        info!(
            "Preloading {} sounds ({profile:?}: budget {} KiB, {} retries)",
            scheduled.len(),
            settings.memory_budget / 1024,
            settings.max_retries
        );

        let loads = scheduled.iter().enumerate().map(|(slot, key)| {
            let delay = settings.stagger * slot as u32;
            self.load_one(*key, delay, &settings, target)
        });
        join_all(loads).await;

        let progress = self.progress();
        info!(
            "Preload finished: {}/{} loaded, {} failed",
            progress.loaded, progress.total, progress.failed
        );
        self.events.emit(EngineEvent::PreloadFinished(progress));
        progress
    }

    /// Pick the profile from a connection-quality signal, if any.
    pub async fn preload_based_on_network<T>(
        &self,
        connection: Option<&ConnectionInfo>,
        target: &Arc<T>,
    ) -> PreloadProgress
    where
        T: LoadTarget + ?Sized + 'static,
    {
        let profile = profile_for(connection);
        debug!("Connection {connection:?} selects {profile:?} preloading");
        self.preload_with_profile(profile, target).await
    }

    /// Walk keys in priority order and reserve budget. Keys past the budget
    /// fail immediately, without a fetch.
    fn schedule(&self, settings: &ProfileSettings) -> Vec<SoundKey> {
        let mut records = self.records.lock();
        let mut used: u64 = records.values().map(|r| r.bytes).sum();
        let mut over_budget = false;
        let mut scheduled = Vec::new();

        for key in SoundKey::by_priority() {
            let (Some(asset), Some(record)) = (self.assets.get(&key), records.get_mut(&key)) else {
                continue;
            };
            // A pending key with a retry time belongs to a run in backoff.
            if record.state != PreloadState::Pending || record.next_eligible_at.is_some() {
                continue;
            }

            let remaining = settings.memory_budget.saturating_sub(used);
            if over_budget || asset.estimate > remaining {
                over_budget = true;
                let err = Error::MemoryBudget {
                    key,
                    needed: asset.estimate,
                    remaining,
                };
                warn!("Skipping {key}: {err}");
                record.state = PreloadState::Failed;
                record.last_error = Some(err.to_string());
                self.events.report(&err, COMPONENT, "schedule", Some(key));
                continue;
            }

            used += asset.estimate;
            record.state = PreloadState::Loading;
            scheduled.push(key);
        }
        scheduled
    }

    async fn load_one<T>(
        &self,
        key: SoundKey,
        delay: std::time::Duration,
        settings: &ProfileSettings,
        target: &Arc<T>,
    ) where
        T: LoadTarget + ?Sized + 'static,
    {
        let Some(asset) = self.assets.get(&key) else {
            return;
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let max_attempts = settings.max_attempts();
        for attempt in 1..=max_attempts {
            self.update(key, |r| {
                r.state = PreloadState::Loading;
                r.attempts = attempt;
                r.next_eligible_at = None;
            });
            debug!("Loading {key} from {} (attempt {attempt}/{max_attempts})", asset.location);

            match self.attempt(key, asset, settings, target).await {
                Ok(bytes) => {
                    self.update(key, |r| {
                        r.state = PreloadState::Loaded;
                        r.bytes = bytes;
                        r.last_error = None;
                    });
                    debug!("Loaded {key} ({bytes} bytes)");
                    return;
                }
                Err(e) => {
                    let last = attempt == max_attempts || !e.is_retryable();
                    self.update(key, |r| r.last_error = Some(e.to_string()));

                    if last {
                        warn!("Giving up on {key} after {attempt} attempts: {e}");
                        self.update(key, |r| r.state = PreloadState::Failed);
                        self.events.report(&e, COMPONENT, "load", Some(key));
                        return;
                    }

                    let backoff = ProfileSettings::backoff(attempt);
                    debug!("Load of {key} failed ({e}), retrying in {backoff:?}");
                    let retry_at = tokio::time::Instant::now() + backoff;
                    self.update(key, |r| {
                        r.state = PreloadState::Pending;
                        r.next_eligible_at = Some(retry_at.into_std());
                    });
                    tokio::time::sleep_until(retry_at).await;
                }
            }
        }
    }

    /// One fetch plus decode, both bounded by the profile timeout. Decoding
    /// is CPU bound and runs on the blocking pool.
    async fn attempt<T>(
        &self,
        key: SoundKey,
        asset: &Asset,
        settings: &ProfileSettings,
        target: &Arc<T>,
    ) -> Result<u64>
    where
        T: LoadTarget + ?Sized + 'static,
    {
        let load = async {
            let data = self.fetcher.fetch(&asset.location).await?;
            let target = Arc::clone(target);
            tokio::task::spawn_blocking(move || target.load_sound(key, &data))
                .await
                .map_err(|e| Error::Internal(format!("decode task for {key} failed: {e}")))?
        };
        tokio::time::timeout(settings.timeout, load)
            .await
            .map_err(|_| Error::Timeout(settings.timeout.as_millis() as u64))?
    }

    fn update(&self, key: SoundKey, f: impl FnOnce(&mut PreloadRecord)) {
        if let Some(record) = self.records.lock().get_mut(&key) {
            f(record);
        }
    }

    pub fn progress(&self) -> PreloadProgress {
        PreloadProgress::from_states(self.records.lock().values().map(|r| r.state))
    }

    pub fn record(&self, key: SoundKey) -> Option<PreloadRecord> {
        self.records.lock().get(&key).cloned()
    }

    pub fn state(&self, key: SoundKey) -> Option<PreloadState> {
        self.records.lock().get(&key).map(|r| r.state)
    }

    /// Return every key to `Pending`.
    pub fn reset(&self) {
        for record in self.records.lock().values_mut() {
            *record = PreloadRecord::default();
        }
        info!("Preload state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chime_core::AssetEntry;
    use std::thread::ThreadId;
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        AlwaysFail,
        FailTimes(usize),
        NotFound,
        Hang,
    }

    struct ScriptedFetcher {
        behavior: Behavior,
        calls: Mutex<Vec<AssetLocation>>,
    }

    impl ScriptedFetcher {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl AssetFetcher for ScriptedFetcher {
        async fn fetch(&self, location: &AssetLocation) -> Result<Bytes> {
            let previous = {
                let mut calls = self.calls.lock();
                let previous = calls.iter().filter(|l| *l == location).count();
                calls.push(location.clone());
                previous
            };
            match self.behavior {
                Behavior::Succeed => Ok(Bytes::from_static(b"RIFF")),
                Behavior::AlwaysFail => Err(Error::Network("connection reset".into())),
                Behavior::FailTimes(n) if previous < n => Err(Error::Network("flaky".into())),
                Behavior::FailTimes(_) => Ok(Bytes::from_static(b"RIFF")),
                Behavior::NotFound => Err(Error::InvalidArgument("404".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Bytes::new())
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingTarget {
        loaded: Mutex<Vec<SoundKey>>,
        threads: Mutex<Vec<ThreadId>>,
    }

    impl LoadTarget for RecordingTarget {
        fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64> {
            self.loaded.lock().push(key);
            self.threads.lock().push(std::thread::current().id());
            Ok(data.len() as u64)
        }
    }

    fn single_key_config(key: SoundKey) -> ChimeConfig {
        let mut config = ChimeConfig::default();
        config.sounds.retain(|k, _| *k == key);
        config
    }

    fn preloader(config: &ChimeConfig, behavior: Behavior) -> Preloader<ScriptedFetcher> {
        Preloader::new(config, ScriptedFetcher::new(behavior), EventSink::detached())
    }

    #[tokio::test(start_paused = true)]
    async fn test_loads_in_priority_order() {
        let config = ChimeConfig::default();
        let preloader = preloader(&config, Behavior::Succeed);
        let target = Arc::new(RecordingTarget::default());

        let progress = preloader
            .preload_with_profile(PreloadProfile::Normal, &target)
            .await;

        assert_eq!(progress.loaded, SoundKey::ALL.len());
        assert!(progress.is_complete());
        assert_eq!(*target.loaded.lock(), SoundKey::by_priority());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let config = single_key_config(SoundKey::LineClear);
        let preloader = preloader(&config, Behavior::AlwaysFail);
        let target = Arc::new(RecordingTarget::default());
        let started = tokio::time::Instant::now();

        let progress = preloader
            .preload_with_profile(PreloadProfile::Normal, &target)
            .await;

        let record = preloader.record(SoundKey::LineClear).unwrap();
        assert_eq!(record.state, PreloadState::Failed);
        assert_eq!(record.attempts, 3);
        assert!(record.last_error.is_some());
        assert_eq!(preloader.fetcher.call_count(), 3);
        assert_eq!(progress.failed, 1);

        // Backoff of 1s then 2s between the three attempts.
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_is_sticky_until_reset() {
        let config = single_key_config(SoundKey::Tetris);
        let preloader = preloader(&config, Behavior::AlwaysFail);
        let target = Arc::new(RecordingTarget::default());

        preloader
            .preload_with_profile(PreloadProfile::Conservative, &target)
            .await;
        assert_eq!(preloader.fetcher.call_count(), 2);

        preloader
            .preload_with_profile(PreloadProfile::Conservative, &target)
            .await;
        assert_eq!(preloader.fetcher.call_count(), 2);

        preloader.reset();
        assert_eq!(preloader.state(SoundKey::Tetris), Some(PreloadState::Pending));
        preloader
            .preload_with_profile(PreloadProfile::Conservative, &target)
            .await;
        assert_eq!(preloader.fetcher.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let config = single_key_config(SoundKey::HardDrop);
        let preloader = preloader(&config, Behavior::FailTimes(1));
        let target = Arc::new(RecordingTarget::default());

        preloader
            .preload_with_profile(PreloadProfile::Normal, &target)
            .await;

        let record = preloader.record(SoundKey::HardDrop).unwrap();
        assert_eq!(record.state, PreloadState::Loaded);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.bytes, 4);
        assert!(record.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let config = single_key_config(SoundKey::GameOver);
        let preloader = preloader(&config, Behavior::NotFound);

        preloader
            .preload_with_profile(PreloadProfile::Aggressive, &Arc::new(RecordingTarget::default()))
            .await;

        let record = preloader.record(SoundKey::GameOver).unwrap();
        assert_eq!(record.state, PreloadState::Failed);
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let config = single_key_config(SoundKey::LevelUp);
        let preloader = preloader(&config, Behavior::Hang);

        preloader
            .preload_with_profile(PreloadProfile::Conservative, &Arc::new(RecordingTarget::default()))
            .await;

        let record = preloader.record(SoundKey::LevelUp).unwrap();
        assert_eq!(record.state, PreloadState::Failed);
        assert_eq!(record.attempts, 2);
        assert!(record
            .last_error
            .is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhaustion_fails_without_fetch() {
        let mut config = ChimeConfig::default();
        for entry in config.sounds.values_mut() {
            *entry = AssetEntry::new(entry.path.clone()).with_size_hint(12 * 1024 * 1024);
        }
        let preloader = preloader(&config, Behavior::Succeed);
        let target = Arc::new(RecordingTarget::default());

        let progress = preloader
            .preload_with_profile(PreloadProfile::Normal, &target)
            .await;

        // 32 MiB fits two 12 MiB assets, in priority order.
        assert_eq!(progress.loaded, 2);
        assert_eq!(progress.failed, SoundKey::ALL.len() - 2);
        assert_eq!(preloader.fetcher.call_count(), 2);
        assert_eq!(
            *target.loaded.lock(),
            vec![SoundKey::PieceMove, SoundKey::PieceRotate]
        );

        let skipped = preloader.record(SoundKey::GameOver).unwrap();
        assert_eq!(skipped.attempts, 0);
        assert!(skipped
            .last_error
            .is_some_and(|e| e.contains("Memory budget")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_network_signal_uses_normal_profile() {
        let config = single_key_config(SoundKey::PieceLand);
        let preloader = preloader(&config, Behavior::AlwaysFail);

        preloader
            .preload_based_on_network(None, &Arc::new(RecordingTarget::default()))
            .await;

        assert_eq!(preloader.record(SoundKey::PieceLand).unwrap().attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finish_event_is_emitted() {
        let config = single_key_config(SoundKey::PieceRotate);
        let (events, rx) = EventSink::new();
        let preloader = Preloader::new(&config, ScriptedFetcher::new(Behavior::Succeed), events);

        preloader
            .preload_with_profile(PreloadProfile::Aggressive, &Arc::new(RecordingTarget::default()))
            .await;

        let finished = rx
            .try_iter()
            .find_map(|e| match e {
                EngineEvent::PreloadFinished(progress) => Some(progress),
                _ => None,
            })
            .unwrap();
        assert_eq!(finished.loaded, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_runs_off_the_runtime_thread() {
        let config = single_key_config(SoundKey::LineClear);
        let preloader = preloader(&config, Behavior::Succeed);
        let target = Arc::new(RecordingTarget::default());

        preloader
            .preload_with_profile(PreloadProfile::Normal, &target)
            .await;

        let threads = target.threads.lock();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_visible_on_the_record() {
        let config = single_key_config(SoundKey::PieceMove);
        let preloader = preloader(&config, Behavior::FailTimes(1));
        let target = Arc::new(RecordingTarget::default());

        let run = preloader.preload_with_profile(PreloadProfile::Normal, &target);
        tokio::pin!(run);

        // Halfway through the first 1s backoff.
        assert!(tokio::time::timeout(Duration::from_millis(500), &mut run)
            .await
            .is_err());

        let waiting = preloader.record(SoundKey::PieceMove).unwrap();
        assert_eq!(waiting.state, PreloadState::Pending);
        assert_eq!(waiting.attempts, 1);
        let remaining = waiting
            .next_eligible_at
            .unwrap()
            .saturating_duration_since(tokio::time::Instant::now().into_std());
        assert!(remaining > Duration::from_millis(400));
        assert!(remaining <= Duration::from_millis(500));
        assert_eq!(preloader.progress().in_progress, 0);

        // A second run does not steal the key from the one in backoff.
        preloader
            .preload_with_profile(PreloadProfile::Normal, &target)
            .await;
        assert_eq!(preloader.fetcher.call_count(), 1);

        run.await;
        let loaded = preloader.record(SoundKey::PieceMove).unwrap();
        assert_eq!(loaded.state, PreloadState::Loaded);
        assert_eq!(loaded.attempts, 2);
        assert!(loaded.next_eligible_at.is_none());
    }
}
