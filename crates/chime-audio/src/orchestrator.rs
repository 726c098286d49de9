//! Ordered strategy chain with degrade-on-failure.
//!
//! The orchestrator is the only place the active strategy changes. Degrading
//! is monotonic: a failed strategy is disposed and the index only moves down
//! the chain, except through [`StrategyOrchestrator::switch_to_strategy`] and
//! [`StrategyOrchestrator::reset_fallback`].

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chime_core::{
    ActiveSoundHandle, CapabilitySnapshot, EngineEvent, Error, EventSink, FallbackStatus,
    PlayOptions, Result, SoundKey, StrategyDescriptor, StrategyState,
};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::cache::AssetCache;
use crate::capability::CapabilityDetector;
use crate::strategy::{priority, PlaybackStrategy, SilentStrategy};
use crate::volume::VolumeController;

const COMPONENT: &str = "orchestrator";

/// A self-test slower than this counts as failed.
pub const DEFAULT_SELF_TEST_DEADLINE: Duration = Duration::from_secs(2);

struct Entry {
    descriptor: StrategyDescriptor,
    strategy: Arc<dyn PlaybackStrategy>,
}

struct Chain {
    entries: Vec<Entry>,
    current: usize,
    capabilities: Option<CapabilitySnapshot>,
    initialized: bool,
}

impl Chain {
    fn current(&self) -> &Entry {
        &self.entries[self.current]
    }

    fn capabilities(&mut self, detector: &CapabilityDetector) -> CapabilitySnapshot {
        self.capabilities
            .get_or_insert_with(|| detector.detect())
            .clone()
    }
}

/// Owns the strategy chain and the current index.
pub struct StrategyOrchestrator {
    chain: Mutex<Chain>,
    detector: Arc<CapabilityDetector>,
    volume: Arc<VolumeController>,
    events: EventSink,
    cache: AssetCache,
    disabled: HashSet<String>,
    self_test_deadline: Duration,
}

impl StrategyOrchestrator {
    /// Build a chain from `(priority, strategy)` pairs.
    ///
    /// A silent strategy is appended if none is given. Priorities and names
    /// must be unique and silent must rank lowest.
    pub fn new(
        strategies: Vec<(u32, Arc<dyn PlaybackStrategy>)>,
        detector: Arc<CapabilityDetector>,
        volume: Arc<VolumeController>,
        events: EventSink,
    ) -> Result<Self> {
        let mut strategies = strategies;
        if !strategies.iter().any(|(_, s)| s.name() == "silent") {
            strategies.push((priority::SILENT, Arc::new(SilentStrategy::new())));
        }

        let mut priorities = HashSet::new();
        let mut names = HashSet::new();
        for (prio, strategy) in &strategies {
            if !priorities.insert(*prio) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate strategy priority {prio}"
                )));
            }
            if !names.insert(strategy.name()) {
                return Err(Error::InvalidArgument(format!(
                    "duplicate strategy name {}",
                    strategy.name()
                )));
            }
        }

        strategies.sort_by(|a, b| b.0.cmp(&a.0));
        if strategies.last().map(|(_, s)| s.name()) != Some("silent") {
            return Err(Error::InvalidArgument(
                "the silent strategy must have the lowest priority".into(),
            ));
        }

        let entries = strategies
            .into_iter()
            .map(|(prio, strategy)| Entry {
                descriptor: StrategyDescriptor::new(strategy.name(), prio),
                strategy,
            })
            .collect();

        Ok(Self {
            chain: Mutex::new(Chain {
                entries,
                current: 0,
                capabilities: None,
                initialized: false,
            }),
            detector,
            volume,
            events,
            cache: AssetCache::new(),
            disabled: HashSet::new(),
            self_test_deadline: DEFAULT_SELF_TEST_DEADLINE,
        })
    }

    /// Never activate these strategies. Silent cannot be disabled.
    #[must_use]
    pub fn with_disabled<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled = names
            .into_iter()
            .map(Into::into)
            .filter(|name| name != "silent")
            .collect();
        self
    }

    #[must_use]
    pub const fn with_self_test_deadline(mut self, deadline: Duration) -> Self {
        self.self_test_deadline = deadline;
        self
    }

    pub const fn events(&self) -> &EventSink {
        &self.events
    }

    pub fn is_initialized(&self) -> bool {
        self.chain.lock().initialized
    }

    /// Probe capabilities and activate the best strategy that passes its
    /// self-test. Falls back to silent if nothing else works.
    pub fn initialize(&self) -> FallbackStatus {
        let mut chain = self.chain.lock();
        self.initialize_locked(&mut chain);
        Self::status_locked(&chain)
    }

    fn initialize_locked(&self, chain: &mut Chain) {
        let caps = chain.capabilities(&self.detector);

        for entry in &mut chain.entries {
            entry.descriptor.available =
                !self.disabled.contains(entry.descriptor.name.as_str())
                    && entry.strategy.is_available(&caps);
            entry.descriptor.verified = false;
        }

        let last = chain.entries.len() - 1;
        for index in 0..chain.entries.len() {
            if !chain.entries[index].descriptor.available {
                debug!("Skipping unavailable strategy {}", chain.entries[index].descriptor.name);
                continue;
            }
            match self.activate(chain, index, &caps) {
                Ok(()) => {
                    chain.initialized = true;
                    info!(
                        "Audio strategy {} active (level {index})",
                        chain.current().descriptor.name
                    );
                    self.events.emit(EngineEvent::StrategyChanged {
                        from: None,
                        to: chain.current().descriptor.name.clone(),
                        reason: "initialized".to_string(),
                    });
                    return;
                }
                Err(e) => {
                    self.events.report(&e, COMPONENT, "initialize", None);
                    chain.entries[index].strategy.dispose();
                }
            }
        }

        // Nothing passed. Silent has no dependencies and is used regardless.
        error!("No strategy could be initialized, forcing silent mode");
        let silent = chain.entries[last].strategy.clone();
        if let Err(e) = silent.initialize(&caps) {
            self.events.report(&e, COMPONENT, "initialize", None);
        }
        chain.entries[last].descriptor.verified = true;
        chain.current = last;
        chain.initialized = true;
        self.volume.apply_to(silent);
        self.events.emit(EngineEvent::StrategyChanged {
            from: None,
            to: chain.current().descriptor.name.clone(),
            reason: "no strategy passed initialization".to_string(),
        });
    }

    /// Initialize, self-test, warm and project volume onto one entry.
    fn activate(&self, chain: &mut Chain, index: usize, caps: &CapabilitySnapshot) -> Result<()> {
        let strategy = chain.entries[index].strategy.clone();
        strategy.initialize(caps)?;

        let started = Instant::now();
        strategy.self_test()?;
        let elapsed = started.elapsed();
        if elapsed > self.self_test_deadline {
            return Err(Error::Timeout(
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            ));
        }

        if !self.cache.is_empty() {
            let report = strategy.preload_sounds(&self.cache.snapshot());
            for (key, e) in &report.failed {
                self.events.report(e, COMPONENT, "warm", Some(*key));
            }
            debug!(
                "Warmed {} with {} cached sounds",
                strategy.name(),
                report.loaded.len()
            );
        }

        self.volume.apply_to(strategy);
        chain.entries[index].descriptor.verified = true;
        chain.current = index;
        Ok(())
    }

    /// Dispose the current strategy and move to the next one that activates.
    /// Returns `None` when already at the end of the chain.
    fn degrade_locked(&self, chain: &mut Chain, reason: &str) -> Option<Arc<dyn PlaybackStrategy>> {
        let from = chain.current;
        if from + 1 >= chain.entries.len() {
            return None;
        }

        let caps = chain.capabilities(&self.detector);
        chain.entries[from].strategy.dispose();
        chain.entries[from].descriptor.verified = false;

        for index in from + 1..chain.entries.len() {
            if !chain.entries[index].descriptor.available {
                continue;
            }
            match self.activate(chain, index, &caps) {
                Ok(()) => {
                    warn!(
                        "Audio strategy degraded {} -> {} ({reason})",
                        chain.entries[from].descriptor.name, chain.entries[index].descriptor.name
                    );
                    self.events.emit(EngineEvent::StrategyChanged {
                        from: Some(chain.entries[from].descriptor.name.clone()),
                        to: chain.entries[index].descriptor.name.clone(),
                        reason: reason.to_string(),
                    });
                    return Some(chain.entries[index].strategy.clone());
                }
                Err(e) => {
                    self.events.report(&e, COMPONENT, "degrade", None);
                    chain.entries[index].strategy.dispose();
                }
            }
        }

        // Only reachable if silent itself refused to start.
        let last = chain.entries.len() - 1;
        chain.current = last;
        let silent = chain.entries[last].strategy.clone();
        self.volume.apply_to(silent.clone());
        Some(silent)
    }

    /// Play on the active strategy, degrading once on failure.
    ///
    /// Every failure is reported to the event sink before it is returned.
    pub fn play_sound(&self, key: SoundKey, options: &PlayOptions) -> Result<ActiveSoundHandle> {
        let mut chain = self.chain.lock();
        if !chain.initialized {
            self.initialize_locked(&mut chain);
        }

        let strategy = chain.current().strategy.clone();
        let err = match strategy.play_sound(key, options) {
            Ok(handle) => return Ok(handle),
            Err(e) => e,
        };

        match err {
            Error::PermissionPending => {
                // One plain retry. Only a user gesture may resume the backend.
                let retried = strategy.play_sound(key, options);
                if let Err(e) = &retried {
                    if matches!(e, Error::PermissionPending) {
                        self.events.prompt_user_interaction();
                    }
                    self.events.report(e, COMPONENT, "play_sound", Some(key));
                }
                retried
            }
            e if !e.degrades_strategy() => {
                self.events.report(&e, COMPONENT, "play_sound", Some(key));
                Err(e)
            }
            e => {
                self.events.report(&e, COMPONENT, "play_sound", Some(key));
                let Some(next) = self.degrade_locked(&mut chain, &e.to_string()) else {
                    return Err(e);
                };
                next.play_sound(key, options).map_err(|retry_err| {
                    self.events
                        .report(&retry_err, COMPONENT, "play_sound", Some(key));
                    retry_err
                })
            }
        }
    }

    pub fn stop_sound(&self, key: SoundKey) {
        self.current_strategy().stop_sound(key);
    }

    pub fn stop_sound_with_fade(&self, key: SoundKey, fade: Duration) {
        self.current_strategy().stop_sound_with_fade(key, fade);
    }

    pub fn stop_all(&self) {
        self.current_strategy().stop_all_sounds();
    }

    /// Load one asset into the active strategy and keep its bytes for any
    /// strategy activated later.
    pub fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64> {
        let mut chain = self.chain.lock();
        if !chain.initialized {
            self.initialize_locked(&mut chain);
        }
        let size = chain.current().strategy.load_sound(key, data)?;
        self.cache.insert(key, data.clone());
        Ok(size)
    }

    /// Leave a suspended state on the active strategy. Call this from a user
    /// gesture handler; playback never resumes on its own.
    pub fn resume(&self) -> Result<()> {
        let strategy = self.current_strategy();
        strategy.resume().map_err(|e| {
            self.events.report(&e, COMPONENT, "resume", None);
            e
        })
    }

    /// Explicitly activate the strategy called `name`.
    pub fn switch_to_strategy(&self, name: &str) -> Result<()> {
        let mut chain = self.chain.lock();
        let Some(index) = chain
            .entries
            .iter()
            .position(|e| e.descriptor.name == name)
        else {
            return Err(Error::InvalidArgument(format!("unknown strategy {name}")));
        };

        if chain.initialized && index == chain.current {
            return Ok(());
        }

        let caps = chain.capabilities(&self.detector);
        let available =
            !self.disabled.contains(name) && chain.entries[index].strategy.is_available(&caps);
        chain.entries[index].descriptor.available = available;
        if !available {
            return Err(Error::Unsupported(format!("strategy {name} is not available")));
        }

        let previous = chain.initialized.then_some(chain.current);
        if let Err(e) = self.activate(&mut chain, index, &caps) {
            // The previous strategy is untouched and stays active.
            chain.entries[index].strategy.dispose();
            chain.entries[index].descriptor.verified = false;
            self.events.report(&e, COMPONENT, "switch_to_strategy", None);
            return Err(e);
        }

        if let Some(previous) = previous.filter(|p| *p != index) {
            chain.entries[previous].strategy.dispose();
            chain.entries[previous].descriptor.verified = false;
        }
        chain.initialized = true;

        info!("Switched audio strategy to {name}");
        self.events.emit(EngineEvent::StrategyChanged {
            from: previous.map(|p| chain.entries[p].descriptor.name.clone()),
            to: name.to_string(),
            reason: "manual switch".to_string(),
        });
        Ok(())
    }

    /// Dispose the current strategy, re-probe and start again from the top.
    pub fn reset_fallback(&self) -> FallbackStatus {
        let mut chain = self.chain.lock();
        if chain.initialized {
            chain.current().strategy.dispose();
        }
        self.detector.reset();
        chain.capabilities = None;
        chain.initialized = false;
        self.events.rearm_interaction_prompt();
        info!("Fallback reset, re-initializing audio");

        self.initialize_locked(&mut chain);
        Self::status_locked(&chain)
    }

    pub fn fallback_status(&self) -> FallbackStatus {
        Self::status_locked(&self.chain.lock())
    }

    fn status_locked(chain: &Chain) -> FallbackStatus {
        FallbackStatus {
            current_level: chain.current,
            available_levels: chain
                .entries
                .iter()
                .filter(|e| e.descriptor.available)
                .map(|e| e.descriptor.name.clone())
                .collect(),
            silent_mode: chain.current().descriptor.name == "silent",
        }
    }

    pub fn descriptors(&self) -> Vec<StrategyDescriptor> {
        self.chain
            .lock()
            .entries
            .iter()
            .map(|e| e.descriptor.clone())
            .collect()
    }

    pub fn current_strategy(&self) -> Arc<dyn PlaybackStrategy> {
        self.chain.lock().current().strategy.clone()
    }

    pub fn current_state(&self) -> StrategyState {
        self.current_strategy().state()
    }

    /// Capabilities the chain was last initialized with.
    pub fn capabilities(&self) -> Option<CapabilitySnapshot> {
        self.chain.lock().capabilities.clone()
    }

    /// Release the active strategy. The chain can be brought back with
    /// `initialize` or `reset_fallback`.
    pub fn dispose(&self) {
        let mut chain = self.chain.lock();
        if chain.initialized {
            chain.current().strategy.dispose();
            chain.initialized = false;
        }
        self.volume.detach();
    }
}
