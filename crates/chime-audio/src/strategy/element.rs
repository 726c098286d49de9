//! Element-pool strategy: a few reusable players per sound, built on rodio.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::collections::HashMap;
use std::io::Cursor;
use std::thread::JoinHandle;

use bytes::Bytes;
use chime_core::{
    ActiveSoundHandle, AutoplayPolicy, CapabilitySnapshot, Error, PlayOptions, Result, SoundKey,
    StrategyState, MAX_ELEMENT_POOL,
};
use crossbeam_channel::{bounded, Sender};
use parking_lot::{Mutex, RwLock};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use tracing::{debug, info, warn};

use super::{Gain, PlaybackStrategy};

const NAME: &str = "element";

/// One reusable player bound to a single asset.
pub trait PlaybackElement: Send {
    /// Start from position zero.
    fn start(&mut self, gain: f32, looped: bool, rate: f32) -> Result<()>;

    /// Stop and rewind to zero.
    fn stop(&mut self);

    fn is_idle(&self) -> bool;

    fn set_gain(&mut self, gain: f32);
}

/// Creates playback elements on some output.
pub trait ElementBackend: Send + Sync {
    fn open(&self) -> Result<()>;

    fn is_open(&self) -> bool;

    /// Build an element for `data`, failing if the asset cannot be decoded.
    fn create_element(&self, key: SoundKey, data: &Bytes) -> Result<Box<dyn PlaybackElement>>;

    fn close(&self);
}

/// Backend on the default rodio output stream.
///
/// `OutputStream` is not `Send`, so it stays on its own thread while the
/// `Send` handle is shared with elements.
#[derive(Default)]
pub struct RodioBackend {
    worker: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
    handle: RwLock<Option<OutputStreamHandle>>,
}

impl RodioBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ElementBackend for RodioBackend {
    fn open(&self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<OutputStreamHandle>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let thread = std::thread::Builder::new()
            .name("chime-element-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    debug!("Element output stream closed");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(Error::AudioOutput(format!(
                        "Failed to open output stream: {e}"
                    ))));
                }
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        let handle = ready_rx
            .recv()
            .map_err(|e| Error::AudioOutput(format!("Output thread exited early: {e}")))??;

        *self.handle.write() = Some(handle);
        *self.worker.lock() = Some((shutdown_tx, thread));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|(_, thread)| !thread.is_finished())
    }

    fn create_element(&self, key: SoundKey, data: &Bytes) -> Result<Box<dyn PlaybackElement>> {
        let handle = self
            .handle
            .read()
            .clone()
            .ok_or_else(|| Error::AudioOutput("element output is closed".into()))?;

        // Probe once so undecodable assets fail at load time, not at play time.
        Decoder::new(Cursor::new(data.clone()))
            .map_err(|e| Error::AudioDecode(format!("{key}: {e}")))?;

        Ok(Box::new(RodioElement {
            handle,
            data: data.clone(),
            sink: None,
        }))
    }

    fn close(&self) {
        self.handle.write().take();
        if let Some((shutdown, thread)) = self.worker.lock().take() {
            let _ = shutdown.send(());
            if thread.join().is_err() {
                warn!("Element output thread panicked");
            }
        }
    }
}

impl Drop for RodioBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// A fresh sink per start gives rewind-on-stop for free.
struct RodioElement {
    handle: OutputStreamHandle,
    data: Bytes,
    sink: Option<Sink>,
}

impl PlaybackElement for RodioElement {
    fn start(&mut self, gain: f32, looped: bool, rate: f32) -> Result<()> {
        self.stop();

        let sink = Sink::try_new(&self.handle)
            .map_err(|e| Error::AudioOutput(format!("Failed to create sink: {e}")))?;
        let source = Decoder::new(Cursor::new(self.data.clone()))
            .map_err(|e| Error::AudioDecode(e.to_string()))?;

        sink.set_volume(gain);
        sink.set_speed(rate);
        if looped {
            sink.append(source.repeat_infinite());
        } else {
            sink.append(source);
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(sink) = self.sink.take() {
            sink.stop();
        }
    }

    fn is_idle(&self) -> bool {
        self.sink.as_ref().map_or(true, Sink::empty)
    }

    fn set_gain(&mut self, gain: f32) {
        if let Some(sink) = &self.sink {
            sink.set_volume(gain);
        }
    }
}

struct Slot {
    element: Box<dyn PlaybackElement>,
    /// Per-instance volume from the last `play_sound`.
    volume: f32,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    #[default]
    Idle,
    Ready,
    Disposed,
}

/// Simple strategy with bounded concurrency per sound.
pub struct ElementStrategy {
    backend: Box<dyn ElementBackend>,
    pool_size: usize,
    sources: RwLock<HashMap<SoundKey, Bytes>>,
    pools: Mutex<HashMap<SoundKey, Vec<Slot>>>,
    gain: Mutex<Gain>,
    suspended: Mutex<bool>,
    lifecycle: Mutex<Lifecycle>,
}

impl ElementStrategy {
    /// `pool_size` is clamped to `1..=MAX_ELEMENT_POOL`.
    pub fn new(backend: Box<dyn ElementBackend>, pool_size: usize) -> Self {
        Self {
            backend,
            pool_size: pool_size.clamp(1, MAX_ELEMENT_POOL),
            sources: RwLock::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            gain: Mutex::new(Gain::default()),
            suspended: Mutex::new(false),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    pub fn system(pool_size: usize) -> Self {
        Self::new(Box::new(RodioBackend::new()), pool_size)
    }

    pub const fn pool_size(&self) -> usize {
        self.pool_size
    }

    fn ensure_ready(&self) -> Result<()> {
        match *self.lifecycle.lock() {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Idle => Err(Error::Unsupported("element output not initialized".into())),
            Lifecycle::Disposed => Err(Error::Disposed(NAME)),
        }
    }

    fn apply_gain(&self) {
        let master = self.gain.lock().effective();
        for slot in self.pools.lock().values_mut().flatten() {
            slot.element.set_gain(slot.volume * master);
        }
    }
}

impl PlaybackStrategy for ElementStrategy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self, capabilities: &CapabilitySnapshot) -> bool {
        capabilities.supports_basic_output && capabilities.autoplay_policy != AutoplayPolicy::Blocked
    }

    fn initialize(&self, capabilities: &CapabilitySnapshot) -> Result<()> {
        if !self.is_available(capabilities) {
            return Err(Error::Unsupported("basic output unavailable".into()));
        }
        self.backend.open()?;
        *self.suspended.lock() = capabilities.autoplay_policy == AutoplayPolicy::RequiresGesture;
        *self.lifecycle.lock() = Lifecycle::Ready;
        info!("Element strategy ready, {} players per sound", self.pool_size);
        Ok(())
    }

    fn self_test(&self) -> Result<()> {
        self.ensure_ready()?;
        if self.backend.is_open() {
            Ok(())
        } else {
            Err(Error::AudioOutput("element output closed".into()))
        }
    }

    fn play_sound(&self, key: SoundKey, options: &PlayOptions) -> Result<ActiveSoundHandle> {
        self.ensure_ready()?;
        if *self.suspended.lock() {
            return Err(Error::PermissionPending);
        }

        let data = self
            .sources
            .read()
            .get(&key)
            .cloned()
            .ok_or(Error::NotLoaded(key))?;

        let master = self.gain.lock().effective();
        let volume = options.clamped_volume();

        let mut pools = self.pools.lock();
        let pool = pools.entry(key).or_default();

        let index = match pool.iter().position(|slot| slot.element.is_idle()) {
            Some(index) => index,
            None if pool.len() < self.pool_size => {
                let element = self.backend.create_element(key, &data)?;
                pool.push(Slot { element, volume });
                pool.len() - 1
            }
            None => return Err(Error::InstanceExhausted(key)),
        };

        let slot = &mut pool[index];
        slot.volume = volume;
        slot.element
            .start(volume * master, options.looped, options.clamped_rate())?;

        debug!("Playing {key} on element {index}");
        Ok(ActiveSoundHandle::new(key, NAME))
    }

    fn stop_sound(&self, key: SoundKey) {
        if let Some(pool) = self.pools.lock().get_mut(&key) {
            for slot in pool {
                slot.element.stop();
            }
        }
    }

    fn stop_all_sounds(&self) {
        for slot in self.pools.lock().values_mut().flatten() {
            slot.element.stop();
        }
    }

    fn load_sound(&self, key: SoundKey, data: &Bytes) -> Result<u64> {
        if *self.lifecycle.lock() == Lifecycle::Disposed {
            return Err(Error::Disposed(NAME));
        }

        let element = self.backend.create_element(key, data)?;
        self.sources.write().insert(key, data.clone());

        let mut pools = self.pools.lock();
        let pool = pools.entry(key).or_default();
        for slot in pool.iter_mut() {
            slot.element.stop();
        }
        pool.clear();
        pool.push(Slot {
            element,
            volume: 1.0,
        });

        Ok(data.len() as u64)
    }

    fn set_volume(&self, volume: f32) {
        self.gain.lock().volume = volume.clamp(0.0, 1.0);
        self.apply_gain();
    }

    fn set_muted(&self, muted: bool) {
        self.gain.lock().muted = muted;
        self.apply_gain();
    }

    fn state(&self) -> StrategyState {
        let mut loaded_sounds: Vec<SoundKey> = self.sources.read().keys().copied().collect();
        loaded_sounds.sort();
        let active_count = self
            .pools
            .lock()
            .values()
            .flatten()
            .filter(|slot| !slot.element.is_idle())
            .count();
        let gain = *self.gain.lock();

        StrategyState {
            initialized: *self.lifecycle.lock() == Lifecycle::Ready,
            suspended: *self.suspended.lock(),
            loaded_sounds,
            active_count,
            master_volume: gain.volume,
            is_muted: gain.muted,
        }
    }

    fn resume(&self) -> Result<()> {
        self.ensure_ready()?;
        *self.suspended.lock() = false;
        Ok(())
    }

    fn dispose(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if *lifecycle == Lifecycle::Disposed {
            return;
        }
        self.stop_all_sounds();
        self.pools.lock().clear();
        self.sources.write().clear();
        self.backend.close();
        *lifecycle = Lifecycle::Disposed;
        warn!("Element strategy disposed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct FakeBackend {
        open: AtomicBool,
        created: Arc<AtomicUsize>,
        gains: Arc<Mutex<Vec<f32>>>,
    }

    struct FakeElement {
        playing: bool,
        gains: Arc<Mutex<Vec<f32>>>,
    }

    impl PlaybackElement for FakeElement {
        fn start(&mut self, gain: f32, _looped: bool, _rate: f32) -> Result<()> {
            self.playing = true;
            self.gains.lock().push(gain);
            Ok(())
        }

        fn stop(&mut self) {
            self.playing = false;
        }

        fn is_idle(&self) -> bool {
            !self.playing
        }

        fn set_gain(&mut self, gain: f32) {
            if self.playing {
                self.gains.lock().push(gain);
            }
        }
    }

    impl ElementBackend for FakeBackend {
        fn open(&self) -> Result<()> {
            self.open.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn create_element(&self, _key: SoundKey, data: &Bytes) -> Result<Box<dyn PlaybackElement>> {
            if data.is_empty() {
                return Err(Error::AudioDecode("empty asset".into()));
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeElement {
                playing: false,
                gains: self.gains.clone(),
            }))
        }

        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    fn caps() -> CapabilitySnapshot {
        CapabilitySnapshot {
            supports_high_fidelity_output: false,
            supports_basic_output: true,
            supported_codecs: std::collections::BTreeSet::new(),
            autoplay_policy: AutoplayPolicy::Allowed,
        }
    }

    fn ready(pool_size: usize) -> (ElementStrategy, Arc<AtomicUsize>, Arc<Mutex<Vec<f32>>>) {
        let backend = FakeBackend::default();
        let created = backend.created.clone();
        let gains = backend.gains.clone();
        let strategy = ElementStrategy::new(Box::new(backend), pool_size);
        strategy.initialize(&caps()).unwrap();
        strategy
            .load_sound(SoundKey::PieceMove, &Bytes::from_static(b"riff"))
            .unwrap();
        (strategy, created, gains)
    }

    #[test]
    fn test_pool_size_is_capped() {
        let strategy = ElementStrategy::new(Box::new(FakeBackend::default()), 10);
        assert_eq!(strategy.pool_size(), MAX_ELEMENT_POOL);
        let strategy = ElementStrategy::new(Box::new(FakeBackend::default()), 0);
        assert_eq!(strategy.pool_size(), 1);
    }

    #[test]
    fn test_pool_exhaustion() {
        let (strategy, created, _) = ready(3);
        for _ in 0..3 {
            strategy
                .play_sound(SoundKey::PieceMove, &PlayOptions::default())
                .unwrap();
        }
        assert_eq!(created.load(Ordering::SeqCst), 3);

        let err = strategy
            .play_sound(SoundKey::PieceMove, &PlayOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::InstanceExhausted(SoundKey::PieceMove)));
        assert_eq!(strategy.state().active_count, 3);
    }

    #[test]
    fn test_stopped_elements_are_reused() {
        let (strategy, created, _) = ready(2);
        strategy
            .play_sound(SoundKey::PieceMove, &PlayOptions::default())
            .unwrap();
        strategy.stop_sound(SoundKey::PieceMove);
        strategy
            .play_sound(SoundKey::PieceMove, &PlayOptions::default())
            .unwrap();

        assert_eq!(created.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gain_combines_instance_and_master() {
        let (strategy, _, gains) = ready(3);
        strategy.set_volume(0.5);
        strategy
            .play_sound(SoundKey::PieceMove, &PlayOptions::default().with_volume(0.5))
            .unwrap();
        strategy.set_muted(true);

        let gains = gains.lock();
        assert!((gains[0] - 0.25).abs() < f32::EPSILON);
        assert!(gains[1].abs() < f32::EPSILON);
    }

    #[test]
    fn test_undecodable_asset_fails_to_load() {
        let (strategy, _, _) = ready(3);
        let err = strategy
            .load_sound(SoundKey::Tetris, &Bytes::new())
            .unwrap_err();
        assert!(matches!(err, Error::AudioDecode(_)));
        assert!(!strategy.state().loaded_sounds.contains(&SoundKey::Tetris));
    }

    #[test]
    fn test_gesture_gate() {
        let strategy = ElementStrategy::new(Box::new(FakeBackend::default()), 3);
        let mut gated = caps();
        gated.autoplay_policy = AutoplayPolicy::RequiresGesture;
        strategy.initialize(&gated).unwrap();
        strategy
            .load_sound(SoundKey::LevelUp, &Bytes::from_static(b"riff"))
            .unwrap();

        assert!(matches!(
            strategy.play_sound(SoundKey::LevelUp, &PlayOptions::default()),
            Err(Error::PermissionPending)
        ));
        strategy.resume().unwrap();
        strategy
            .play_sound(SoundKey::LevelUp, &PlayOptions::default())
            .unwrap();
    }

    #[test]
    fn test_dispose_closes_backend() {
        let (strategy, _, _) = ready(3);
        strategy.dispose();
        strategy.dispose();
        assert!(strategy.self_test().is_err());
        assert!(!strategy.state().initialized);
    }
}
