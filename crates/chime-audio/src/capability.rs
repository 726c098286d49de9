//! One-time runtime capability probing.

use std::collections::BTreeSet;

use chime_core::{AutoplayPolicy, CapabilitySnapshot, Error, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::decode::{self, CANDIDATE_CODECS};
use crate::output;

/// Low-level probes the detector runs. Every probe must be cheap and leave
/// nothing running behind it.
pub trait RuntimeProbe: Send + Sync {
    /// Construct and immediately release a high-fidelity output context.
    fn high_fidelity_output(&self) -> Result<()>;

    /// Check that a basic output path exists.
    fn basic_output(&self) -> Result<()>;

    fn codec_supported(&self, codec: &str) -> bool;

    /// Start and release a muted trial playback.
    ///
    /// `Err(Error::PermissionPending)` means output needs a user gesture; any
    /// other error means output is blocked.
    fn trial_playback(&self) -> Result<()>;
}

/// Probes the default cpal host and the linked symphonia codecs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProbe;

impl RuntimeProbe for SystemProbe {
    fn high_fidelity_output(&self) -> Result<()> {
        output::probe_default_stream(false)
    }

    fn basic_output(&self) -> Result<()> {
        if output::has_output_device() {
            Ok(())
        } else {
            Err(Error::Unsupported("No output devices".to_string()))
        }
    }

    fn codec_supported(&self, codec: &str) -> bool {
        decode::codec_supported(codec)
    }

    fn trial_playback(&self) -> Result<()> {
        output::probe_default_stream(true)
    }
}

/// Produces and caches the session's capability snapshot.
pub struct CapabilityDetector {
    probe: Box<dyn RuntimeProbe>,
    policy_override: Option<AutoplayPolicy>,
    cached: Mutex<Option<CapabilitySnapshot>>,
}

impl CapabilityDetector {
    pub fn new(probe: Box<dyn RuntimeProbe>) -> Self {
        Self {
            probe,
            policy_override: None,
            cached: Mutex::new(None),
        }
    }

    /// Detector backed by the real audio host.
    pub fn system() -> Self {
        Self::new(Box::new(SystemProbe))
    }

    /// Force the autoplay classification instead of probing it.
    #[must_use]
    pub fn with_policy_override(mut self, policy: Option<AutoplayPolicy>) -> Self {
        self.policy_override = policy;
        self
    }

    /// Return the cached snapshot, probing on first use. Never fails.
    pub fn detect(&self) -> CapabilitySnapshot {
        let mut cached = self.cached.lock();
        if let Some(snapshot) = cached.as_ref() {
            return snapshot.clone();
        }

        let snapshot = self.probe_all();
        info!(
            "Audio capabilities: high_fidelity={}, basic={}, codecs={:?}, autoplay={:?}",
            snapshot.supports_high_fidelity_output,
            snapshot.supports_basic_output,
            snapshot.supported_codecs,
            snapshot.autoplay_policy
        );
        *cached = Some(snapshot.clone());
        snapshot
    }

    /// Drop the cached snapshot so the next `detect` probes again.
    pub fn reset(&self) {
        self.cached.lock().take();
    }

    fn probe_all(&self) -> CapabilitySnapshot {
        let supports_high_fidelity_output = match self.probe.high_fidelity_output() {
            Ok(()) => true,
            Err(e) => {
                debug!("High-fidelity output unsupported: {e}");
                false
            }
        };

        let supports_basic_output = match self.probe.basic_output() {
            Ok(()) => true,
            Err(e) => {
                debug!("Basic output unsupported: {e}");
                false
            }
        };

        let supported_codecs: BTreeSet<String> = CANDIDATE_CODECS
            .iter()
            .filter(|codec| self.probe.codec_supported(codec))
            .map(|codec| (*codec).to_string())
            .collect();

        let autoplay_policy = self.policy_override.unwrap_or_else(|| {
            if !supports_high_fidelity_output && !supports_basic_output {
                return AutoplayPolicy::Blocked;
            }
            match self.probe.trial_playback() {
                Ok(()) => AutoplayPolicy::Allowed,
                Err(Error::PermissionPending) => AutoplayPolicy::RequiresGesture,
                Err(e) => {
                    debug!("Trial playback failed: {e}");
                    AutoplayPolicy::Blocked
                }
            }
        });

        CapabilitySnapshot {
            supports_high_fidelity_output,
            supports_basic_output,
            supported_codecs,
            autoplay_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeProbe {
        high_fidelity: bool,
        basic: bool,
        trial: fn() -> Result<()>,
        calls: Arc<AtomicUsize>,
    }

    impl RuntimeProbe for FakeProbe {
        fn high_fidelity_output(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.high_fidelity {
                Ok(())
            } else {
                Err(Error::Unsupported("no context".into()))
            }
        }

        fn basic_output(&self) -> Result<()> {
            if self.basic {
                Ok(())
            } else {
                Err(Error::Unsupported("no element".into()))
            }
        }

        fn codec_supported(&self, codec: &str) -> bool {
            matches!(codec, "wav" | "ogg")
        }

        fn trial_playback(&self) -> Result<()> {
            (self.trial)()
        }
    }

    fn detector(high_fidelity: bool, basic: bool, trial: fn() -> Result<()>) -> (CapabilityDetector, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe = FakeProbe {
            high_fidelity,
            basic,
            trial,
            calls: calls.clone(),
        };
        (CapabilityDetector::new(Box::new(probe)), calls)
    }

    #[test]
    fn test_detect_is_cached_until_reset() {
        let (detector, calls) = detector(true, true, || Ok(()));
        let first = detector.detect();
        let second = detector.detect();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        detector.reset();
        detector.detect();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_probe_failures_become_unsupported() {
        let (detector, _) = detector(false, true, || Ok(()));
        let caps = detector.detect();
        assert!(!caps.supports_high_fidelity_output);
        assert!(caps.supports_basic_output);
        assert!(caps.supports_codec("wav"));
        assert!(!caps.supports_codec("mp3"));
    }

    #[test]
    fn test_autoplay_classification() {
        let (gesture, _) = detector(true, true, || Err(Error::PermissionPending));
        assert_eq!(gesture.detect().autoplay_policy, AutoplayPolicy::RequiresGesture);

        let (blocked, _) = detector(true, true, || Err(Error::AudioOutput("denied".into())));
        assert_eq!(blocked.detect().autoplay_policy, AutoplayPolicy::Blocked);

        let (silent_box, _) = detector(false, false, || Ok(()));
        assert_eq!(silent_box.detect().autoplay_policy, AutoplayPolicy::Blocked);
    }

    #[test]
    fn test_policy_override_wins() {
        let (detector, _) = detector(true, true, || Ok(()));
        let detector = detector.with_policy_override(Some(AutoplayPolicy::RequiresGesture));
        assert_eq!(
            detector.detect().autoplay_policy,
            AutoplayPolicy::RequiresGesture
        );
    }
}
