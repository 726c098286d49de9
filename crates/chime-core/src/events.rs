//! Observable channel for engine events and swallowed errors.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind};
use crate::types::{Indicator, PreloadProgress, SoundKey};

/// A normalized failure with the context it happened in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub component: &'static str,
    pub action: &'static str,
    pub key: Option<SoundKey>,
    pub message: String,
}

impl ErrorReport {
    pub fn new(
        error: &Error,
        component: &'static str,
        action: &'static str,
        key: Option<SoundKey>,
    ) -> Self {
        Self {
            kind: error.kind(),
            component,
            action,
            key,
            message: error.to_string(),
        }
    }
}

/// Events emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// An error was swallowed at a non-throwing boundary.
    Error(ErrorReport),
    /// The active strategy changed.
    StrategyChanged {
        from: Option<String>,
        to: String,
        reason: String,
    },
    /// Output is waiting for a user gesture ("tap to enable sound").
    UserInteractionRequired,
    /// A preload run finished.
    PreloadFinished(PreloadProgress),
    /// The visual strategy wants this indicator drawn.
    Indicator(Indicator),
}

/// Cloneable sending side of the event channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<EngineEvent>,
    interaction_prompted: Arc<AtomicBool>,
}

impl EventSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, Receiver<EngineEvent>) {
        let (tx, rx) = unbounded();
        (
            Self {
                tx,
                interaction_prompted: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    /// A sink whose events are dropped.
    pub fn detached() -> Self {
        Self::new().0
    }

    pub fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine.
        let _ = self.tx.send(event);
    }

    /// Log and publish a swallowed error.
    pub fn report(
        &self,
        error: &Error,
        component: &'static str,
        action: &'static str,
        key: Option<SoundKey>,
    ) {
        let report = ErrorReport::new(error, component, action, key);
        match report.kind {
            ErrorKind::InstanceExhausted | ErrorKind::PermissionPending => {
                debug!("{component}::{action} failed for {key:?}: {error}");
            }
            _ => warn!("{component}::{action} failed for {key:?}: {error}"),
        }
        self.emit(EngineEvent::Error(report));
    }

    /// Emit `UserInteractionRequired` the first time only.
    pub fn prompt_user_interaction(&self) -> bool {
        let first = !self.interaction_prompted.swap(true, Ordering::AcqRel);
        if first {
            self.emit(EngineEvent::UserInteractionRequired);
        }
        first
    }

    /// Allow the interaction prompt to fire again.
    pub fn rearm_interaction_prompt(&self) {
        self.interaction_prompted.store(false, Ordering::Release);
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::detached()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_carries_context() {
        let (sink, rx) = EventSink::new();
        sink.report(
            &Error::NotLoaded(SoundKey::LineClear),
            "buffered",
            "play_sound",
            Some(SoundKey::LineClear),
        );

        match rx.try_recv().unwrap() {
            EngineEvent::Error(report) => {
                assert_eq!(report.kind, ErrorKind::Unknown);
                assert_eq!(report.component, "buffered");
                assert_eq!(report.action, "play_sound");
                assert_eq!(report.key, Some(SoundKey::LineClear));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_interaction_prompt_fires_once() {
        let (sink, rx) = EventSink::new();
        assert!(sink.prompt_user_interaction());
        assert!(!sink.prompt_user_interaction());
        assert_eq!(rx.try_iter().count(), 1);

        sink.rearm_interaction_prompt();
        assert!(sink.prompt_user_interaction());
    }

    #[test]
    fn test_detached_sink_never_fails() {
        let sink = EventSink::detached();
        sink.emit(EngineEvent::UserInteractionRequired);
    }
}
