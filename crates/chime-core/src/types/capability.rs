//! Runtime capability snapshot.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Whether audio output may start without a user gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AutoplayPolicy {
    #[default]
    Allowed,
    RequiresGesture,
    Blocked,
}

/// One-time probe result describing what the runtime supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapabilitySnapshot {
    pub supports_high_fidelity_output: bool,
    pub supports_basic_output: bool,
    pub supported_codecs: BTreeSet<String>,
    pub autoplay_policy: AutoplayPolicy,
}

impl CapabilitySnapshot {
    /// A snapshot for a runtime with no usable audio at all.
    pub fn none() -> Self {
        Self {
            autoplay_policy: AutoplayPolicy::Blocked,
            ..Self::default()
        }
    }

    pub fn supports_codec(&self, codec: &str) -> bool {
        self.supported_codecs.contains(codec)
    }

    /// True if any output path exists and is not permanently blocked.
    pub fn has_audio(&self) -> bool {
        (self.supports_high_fidelity_output || self.supports_basic_output)
            && self.autoplay_policy != AutoplayPolicy::Blocked
    }
}
