//! # chime-audio
//!
//! Multi-strategy sound effect playback for chime.
//!
//! Features:
//! - Capability probing with autoplay classification
//! - Buffered cpal mixer with overlapping voices and gain ramps
//! - Element pools on rodio, visual and silent fallbacks
//! - Degrade-on-failure orchestration with a shared volume controller

mod cache;
pub mod capability;
pub mod decode;
pub mod mixer;
pub mod orchestrator;
pub mod output;
pub mod resample;
pub mod strategy;
pub mod volume;

pub use capability::{CapabilityDetector, RuntimeProbe, SystemProbe};
pub use orchestrator::{StrategyOrchestrator, DEFAULT_SELF_TEST_DEADLINE};
pub use output::{CpalOutput, ManualOutput, OutputInfo, OutputTarget};
pub use strategy::{
    priority, BufferedStrategy, ElementBackend, ElementStrategy, PlaybackElement,
    PlaybackStrategy, PreloadReport, RodioBackend, SilentStrategy, VisualStrategy,
};
pub use volume::VolumeController;
