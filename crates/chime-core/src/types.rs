//! Core domain types for chime.

pub mod capability;
pub mod indicator;
pub mod playback;
pub mod preload;
pub mod sound;
pub mod strategy;
pub mod volume;

pub use capability::{AutoplayPolicy, CapabilitySnapshot};
pub use indicator::Indicator;
pub use playback::{ActiveSoundHandle, PlayOptions, StrategyState};
pub use preload::{PreloadProfile, PreloadProgress, PreloadRecord, PreloadState};
pub use sound::SoundKey;
pub use strategy::{FallbackStatus, StrategyDescriptor};
pub use volume::VolumeState;
