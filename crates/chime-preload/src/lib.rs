//! # chime-preload
//!
//! Prioritized asset preloading for chime.
//!
//! Sounds are fetched in gameplay-frequency order with staggered starts,
//! bounded retries with exponential backoff, a per-attempt timeout and a
//! memory budget, all selected by a preload profile.

pub mod fetch;
pub mod network;
pub mod preloader;
pub mod profile;

pub use fetch::{AssetFetcher, DefaultFetcher};
pub use network::{profile_for, ConnectionInfo, EffectiveType};
pub use preloader::{LoadTarget, Preloader};
pub use profile::{ProfileSettings, DEFAULT_SIZE_ESTIMATE};
