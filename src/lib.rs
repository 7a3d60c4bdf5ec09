//! deferred_sound - Sounds you can drive before they finish loading
//!
//! A [`DeferredSound`] buffers play/stop intent, looping and volume until the
//! platform handle arrives, then replays that state onto it. The
//! [`loader`] module fetches clips on tokio tasks and hands the finished handle
//! back through a [`PendingLoad`] ticket polled on the owner's tick.

#[cfg(feature = "alsa")]
pub mod audio;
pub mod config;
pub mod error;
pub mod loader;
pub mod sound;

pub use config::SoundConfig;
pub use error::LoadError;
pub use loader::{BackendFactory, ClipFetcher, ClipSource, DefaultFetcher, PendingLoad, SoundLoader};
pub use sound::{DeferredSound, Sound, SoundBackend, SoundCallback, SoundState};
