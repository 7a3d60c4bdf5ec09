//! sound - Deferred sound handles
//!
//! A [`DeferredSound`] can be played, stopped and adjusted as soon as it is
//! created. The desired state is buffered until the platform handle arrives
//! from the loader, then replayed onto it.

pub mod backend;
pub mod callback;
mod deferred;
#[cfg(test)]
pub(crate) mod mock;

pub use backend::SoundBackend;
pub use callback::{SoundCallback, from_fn};
pub use deferred::{DeferredSound, SoundState};

/// Caller-facing playback controls.
pub trait Sound {
    /// Prime the platform for low-latency playback. False if not loaded yet
    /// or the platform has nothing to prepare.
    fn prepare(&mut self) -> bool;

    fn is_playing(&self) -> bool;

    /// Request playback. Returns true only if a loaded handle actually
    /// started; otherwise playback starts once loading completes.
    fn play(&mut self) -> bool;

    fn stop(&mut self);

    fn set_looping(&mut self, looping: bool);

    /// Current volume in `[0, 1]`.
    fn volume(&self) -> f32;

    /// Set the volume, clamped to `[0, 1]`.
    fn set_volume(&mut self, volume: f32);

    /// Free the platform handle. Calling it again, or before loading
    /// completed, does nothing.
    fn release(&mut self);
}
