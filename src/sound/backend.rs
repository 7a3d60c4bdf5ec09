//! The contract a platform audio handle fulfils once a clip has loaded.

/// A loaded, platform-specific sound handle.
///
/// Methods are only ever called while the handle is owned by a
/// [`DeferredSound`](super::DeferredSound), i.e. between a successful load
/// and [`release`](SoundBackend::release). After `release` the handle is
/// dropped and never touched again.
pub trait SoundBackend {
    /// Prime the platform buffers so a later `play` starts with low latency.
    ///
    /// Backends that have nothing to prepare keep the default.
    fn prepare(&mut self) -> bool {
        false
    }

    /// Live playing status, or `None` if the platform cannot report it.
    fn is_playing(&self) -> Option<bool> {
        None
    }

    /// Start playback. Returns false if the platform refused.
    fn play(&mut self) -> bool;

    fn stop(&mut self);

    fn set_looping(&mut self, looping: bool);

    /// `volume` is already clamped to `[0, 1]`.
    fn set_volume(&mut self, volume: f32);

    /// Free platform resources.
    fn release(&mut self);
}
