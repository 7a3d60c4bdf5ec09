use std::fmt;
use std::mem;

use uuid::Uuid;

use super::Sound;
use super::backend::SoundBackend;
use super::callback::{self, BoxedCallback, SoundCallback};
use crate::error::LoadError;

/// Where a [`DeferredSound`] is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundState {
    /// Waiting for the loader to deliver a handle.
    Loading,
    /// A platform handle is owned and receives every call.
    Ready,
    /// Loading failed. Terminal.
    Failed,
    /// The handle was released. Terminal.
    Released,
}

enum Slot<B: SoundBackend> {
    Loading(Vec<BoxedCallback<B>>),
    Ready(B),
    Failed(LoadError),
    Released,
}

impl<B: SoundBackend> Slot<B> {
    fn state(&self) -> SoundState {
        match self {
            Slot::Loading(_) => SoundState::Loading,
            Slot::Ready(_) => SoundState::Ready,
            Slot::Failed(_) => SoundState::Failed,
            Slot::Released => SoundState::Released,
        }
    }
}

/// A sound that accepts playback commands before its platform handle exists.
///
/// Play/stop intent, looping and volume are buffered and replayed onto the
/// handle when [`notify_loaded`](Self::notify_loaded) delivers it. Observers
/// registered with [`add_callback`](Self::add_callback) hear about the load
/// outcome exactly once.
///
/// Dropping the sound releases its handle. Code that needs the platform
/// resource freed at a precise moment should call [`Sound::release`] itself.
pub struct DeferredSound<B: SoundBackend> {
    id: Uuid,
    label: String,
    slot: Slot<B>,
    playing: bool,
    looping: bool,
    volume: f32,
}

impl<B: SoundBackend> DeferredSound<B> {
    /// Create a sound in the loading state. `label` names the clip in logs.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            slot: Slot::Loading(Vec::new()),
            playing: false,
            looping: false,
            volume: 1.0,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SoundState {
        self.slot.state()
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    /// The load failure, if loading failed.
    pub fn error(&self) -> Option<&LoadError> {
        match &self.slot {
            Slot::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Take ownership of the loaded platform handle and replay buffered state
    /// onto it: volume, looping, then playback if it was requested.
    ///
    /// Only the first resolution counts. A handle delivered after the sound
    /// already resolved is released and dropped.
    pub fn notify_loaded(&mut self, mut handle: B) {
        let callbacks = match &mut self.slot {
            Slot::Loading(callbacks) => mem::take(callbacks),
            other => {
                log::warn!(
                    "Sound {} ({}) already {:?}, ignoring late handle",
                    self.id,
                    self.label,
                    other.state()
                );
                handle.release();
                return;
            }
        };

        handle.set_volume(self.volume);
        handle.set_looping(self.looping);
        if self.playing && !handle.play() {
            log::warn!("Sound {} ({}) refused deferred play", self.id, self.label);
        }
        self.slot = Slot::Ready(handle);
        log::debug!("Sound {} ({}) ready", self.id, self.label);

        callback::dispatch_success(callbacks, self);
    }

    /// Record a load failure and pass it to every queued observer.
    ///
    /// Ignored if the sound already resolved.
    pub fn notify_load_failed(&mut self, cause: impl Into<LoadError>) {
        let cause = cause.into();
        let callbacks = match &mut self.slot {
            Slot::Loading(callbacks) => mem::take(callbacks),
            other => {
                log::warn!(
                    "Sound {} ({}) already {:?}, ignoring late failure: {}",
                    self.id,
                    self.label,
                    other.state(),
                    cause
                );
                return;
            }
        };

        log::warn!("Sound {} ({}): {}", self.id, self.label, cause);
        self.slot = Slot::Failed(cause);
        if let Slot::Failed(err) = &self.slot {
            callback::dispatch_failure(callbacks, err);
        }
    }

    /// Register an observer for the load outcome.
    ///
    /// If the outcome is already known the observer is notified before this
    /// returns; otherwise it is queued behind earlier observers.
    pub fn add_callback<C>(&mut self, callback: C)
    where
        C: SoundCallback<B> + 'static,
    {
        let callback: BoxedCallback<B> = Box::new(callback);
        if let Slot::Loading(callbacks) = &mut self.slot {
            callbacks.push(callback);
            return;
        }
        match &self.slot {
            Slot::Failed(err) => callback.on_failure(err),
            // a released sound did load successfully
            _ => callback.on_success(self),
        }
    }

    fn backend(&mut self) -> Option<&mut B> {
        match &mut self.slot {
            Slot::Ready(handle) => Some(handle),
            _ => None,
        }
    }
}

impl<B: SoundBackend> Sound for DeferredSound<B> {
    fn prepare(&mut self) -> bool {
        self.backend().is_some_and(|b| b.prepare())
    }

    fn is_playing(&self) -> bool {
        match &self.slot {
            Slot::Ready(handle) => handle.is_playing().unwrap_or(self.playing),
            _ => self.playing,
        }
    }

    fn play(&mut self) -> bool {
        self.playing = true;
        self.backend().is_some_and(|b| b.play())
    }

    fn stop(&mut self) {
        self.playing = false;
        if let Some(b) = self.backend() {
            b.stop();
        }
    }

    fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
        if let Some(b) = self.backend() {
            b.set_looping(looping);
        }
    }

    fn volume(&self) -> f32 {
        self.volume
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = clamp_volume(volume);
        let volume = self.volume;
        if let Some(b) = self.backend() {
            b.set_volume(volume);
        }
    }

    fn release(&mut self) {
        if !matches!(self.slot, Slot::Ready(_)) {
            return;
        }
        if let Slot::Ready(mut handle) = mem::replace(&mut self.slot, Slot::Released) {
            handle.release();
            log::debug!("Sound {} ({}) released", self.id, self.label);
        }
    }
}

impl<B: SoundBackend> Drop for DeferredSound<B> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<B: SoundBackend> fmt::Debug for DeferredSound<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredSound")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("state", &self.state())
            .field("playing", &self.playing)
            .field("looping", &self.looping)
            .field("volume", &self.volume)
            .finish()
    }
}

fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
