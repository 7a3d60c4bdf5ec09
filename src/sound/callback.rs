//! Load-completion observers.

use super::backend::SoundBackend;
use super::deferred::DeferredSound;
use crate::error::LoadError;

/// Observer notified once when a sound finishes loading.
///
/// Both methods consume the observer, so it can be told about the outcome
/// at most once.
pub trait SoundCallback<B: SoundBackend> {
    fn on_success(self: Box<Self>, sound: &DeferredSound<B>);
    fn on_failure(self: Box<Self>, error: &LoadError);
}

/// Adapter turning a closure into a [`SoundCallback`].
pub struct FnCallback<F>(F);

/// Wrap a closure receiving the load outcome as an observer.
pub fn from_fn<B, F>(f: F) -> FnCallback<F>
where
    B: SoundBackend,
    F: FnOnce(Result<&DeferredSound<B>, &LoadError>),
{
    FnCallback(f)
}

impl<B, F> SoundCallback<B> for FnCallback<F>
where
    B: SoundBackend,
    F: FnOnce(Result<&DeferredSound<B>, &LoadError>),
{
    fn on_success(self: Box<Self>, sound: &DeferredSound<B>) {
        (self.0)(Ok(sound))
    }

    fn on_failure(self: Box<Self>, error: &LoadError) {
        (self.0)(Err(error))
    }
}

pub(crate) type BoxedCallback<B> = Box<dyn SoundCallback<B>>;

/// Notify every observer of success in registration order.
pub(crate) fn dispatch_success<B: SoundBackend>(
    callbacks: Vec<BoxedCallback<B>>,
    sound: &DeferredSound<B>,
) {
    for cb in callbacks {
        cb.on_success(sound);
    }
}

/// Notify every observer of failure in registration order.
pub(crate) fn dispatch_failure<B: SoundBackend>(
    callbacks: Vec<BoxedCallback<B>>,
    error: &LoadError,
) {
    for cb in callbacks {
        cb.on_failure(error);
    }
}
