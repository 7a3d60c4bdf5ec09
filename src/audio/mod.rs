//! audio - ALSA playback backend
//!
//! Plays raw interleaved S16LE clips on a dedicated OS thread per sound.
//! Decoding compressed formats is left to whoever produces the clip bytes.

mod alsa_device;
mod clip;

pub use alsa_device::AlsaParams;
pub use clip::{AlsaClip, AlsaFactory, PlaybackParams};
