//! ALSA PCM device wrapper for clip playback.

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result, bail};

use super::clip::PlaybackParams;

/// Parameters negotiated with the ALSA hardware.
#[derive(Debug, Clone)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Period to request from the driver; `None` leaves the choice to ALSA.
fn requested_period(params: &PlaybackParams) -> Option<Frames> {
    (params.period_size > 0).then(|| params.period_size as Frames)
}

/// Open `params.device` for S16LE interleaved playback.
///
/// Clips are written without resampling, so a rate or channel count the
/// hardware would not accept is logged: the clip will play at the wrong
/// speed or layout.
pub fn open_playback(params: &PlaybackParams) -> Result<(PCM, AlsaParams)> {
    if params.channels == 0 {
        bail!("Playback on '{}' needs at least one channel", params.device);
    }
    if params.sample_rate == 0 {
        bail!("Playback on '{}' needs a non-zero sample rate", params.device);
    }

    let pcm = PCM::new(&params.device, Direction::Playback, false)
        .with_context(|| format!("Failed to open PCM device '{}' for playback", params.device))?;

    {
        let hwp = HwParams::any(&pcm).context("Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(params.channels)
            .with_context(|| format!("Device '{}' rejected {} channels", params.device, params.channels))?;
        hwp.set_rate_near(params.sample_rate, ValueOr::Nearest)?;
        if let Some(period) = requested_period(params) {
            hwp.set_period_size_near(period, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let negotiated = {
        let hwp = pcm.hw_params_current()?;
        AlsaParams {
            sample_rate: hwp.get_rate()?,
            channels: hwp.get_channels()?,
            period_size: hwp.get_period_size()? as usize,
        }
    };

    if negotiated.sample_rate != params.sample_rate {
        log::warn!(
            "Device '{}' runs at {}Hz, clips are written as {}Hz",
            params.device,
            negotiated.sample_rate,
            params.sample_rate
        );
    }
    log::info!(
        "ALSA playback on '{}': rate={}, channels={}, period_size={}",
        params.device,
        negotiated.sample_rate,
        negotiated.channels,
        negotiated.period_size,
    );

    Ok((pcm, negotiated))
}
