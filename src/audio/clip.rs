//! One playback thread per loaded clip.
//!
//! Uses std::thread (NOT tokio tasks) so blocking ALSA writes never stall the
//! async loader.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use alsa::pcm::{IO, PCM};
use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;

use super::alsa_device;
use crate::config::SoundConfig;
use crate::loader::BackendFactory;
use crate::sound::SoundBackend;

/// Consecutive write failures tolerated before the rest of a chunk is dropped.
const MAX_RECOVERY_RETRIES: u32 = 3;

/// Requested device settings for clip playback.
#[derive(Debug, Clone)]
pub struct PlaybackParams {
    pub device: String,
    pub sample_rate: u32,
    pub channels: u32,
    /// 0 = let ALSA decide
    pub period_size: usize,
}

impl PlaybackParams {
    pub fn from_config(config: &SoundConfig) -> Self {
        Self {
            device: config.playback_device.clone(),
            sample_rate: config.playback_sample_rate,
            channels: config.playback_channels,
            period_size: config.playback_period_size,
        }
    }
}

enum Command {
    Play,
    Stop,
    SetLooping(bool),
    SetVolume(f32),
    Release,
}

/// A clip bound to an open ALSA playback device.
pub struct AlsaClip {
    tx: Sender<Command>,
    playing: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaClip {
    /// Open the device on a new thread and park it until the first `play`.
    ///
    /// Blocks until the device is open so that open failures are reported
    /// here rather than on the thread.
    pub fn spawn(params: PlaybackParams, samples: Vec<i16>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);
        let playing = Arc::new(AtomicBool::new(false));
        let alive = Arc::new(AtomicBool::new(true));

        let handle = {
            let playing = playing.clone();
            let alive = alive.clone();
            thread::Builder::new()
                .name("sound-play".into())
                .spawn(move || {
                    match alsa_device::open_playback(&params) {
                        Ok((pcm, negotiated)) => {
                            let _ = ready_tx.send(Ok(()));
                            let channels = negotiated.channels as usize;
                            let chunk = negotiated.period_size.max(1) * channels;
                            if let Err(e) = play_thread(&pcm, &samples, channels, chunk, &rx, &playing)
                            {
                                log::error!("Playback thread error: {}", e);
                            }
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(format!("{:#}", e)));
                        }
                    }
                    playing.store(false, Ordering::SeqCst);
                    alive.store(false, Ordering::SeqCst);
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                tx,
                playing,
                alive,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(anyhow!(e))
            }
            Err(_) => {
                let _ = handle.join();
                bail!("Playback thread exited before opening the device")
            }
        }
    }

    fn send(&self, cmd: Command) -> bool {
        self.tx.send(cmd).is_ok()
    }
}

impl SoundBackend for AlsaClip {
    fn prepare(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_playing(&self) -> Option<bool> {
        Some(self.playing.load(Ordering::SeqCst))
    }

    fn play(&mut self) -> bool {
        if !self.send(Command::Play) {
            return false;
        }
        self.playing.store(true, Ordering::SeqCst);
        true
    }

    fn stop(&mut self) {
        self.playing.store(false, Ordering::SeqCst);
        self.send(Command::Stop);
    }

    fn set_looping(&mut self, looping: bool) {
        self.send(Command::SetLooping(looping));
    }

    fn set_volume(&mut self, volume: f32) {
        self.send(Command::SetVolume(volume));
    }

    fn release(&mut self) {
        self.send(Command::Release);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Builds [`AlsaClip`]s from raw interleaved S16LE clip bytes.
#[derive(Debug, Clone)]
pub struct AlsaFactory {
    params: PlaybackParams,
}

impl AlsaFactory {
    pub fn new(config: &SoundConfig) -> Self {
        Self {
            params: PlaybackParams::from_config(config),
        }
    }
}

impl BackendFactory<AlsaClip> for AlsaFactory {
    fn create(&self, clip: Bytes) -> Result<AlsaClip> {
        let samples = s16le_frames(&clip, self.params.channels as usize)?;
        AlsaClip::spawn(self.params.clone(), samples)
    }
}

/// Interpret `clip` as interleaved S16LE, dropping any trailing partial frame.
fn s16le_frames(clip: &[u8], channels: usize) -> Result<Vec<i16>> {
    let frame_bytes = channels.max(1) * 2;
    let usable = clip.len() - clip.len() % frame_bytes;
    if usable == 0 {
        bail!(
            "Clip of {} bytes holds no complete {}-channel frame",
            clip.len(),
            channels
        );
    }
    Ok(clip[..usable]
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect())
}

fn scale(sample: i16, volume: f32) -> i16 {
    (sample as f32 * volume) as i16
}

fn play_thread(
    pcm: &PCM,
    samples: &[i16],
    channels: usize,
    chunk: usize,
    rx: &Receiver<Command>,
    playing: &AtomicBool,
) -> Result<()> {
    let io = pcm.io_i16()?;
    let mut pos = 0usize;
    let mut looping = false;
    let mut volume = 1.0f32;
    let mut scratch: Vec<i16> = Vec::with_capacity(chunk);

    loop {
        // Block while idle, only peek while writing
        let cmd = if playing.load(Ordering::SeqCst) {
            match rx.try_recv() {
                Ok(cmd) => Some(cmd),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        } else {
            match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            }
        };

        if let Some(cmd) = cmd {
            match cmd {
                Command::Play => {
                    playing.store(true, Ordering::SeqCst);
                }
                Command::Stop => {
                    playing.store(false, Ordering::SeqCst);
                    pos = 0;
                    pcm.drop().context("Failed to stop PCM playback")?;
                    pcm.prepare().context("Failed to re-arm PCM playback")?;
                }
                Command::SetLooping(l) => looping = l,
                Command::SetVolume(v) => volume = v,
                Command::Release => break,
            }
            continue;
        }

        let end = (pos + chunk).min(samples.len());
        scratch.clear();
        scratch.extend(samples[pos..end].iter().map(|s| scale(*s, volume)));
        write_frames(pcm, &io, &scratch, channels)?;
        pos = end;

        if pos >= samples.len() {
            pos = 0;
            if !looping {
                playing.store(false, Ordering::SeqCst);
                pcm.drain().context("Failed to drain PCM playback")?;
                pcm.prepare().context("Failed to re-arm PCM playback")?;
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

/// Write interleaved samples with a retry loop that handles short writes and
/// XRUN recovery.
fn write_frames(pcm: &PCM, io: &IO<i16>, data: &[i16], channels: usize) -> Result<()> {
    let total_frames = data.len() / channels;
    let mut frames_written = 0;
    let mut retry_count = 0u32;

    while frames_written < total_frames {
        let offset = frames_written * channels;
        match io.writei(&data[offset..]) {
            Ok(n) => {
                frames_written += n;
                retry_count = 0;
            }
            Err(e) => {
                log::warn!("ALSA XRUN or error: {}, recovering...", e);
                retry_count += 1;

                // 触发 ALSA 硬件恢复状态机
                pcm.prepare().context("Failed to recover PCM playback")?;

                // 熔断器：底层持续跟不上写入速度时，丢弃剩余帧防止死循环
                if retry_count >= MAX_RECOVERY_RETRIES {
                    log::error!(
                        "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                        retry_count,
                        total_frames - frames_written
                    );
                    break;
                }
            }
        }
    }
    Ok(())
}
