use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SoundConfig {
    // 加载配置
    pub initial_volume: f32,
    pub asset_root: PathBuf,
    pub load_timeout_ms: u64,
    pub max_clip_bytes: usize,

    // 播放设备配置
    pub playback_device: String,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    /// 0 = let the device decide
    pub playback_period_size: usize,
}

impl SoundConfig {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            initial_volume: env!("SOUND_INITIAL_VOLUME").parse()
                .map_err(|_| "Failed to parse SOUND_INITIAL_VOLUME")?,
            asset_root: PathBuf::from(env!("SOUND_ASSET_ROOT")),
            load_timeout_ms: env!("SOUND_LOAD_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse SOUND_LOAD_TIMEOUT_MS")?,
            max_clip_bytes: env!("SOUND_MAX_CLIP_BYTES").parse()
                .map_err(|_| "Failed to parse SOUND_MAX_CLIP_BYTES")?,

            playback_device: env!("SOUND_PLAYBACK_DEVICE").to_string(),
            playback_sample_rate: env!("SOUND_PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse SOUND_PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("SOUND_PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse SOUND_PLAYBACK_CHANNELS")?,
            playback_period_size: env!("SOUND_PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse SOUND_PLAYBACK_PERIOD_SIZE")?,
        })
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create default SoundConfig from build-time environment variables")
    }
}
