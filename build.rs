use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    sound: Sound,
    playback: Playback,
}

#[derive(Deserialize)]
struct Sound {
    initial_volume: f32,
    asset_root: String,
    load_timeout_ms: u64,
    max_clip_bytes: usize,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    sample_rate: u32,
    channels: u32,
    period_size: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 加载配置
    println!("cargo:rustc-env=SOUND_INITIAL_VOLUME={}", config.sound.initial_volume);
    println!("cargo:rustc-env=SOUND_ASSET_ROOT={}", config.sound.asset_root);
    println!("cargo:rustc-env=SOUND_LOAD_TIMEOUT_MS={}", config.sound.load_timeout_ms);
    println!("cargo:rustc-env=SOUND_MAX_CLIP_BYTES={}", config.sound.max_clip_bytes);

    // 播放设备配置
    println!("cargo:rustc-env=SOUND_PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=SOUND_PLAYBACK_SAMPLE_RATE={}", config.playback.sample_rate);
    println!("cargo:rustc-env=SOUND_PLAYBACK_CHANNELS={}", config.playback.channels);
    println!("cargo:rustc-env=SOUND_PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);
}
