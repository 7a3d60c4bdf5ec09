use std::time::Duration;

use anyhow::{Context, Result, bail};
use deferred_sound::audio::{AlsaClip, AlsaFactory};
use deferred_sound::sound::from_fn;
use deferred_sound::{
    ClipSource, DeferredSound, LoadError, Sound, SoundConfig, SoundLoader, SoundState,
};
use tokio::signal;

const USAGE: &str = "usage: sound-play <path-or-url> [--loop] [--volume <0..1>]";

struct Args {
    source: String,
    looping: bool,
    volume: Option<f32>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut source = None;
    let mut looping = false;
    let mut volume = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--loop" => looping = true,
            "--volume" => {
                let v = args.next().context("--volume needs a value")?;
                volume = Some(v.parse().with_context(|| format!("Invalid volume '{}'", v))?);
            }
            _ if source.is_none() => source = Some(arg),
            other => bail!("Unexpected argument '{}'\n{}", other, USAGE),
        }
    }

    Ok(Args {
        source: source.context(USAGE)?,
        looping,
        volume,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    env_logger::init();

    let args = parse_args()?;

    // 加载配置
    let config = SoundConfig::new().unwrap_or_default();
    let factory = AlsaFactory::new(&config);
    let loader = SoundLoader::new(config, factory);

    let (mut sound, mut pending) = loader.load(ClipSource::parse(&args.source)?);
    if let Some(v) = args.volume {
        sound.set_volume(v);
    }
    sound.set_looping(args.looping);
    sound.add_callback(from_fn(
        |res: Result<&DeferredSound<AlsaClip>, &LoadError>| {
            // failures are returned from main
            if let Ok(s) = res {
                println!("Loaded {} (volume {:.2})", s.label(), s.volume());
            }
        },
    ));

    // 加载完成后自动开始播放
    sound.play();

    let mut tick = tokio::time::interval(Duration::from_millis(10));
    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            _ = tick.tick() => {
                if !pending.poll(&mut sound) {
                    continue;
                }
                if sound.state() == SoundState::Failed {
                    break;
                }
                if !sound.is_playing() {
                    println!("Playback finished");
                    break;
                }
            }
        }
    }

    sound.release();
    if let Some(e) = sound.error() {
        return Err(e.clone().into());
    }
    Ok(())
}
