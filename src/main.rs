use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{select, tick};
use log::{debug, info, warn};
use std::path::PathBuf;
use std::time::Duration;

mod core;
mod player;
mod renderer;

use crate::core::{PlaybackEvent, PlayerConfig};
use player::{AudioOutput, AudioSink, HwDeviceType, PcmBuffer, PlaybackController};
use renderer::ChannelRenderer;

/// 无声卡时 PcmBuffer 最多保留的字节数（约 10 秒 48kHz 立体声）
const MUTE_BUFFER_LIMIT: usize = 48000 * 2 * 4 * 10;

#[derive(Parser, Debug)]
#[command(name = "nemo_player", version, about = "音视频解码与同步播放")]
struct Cli {
    /// 媒体文件路径
    #[arg(required_unless_present = "list_hw_devices")]
    path: Option<PathBuf>,

    /// JSON 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// 硬件解码设备类型（目前仅记录）
    #[arg(long)]
    hw_device: Option<String>,

    /// 列出 FFmpeg 支持的硬件设备类型后退出
    #[arg(long)]
    list_hw_devices: bool,

    /// 视频帧预加载上限
    #[arg(long)]
    video_preload: Option<usize>,

    /// 不打开声卡
    #[arg(long)]
    mute: bool,
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::parse();

    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");

    if cli.list_hw_devices {
        for device in HwDeviceType::available() {
            println!("{}", device);
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("加载配置 {} 失败", path.display()))?,
        None => PlayerConfig::default(),
    };
    if let Some(limit) = cli.video_preload {
        config.video_preload_limit = limit;
    }

    // 声卡协商出的格式作为重采样目标；打不开时退回内存缓冲
    let mut output = None;
    let mut mute_buffer = None;
    let sink: Box<dyn AudioSink> = if cli.mute {
        let buffer = PcmBuffer::with_limit(MUTE_BUFFER_LIMIT);
        mute_buffer = Some(buffer.clone());
        Box::new(buffer)
    } else {
        match AudioOutput::new(config.audio).and_then(|mut out| out.start().map(|_| out)) {
            Ok(out) => {
                out.set_volume(config.volume);
                config.audio = out.get_config();
                let sink = out.sink();
                output = Some(out);
                Box::new(sink)
            }
            Err(e) => {
                warn!("⚠️ 音频输出不可用，改为静音: {}", e);
                let buffer = PcmBuffer::with_limit(MUTE_BUFFER_LIMIT);
                mute_buffer = Some(buffer.clone());
                Box::new(buffer)
            }
        }
    };

    // 静音时每秒按实时速率取走缓冲里的 PCM
    let bytes_per_second = config.audio.sample_rate as usize * config.audio.channels as usize * 4;

    let (renderer, frames) = ChannelRenderer::new(8);
    let mut controller = PlaybackController::new(config, Box::new(renderer), sink)?;
    if let Some(name) = &cli.hw_device {
        controller.set_hw_device(HwDeviceType::from_name(name)?);
    }
    let events = controller.events();

    let path = cli.path.context("缺少媒体文件路径")?;
    let info = controller.open(&path)?;
    info!(
        "🎬 {}：{}x{}，视频 {}，音频 {}（硬件设备 {}）",
        path.display(),
        info.width,
        info.height,
        info.video_codec,
        info.audio_codec,
        controller.hw_device()
    );
    for stream in controller.streams() {
        info!("   #{} {} {} time_base {}", stream.index, stream.kind, stream.codec, stream.time_base);
    }
    controller.play()?;

    let duration_us = controller.media_info().map_or(0, |info| info.duration);
    let status_tick = tick(Duration::from_secs(1));
    let mut presented: u64 = 0;
    loop {
        select! {
            recv(frames) -> frame => {
                if frame.is_ok() {
                    presented += 1;
                }
            }
            recv(events) -> event => match event {
                Ok(PlaybackEvent::Finished) => {
                    info!("✅ 播放完成");
                    break;
                }
                Ok(PlaybackEvent::Fault(reason)) => {
                    warn!("❌ 播放中止: {}", reason);
                    break;
                }
                Ok(event) => info!("📣 {:?}", event),
                Err(_) => break,
            },
            recv(status_tick) -> _ => {
                if let Some(buffer) = &mute_buffer {
                    let consumed = buffer.read(bytes_per_second).len();
                    debug!("🔇 静音缓冲: 取走 {} 字节，剩余 {}", consumed, buffer.bytes_available());
                }
                let status = controller.buffer_status();
                info!(
                    "⏱️ {:.2}/{:.2}s  显示 {} 帧  缓冲 视频 {}/{} 音频 {}/{}",
                    controller.position_us() as f64 / 1_000_000.0,
                    duration_us as f64 / 1_000_000.0,
                    presented,
                    status.video_frames,
                    status.video_limit,
                    status.audio_frames,
                    status.audio_limit
                );
            }
        }
    }

    controller.close();
    if let Some(buffer) = mute_buffer {
        buffer.clear();
    }
    drop(output);
    Ok(())
}
