use crate::core::{
    log_ctx, AudioConfig, AudioFrame, CodecParams, MediaInfo, MediaKind, PlayerError, Result,
    StreamDescriptor, TimeBase, VideoFrame,
};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// 已打开的媒体源：容器 + 每个已选流的解码管线
///
/// 字段按释放顺序排列：解码管线先于容器释放。
pub struct MediaSource {
    video: Option<VideoDecoder>,
    audio: Option<AudioDecoder>,
    streams: Vec<StreamDescriptor>,
    info: MediaInfo,
    path: PathBuf,
    input: format::context::Input,
}

impl MediaSource {
    /// 打开媒体文件并为最佳视频流、最佳音频流建立解码管线
    ///
    /// 任一步失败时，已创建的资源随局部变量一起释放（先解码器后容器）。
    pub fn open(path: impl AsRef<Path>, audio_target: AudioConfig) -> Result<Self> {
        let path = path.as_ref();
        info!("{} 📂 正在打开文件: {}", log_ctx(), path.display());

        let input = format::input(&path).map_err(|e| {
            PlayerError::OpenError(format!("{}: {}", path.display(), e))
        })?;

        let video_stream = input.streams().best(media::Type::Video);
        let audio_stream = input.streams().best(media::Type::Audio);
        if video_stream.is_none() && audio_stream.is_none() {
            return Err(PlayerError::OpenError(format!(
                "{}: 没有可解码的音视频流",
                path.display()
            )));
        }

        // 所有已选流共用一个时间起点
        let origin_us = [&video_stream, &audio_stream]
            .into_iter()
            .flatten()
            .map(|s| {
                let start = s.start_time();
                if start == ffmpeg::ffi::AV_NOPTS_VALUE {
                    0
                } else {
                    TimeBase::from(s.time_base()).to_micros(start)
                }
            })
            .min()
            .unwrap_or(0);
        debug!("时间起点: {}µs", origin_us);

        let video = match &video_stream {
            Some(stream) => Some(VideoDecoder::from_stream(stream, origin_us)?),
            None => None,
        };
        let audio = match &audio_stream {
            Some(stream) => match AudioDecoder::from_stream(stream, origin_us, audio_target) {
                Ok(decoder) => Some(decoder),
                Err(e) => {
                    if video.is_some() {
                        warn!("{} ↩️ 音频管线创建失败，回滚已创建的视频管线", log_ctx());
                    }
                    return Err(e);
                }
            },
            None => None,
        };
        drop(video_stream);
        drop(audio_stream);

        let mut streams = Vec::new();
        if let Some(v) = &video {
            streams.push(v.descriptor().clone());
        }
        if let Some(a) = &audio {
            streams.push(a.descriptor().clone());
        }

        let duration = input.duration();
        let info = MediaInfo {
            duration: if duration == ffmpeg::ffi::AV_NOPTS_VALUE { 0 } else { duration.max(0) },
            width: streams
                .iter()
                .find_map(|s| match s.params {
                    CodecParams::Video { width, .. } => Some(width),
                    _ => None,
                })
                .unwrap_or(0),
            height: streams
                .iter()
                .find_map(|s| match s.params {
                    CodecParams::Video { height, .. } => Some(height),
                    _ => None,
                })
                .unwrap_or(0),
            fps: video.as_ref().map_or(0.0, |v| v.fps()),
            video_codec: video
                .as_ref()
                .map_or_else(|| "none".to_string(), |v| v.descriptor().codec.clone()),
            audio_codec: audio
                .as_ref()
                .map_or_else(|| "none".to_string(), |a| a.descriptor().codec.clone()),
            sample_rate: if audio.is_some() { audio_target.sample_rate } else { 0 },
            channels: if audio.is_some() { audio_target.channels } else { 0 },
        };

        info!(
            "{} ✅ 媒体源已打开: {}（{} 个流）",
            log_ctx(),
            path.display(),
            streams.len()
        );
        if let Ok(json) = serde_json::to_string(&info) {
            info!("📋 媒体信息: {}", json);
        }

        Ok(Self {
            video,
            audio,
            streams,
            info,
            path: path.to_path_buf(),
            input,
        })
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_stream(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Video => self.video.is_some(),
            MediaKind::Audio => self.audio.is_some(),
        }
    }

    /// 读取下一个压缩包，返回 (流索引, 包)
    ///
    /// 文件结束或读取失败都返回 `None`
    pub fn read_packet(&mut self) -> Option<(usize, ffmpeg::Packet)> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input) {
            Ok(()) => Some((packet.stream(), packet)),
            Err(ffmpeg::Error::Eof) => {
                debug!("{} 读到文件末尾", log_ctx());
                None
            }
            Err(e) => {
                warn!("{} ⚠️ 读取数据包失败，结束解封装: {}", log_ctx(), e);
                None
            }
        }
    }

    /// 按流索引路由，未选中（或已禁用）的流返回 `None`
    pub fn route(&self, stream_index: usize) -> Option<MediaKind> {
        if self.video.as_ref().map(|v| v.descriptor().index) == Some(stream_index) {
            Some(MediaKind::Video)
        } else if self.audio.as_ref().map(|a| a.descriptor().index) == Some(stream_index) {
            Some(MediaKind::Audio)
        } else {
            None
        }
    }

    pub fn decode_video(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<VideoFrame>> {
        match self.video.as_mut() {
            Some(decoder) => decoder.decode(packet),
            None => Ok(Vec::new()),
        }
    }

    pub fn decode_audio(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<AudioFrame>> {
        match self.audio.as_mut() {
            Some(decoder) => decoder.decode(packet),
            None => Ok(Vec::new()),
        }
    }

    pub fn flush_video(&mut self) -> Result<Vec<VideoFrame>> {
        match self.video.as_mut() {
            Some(decoder) => decoder.flush(),
            None => Ok(Vec::new()),
        }
    }

    pub fn flush_audio(&mut self) -> Result<Vec<AudioFrame>> {
        match self.audio.as_mut() {
            Some(decoder) => decoder.flush(),
            None => Ok(Vec::new()),
        }
    }

    /// 本次会话内禁用某个流（释放其解码管线），返回剩余的活动流数量
    pub fn disable(&mut self, kind: MediaKind) -> usize {
        match kind {
            MediaKind::Video => drop(self.video.take()),
            MediaKind::Audio => drop(self.audio.take()),
        }
        warn!("{} 🚫 已禁用 {} 流", log_ctx(), kind);
        self.video.is_some() as usize + self.audio.is_some() as usize
    }

    /// 按顺序释放：解码管线 → 容器
    pub fn close(mut self) {
        if let Some(video) = self.video.take() {
            debug!("释放视频解码管线 (stream {})", video.descriptor().index);
            drop(video);
        }
        if let Some(audio) = self.audio.take() {
            debug!("释放音频解码管线 (stream {})", audio.descriptor().index);
            drop(audio);
        }
        info!("{} 🗑️ 关闭媒体源: {}", log_ctx(), self.path.display());
    }
}
