use crate::core::{
    AudioConfig, AudioFrame, CodecParams, MediaKind, PlayerError, Result, StreamDescriptor,
    TimeBase, VideoFrame,
};
use crate::player::converter::{layout_or_default, Resampler, Scaler, TARGET_PIXEL, TARGET_SAMPLE};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, util};
use log::{debug, info, warn};

/// 无法从流中得到帧率时的默认帧时长（微秒）
const FALLBACK_FRAME_US: i64 = 40_000;

/// 打开流对应的解码器：查找 → 分配上下文 → 打开
fn open_decoder(stream: &format::stream::Stream) -> Result<(String, codec::decoder::Opened)> {
    let id = stream.parameters().id();
    let codec = codec::decoder::find(id)
        .ok_or_else(|| PlayerError::CodecError(format!("找不到 {:?} 的解码器", id)))?;
    let name = codec.name().to_string();

    let context = codec::context::Context::from_parameters(stream.parameters())
        .map_err(|e| PlayerError::AllocError(format!("分配 {} 解码上下文失败: {}", name, e)))?;
    let opened = context
        .decoder()
        .open_as(codec)
        .map_err(|e| PlayerError::CodecError(format!("打开 {} 解码器失败: {}", name, e)))?;

    Ok((name, opened))
}

/// 解码过程中的 FFmpeg 错误分类：ENOMEM → AllocError，其余 → DecodeError
fn decode_error(kind: MediaKind, e: ffmpeg::Error) -> PlayerError {
    match e {
        ffmpeg::Error::Other { errno } if errno == ffmpeg::error::ENOMEM => {
            PlayerError::AllocError(format!("{} 解码内存不足", kind))
        }
        e => PlayerError::DecodeError(format!("{}: {}", kind, e)),
    }
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

/// 单帧转换失败只丢弃该帧，同一个包解出的其余帧照常保留
fn keep_converted<T>(kind: MediaKind, frames: &mut Vec<T>, converted: Result<Option<T>>) {
    match converted {
        Ok(Some(frame)) => frames.push(frame),
        Ok(None) => {}
        Err(e) => warn!("⚠️ {} 帧转换失败，跳过该帧: {}", kind, e),
    }
}

/// 帧时间戳推算：有原生时间戳时换算并减去起点，没有时顺延上一帧
struct PtsTracker {
    time_base: TimeBase,
    origin_us: i64,
    next_pts: i64,
}

impl PtsTracker {
    fn new(time_base: TimeBase, origin_us: i64) -> Self {
        Self {
            time_base,
            origin_us,
            next_pts: 0,
        }
    }

    /// `lead_us`：输出首个采样相对原生时间戳的提前量（重采样器内部缓冲）
    fn resolve(&mut self, native: Option<i64>, lead_us: i64, duration: i64) -> i64 {
        let pts = match native {
            Some(ts) => self.time_base.to_micros(ts) - self.origin_us - lead_us,
            None => self.next_pts,
        };
        self.next_pts = pts + duration;
        pts
    }
}

/// 视频解码器（软件解码 + RGBA 转换）
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Scaler,
    descriptor: StreamDescriptor,
    pts: PtsTracker,
    frame_duration: i64,
    fps: f64,
}

impl VideoDecoder {
    /// 从视频流创建解码器，`origin_us` 为所有已选流共同的时间起点
    pub fn from_stream(stream: &format::stream::Stream, origin_us: i64) -> Result<Self> {
        let (codec_name, opened) = open_decoder(stream)?;
        let decoder = opened
            .video()
            .map_err(|e| PlayerError::CodecError(format!("{} 不是视频解码器: {}", codec_name, e)))?;

        let scaler = Scaler::new(decoder.format(), decoder.width(), decoder.height())?;

        let rate = {
            let avg = stream.avg_frame_rate();
            if avg.numerator() > 0 && avg.denominator() > 0 {
                avg
            } else {
                stream.rate()
            }
        };
        let (frame_duration, fps) = if rate.numerator() > 0 && rate.denominator() > 0 {
            let us = 1_000_000i64 * rate.denominator() as i64 / rate.numerator() as i64;
            (us.max(1), rate.numerator() as f64 / rate.denominator() as f64)
        } else {
            (FALLBACK_FRAME_US, 1_000_000.0 / FALLBACK_FRAME_US as f64)
        };

        let time_base = TimeBase::from(stream.time_base());
        let descriptor = StreamDescriptor {
            index: stream.index(),
            kind: MediaKind::Video,
            codec: codec_name,
            params: CodecParams::Video {
                width: decoder.width(),
                height: decoder.height(),
                pixel_format: format!("{:?}", decoder.format()),
            },
            time_base,
        };

        info!(
            "🎞️ 视频解码器: {} {}x{} {:?}, {:.2} fps, time_base {}",
            descriptor.codec,
            decoder.width(),
            decoder.height(),
            decoder.format(),
            fps,
            time_base
        );

        Ok(Self {
            decoder,
            scaler,
            descriptor,
            pts: PtsTracker::new(time_base, origin_us),
            frame_duration,
            fps,
        })
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// 送入一个压缩包并取出它产生的所有帧
    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(e) if is_again(&e) => {
                // 解码器输出未取走：先取空再重发一次
                self.drain(&mut frames)?;
                self.decoder
                    .send_packet(packet)
                    .map_err(|e| decode_error(MediaKind::Video, e))?;
            }
            Err(ffmpeg::Error::Eof) => return Ok(frames),
            Err(e) => return Err(decode_error(MediaKind::Video, e)),
        }

        self.drain(&mut frames)?;
        Ok(frames)
    }

    /// 流结束：取出解码器内缓存的剩余帧
    pub fn flush(&mut self) -> Result<Vec<VideoFrame>> {
        let mut frames = Vec::new();
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(decode_error(MediaKind::Video, e)),
        }
        self.drain(&mut frames)?;
        Ok(frames)
    }

    fn drain(&mut self, frames: &mut Vec<VideoFrame>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let converted = self.convert(decoded).map(Some);
                    keep_converted(MediaKind::Video, frames, converted);
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(decode_error(MediaKind::Video, e)),
            }
        }
    }

    fn convert(&mut self, decoded: util::frame::Video) -> Result<VideoFrame> {
        if !self.scaler.matches(&decoded) {
            warn!(
                "视频参数变化: {:?} {}x{}，重建像素缩放器",
                decoded.format(),
                decoded.width(),
                decoded.height()
            );
            self.scaler = Scaler::new(decoded.format(), decoded.width(), decoded.height())?;
        }

        let picture = self.scaler.run(&decoded)?;
        let pts = self.pts.resolve(decoded.timestamp(), 0, self.frame_duration);
        drop(decoded);

        Ok(VideoFrame {
            pts,
            duration: self.frame_duration,
            width: picture.width,
            height: picture.height,
            format: TARGET_PIXEL,
            strides: vec![picture.stride],
            data: picture.data,
        })
    }
}

/// 音频解码器（解码 + 重采样到输出格式）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Resampler,
    descriptor: StreamDescriptor,
    pts: PtsTracker,
    target: AudioConfig,
}

impl AudioDecoder {
    pub fn from_stream(
        stream: &format::stream::Stream,
        origin_us: i64,
        target: AudioConfig,
    ) -> Result<Self> {
        let (codec_name, opened) = open_decoder(stream)?;
        let decoder = opened
            .audio()
            .map_err(|e| PlayerError::CodecError(format!("{} 不是音频解码器: {}", codec_name, e)))?;

        let layout = layout_or_default(decoder.channel_layout(), decoder.channels());
        let resampler = Resampler::new(decoder.format(), layout, decoder.rate(), target)?;

        let time_base = TimeBase::from(stream.time_base());
        let descriptor = StreamDescriptor {
            index: stream.index(),
            kind: MediaKind::Audio,
            codec: codec_name,
            params: CodecParams::Audio {
                sample_rate: decoder.rate(),
                channels: decoder.channels(),
                sample_format: format!("{:?}", decoder.format()),
            },
            time_base,
        };

        info!(
            "🔊 音频解码器: {} {}Hz {}ch {:?} → {}Hz {}ch F32",
            descriptor.codec,
            decoder.rate(),
            decoder.channels(),
            decoder.format(),
            target.sample_rate,
            target.channels
        );

        Ok(Self {
            decoder,
            resampler,
            descriptor,
            pts: PtsTracker::new(time_base, origin_us),
            target,
        })
    }

    pub fn descriptor(&self) -> &StreamDescriptor {
        &self.descriptor
    }

    pub fn decode(&mut self, packet: &ffmpeg::Packet) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(e) if is_again(&e) => {
                self.drain(&mut frames)?;
                self.decoder
                    .send_packet(packet)
                    .map_err(|e| decode_error(MediaKind::Audio, e))?;
            }
            Err(ffmpeg::Error::Eof) => return Ok(frames),
            Err(e) => return Err(decode_error(MediaKind::Audio, e)),
        }

        self.drain(&mut frames)?;
        Ok(frames)
    }

    /// 流结束：取出解码器缓存的帧，再取出重采样器缓冲的尾部
    pub fn flush(&mut self) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        match self.decoder.send_eof() {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(e) => return Err(decode_error(MediaKind::Audio, e)),
        }
        self.drain(&mut frames)?;

        let (samples, data) = self.resampler.flush()?;
        if samples > 0 {
            debug!("重采样器尾部: {} 个采样", samples);
            frames.push(self.block(None, 0, samples, data));
        }
        Ok(frames)
    }

    fn drain(&mut self, frames: &mut Vec<AudioFrame>) -> Result<()> {
        loop {
            let mut decoded = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {
                    let converted = self.convert(decoded);
                    keep_converted(MediaKind::Audio, frames, converted);
                }
                Err(ffmpeg::Error::Eof) => return Ok(()),
                Err(e) if is_again(&e) => return Ok(()),
                Err(e) => return Err(decode_error(MediaKind::Audio, e)),
            }
        }
    }

    fn convert(&mut self, mut decoded: util::frame::Audio) -> Result<Option<AudioFrame>> {
        if decoded.channel_layout().is_empty() {
            let layout = layout_or_default(decoded.channel_layout(), decoded.channels());
            decoded.set_channel_layout(layout);
        }
        if !self.resampler.matches(&decoded) {
            warn!(
                "音频参数变化: {}Hz {}ch {:?}，重建重采样器",
                decoded.rate(),
                decoded.channels(),
                decoded.format()
            );
            self.resampler = Resampler::new(
                decoded.format(),
                decoded.channel_layout(),
                decoded.rate(),
                self.target,
            )?;
        }

        let native_ts = decoded.timestamp();
        // 本次输出先吐出上次留在重采样器里的采样
        let lead_us = self.resampler.buffered_us();
        let (samples, data) = self.resampler.convert(decoded)?;
        if samples == 0 {
            debug!("重采样输出为空，等待后续帧");
            return Ok(None);
        }

        Ok(Some(self.block(native_ts, lead_us, samples, data)))
    }

    fn block(&mut self, native_ts: Option<i64>, lead_us: i64, samples: usize, data: Vec<u8>) -> AudioFrame {
        let duration = (samples as i64 * 1_000_000 / self.target.sample_rate as i64).max(1);
        let pts = self.pts.resolve(native_ts, lead_us, duration);

        AudioFrame {
            pts,
            duration,
            sample_rate: self.target.sample_rate,
            channels: self.target.channels,
            format: TARGET_SAMPLE,
            data,
        }
    }
}
