use serde::{Deserialize, Serialize};
use std::fmt;

/// 媒体类型（只处理音视频）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 流时间基（有理数 num/den，单位：秒/tick）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBase {
    pub num: i32,
    pub den: i32,
}

impl TimeBase {
    pub fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    /// tick → 微秒：`1_000_000 * ts * num / den`，整数截断
    ///
    /// 中间值用 i128 计算，长时间流的大 tick 值不会溢出；den 为 0 时返回 0。
    pub fn to_micros(&self, ts: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        let us = 1_000_000i128 * ts as i128 * self.num as i128 / self.den as i128;
        us.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl From<ffmpeg_next::Rational> for TimeBase {
    fn from(r: ffmpeg_next::Rational) -> Self {
        Self::new(r.numerator(), r.denominator())
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// 编解码参数（打开后不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CodecParams {
    Video {
        width: u32,
        height: u32,
        pixel_format: String,
    },
    Audio {
        sample_rate: u32,
        channels: u16,
        sample_format: String,
    },
}

/// 已选中流的描述
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub index: usize,
    pub kind: MediaKind,
    pub codec: String,
    pub params: CodecParams,
    pub time_base: TimeBase,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    RGBA,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::RGBA => 4,
        }
    }
}

/// 音频采样格式（输出端固定为 packed）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::F32 => 4,
        }
    }
}

/// 有显示时间的解码单元（视频帧、PCM 块）
pub trait Timed {
    /// 显示时间戳（微秒，从流起点算起）
    fn pts_us(&self) -> i64;
    /// 持续时间（微秒）
    fn duration_us(&self) -> i64;
}

/// 视频帧数据
///
/// 像素缓冲为独占所有权：从解码路径移交给显示线程后只会被释放一次。
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub pts: i64,           // 显示时间戳（微秒）
    pub duration: i64,      // 帧持续时间（微秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub strides: Vec<usize>, // 每个平面的行字节数
    pub data: Vec<u8>,       // CPU 内存数据
}

impl Timed for VideoFrame {
    fn pts_us(&self) -> i64 {
        self.pts
    }

    fn duration_us(&self) -> i64 {
        self.duration
    }
}

/// 音频帧数据（重采样后的 PCM，交错排列）
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub pts: i64,           // 显示时间戳（微秒）
    pub duration: i64,      // 持续时间（微秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<u8>,      // packed PCM 字节
}

impl AudioFrame {
    /// 每声道采样数
    pub fn samples(&self) -> usize {
        let frame_bytes = self.channels as usize * self.format.bytes_per_sample();
        if frame_bytes == 0 {
            0
        } else {
            self.data.len() / frame_bytes
        }
    }
}

impl Timed for AudioFrame {
    fn pts_us(&self) -> i64 {
        self.pts
    }

    fn duration_us(&self) -> i64 {
        self.duration
    }
}

/// 播放状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Playing,
    Paused,
    Halted,
}

/// 播放事件（通过 channel 通知拥有者线程）
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StateChanged(PlaybackState),
    /// 解封装读到文件末尾（或读取失败）
    StreamEnded,
    /// 所有工作线程在未 Halt 的情况下退出：队列已播完
    Finished,
    /// 工作线程遇到不可恢复的错误，会话已进入 Halted
    Fault(String),
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStatus {
    /// 视频帧队列长度
    pub video_frames: usize,

    /// 音频帧队列长度
    pub audio_frames: usize,

    pub video_limit: usize,
    pub audio_limit: usize,
}

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（微秒）
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,       // 输出采样率
    pub channels: u16,          // 输出声道数
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_micros_truncates() {
        assert_eq!(TimeBase::new(1, 90000).to_micros(90000), 1_000_000);
        // 1/3 秒 = 333333.33µs，截断
        assert_eq!(TimeBase::new(1, 3).to_micros(1), 333_333);
        assert_eq!(TimeBase::new(1, 1000).to_micros(1500), 1_500_000);
        assert_eq!(TimeBase::new(1001, 30000).to_micros(3), 100_100);
    }

    #[test]
    fn test_to_micros_large_ticks_and_zero_den() {
        let tb = TimeBase::new(1, 90000);
        let ten_days = 90000i64 * 86400 * 10;
        assert_eq!(tb.to_micros(ten_days), 864_000_000_000);
        assert_eq!(TimeBase::new(1, 0).to_micros(123), 0);
    }

    #[test]
    fn test_audio_samples() {
        let frame = AudioFrame {
            pts: 0,
            duration: 0,
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            data: vec![0u8; 8 * 10],
        };
        assert_eq!(frame.samples(), 10);
    }
}
