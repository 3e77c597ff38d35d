use crate::core::{AudioConfig, PixelFormat, PlayerError, Result, SampleFormat};
use ffmpeg_next::software::{resampling, scaling};
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::{sample, Pixel, Sample};
use ffmpeg_next::util::frame;
use log::debug;

/// 视频输出的固定像素布局
pub const TARGET_PIXEL: PixelFormat = PixelFormat::RGBA;

/// 音频输出的固定采样格式
pub const TARGET_SAMPLE: SampleFormat = SampleFormat::F32;

/// 转换后的紧凑像素数据
pub struct ScaledPicture {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub data: Vec<u8>,
}

/// 视频缩放器：源格式 → RGBA（同尺寸）
pub struct Scaler {
    context: scaling::Context,
    format: Pixel,
    width: u32,
    height: u32,
}

// SAFETY: SwsContext 本身不是 Send，但每个 Scaler 只归属一个解码管线，
// 管线整体移交给解封装线程后只在该线程内使用，不会被并发访问。
unsafe impl Send for Scaler {}

impl Scaler {
    pub fn new(format: Pixel, width: u32, height: u32) -> Result<Self> {
        if format == Pixel::None || width == 0 || height == 0 {
            return Err(PlayerError::ConversionError(format!(
                "无效的视频参数: {:?} {}x{}",
                format, width, height
            )));
        }

        let context = scaling::Context::get(
            format,
            width,
            height,
            Pixel::RGBA,
            width,
            height,
            scaling::Flags::BILINEAR,
        )
        .map_err(|e| PlayerError::ConversionError(format!("创建像素缩放器失败: {}", e)))?;

        debug!("🔧 像素缩放器: {:?} {}x{} → RGBA", format, width, height);

        Ok(Self {
            context,
            format,
            width,
            height,
        })
    }

    /// 帧的格式/尺寸是否与当前缩放器一致
    pub fn matches(&self, picture: &frame::Video) -> bool {
        picture.format() == self.format
            && picture.width() == self.width
            && picture.height() == self.height
    }

    /// 转换为 RGBA 并复制到连续内存
    pub fn run(&mut self, picture: &frame::Video) -> Result<ScaledPicture> {
        let mut rgba_frame = frame::Video::empty();
        self.context
            .run(picture, &mut rgba_frame)
            .map_err(|e| PlayerError::ConversionError(format!("像素转换失败: {}", e)))?;

        let width = self.width;
        let height = self.height;
        let row_size = width as usize * TARGET_PIXEL.bytes_per_pixel();
        let mut data = vec![0u8; row_size * height as usize];

        let src_stride = rgba_frame.stride(0);
        let src = rgba_frame.data(0);
        for y in 0..height as usize {
            let src_offset = y * src_stride;
            let dst_offset = y * row_size;
            data[dst_offset..dst_offset + row_size]
                .copy_from_slice(&src[src_offset..src_offset + row_size]);
        }

        Ok(ScaledPicture {
            width,
            height,
            stride: row_size,
            data,
        })
    }
}

/// 每次转换在估算容量之外多分配的输出采样数
const OUTPUT_MARGIN: usize = 32;

/// 音频重采样器：源布局/采样率/格式 → 固定输出格式
///
/// 输出帧按 `内部缓冲 + 本帧换算后的采样数` 预分配，重采样器内部不会积压；
/// 流结束时由 `flush` 取出剩余的尾部采样。
pub struct Resampler {
    context: resampling::Context,
    source: (Sample, ChannelLayout, u32),
    target: AudioConfig,
    layout: ChannelLayout,
}

// SAFETY: 同 Scaler，SwrContext 只在拥有它的解封装线程内使用。
unsafe impl Send for Resampler {}

impl Resampler {
    pub fn new(format: Sample, layout: ChannelLayout, rate: u32, target: AudioConfig) -> Result<Self> {
        if format == Sample::None || rate == 0 {
            return Err(PlayerError::ConversionError(format!(
                "无效的音频参数: {:?} {}Hz",
                format, rate
            )));
        }

        let target_layout = target_layout(target.channels);
        let context = resampling::Context::get(
            format,
            layout,
            rate,
            Sample::F32(sample::Type::Packed),
            target_layout,
            target.sample_rate,
        )
        .map_err(|e| PlayerError::ConversionError(format!("创建音频重采样器失败: {}", e)))?;

        debug!(
            "🔧 音频重采样器: {}Hz/{}ch/{:?} → {}Hz/{}ch/F32",
            rate,
            layout.channels(),
            format,
            target.sample_rate,
            target.channels
        );

        Ok(Self {
            context,
            source: (format, layout, rate),
            target,
            layout: target_layout,
        })
    }

    pub fn matches(&self, native: &frame::Audio) -> bool {
        let (format, layout, rate) = self.source;
        native.format() == format && native.rate() == rate && native.channel_layout() == layout
    }

    /// 重采样器内部尚未输出的采样数（按输出采样率计）
    fn pending_samples(&self) -> usize {
        self.context.delay().map_or(0, |delay| delay.output.max(0) as usize)
    }

    /// 内部缓冲对应的时长（微秒），即下一次输出的首个采样落后于输入时间戳的量
    pub fn buffered_us(&self) -> i64 {
        self.pending_samples() as i64 * 1_000_000 / self.target.sample_rate as i64
    }

    /// 一帧输入最多产生的输出采样数
    fn output_capacity(&self, input_samples: usize) -> usize {
        let in_rate = self.source.2 as u64;
        let out_rate = self.target.sample_rate as u64;
        let converted = (input_samples as u64 * out_rate).div_ceil(in_rate) as usize;
        self.pending_samples() + converted + OUTPUT_MARGIN
    }

    fn output_frame(&self, capacity: usize) -> frame::Audio {
        frame::Audio::new(Sample::F32(sample::Type::Packed), capacity, self.layout)
    }

    /// 转换一帧，原生帧在此处被消费并释放
    ///
    /// 返回 (每声道采样数, packed PCM 字节)
    pub fn convert(&mut self, native: frame::Audio) -> Result<(usize, Vec<u8>)> {
        let mut resampled = self.output_frame(self.output_capacity(native.samples()));
        self.context
            .run(&native, &mut resampled)
            .map_err(|e| PlayerError::ConversionError(format!("音频重采样失败: {}", e)))?;
        drop(native);

        Ok(self.packed(&resampled))
    }

    /// 流结束：取出内部缓冲的剩余采样
    pub fn flush(&mut self) -> Result<(usize, Vec<u8>)> {
        let pending = self.pending_samples();
        if pending == 0 {
            return Ok((0, Vec::new()));
        }

        let mut resampled = self.output_frame(pending + OUTPUT_MARGIN);
        self.context
            .flush(&mut resampled)
            .map_err(|e| PlayerError::ConversionError(format!("重采样器冲刷失败: {}", e)))?;

        Ok(self.packed(&resampled))
    }

    fn packed(&self, resampled: &frame::Audio) -> (usize, Vec<u8>) {
        let samples = resampled.samples();
        if samples == 0 {
            return (0, Vec::new());
        }
        let len = samples * self.target.channels as usize * TARGET_SAMPLE.bytes_per_sample();
        let plane = resampled.data(0);
        let len = len.min(plane.len());
        (samples, plane[..len].to_vec())
    }
}

/// 源流没有声道布局时按声道数取默认布局
pub fn layout_or_default(layout: ChannelLayout, channels: u16) -> ChannelLayout {
    if layout.is_empty() {
        ChannelLayout::default(channels as i32)
    } else {
        layout
    }
}

fn target_layout(channels: u16) -> ChannelLayout {
    match channels {
        1 => ChannelLayout::MONO,
        2 => ChannelLayout::STEREO,
        6 => ChannelLayout::_5POINT1,
        n => ChannelLayout::default(n as i32),
    }
}
