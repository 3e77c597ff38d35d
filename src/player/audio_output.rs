use crate::core::{AudioConfig, PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
use crossbeam::queue::SegQueue;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

/// PCM 字节流输出（packed f32，格式由 `AudioConfig` 决定）
pub trait AudioSink: Send {
    /// 写入 PCM，返回实际接收的字节数
    fn write(&mut self, pcm: &[u8]) -> usize;
}

/// 内存 PCM 缓冲：写入追加到末尾，读取从头部消费
///
/// 无声卡（`--mute`）时作为输出端使用；克隆共享同一缓冲。
#[derive(Clone, Default)]
pub struct PcmBuffer {
    data: Arc<Mutex<Vec<u8>>>,
    limit: Option<usize>,
}

impl PcmBuffer {
    /// 最多保留 `limit` 字节，超出部分写入时丢弃
    pub fn with_limit(limit: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(Vec::new())),
            limit: Some(limit),
        }
    }

    /// 从头部读取最多 `max` 字节
    pub fn read(&self, max: usize) -> Vec<u8> {
        let mut data = self.data.lock();
        let n = max.min(data.len());
        data.drain(..n).collect()
    }

    pub fn bytes_available(&self) -> usize {
        self.data.lock().len()
    }

    pub fn clear(&self) {
        self.data.lock().clear();
    }
}

impl AudioSink for PcmBuffer {
    fn write(&mut self, pcm: &[u8]) -> usize {
        let mut data = self.data.lock();
        let accepted = match self.limit {
            Some(limit) => pcm.len().min(limit.saturating_sub(data.len())),
            None => pcm.len(),
        };
        data.extend_from_slice(&pcm[..accepted]);
        accepted
    }
}

/// 音频输出 - 使用 cpal 播放音频
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    stream: Option<Stream>,
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
}

impl AudioOutput {
    /// 打开默认输出设备（请求的配置不支持时按回退列表协商）
    pub fn new(requested: AudioConfig) -> Result<Self> {
        let AudioConfig {
            sample_rate,
            channels,
        } = requested;
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let candidates = [
            (sample_rate, channels),
            (48000, 2),
            (44100, 2),
            (48000, 1),
            (44100, 1),
        ];

        let supported: Vec<SupportedStreamConfigRange> = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?
            .collect();

        let config = candidates
            .iter()
            .map(|&(rate, ch)| StreamConfig {
                channels: ch,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            })
            .find(|candidate| supported.iter().any(|s| Self::is_config_compatible(candidate, s)))
            .ok_or_else(|| {
                PlayerError::AudioError(format!(
                    "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
                    sample_rate, channels
                ))
            })?;

        if config.sample_rate.0 != sample_rate || config.channels != channels {
            warn!(
                "⚠️ 音频设备不支持 {} Hz, {} 声道，使用回退配置: {} Hz, {} 声道",
                sample_rate, channels, config.sample_rate.0, config.channels
            );
        }

        Ok(Self {
            device,
            config,
            stream: None,
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
        })
    }

    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    /// 开始播放
    pub fn start(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let buffer = self.buffer.clone();
        let volume = self.volume.clone();

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let vol = *volume.lock();
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().map_or(0.0, |v| v * vol);
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        self.stream = Some(stream);
        info!("🔊 音频输出已启动");

        Ok(())
    }

    /// 停止播放
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已停止");
        }
    }

    /// 设置音量 (0.0 - 1.0)
    pub fn set_volume(&self, volume: f32) {
        *self.volume.lock() = volume.clamp(0.0, 1.0);
    }

    /// 获取实际使用的音频配置（作为重采样目标）
    pub fn get_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
        }
    }

    /// 可跨线程移交的写入端
    pub fn sink(&self) -> CpalSink {
        CpalSink {
            buffer: self.buffer.clone(),
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// cpal 输出的写入端：把 PCM 字节转换为 f32 样本推入回调读取的无锁队列
pub struct CpalSink {
    buffer: Arc<SegQueue<f32>>,
}

impl AudioSink for CpalSink {
    fn write(&mut self, pcm: &[u8]) -> usize {
        let chunks = pcm.chunks_exact(4);
        let written = pcm.len() - chunks.remainder().len();
        for chunk in chunks {
            self.buffer.push(bytemuck::pod_read_unaligned::<f32>(chunk));
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_buffer_read_from_front() {
        let mut buffer = PcmBuffer::default();
        assert_eq!(buffer.write(&[1, 2, 3, 4]), 4);
        assert_eq!(buffer.write(&[5, 6]), 2);
        assert_eq!(buffer.bytes_available(), 6);
        assert_eq!(buffer.read(3), vec![1, 2, 3]);
        assert_eq!(buffer.read(10), vec![4, 5, 6]);
        assert_eq!(buffer.bytes_available(), 0);
    }

    #[test]
    fn test_pcm_buffer_limit_and_clear() {
        let mut buffer = PcmBuffer::with_limit(4);
        let reader = buffer.clone();
        assert_eq!(buffer.write(&[0; 3]), 3);
        assert_eq!(buffer.write(&[0; 3]), 1);
        assert_eq!(reader.bytes_available(), 4);
        reader.clear();
        assert_eq!(buffer.bytes_available(), 0);
    }

    #[test]
    fn test_cpal_sink_converts_f32_bytes() {
        let mut sink = CpalSink {
            buffer: Arc::new(SegQueue::new()),
        };
        let samples = [0.5f32, -1.0];
        let mut pcm: Vec<u8> = bytemuck::cast_slice(&samples).to_vec();
        pcm.push(0xff);
        assert_eq!(sink.write(&pcm), 8);
        assert_eq!(sink.buffer.len(), 2);
        assert_eq!(sink.buffer.pop(), Some(0.5));
        assert_eq!(sink.buffer.pop(), Some(-1.0));
    }
}
