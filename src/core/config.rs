use crate::core::{PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 音频输出目标格式（重采样目标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// 播放器配置
///
/// JSON 文件中缺省的字段使用默认值：
/// ```json
/// { "video_preload_limit": 30, "audio": { "sample_rate": 44100 } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// 工作线程轮询间隔（毫秒），状态变化的最长感知延迟
    pub poll_interval_ms: u64,
    /// 视频帧队列上限（背压阈值）
    pub video_preload_limit: usize,
    /// 音频帧队列上限
    pub audio_preload_limit: usize,
    pub audio: AudioConfig,
    /// 硬件解码设备名（如 "cuda"、"vaapi"），目前不影响解码路径
    pub hw_device: Option<String>,
    /// 音量 0.0 - 1.0
    pub volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            video_preload_limit: 30,
            audio_preload_limit: 128,
            audio: AudioConfig::default(),
            hw_device: None,
            volume: 1.0,
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件加载并校验
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: PlayerConfig = serde_json::from_str(&text).map_err(|e| {
            PlayerError::ConfigError(format!("解析 {} 失败: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(PlayerError::ConfigError("poll_interval_ms 必须大于 0".to_string()));
        }
        if self.video_preload_limit == 0 || self.audio_preload_limit == 0 {
            return Err(PlayerError::ConfigError("预加载上限必须大于 0".to_string()));
        }
        if self.audio.sample_rate == 0 {
            return Err(PlayerError::ConfigError("采样率必须大于 0".to_string()));
        }
        if !(1..=8).contains(&self.audio.channels) {
            return Err(PlayerError::ConfigError(format!(
                "不支持的声道数: {}",
                self.audio.channels
            )));
        }
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(PlayerError::ConfigError(format!("音量超出范围: {}", self.volume)));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: PlayerConfig =
            serde_json::from_str(r#"{ "video_preload_limit": 8, "audio": { "sample_rate": 44100 } }"#)
                .unwrap();
        assert_eq!(config.video_preload_limit, 8);
        assert_eq!(config.audio.sample_rate, 44100);
        assert_eq!(config.audio.channels, 2);
        assert_eq!(config.poll_interval_ms, 10);
        assert!(config.hw_device.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PlayerConfig::default();
        config.video_preload_limit = 0;
        assert!(matches!(config.validate(), Err(PlayerError::ConfigError(_))));

        let mut config = PlayerConfig::default();
        config.audio.channels = 9;
        assert!(matches!(config.validate(), Err(PlayerError::ConfigError(_))));

        let mut config = PlayerConfig::default();
        config.volume = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{ "poll_interval_ms": 5, "hw_device": "cuda" }}"#).unwrap();
        let config = PlayerConfig::load(file.path()).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
        assert_eq!(config.hw_device.as_deref(), Some("cuda"));
    }

    #[test]
    fn test_load_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();
        assert!(matches!(
            PlayerConfig::load(file.path()),
            Err(PlayerError::ConfigError(_))
        ));
    }
}
