use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("解码器错误: {0}")]
    CodecError(String),

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("内存分配失败: {0}")]
    AllocError(String),

    #[error("格式转换器创建失败: {0}")]
    ConversionError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("没有打开的媒体源")]
    NotOpened,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
