// 播放器核心模块

pub mod audio_output;
pub mod controller;
pub mod converter;
pub mod decoder;
pub mod demuxer_thread;
pub mod frame_queue;
pub mod hw_device;
pub mod media_source;
pub mod presenter;
pub mod session;

#[cfg(test)]
pub(crate) mod test_media;

pub use audio_output::{AudioOutput, AudioSink, PcmBuffer};
pub use controller::PlaybackController;
pub use hw_device::HwDeviceType;
