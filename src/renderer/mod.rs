// 视频输出

use crate::core::VideoFrame;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info};

/// 视频帧输出端
///
/// 由视频显示线程独占调用，每个到时的帧调用一次；帧的所有权随调用移交。
pub trait Renderer: Send {
    fn present(&mut self, frame: VideoFrame);
}

/// 把帧转发到拥有者线程的有界通道
///
/// 发送不阻塞显示线程：通道满时丢弃该帧。
pub struct ChannelRenderer {
    tx: Sender<VideoFrame>,
    dropped: u64,
}

impl ChannelRenderer {
    pub fn new(capacity: usize) -> (Self, Receiver<VideoFrame>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx, dropped: 0 }, rx)
    }

}

impl Renderer for ChannelRenderer {
    fn present(&mut self, frame: VideoFrame) {
        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(TrySendError::Full(frame)) => {
                self.dropped += 1;
                debug!("渲染通道已满，丢弃帧 pts={}µs（累计 {}）", frame.pts, self.dropped);
            }
            // 接收端已关闭
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

impl Drop for ChannelRenderer {
    fn drop(&mut self) {
        if self.dropped > 0 {
            info!("🖼️ 渲染通道共丢弃 {} 帧", self.dropped);
        }
    }
}
