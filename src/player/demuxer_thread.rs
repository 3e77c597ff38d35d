use crate::core::{log_ctx, AudioFrame, MediaKind, PlaybackEvent, PlaybackState, PlayerError, VideoFrame};
use crate::player::frame_queue::FrameQueue;
use crate::player::media_source::MediaSource;
use crate::player::session::SessionShared;
use log::{debug, error, info, warn};
use std::sync::Arc;

/// 进度日志：前 N 个单元逐个打印，之后每 100 个打印一次
const LOG_FIRST_N: usize = 5;

fn should_log(count: usize) -> bool {
    count <= LOG_FIRST_N || count % 100 == 0
}

/// 解封装线程：读包 → 路由 → 解码转换 → 入队
///
/// 线程拥有 `MediaSource`，`run` 结束时把它交还给调用者。
pub struct DemuxWorker {
    source: MediaSource,
    shared: Arc<SessionShared>,
    video_queue: Arc<FrameQueue<VideoFrame>>,
    audio_queue: Arc<FrameQueue<AudioFrame>>,
    packets: usize,
    video_frames: usize,
    audio_frames: usize,
    audio_samples: usize,
    skipped: usize,
}

impl DemuxWorker {
    pub fn new(
        source: MediaSource,
        shared: Arc<SessionShared>,
        video_queue: Arc<FrameQueue<VideoFrame>>,
        audio_queue: Arc<FrameQueue<AudioFrame>>,
    ) -> Self {
        Self {
            source,
            shared,
            video_queue,
            audio_queue,
            packets: 0,
            video_frames: 0,
            audio_frames: 0,
            audio_samples: 0,
            skipped: 0,
        }
    }

    /// 背压：每个活动流的队列都未满才继续读包
    fn has_room(&self) -> bool {
        (!self.source.has_stream(MediaKind::Video) || self.video_queue.has_room())
            && (!self.source.has_stream(MediaKind::Audio) || self.audio_queue.has_room())
    }

    /// 线程主循环
    pub fn run(mut self) -> MediaSource {
        info!("{} 🎬 解封装线程启动: {}", log_ctx(), self.source.path().display());
        let poll = self.shared.poll_interval();

        let halted = loop {
            let snap = self.shared.snapshot();
            match snap.state {
                PlaybackState::Halted => break true,
                PlaybackState::Idle | PlaybackState::Paused => {
                    self.shared.sleep(snap.epoch, poll);
                    continue;
                }
                PlaybackState::Playing => {}
            }

            if !self.has_room() {
                self.shared.sleep(snap.epoch, poll);
                continue;
            }

            let Some((index, packet)) = self.source.read_packet() else {
                break false;
            };
            self.packets += 1;

            let delivered = match self.source.route(index) {
                Some(MediaKind::Video) => {
                    let result = self.source.decode_video(&packet);
                    drop(packet);
                    match result {
                        Ok(frames) => {
                            self.video_frames += frames.len();
                            if should_log(self.packets) {
                                debug!(
                                    "{} 📦 视频包 #{} → 累计 {} 帧",
                                    log_ctx(), self.packets, self.video_frames
                                );
                            }
                            enqueue(&self.shared, &self.video_queue, frames)
                        }
                        Err(e) => self.on_decode_error(MediaKind::Video, e),
                    }
                }
                Some(MediaKind::Audio) => {
                    let result = self.source.decode_audio(&packet);
                    drop(packet);
                    match result {
                        Ok(frames) => {
                            self.count_audio(&frames);
                            if should_log(self.packets) {
                                debug!(
                                    "{} 🔊 音频包 #{} → 累计 {} 块 / {} 采样",
                                    log_ctx(), self.packets, self.audio_frames, self.audio_samples
                                );
                            }
                            enqueue(&self.shared, &self.audio_queue, frames)
                        }
                        Err(e) => self.on_decode_error(MediaKind::Audio, e),
                    }
                }
                // 未选中的流
                None => true,
            };

            if !delivered {
                break true;
            }
        };

        if !halted {
            self.drain_decoders();
            self.shared.mark_stream_ended();
        }

        info!(
            "{} 🛑 解封装线程退出（{} 个包：{} 视频帧，{} 音频块 / {} 采样，跳过 {}）",
            log_ctx(),
            self.packets,
            self.video_frames,
            self.audio_frames,
            self.audio_samples,
            self.skipped
        );
        self.source
    }

    fn count_audio(&mut self, frames: &[AudioFrame]) {
        self.audio_frames += frames.len();
        self.audio_samples += frames.iter().map(AudioFrame::samples).sum::<usize>();
    }

    /// 返回 false 表示会话已停止
    fn on_decode_error(&mut self, kind: MediaKind, e: PlayerError) -> bool {
        match e {
            PlayerError::AllocError(msg) => {
                error!("{} ❌ {} 流内存分配失败，停用该流: {}", log_ctx(), kind, msg);
                if self.source.disable(kind) == 0 {
                    if self.shared.halt() {
                        self.shared
                            .emit(PlaybackEvent::Fault(format!("{} 流内存分配失败，没有可用的流", kind)));
                    }
                    return false;
                }
                true
            }
            e => {
                self.skipped += 1;
                if should_log(self.skipped) {
                    warn!("{} ⚠️ {} 解码失败（已跳过 {}）: {}", log_ctx(), kind, self.skipped, e);
                }
                true
            }
        }
    }

    /// 读到末尾后取出解码器内缓存的帧
    fn drain_decoders(&mut self) {
        match self.source.flush_video() {
            Ok(frames) => {
                self.video_frames += frames.len();
                enqueue(&self.shared, &self.video_queue, frames);
            }
            Err(e) => warn!("{} ⚠️ 视频解码器冲刷失败: {}", log_ctx(), e),
        }
        match self.source.flush_audio() {
            Ok(frames) => {
                self.count_audio(&frames);
                enqueue(&self.shared, &self.audio_queue, frames);
            }
            Err(e) => warn!("{} ⚠️ 音频解码器冲刷失败: {}", log_ctx(), e),
        }
    }
}

/// 逐个入队，队列满时等待空位；会话停止时返回 false（剩余单元直接释放）
fn enqueue<T>(shared: &SessionShared, queue: &FrameQueue<T>, items: Vec<T>) -> bool {
    for item in items {
        let mut pending = item;
        loop {
            match queue.try_push(pending) {
                Ok(()) => {
                    shared.notify();
                    break;
                }
                Err(back) => {
                    pending = back;
                    let snap = shared.snapshot();
                    if snap.state == PlaybackState::Halted {
                        return false;
                    }
                    shared.sleep(snap.epoch, shared.poll_interval());
                }
            }
        }
    }
    true
}
