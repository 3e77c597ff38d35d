use crate::core::{
    log_ctx, AudioFrame, BufferStatus, MediaInfo, MediaKind, PlaybackEvent, PlaybackState,
    PlayerConfig, PlayerError, Result, StreamDescriptor, VideoFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::demuxer_thread::DemuxWorker;
use crate::player::frame_queue::FrameQueue;
use crate::player::hw_device::HwDeviceType;
use crate::player::media_source::MediaSource;
use crate::player::presenter::Presenter;
use crate::player::session::{SessionShared, WorkerGuard};
use crate::renderer::Renderer;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 工作线程借用的资源，线程退出（包括 panic）时放回拥有者的槽位
struct Lease<T> {
    value: Option<T>,
    slot: Arc<Mutex<Option<T>>>,
}

impl<T> Lease<T> {
    fn take(slot: &Arc<Mutex<Option<T>>>) -> Option<Self> {
        let value = slot.lock().take()?;
        Some(Self {
            value: Some(value),
            slot: slot.clone(),
        })
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }
}

impl<T> Drop for Lease<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            *self.slot.lock() = Some(value);
        }
    }
}

/// 启动一个工作线程
///
/// 线程创建成功后才登记；线程先收到自己的 `WorkerGuard` 再执行 `body`。
/// 创建失败时闭包连同它借用的资源一起释放，会话里不留任何登记。
fn spawn_worker<F>(
    shared: &Arc<SessionShared>,
    name: &'static str,
    builder: thread::Builder,
    body: F,
) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let (start_tx, start_rx) = bounded::<WorkerGuard>(1);
    let handle = builder.spawn(move || {
        let Ok(_guard) = start_rx.recv() else {
            return;
        };
        body();
    })?;

    if let Err(unsent) = start_tx.send(WorkerGuard::register(shared, name)) {
        // 线程已退出，先停止会话再撤销登记
        shared.halt();
        drop(unsent);
    }
    Ok(handle)
}

fn named(name: &str) -> thread::Builder {
    thread::Builder::new().name(format!("nemo-{}", name))
}

/// 一次 open → close 之间的播放会话
struct Session {
    shared: Arc<SessionShared>,
    video_queue: Arc<FrameQueue<VideoFrame>>,
    audio_queue: Arc<FrameQueue<AudioFrame>>,
    /// 解封装线程退出时把媒体源放回这里，由 close 按顺序释放
    source_slot: Arc<Mutex<Option<MediaSource>>>,
    streams: Vec<StreamDescriptor>,
    info: MediaInfo,
    threads: Vec<(&'static str, JoinHandle<()>)>,
}

/// 播放控制器 - 整体控制播放流程
///
/// 状态机：Idle → Playing ↔ Paused → Halted（close/drop，不可逆）
pub struct PlaybackController {
    config: PlayerConfig,
    hw_device: HwDeviceType,
    renderer: Arc<Mutex<Option<Box<dyn Renderer>>>>,
    sink: Arc<Mutex<Option<Box<dyn AudioSink>>>>,
    events_tx: Sender<PlaybackEvent>,
    events_rx: Receiver<PlaybackEvent>,
    session: Option<Session>,
    last_state: PlaybackState,
}

impl PlaybackController {
    pub fn new(
        config: PlayerConfig,
        renderer: Box<dyn Renderer>,
        sink: Box<dyn AudioSink>,
    ) -> Result<Self> {
        config.validate()?;
        let hw_device = match config.hw_device.as_deref() {
            Some(name) => HwDeviceType::from_name(name)?,
            None => HwDeviceType::NONE,
        };

        info!("{} 🎮 创建播放控制器（硬件设备: {}）", log_ctx(), hw_device);
        let (events_tx, events_rx) = unbounded();

        Ok(Self {
            config,
            hw_device,
            renderer: Arc::new(Mutex::new(Some(renderer))),
            sink: Arc::new(Mutex::new(Some(sink))),
            events_tx,
            events_rx,
            session: None,
            last_state: PlaybackState::Idle,
        })
    }

    /// 打开媒体文件并启动工作线程（状态为 Idle，等待 play）
    ///
    /// 已有会话时先 close。
    pub fn open(&mut self, path: impl AsRef<Path>) -> Result<MediaInfo> {
        if self.session.is_some() {
            self.close();
        }

        if !self.hw_device.is_none() {
            warn!(
                "{} 硬件解码尚未实现（{}），使用软件解码",
                log_ctx(),
                self.hw_device
            );
        }

        let source = MediaSource::open(path, self.config.audio)?;
        let has_video = source.has_stream(MediaKind::Video);
        let has_audio = source.has_stream(MediaKind::Audio);

        let session = Session {
            shared: Arc::new(SessionShared::new(
                self.config.poll_interval(),
                self.events_tx.clone(),
            )),
            video_queue: Arc::new(FrameQueue::new(self.config.video_preload_limit)),
            audio_queue: Arc::new(FrameQueue::new(self.config.audio_preload_limit)),
            source_slot: Arc::new(Mutex::new(None)),
            streams: source.streams().to_vec(),
            info: source.info().clone(),
            threads: Vec::new(),
        };
        let info = session.info.clone();
        self.session = Some(session);
        self.last_state = PlaybackState::Idle;

        if let Err(e) = self.spawn_workers(source, has_video, has_audio) {
            error!("{} ❌ 启动工作线程失败: {}", log_ctx(), e);
            self.close();
            return Err(e);
        }

        info!("{} ✅ 已打开: {}x{} {:.2}fps, 时长 {}µs", log_ctx(), info.width, info.height, info.fps, info.duration);
        Ok(info)
    }

    fn spawn_workers(&mut self, source: MediaSource, has_video: bool, has_audio: bool) -> Result<()> {
        let session = self.session.as_mut().ok_or(PlayerError::NotOpened)?;

        // 先取出输出端：缺失时不启动任何线程
        let renderer = if has_video {
            Some(Lease::take(&self.renderer).ok_or_else(|| {
                PlayerError::OpenError("视频输出端不可用".to_string())
            })?)
        } else {
            None
        };
        let sink = if has_audio {
            Some(Lease::take(&self.sink).ok_or_else(|| {
                PlayerError::OpenError("音频输出端不可用".to_string())
            })?)
        } else {
            None
        };

        {
            let worker = DemuxWorker::new(
                source,
                session.shared.clone(),
                session.video_queue.clone(),
                session.audio_queue.clone(),
            );
            let slot = session.source_slot.clone();
            let handle = spawn_worker(&session.shared, "demux", named("demux"), move || {
                let source = worker.run();
                *slot.lock() = Some(source);
            })?;
            session.threads.push(("demux", handle));
        }

        // 输出端在 body 结束时放回槽位，先于 guard 解除登记
        if let Some(mut renderer) = renderer {
            let shared = session.shared.clone();
            let queue = session.video_queue.clone();
            let handle = spawn_worker(&session.shared, "video", named("video"), move || {
                Presenter::new("video", shared, queue, |frame: VideoFrame| {
                    if let Some(renderer) = renderer.get_mut() {
                        renderer.present(frame);
                    }
                })
                .run();
            })?;
            session.threads.push(("video", handle));
        }

        if let Some(mut sink) = sink {
            let shared = session.shared.clone();
            let queue = session.audio_queue.clone();
            let handle = spawn_worker(&session.shared, "audio", named("audio"), move || {
                Presenter::new("audio", shared, queue, |frame: AudioFrame| {
                    if let Some(sink) = sink.get_mut() {
                        let written = sink.write(&frame.data);
                        if written < frame.data.len() {
                            debug!("音频输出只接收了 {}/{} 字节", written, frame.data.len());
                        }
                    }
                })
                .run();
            })?;
            session.threads.push(("audio", handle));
        }

        Ok(())
    }

    /// Idle/Paused → Playing
    pub fn play(&mut self) -> Result<()> {
        let session = self.session.as_ref().ok_or(PlayerError::NotOpened)?;
        session.shared.play()?;
        info!("{} ▶️ 开始播放（位置 {}µs）", log_ctx(), session.shared.position_us());
        Ok(())
    }

    /// Playing → Paused，其他状态下无效果
    pub fn pause(&mut self) {
        if let Some(session) = &self.session {
            if session.shared.pause() {
                info!("{} ⏸️ 暂停（位置 {}µs）", log_ctx(), session.shared.position_us());
            }
        }
    }

    /// 停止会话并释放全部资源：Halted → 等待工作线程退出 → 清空队列 → 释放解码器与容器
    ///
    /// 未打开时无操作。
    pub fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        info!("{} ⏹️ 关闭会话", log_ctx());
        session.shared.halt();

        while !session.shared.wait_workers_idle(Duration::from_secs(1)) {
            warn!(
                "{} ⏳ 等待工作线程退出（剩余 {}）",
                log_ctx(),
                session.shared.live_workers()
            );
        }

        for (name, handle) in session.threads.drain(..) {
            if handle.join().is_err() {
                error!("{} ❌ 工作线程 {} 异常结束", log_ctx(), name);
            }
        }

        let video = session.video_queue.clear();
        let audio = session.audio_queue.clear();
        if video + audio > 0 {
            info!("{} 🗑️ 清空帧队列: {} 视频帧, {} 音频块", log_ctx(), video, audio);
        }

        if let Some(source) = session.source_slot.lock().take() {
            source.close();
        }

        self.last_state = PlaybackState::Halted;
        info!("{} ✅ 会话已关闭，所有线程已清理", log_ctx());
    }

    pub fn state(&self) -> PlaybackState {
        match &self.session {
            Some(session) => session.shared.state(),
            None => self.last_state,
        }
    }

    /// 当前显示时钟（微秒）
    pub fn position_us(&self) -> i64 {
        self.session
            .as_ref()
            .map_or(0, |session| session.shared.position_us())
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        match &self.session {
            Some(session) => &session.streams,
            None => &[],
        }
    }

    pub fn media_info(&self) -> Option<&MediaInfo> {
        self.session.as_ref().map(|session| &session.info)
    }

    pub fn buffer_status(&self) -> BufferStatus {
        match &self.session {
            Some(session) => BufferStatus {
                video_frames: session.video_queue.len(),
                audio_frames: session.audio_queue.len(),
                video_limit: session.video_queue.limit(),
                audio_limit: session.audio_queue.limit(),
            },
            None => BufferStatus {
                video_limit: self.config.video_preload_limit,
                audio_limit: self.config.audio_preload_limit,
                ..BufferStatus::default()
            },
        }
    }

    /// 播放事件接收端
    pub fn events(&self) -> Receiver<PlaybackEvent> {
        self.events_rx.clone()
    }

    pub fn hw_device(&self) -> HwDeviceType {
        self.hw_device
    }

    /// 下次 open 时使用的硬件设备类型
    pub fn set_hw_device(&mut self, device: HwDeviceType) {
        if device != self.hw_device {
            info!("change device type from {} to {}", self.hw_device, device);
            self.hw_device = device;
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.close();
    }
}
