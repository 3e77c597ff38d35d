use std::time::{Duration, Instant};

/// 播放时钟 - 用于音视频同步
///
/// 当前显示时间 = `stream_offset + (now - start_wall)`（仅播放中）。
/// `stream_offset` 只累加播放中流逝的时间，暂停时间不计入。
/// 时钟本身不加锁，由 `SessionShared` 的状态锁统一保护。
#[derive(Debug, Clone)]
pub struct PresentationClock {
    stream_offset: Duration,
    start_wall: Instant,
    running: bool,
}

impl PresentationClock {
    pub fn new() -> Self {
        Self {
            stream_offset: Duration::ZERO,
            start_wall: Instant::now(),
            running: false,
        }
    }

    /// 开始 / 恢复计时：重置起点，保留已累计的偏移
    pub fn start(&mut self, now: Instant) {
        if !self.running {
            self.start_wall = now;
            self.running = true;
        }
    }

    /// 暂停：把本段播放时长折入偏移
    pub fn pause(&mut self, now: Instant) {
        if self.running {
            self.stream_offset += now.saturating_duration_since(self.start_wall);
            self.running = false;
        }
    }

    /// 获取 `now` 时刻的显示时间（微秒）
    pub fn now_us(&self, now: Instant) -> i64 {
        let elapsed = if self.running {
            now.saturating_duration_since(self.start_wall)
        } else {
            Duration::ZERO
        };
        (self.stream_offset + elapsed).as_micros() as i64
    }

    /// 已累计的播放偏移（不含当前段）
    pub fn stream_offset(&self) -> Duration {
        self.stream_offset
    }
}

impl Default for PresentationClock {
    fn default() -> Self {
        Self::new()
    }
}
