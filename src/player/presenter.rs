use crate::core::{log_ctx, PlaybackState, Timed};
use crate::player::frame_queue::FrameQueue;
use crate::player::session::SessionShared;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// 队首单元相对显示时钟的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTiming {
    /// `pts <= now < pts + duration`：立即输出，之后最多等待 `remaining_us`
    Current { remaining_us: i64 },
    /// `now < pts`：还没到时间
    Early { wait_us: i64 },
    /// `now >= pts + duration`：已过期，丢弃
    Stale,
}

/// 音画同步核心判定
pub fn classify(pts: i64, duration: i64, now: i64) -> FrameTiming {
    let end = pts.saturating_add(duration);
    if now < pts {
        FrameTiming::Early { wait_us: pts - now }
    } else if now < end {
        FrameTiming::Current { remaining_us: end - now }
    } else {
        FrameTiming::Stale
    }
}

/// 单步处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// 已输出队首，最多等待 `hold_us` 后再检查
    Emitted { pts: i64, hold_us: i64 },
    /// 丢弃了过期或乱序的队首，应立即重新检查
    Dropped { pts: i64 },
    /// 队首未到时间
    Wait { wait_us: i64 },
    Empty,
}

/// 统计信息（线程退出时打印）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PresenterStats {
    pub presented: u64,
    pub dropped: u64,
}

/// 显示线程：按显示时钟消费队首
///
/// `emit` 接收出队单元的所有权（视频帧交给 Renderer，PCM 写入 AudioSink），
/// 单元在 `emit` 返回后释放。
pub struct Presenter<T, E> {
    name: &'static str,
    shared: Arc<SessionShared>,
    queue: Arc<FrameQueue<T>>,
    emit: E,
    last_pts: Option<i64>,
    stats: PresenterStats,
}

impl<T, E> Presenter<T, E>
where
    T: Timed,
    E: FnMut(T),
{
    pub fn new(
        name: &'static str,
        shared: Arc<SessionShared>,
        queue: Arc<FrameQueue<T>>,
        emit: E,
    ) -> Self {
        Self {
            name,
            shared,
            queue,
            emit,
            last_pts: None,
            stats: PresenterStats::default(),
        }
    }

    /// 以 `now_us` 处理一次队首（只在 Playing 时调用）
    pub fn step(&mut self, now_us: i64) -> Step {
        let Some((pts, duration)) = self.queue.peek_with(|u| (u.pts_us(), u.duration_us())) else {
            return Step::Empty;
        };

        // 保证输出时间戳单调不减
        let out_of_order = self.last_pts.map_or(false, |last| pts < last);
        let timing = if out_of_order {
            FrameTiming::Stale
        } else {
            classify(pts, duration, now_us)
        };

        match timing {
            FrameTiming::Stale => {
                self.queue.pop();
                self.stats.dropped += 1;
                if self.stats.dropped <= 5 || self.stats.dropped % 100 == 0 {
                    debug!(
                        "{} 🗑️ {} 丢弃过期单元 pts={}µs now={}µs（累计 {}）",
                        log_ctx(), self.name, pts, now_us, self.stats.dropped
                    );
                }
                Step::Dropped { pts }
            }
            FrameTiming::Early { wait_us } => Step::Wait { wait_us },
            FrameTiming::Current { remaining_us } => match self.queue.pop() {
                Some(unit) => {
                    (self.emit)(unit);
                    self.last_pts = Some(pts);
                    self.stats.presented += 1;
                    Step::Emitted { pts, hold_us: remaining_us }
                }
                None => Step::Empty,
            },
        }
    }

    /// 线程主循环，Halted 或（解封装结束且队列读空）时返回
    pub fn run(mut self) -> PresenterStats {
        info!("{} 🎬 显示线程 {} 启动", log_ctx(), self.name);
        let poll = self.shared.poll_interval();

        loop {
            let snap = self.shared.snapshot();
            match snap.state {
                PlaybackState::Halted => break,
                PlaybackState::Idle | PlaybackState::Paused => {
                    self.shared.sleep(snap.epoch, poll);
                    continue;
                }
                PlaybackState::Playing => {}
            }

            match self.step(snap.now_us) {
                Step::Emitted { hold_us, .. } => {
                    let epoch = self.shared.notify();
                    self.shared.sleep(epoch, micros(hold_us));
                }
                Step::Dropped { .. } => {
                    self.shared.notify();
                }
                Step::Wait { wait_us } => self.shared.sleep(snap.epoch, micros(wait_us)),
                Step::Empty => {
                    if snap.stream_ended {
                        info!("{} ✅ {} 队列已播完", log_ctx(), self.name);
                        break;
                    }
                    self.shared.sleep(snap.epoch, poll);
                }
            }
        }

        info!(
            "{} 🛑 显示线程 {} 结束（输出 {}，丢弃 {}）",
            log_ctx(), self.name, self.stats.presented, self.stats.dropped
        );
        self.stats
    }
}

fn micros(us: i64) -> Duration {
    Duration::from_micros(us.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PixelFormat, VideoFrame};
    use crate::player::session::WorkerGuard;
    use crossbeam_channel::unbounded;
    use std::thread;
    use std::time::Instant;

    fn frame(pts: i64, duration: i64) -> VideoFrame {
        VideoFrame {
            pts,
            duration,
            width: 1,
            height: 1,
            format: PixelFormat::RGBA,
            strides: vec![4],
            data: vec![0; 4],
        }
    }

    fn shared(poll_ms: u64) -> Arc<SessionShared> {
        let (tx, _rx) = unbounded();
        Arc::new(SessionShared::new(Duration::from_millis(poll_ms), tx))
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(100, 50, 99), FrameTiming::Early { wait_us: 1 });
        assert_eq!(classify(100, 50, 100), FrameTiming::Current { remaining_us: 50 });
        assert_eq!(classify(100, 50, 149), FrameTiming::Current { remaining_us: 1 });
        assert_eq!(classify(100, 50, 150), FrameTiming::Stale);
    }

    #[test]
    fn test_classify_at_150ms() {
        let now = 150_000;
        assert_eq!(classify(0, 100_000, now), FrameTiming::Stale);
        assert_eq!(
            classify(100_000, 100_000, now),
            FrameTiming::Current { remaining_us: 50_000 }
        );
        assert_eq!(
            classify(200_000, 100_000, now),
            FrameTiming::Early { wait_us: 50_000 }
        );
    }

    #[test]
    fn test_step_drops_stale_then_emits_current() {
        let queue = Arc::new(FrameQueue::new(8));
        for pts in [0, 100_000, 200_000] {
            queue.try_push(frame(pts, 100_000)).unwrap();
        }
        let mut emitted = Vec::new();
        let mut presenter = Presenter::new("video", shared(10), queue.clone(), |f: VideoFrame| {
            emitted.push(f.pts)
        });

        assert_eq!(presenter.step(150_000), Step::Dropped { pts: 0 });
        assert_eq!(
            presenter.step(150_000),
            Step::Emitted { pts: 100_000, hold_us: 50_000 }
        );
        assert_eq!(presenter.step(150_000), Step::Wait { wait_us: 50_000 });
        assert_eq!(queue.len(), 1);
        drop(presenter);
        assert_eq!(emitted, vec![100_000]);
    }

    #[test]
    fn test_step_drops_out_of_order_frames() {
        let queue = Arc::new(FrameQueue::new(8));
        queue.try_push(frame(100_000, 100_000)).unwrap();
        queue.try_push(frame(50_000, 200_000)).unwrap();
        let mut presenter = Presenter::new("video", shared(10), queue, |_f: VideoFrame| {});
        assert!(matches!(presenter.step(120_000), Step::Emitted { pts: 100_000, .. }));
        // pts 50000 仍在持续时间内，但早于已输出的帧
        assert_eq!(presenter.step(120_000), Step::Dropped { pts: 50_000 });
        assert_eq!(presenter.step(120_000), Step::Empty);
    }

    #[test]
    fn test_run_presents_in_order_and_exits_when_drained() {
        let shared = shared(5);
        let queue = Arc::new(FrameQueue::new(8));
        for i in 0..5 {
            queue.try_push(frame(i * 10_000, 10_000)).unwrap();
        }
        shared.mark_stream_ended();
        shared.play().unwrap();

        let (tx, rx) = unbounded();
        let stats = Presenter::new("video", shared, queue.clone(), move |f: VideoFrame| {
            tx.send(f.pts).unwrap();
        })
        .run();

        let emitted: Vec<i64> = rx.try_iter().collect();
        assert!(emitted.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(stats.presented + stats.dropped, 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_paused_presenter_does_not_consume() {
        let shared = shared(5);
        let queue = Arc::new(FrameQueue::new(4));
        queue.try_push(frame(0, 1_000_000)).unwrap();
        let guard = WorkerGuard::register(&shared, "video");
        let handle = {
            let shared = shared.clone();
            let queue = queue.clone();
            thread::spawn(move || {
                let _guard = guard;
                Presenter::new("video", shared, queue, |_f: VideoFrame| {}).run()
            })
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(queue.len(), 1);
        shared.halt();
        let stats = handle.join().unwrap();
        assert_eq!(stats.presented, 0);
    }

    #[test]
    fn test_halt_while_workers_sleep_releases_them_within_bound() {
        let poll = Duration::from_millis(20);
        let shared = shared(20);
        let queue = Arc::new(FrameQueue::new(4));
        // 10 秒后才到时间：显示线程会进入长等待
        queue.try_push(frame(10_000_000, 40_000)).unwrap();
        shared.play().unwrap();

        let presenter = {
            let guard = WorkerGuard::register(&shared, "video");
            let shared = shared.clone();
            let queue = queue.clone();
            thread::spawn(move || {
                let _guard = guard;
                Presenter::new("video", shared, queue, |_f: VideoFrame| {}).run();
            })
        };
        let poller = {
            let guard = WorkerGuard::register(&shared, "poller");
            let shared = shared.clone();
            thread::spawn(move || {
                let _guard = guard;
                loop {
                    let snap = shared.snapshot();
                    if snap.state == PlaybackState::Halted {
                        break;
                    }
                    shared.sleep(snap.epoch, shared.poll_interval());
                }
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(shared.live_workers(), 2);
        let halted_at = Instant::now();
        shared.halt();
        // 上限：轮询间隔 + 帧持续时间
        assert!(shared.wait_workers_idle(poll + Duration::from_millis(40) + Duration::from_millis(200)));
        assert!(halted_at.elapsed() < Duration::from_millis(260));
        presenter.join().unwrap();
        poller.join().unwrap();
        assert_eq!(queue.len(), 1);
    }
}
