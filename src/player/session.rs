use crate::core::{log_ctx, PlaybackEvent, PlaybackState, PlayerError, PresentationClock, Result};
use crossbeam_channel::Sender;
use log::{debug, error, info};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// 状态锁保护的全部字段：状态、时钟、唤醒纪元
struct ControlBlock {
    state: PlaybackState,
    clock: PresentationClock,
    /// 每次状态切换或队列变化 +1，等待中的线程据此判断是否需要重新检查
    epoch: u64,
    stream_ended: bool,
}

/// 一次状态锁内读取的快照（避免多字段读取撕裂）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: PlaybackState,
    pub epoch: u64,
    pub now_us: i64,
    pub stream_ended: bool,
}

/// 一次播放会话中所有线程共享的控制块
///
/// - `control`：状态机 + 显示时钟，状态切换和工作线程的状态检查都在这把锁内
/// - `wake`：替代固定间隔轮询的通知，等待方最多等到截止时间
/// - `workers`：存活工作线程计数，停机时等待其归零
pub struct SessionShared {
    control: Mutex<ControlBlock>,
    wake: Condvar,
    workers: Mutex<usize>,
    workers_idle: Condvar,
    events: Sender<PlaybackEvent>,
    poll_interval: Duration,
}

impl SessionShared {
    pub fn new(poll_interval: Duration, events: Sender<PlaybackEvent>) -> Self {
        Self {
            control: Mutex::new(ControlBlock {
                state: PlaybackState::Idle,
                clock: PresentationClock::new(),
                epoch: 0,
                stream_ended: false,
            }),
            wake: Condvar::new(),
            workers: Mutex::new(0),
            workers_idle: Condvar::new(),
            events,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = Instant::now();
        let block = self.control.lock();
        Snapshot {
            state: block.state,
            epoch: block.epoch,
            now_us: block.clock.now_us(now),
            stream_ended: block.stream_ended,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.control.lock().state
    }

    /// 当前显示时间（微秒）
    pub fn position_us(&self) -> i64 {
        let now = Instant::now();
        self.control.lock().clock.now_us(now)
    }

    /// Idle/Paused → Playing；Halted 后不可再播放
    pub fn play(&self) -> Result<()> {
        let changed = {
            let mut block = self.control.lock();
            match block.state {
                PlaybackState::Halted => return Err(PlayerError::NotOpened),
                PlaybackState::Playing => false,
                PlaybackState::Idle | PlaybackState::Paused => {
                    block.clock.start(Instant::now());
                    block.state = PlaybackState::Playing;
                    block.epoch += 1;
                    true
                }
            }
        };
        if changed {
            self.wake.notify_all();
            self.emit(PlaybackEvent::StateChanged(PlaybackState::Playing));
        }
        Ok(())
    }

    /// Playing → Paused，返回是否发生了切换
    pub fn pause(&self) -> bool {
        let changed = {
            let mut block = self.control.lock();
            if block.state == PlaybackState::Playing {
                block.clock.pause(Instant::now());
                block.state = PlaybackState::Paused;
                block.epoch += 1;
                true
            } else {
                false
            }
        };
        if changed {
            self.wake.notify_all();
            self.emit(PlaybackEvent::StateChanged(PlaybackState::Paused));
        }
        changed
    }

    /// 任意状态 → Halted（不可逆），返回是否发生了切换
    pub fn halt(&self) -> bool {
        let changed = {
            let mut block = self.control.lock();
            if block.state == PlaybackState::Halted {
                false
            } else {
                block.clock.pause(Instant::now());
                block.state = PlaybackState::Halted;
                block.epoch += 1;
                true
            }
        };
        if changed {
            self.wake.notify_all();
            self.emit(PlaybackEvent::StateChanged(PlaybackState::Halted));
        }
        changed
    }

    /// 解封装结束：之后队列读空即为播放完毕
    pub fn mark_stream_ended(&self) {
        {
            let mut block = self.control.lock();
            block.stream_ended = true;
            block.epoch += 1;
        }
        self.wake.notify_all();
        self.emit(PlaybackEvent::StreamEnded);
    }

    /// 队列发生变化，唤醒等待方；返回新的纪元
    pub fn notify(&self) -> u64 {
        let epoch = {
            let mut block = self.control.lock();
            block.epoch += 1;
            block.epoch
        };
        self.wake.notify_all();
        epoch
    }

    /// 最多等待 `timeout`；纪元变化（状态切换、队列变化）或 Halted 时立即返回
    pub fn sleep(&self, seen_epoch: u64, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let mut block = self.control.lock();
        while block.epoch == seen_epoch && block.state != PlaybackState::Halted {
            if self.wake.wait_until(&mut block, deadline).timed_out() {
                break;
            }
        }
    }

    pub fn emit(&self, event: PlaybackEvent) {
        // 拥有者可能已不再接收事件
        let _ = self.events.send(event);
    }

    pub fn live_workers(&self) -> usize {
        *self.workers.lock()
    }

    /// 等待存活工作线程归零，超时返回 false
    pub fn wait_workers_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.workers.lock();
        while *count > 0 {
            if self.workers_idle.wait_until(&mut count, deadline).timed_out() {
                return *count == 0;
            }
        }
        true
    }
}

/// 工作线程存活登记
///
/// 在 spawn 之前创建（先登记再启动，停机不会漏掉尚未运行的线程），
/// 随闭包移入线程，线程退出时 drop 解除登记。
/// 线程 panic 时在 unwind 过程中把会话切到 Halted 并发出 `Fault`。
pub struct WorkerGuard {
    shared: Arc<SessionShared>,
    name: &'static str,
}

impl WorkerGuard {
    pub fn register(shared: &Arc<SessionShared>, name: &'static str) -> Self {
        let count = {
            let mut workers = shared.workers.lock();
            *workers += 1;
            *workers
        };
        debug!("{} 登记工作线程 {}（存活 {}）", log_ctx(), name, count);
        Self {
            shared: shared.clone(),
            name,
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("{} ❌ 工作线程 {} panic，停止当前会话", log_ctx(), self.name);
            if self.shared.halt() {
                self.shared
                    .emit(PlaybackEvent::Fault(format!("工作线程 {} 异常退出", self.name)));
            }
        }

        let remaining = {
            let mut workers = self.shared.workers.lock();
            *workers -= 1;
            *workers
        };
        self.shared.workers_idle.notify_all();
        info!("{} 🛑 工作线程 {} 退出（剩余 {}）", log_ctx(), self.name, remaining);

        if remaining == 0 && self.shared.state() != PlaybackState::Halted {
            self.shared.emit(PlaybackEvent::Finished);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn shared(poll_ms: u64) -> (Arc<SessionShared>, crossbeam_channel::Receiver<PlaybackEvent>) {
        let (tx, rx) = unbounded();
        (Arc::new(SessionShared::new(Duration::from_millis(poll_ms), tx)), rx)
    }

    #[test]
    fn test_state_transitions() {
        let (shared, events) = shared(10);
        assert_eq!(shared.state(), PlaybackState::Idle);
        shared.play().unwrap();
        assert_eq!(shared.state(), PlaybackState::Playing);
        assert!(shared.pause());
        assert!(!shared.pause());
        assert_eq!(shared.state(), PlaybackState::Paused);
        assert!(shared.halt());
        assert!(!shared.halt());
        assert!(matches!(shared.play(), Err(PlayerError::NotOpened)));
        assert_eq!(shared.state(), PlaybackState::Halted);

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                PlaybackEvent::StateChanged(PlaybackState::Playing),
                PlaybackEvent::StateChanged(PlaybackState::Paused),
                PlaybackEvent::StateChanged(PlaybackState::Halted),
            ]
        );
    }

    #[test]
    fn test_position_frozen_while_paused() {
        let (shared, _events) = shared(10);
        shared.play().unwrap();
        thread::sleep(Duration::from_millis(30));
        shared.pause();
        let paused_at = shared.position_us();
        assert!(paused_at >= 30_000);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(shared.position_us(), paused_at);

        shared.play().unwrap();
        let resumed = shared.position_us();
        assert!(resumed >= paused_at);
        // 暂停的 40ms 不计入
        assert!(resumed < paused_at + 30_000);
    }

    #[test]
    fn test_halt_wakes_sleeper() {
        let (shared, _events) = shared(10);
        let sleeper = {
            let shared = shared.clone();
            thread::spawn(move || {
                let started = Instant::now();
                let epoch = shared.snapshot().epoch;
                shared.sleep(epoch, Duration::from_secs(10));
                started.elapsed()
            })
        };
        thread::sleep(Duration::from_millis(20));
        shared.halt();
        let slept = sleeper.join().unwrap();
        assert!(slept < Duration::from_secs(2));
    }

    #[test]
    fn test_sleep_times_out_without_changes() {
        let (shared, _events) = shared(10);
        let epoch = shared.snapshot().epoch;
        let started = Instant::now();
        shared.sleep(epoch, Duration::from_millis(15));
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_worker_guard_counts_and_finishes() {
        let (shared, events) = shared(10);
        let a = WorkerGuard::register(&shared, "a");
        let b = WorkerGuard::register(&shared, "b");
        assert_eq!(shared.live_workers(), 2);
        drop(a);
        assert!(!shared.wait_workers_idle(Duration::from_millis(5)));
        drop(b);
        assert!(shared.wait_workers_idle(Duration::from_millis(5)));
        assert_eq!(events.try_iter().last(), Some(PlaybackEvent::Finished));
    }

    #[test]
    fn test_halted_session_does_not_report_finished() {
        let (shared, events) = shared(10);
        let guard = WorkerGuard::register(&shared, "w");
        shared.halt();
        drop(guard);
        assert!(!events.try_iter().any(|e| e == PlaybackEvent::Finished));
    }

    #[test]
    fn test_panicking_worker_halts_session() {
        let (shared, events) = shared(10);
        shared.play().unwrap();
        let guard = WorkerGuard::register(&shared, "panicky");
        let handle = thread::spawn(move || {
            let _guard = guard;
            panic!("boom");
        });
        assert!(handle.join().is_err());
        assert_eq!(shared.state(), PlaybackState::Halted);
        assert_eq!(shared.live_workers(), 0);
        assert!(events.try_iter().any(|e| matches!(e, PlaybackEvent::Fault(_))));
    }
}
