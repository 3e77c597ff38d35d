use parking_lot::Mutex;
use std::collections::VecDeque;

/// 有界帧队列
///
/// - FIFO：插入顺序 = 解码顺序 = 显示顺序，从不重排
/// - 容量即预加载上限，满时 `try_push` 把单元原样退回
/// - 所有访问都在队列自己的锁内完成，锁只在单次入队/出队期间持有
pub struct FrameQueue<T> {
    items: Mutex<VecDeque<T>>,
    limit: usize,
}

impl<T> FrameQueue<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(limit)),
            limit,
        }
    }

    /// 预加载上限
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// 是否还能继续入队（背压判断）
    pub fn has_room(&self) -> bool {
        self.items.lock().len() < self.limit
    }

    /// 入队；队列已满时返回 `Err(item)`，所有权交还调用者
    pub fn try_push(&self, item: T) -> std::result::Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.limit {
            return Err(item);
        }
        items.push_back(item);
        Ok(())
    }

    /// 查看队首（不出队）
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.items.lock().front().map(f)
    }

    /// 出队，所有权转移给调用者
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// 清空队列，返回丢弃的数量
    pub fn clear(&self) -> usize {
        let drained: Vec<T> = self.items.lock().drain(..).collect();
        // 在锁外释放帧数据
        drained.len()
    }
}
