//! 模拟 GPU 的观测点
//!
//! 跨设备代际共享：设备丢失重建之后，测试仍然可以检查旧设备的对象是否全部释放。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use super::command::SimCommand;

/// CPU 在 GPU 读取完成之前改写了资源
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hazard {
    pub resource: String,
    /// 读取该资源的那次提交的 fence 值（尚未 signal 时为 0）
    pub fence_value: u64,
    pub description: String,
}

#[derive(Default)]
struct MonitorState {
    /// 每个设备代际的存活对象数
    live: Mutex<HashMap<u64, usize>>,
    hazards: Mutex<Vec<Hazard>>,
    violations: Mutex<Vec<String>>,
    last_submission: Mutex<Vec<SimCommand>>,
    submissions: AtomicU64,
    presents: AtomicU64,
    blocking_waits: AtomicU64,
    device_lost_at: Mutex<Option<u64>>,
    next_id: AtomicU64,
}

/// 模拟 GPU 的统计和错误记录
#[derive(Clone, Default)]
pub struct SimMonitor {
    state: Arc<MonitorState>,
}

impl SimMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某一代设备上仍存活的对象数（设备本身也算一个）
    pub fn live_objects(&self, generation: u64) -> usize {
        self.state.live.lock().get(&generation).copied().unwrap_or(0)
    }

    pub fn total_live_objects(&self) -> usize {
        self.state.live.lock().values().sum()
    }

    pub fn hazards(&self) -> Vec<Hazard> {
        self.state.hazards.lock().clone()
    }

    /// 验证层会报告的错误：错误的屏障前状态、未关闭的列表等
    pub fn violations(&self) -> Vec<String> {
        self.state.violations.lock().clone()
    }

    /// 最近一次执行的命令列表内容
    pub fn last_submission(&self) -> Vec<SimCommand> {
        self.state.last_submission.lock().clone()
    }

    pub fn submissions(&self) -> u64 {
        self.state.submissions.load(Ordering::Acquire)
    }

    pub fn presents(&self) -> u64 {
        self.state.presents.load(Ordering::Acquire)
    }

    /// CPU 真正阻塞等待 fence 的次数
    pub fn blocking_waits(&self) -> u64 {
        self.state.blocking_waits.load(Ordering::Acquire)
    }

    /// 第 `present` 次 Present（从 1 开始计数）报告设备被移除
    pub fn inject_device_lost_at(&self, present: u64) {
        *self.state.device_lost_at.lock() = Some(present);
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn record_hazard(&self, hazard: Hazard) {
        warn!(resource = %hazard.resource, fence = hazard.fence_value, "{}", hazard.description);
        self.state.hazards.lock().push(hazard);
    }

    pub(crate) fn record_violation(&self, message: String) {
        warn!("Simulated validation error: {}", message);
        self.state.violations.lock().push(message);
    }

    pub(crate) fn record_submission(&self, commands: Vec<SimCommand>) {
        self.state.submissions.fetch_add(1, Ordering::AcqRel);
        *self.state.last_submission.lock() = commands;
    }

    /// 计数一次 Present，返回这一次是否应当报告设备丢失
    pub(crate) fn count_present(&self) -> bool {
        let count = self.state.presents.fetch_add(1, Ordering::AcqRel) + 1;
        let mut lost_at = self.state.device_lost_at.lock();
        if *lost_at == Some(count) {
            *lost_at = None;
            return true;
        }
        false
    }

    pub(crate) fn count_blocking_wait(&self) {
        self.state.blocking_waits.fetch_add(1, Ordering::AcqRel);
    }

    fn retain(&self, generation: u64) {
        *self.state.live.lock().entry(generation).or_insert(0) += 1;
    }

    fn release(&self, generation: u64) {
        let mut live = self.state.live.lock();
        if let Some(count) = live.get_mut(&generation) {
            *count = count.saturating_sub(1);
        }
    }
}

/// 模拟的 COM 引用：创建时计数加一，释放时减一
pub(crate) struct ObjectToken {
    monitor: SimMonitor,
    generation: u64,
}

impl ObjectToken {
    pub(crate) fn new(monitor: &SimMonitor, generation: u64) -> Self {
        monitor.retain(generation);
        Self { monitor: monitor.clone(), generation }
    }
}

impl Drop for ObjectToken {
    fn drop(&mut self) {
        self.monitor.release(self.generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_tokens_track_generations() {
        let monitor = SimMonitor::new();
        let a = ObjectToken::new(&monitor, 0);
        let b = ObjectToken::new(&monitor, 0);
        let c = ObjectToken::new(&monitor, 1);
        assert_eq!(monitor.live_objects(0), 2);
        assert_eq!(monitor.live_objects(1), 1);

        drop(a);
        drop(b);
        assert_eq!(monitor.live_objects(0), 0);
        assert_eq!(monitor.total_live_objects(), 1);
        drop(c);
        assert_eq!(monitor.total_live_objects(), 0);
    }

    #[test]
    fn test_device_lost_fires_once() {
        let monitor = SimMonitor::new();
        monitor.inject_device_lost_at(2);
        assert!(!monitor.count_present());
        assert!(monitor.count_present());
        assert!(!monitor.count_present());
        assert_eq!(monitor.presents(), 3);
    }
}
