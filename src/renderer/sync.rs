//! CPU-GPU 帧同步模块
//!
//! 一个单调递增的 64 位 fence 计数器，加上操作系统的等待原语，
//! 决定 CPU 何时可以复用某个帧槽位的资源。
//!
//! # 协议
//!
//! 1. 帧 N 的命令提交后，在队列上 signal 一个新值 V，并把 V 记到该帧槽位上
//! 2. 下次轮到同一个槽位时，若 GPU 已完成的值小于 V，就阻塞等待
//! 3. 销毁、重建、改变窗口大小之前调用 `drain_all`，等待所有已提交的工作完成
//!
//! # 槽位状态
//!
//! `Idle → InFlight(V) → Idle`，观察到 `completed >= V` 才回到 `Idle`。
//! 等待没有超时：GPU 挂起就是设备丢失，由 Present 报告。

use std::fmt;

use tracing::trace;

use crate::core::error::{Result, SampleError};

/// Fence 值
///
/// 用于CPU-GPU同步的单调递增值。
/// CPU可以等待GPU完成特定Fence值对应的工作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FenceValue(u64);

impl FenceValue {
    /// 创建新的Fence值
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// 获取内部值
    pub fn value(&self) -> u64 {
        self.0
    }

    /// 下一个Fence值
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// GPU fence 对象
///
/// 由后端实现。`signal` 把信号排进拥有它的队列，GPU 执行到那里时
/// `completed_value` 才会前进。
pub trait GpuFence {
    /// GPU 已经完成的最大值
    fn completed_value(&self) -> u64;

    /// 在队列上排入一个信号
    fn signal(&self, value: u64) -> Result<()>;

    /// 阻塞到 GPU 完成 `value`，没有超时
    fn wait_for(&self, value: u64) -> Result<()>;
}

/// 帧槽位状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    /// 资源可以被 CPU 改写
    Idle,
    /// 已提交，GPU 完成该值之前不可改写
    InFlight(FenceValue),
}

/// `wait_until_slot_free` 的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// 槽位本来就空闲
    Ready,
    /// CPU 阻塞等待过 GPU
    Waited,
}

/// 槽位已空闲的凭证
///
/// 只能由 [`FramePacer::wait_until_slot_free`] 产生，
/// `FrameResourceSet::acquire` 需要它才会交出帧资源。
#[must_use]
#[derive(Debug)]
pub struct SlotReady {
    slot: usize,
    outcome: WaitOutcome,
}

impl SlotReady {
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn outcome(&self) -> WaitOutcome {
        self.outcome
    }
}

/// 帧节奏控制器
///
/// 每个设备一个。持有 fence，记录每个帧槽位最后一次提交的 fence 值。
///
/// # 示例
///
/// ```ignore
/// let ready = pacer.wait_until_slot_free(slot)?;
/// let frame = frames.acquire(ready)?;
/// // ... 录制并提交 ...
/// frame.fence_value = pacer.signal_after_submit(slot)?;
/// ```
pub struct FramePacer<F: GpuFence> {
    fence: F,
    /// 创建时 fence 的值，第一次 signal 的值是它加一
    initial_value: FenceValue,
    /// 最后一次 signal 的值（CPU 侧计数器）
    last_signaled: FenceValue,
    slots: Vec<SlotState>,
    submitted: u64,
    wait_count: u64,
}

impl<F: GpuFence> FramePacer<F> {
    /// 创建节奏控制器
    ///
    /// # 参数
    ///
    /// * `fence` - 新创建的 fence
    /// * `slot_count` - 帧槽位数量（交换链缓冲数量）
    pub fn new(fence: F, slot_count: usize) -> Self {
        let initial_value = FenceValue::new(fence.completed_value());
        Self {
            fence,
            initial_value,
            last_signaled: initial_value,
            slots: vec![SlotState::Idle; slot_count],
            submitted: 0,
            wait_count: 0,
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn fence(&self) -> &F {
        &self.fence
    }

    pub fn initial_value(&self) -> FenceValue {
        self.initial_value
    }

    /// 最后一次 signal 的值
    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    /// GPU 已完成的值
    pub fn completed_value(&self) -> FenceValue {
        FenceValue::new(self.fence.completed_value())
    }

    /// 提交过的帧数
    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// CPU 真正阻塞过的次数
    pub fn wait_count(&self) -> u64 {
        self.wait_count
    }

    fn check_slot(&self, slot: usize) -> Result<()> {
        if slot >= self.slots.len() {
            return Err(SampleError::Runtime(format!(
                "Frame slot {} out of range ({} slots)",
                slot,
                self.slots.len()
            )));
        }
        Ok(())
    }

    /// 命令提交之后调用：signal 一个新值并标记槽位
    ///
    /// # 返回值
    ///
    /// 这一帧的 fence 值，严格大于之前所有返回值
    pub fn signal_after_submit(&mut self, slot: usize) -> Result<FenceValue> {
        self.check_slot(slot)?;

        let value = self.last_signaled.next();
        self.fence.signal(value.value())?;
        self.last_signaled = value;
        self.slots[slot] = SlotState::InFlight(value);
        self.submitted += 1;

        trace!(slot, fence = value.value(), "Frame submitted");
        Ok(value)
    }

    /// 复用槽位之前调用：必要时阻塞到 GPU 完成该槽位上一次的工作
    pub fn wait_until_slot_free(&mut self, slot: usize) -> Result<SlotReady> {
        self.check_slot(slot)?;

        let outcome = match self.slots[slot] {
            SlotState::Idle => WaitOutcome::Ready,
            SlotState::InFlight(value) => {
                if self.fence.completed_value() >= value.value() {
                    WaitOutcome::Ready
                } else {
                    self.wait_count += 1;
                    trace!(
                        slot,
                        fence = value.value(),
                        completed = self.fence.completed_value(),
                        "Waiting for frame slot"
                    );
                    self.fence.wait_for(value.value())?;
                    WaitOutcome::Waited
                }
            }
        };

        self.slots[slot] = SlotState::Idle;
        Ok(SlotReady { slot, outcome })
    }

    /// 等待所有已提交的工作完成
    ///
    /// signal 一个新值再等它，可以重复调用。之后所有槽位都是 `Idle`。
    pub fn drain_all(&mut self) -> Result<()> {
        let value = self.last_signaled.next();
        self.fence.signal(value.value())?;
        self.last_signaled = value;

        if self.fence.completed_value() < value.value() {
            self.fence.wait_for(value.value())?;
        }

        for slot in self.slots.iter_mut() {
            *slot = SlotState::Idle;
        }

        trace!(fence = value.value(), "GPU drained");
        Ok(())
    }

    /// 槽位当前状态
    ///
    /// 已被 GPU 完成的 `InFlight` 报告为 `Idle`。
    pub fn slot_state(&self, slot: usize) -> SlotState {
        match self.slots.get(slot) {
            Some(SlotState::InFlight(value)) if self.fence.completed_value() >= value.value() => {
                SlotState::Idle
            }
            Some(state) => *state,
            None => SlotState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// 手动推进的 fence：wait_for 直接把完成值推到目标
    #[derive(Default)]
    struct ManualFence {
        completed: Cell<u64>,
        signals: RefCell<Vec<u64>>,
        waits: RefCell<Vec<u64>>,
    }

    impl GpuFence for ManualFence {
        fn completed_value(&self) -> u64 {
            self.completed.get()
        }

        fn signal(&self, value: u64) -> Result<()> {
            self.signals.borrow_mut().push(value);
            Ok(())
        }

        fn wait_for(&self, value: u64) -> Result<()> {
            self.waits.borrow_mut().push(value);
            self.completed.set(self.completed.get().max(value));
            Ok(())
        }
    }

    #[test]
    fn test_fence_value() {
        let fence = FenceValue::new(1);
        assert_eq!(fence.value(), 1);
        assert_eq!(fence.next().value(), 2);
        assert!(FenceValue::new(1) < FenceValue::new(2));
    }

    #[test]
    fn test_first_signal_is_one() {
        let mut pacer = FramePacer::new(ManualFence::default(), 2);
        assert_eq!(pacer.initial_value().value(), 0);

        let value = pacer.signal_after_submit(0).unwrap();
        assert_eq!(value.value(), 1);
        assert_eq!(pacer.slot_state(0), SlotState::InFlight(value));
        assert_eq!(pacer.slot_state(1), SlotState::Idle);
    }

    #[test]
    fn test_values_strictly_increase() {
        let mut pacer = FramePacer::new(ManualFence::default(), 3);
        let mut last = 0;
        for frame in 0..20 {
            let slot = frame % 3;
            let _ = pacer.wait_until_slot_free(slot).unwrap();
            let value = pacer.signal_after_submit(slot).unwrap().value();
            assert!(value > last);
            last = value;
        }
        assert_eq!(pacer.submitted(), 20);
        assert_eq!(*pacer.fence().signals.borrow(), (1..=20).collect::<Vec<_>>());
    }

    #[test]
    fn test_wait_only_when_not_completed() {
        let mut pacer = FramePacer::new(ManualFence::default(), 2);
        pacer.signal_after_submit(0).unwrap();

        // 未完成：需要等待
        let ready = pacer.wait_until_slot_free(0).unwrap();
        assert_eq!(ready.outcome(), WaitOutcome::Waited);
        assert_eq!(ready.slot(), 0);
        assert_eq!(pacer.wait_count(), 1);

        // 已完成：不等待
        pacer.signal_after_submit(1).unwrap();
        pacer.fence().completed.set(2);
        let ready = pacer.wait_until_slot_free(1).unwrap();
        assert_eq!(ready.outcome(), WaitOutcome::Ready);
        assert_eq!(pacer.wait_count(), 1);
        assert_eq!(*pacer.fence().waits.borrow(), vec![1]);
    }

    #[test]
    fn test_drain_all_is_idempotent() {
        let mut pacer = FramePacer::new(ManualFence::default(), 2);
        pacer.signal_after_submit(0).unwrap();
        pacer.signal_after_submit(1).unwrap();

        pacer.drain_all().unwrap();
        assert_eq!(pacer.completed_value(), pacer.last_signaled());
        assert_eq!(pacer.slot_state(0), SlotState::Idle);
        assert_eq!(pacer.slot_state(1), SlotState::Idle);

        pacer.drain_all().unwrap();
        assert_eq!(pacer.last_signaled().value(), 4);
        assert_eq!(pacer.completed_value().value(), 4);
    }

    #[test]
    fn test_slot_out_of_range() {
        let mut pacer = FramePacer::new(ManualFence::default(), 2);
        assert!(pacer.signal_after_submit(2).is_err());
        assert!(pacer.wait_until_slot_free(5).is_err());
    }
}
