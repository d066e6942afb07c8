//! 模拟 GPU 对象：资源、描述符堆、管线、fence 和队列时间线

use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{Format, GpuResource, HeapType, Pipeline, PipelineKind};
use crate::renderer::descriptor::{CpuDescriptorHandle, DescriptorHeap, GpuDescriptorHandle, HeapKind};
use crate::renderer::resource::ResourceState;
use crate::renderer::sync::GpuFence;

use super::monitor::{Hazard, ObjectToken, SimMonitor};

/// 模拟描述符的大小
pub(crate) const SIM_DESCRIPTOR_SIZE: u32 = 32;

/// 资源的共享部分，多个引用（例如后缓冲）指向同一份
pub(crate) struct ResourceInner {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) size: u64,
    pub(crate) heap: HeapType,
    pub(crate) format: Format,
    /// 上传堆的内容；其他资源为空
    pub(crate) data: Mutex<Vec<u8>>,
    /// GPU 时间线上的当前状态
    pub(crate) state: Mutex<ResourceState>,
}

/// 模拟资源的一个引用
pub struct SimResource {
    pub(crate) inner: Arc<ResourceInner>,
    _token: ObjectToken,
}

impl SimResource {
    pub(crate) fn new(
        monitor: &SimMonitor,
        generation: u64,
        name: &str,
        size: u64,
        heap: HeapType,
        format: Format,
        initial_state: ResourceState,
    ) -> Self {
        let data = if heap == HeapType::Upload { vec![0u8; size as usize] } else { Vec::new() };
        let inner = ResourceInner {
            id: monitor.next_id(),
            name: name.to_string(),
            size,
            heap,
            format,
            data: Mutex::new(data),
            state: Mutex::new(initial_state),
        };
        Self {
            inner: Arc::new(inner),
            _token: ObjectToken::new(monitor, generation),
        }
    }

    /// 同一资源的新引用
    pub(crate) fn add_ref(&self, monitor: &SimMonitor, generation: u64) -> Self {
        Self {
            inner: self.inner.clone(),
            _token: ObjectToken::new(monitor, generation),
        }
    }

    /// GPU 时间线上的当前状态
    pub fn gpu_state(&self) -> ResourceState {
        *self.inner.state.lock()
    }

    /// 上传堆的当前内容
    pub fn contents(&self) -> Vec<u8> {
        self.inner.data.lock().clone()
    }
}

impl GpuResource for SimResource {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn size(&self) -> u64 {
        self.inner.size
    }

    fn format(&self) -> Format {
        self.inner.format
    }

    fn gpu_address(&self) -> u64 {
        self.inner.id << 32
    }

    fn map(&self) -> Result<NonNull<u8>> {
        if self.inner.heap != HeapType::Upload {
            return Err(GraphicsError::ResourceCreation(format!(
                "'{}' is not in an upload heap and cannot be mapped",
                self.inner.name
            ))
            .into());
        }
        // 缓冲在资源存活期间不会重新分配，指针保持有效
        let mut data = self.inner.data.lock();
        NonNull::new(data.as_mut_ptr()).ok_or_else(|| {
            GraphicsError::ResourceCreation(format!("'{}' has no backing memory", self.inner.name)).into()
        })
    }

    fn unmap(&self) {}
}

/// 描述符槽位里记录的视图
#[derive(Clone)]
pub(crate) struct ViewRecord {
    pub(crate) kind: &'static str,
    pub(crate) resource: Option<Arc<ResourceInner>>,
}

pub struct SimDescriptorHeap {
    kind: HeapKind,
    capacity: u32,
    base: usize,
    shader_visible: bool,
    _token: ObjectToken,
}

impl SimDescriptorHeap {
    pub(crate) fn new(
        monitor: &SimMonitor,
        generation: u64,
        kind: HeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Self {
        // 每个堆占一段不重叠的地址
        let base = (monitor.next_id() as usize) << 20;
        Self {
            kind,
            capacity,
            base,
            shader_visible,
            _token: ObjectToken::new(monitor, generation),
        }
    }
}

impl DescriptorHeap for SimDescriptorHeap {
    fn kind(&self) -> HeapKind {
        self.kind
    }

    fn capacity(&self) -> u32 {
        self.capacity
    }

    fn increment_size(&self) -> u32 {
        SIM_DESCRIPTOR_SIZE
    }

    fn cpu_start(&self) -> CpuDescriptorHandle {
        CpuDescriptorHandle::new(self.base, 0)
    }

    fn gpu_start(&self) -> Option<GpuDescriptorHandle> {
        self.shader_visible.then(|| GpuDescriptorHandle::new(self.base as u64, 0))
    }
}

pub struct SimPipeline {
    pub(crate) name: String,
    pub(crate) kind: PipelineKind,
    _token: ObjectToken,
}

impl SimPipeline {
    pub(crate) fn new(monitor: &SimMonitor, generation: u64, name: &str, kind: PipelineKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            _token: ObjectToken::new(monitor, generation),
        }
    }
}

impl Pipeline for SimPipeline {
    fn kind(&self) -> PipelineKind {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// GPU 完成信号的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuLag {
    /// signal V 时确认 V - n 及之前的值，0 表示立即完成
    Frames(u64),
    /// 只有 CPU 等待或显式推进时才完成
    Manual,
}

/// 提交时记录的上传堆内容
pub(crate) struct Snapshot {
    pub(crate) resource: Arc<ResourceInner>,
    pub(crate) bytes: Vec<u8>,
}

pub(crate) struct Submission {
    pub(crate) list_id: u64,
    pub(crate) snapshots: Vec<Snapshot>,
}

/// 单个直接队列的执行时间线
///
/// GPU 在完成一个 fence 值时才“读取”该值之前提交的上传堆资源：
/// 若内容与提交时不同，说明 CPU 在 GPU 读完之前改写了它。
pub(crate) struct Timeline {
    completed: u64,
    removed: bool,
    lag: GpuLag,
    unsignaled: Vec<Submission>,
    in_flight: VecDeque<(u64, Vec<Submission>)>,
    monitor: SimMonitor,
}

impl Timeline {
    pub(crate) fn new(lag: GpuLag, monitor: SimMonitor) -> Self {
        Self {
            completed: 0,
            removed: false,
            lag,
            unsignaled: Vec::new(),
            in_flight: VecDeque::new(),
            monitor,
        }
    }

    pub(crate) fn completed(&self) -> u64 {
        if self.removed { u64::MAX } else { self.completed }
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.removed
    }

    pub(crate) fn submit(&mut self, submission: Submission) {
        self.unsignaled.push(submission);
    }

    pub(crate) fn signal(&mut self, value: u64) {
        let pending = std::mem::take(&mut self.unsignaled);
        self.in_flight.push_back((value, pending));
        if let GpuLag::Frames(lag) = self.lag {
            self.complete_through(value.saturating_sub(lag));
        }
    }

    /// GPU 执行到 `value` 为止
    pub(crate) fn complete_through(&mut self, value: u64) {
        while let Some((signal, _)) = self.in_flight.front() {
            if *signal > value {
                break;
            }
            if let Some((signal, submissions)) = self.in_flight.pop_front() {
                self.verify_reads(signal, &submissions);
                self.completed = self.completed.max(signal);
            }
        }
    }

    /// 执行所有已 signal 的工作
    pub(crate) fn complete_all(&mut self) {
        if let Some((last, _)) = self.in_flight.back() {
            let last = *last;
            self.complete_through(last);
        }
    }

    /// 命令列表的某次提交是否仍未完成
    pub(crate) fn is_list_pending(&self, list_id: u64) -> bool {
        self.unsignaled.iter().any(|s| s.list_id == list_id)
            || self
                .in_flight
                .iter()
                .any(|(_, submissions)| submissions.iter().any(|s| s.list_id == list_id))
    }

    pub(crate) fn remove_device(&mut self) {
        self.removed = true;
        self.unsignaled.clear();
        self.in_flight.clear();
    }

    fn verify_reads(&self, signal: u64, submissions: &[Submission]) {
        for snapshot in submissions.iter().flat_map(|s| s.snapshots.iter()) {
            let current = snapshot.resource.data.lock();
            if *current != snapshot.bytes {
                self.monitor.record_hazard(Hazard {
                    resource: snapshot.resource.name.clone(),
                    fence_value: signal,
                    description: "CPU wrote upload memory before the GPU finished reading it".to_string(),
                });
            }
        }
    }
}

/// 模拟 fence，信号排在设备的唯一队列上
pub struct SimFence {
    timeline: Arc<Mutex<Timeline>>,
    monitor: SimMonitor,
    _token: ObjectToken,
}

impl SimFence {
    pub(crate) fn new(timeline: Arc<Mutex<Timeline>>, monitor: &SimMonitor, generation: u64) -> Self {
        Self {
            timeline,
            monitor: monitor.clone(),
            _token: ObjectToken::new(monitor, generation),
        }
    }
}

impl GpuFence for SimFence {
    fn completed_value(&self) -> u64 {
        self.timeline.lock().completed()
    }

    fn signal(&self, value: u64) -> Result<()> {
        let mut timeline = self.timeline.lock();
        if timeline.is_removed() {
            return Err(GraphicsError::DeviceLost("Signal on a removed device".to_string()).into());
        }
        timeline.signal(value);
        Ok(())
    }

    fn wait_for(&self, value: u64) -> Result<()> {
        let mut timeline = self.timeline.lock();
        if timeline.completed() >= value {
            return Ok(());
        }
        // 单线程模拟：阻塞等价于让 GPU 追上
        self.monitor.count_blocking_wait();
        timeline.complete_through(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeline_lag() {
        let monitor = SimMonitor::new();
        let mut timeline = Timeline::new(GpuLag::Frames(2), monitor);
        timeline.signal(1);
        timeline.signal(2);
        assert_eq!(timeline.completed(), 0);
        timeline.signal(3);
        assert_eq!(timeline.completed(), 1);
        timeline.complete_all();
        assert_eq!(timeline.completed(), 3);
    }

    #[test]
    fn test_removed_timeline_reports_max() {
        let mut timeline = Timeline::new(GpuLag::Manual, SimMonitor::new());
        timeline.signal(1);
        timeline.remove_device();
        assert_eq!(timeline.completed(), u64::MAX);
    }

    #[test]
    fn test_write_before_completion_is_a_hazard() {
        let monitor = SimMonitor::new();
        let resource = SimResource::new(&monitor, 0, "cb", 4, HeapType::Upload, Format::Unknown, ResourceState::GenericRead);
        let mut timeline = Timeline::new(GpuLag::Manual, monitor.clone());

        timeline.submit(Submission {
            list_id: 7,
            snapshots: vec![Snapshot { resource: resource.inner.clone(), bytes: resource.contents() }],
        });
        timeline.signal(1);
        assert!(timeline.is_list_pending(7));

        resource.inner.data.lock()[0] = 42;
        timeline.complete_through(1);
        assert!(!timeline.is_list_pending(7));
        assert_eq!(monitor.hazards().len(), 1);
        assert_eq!(monitor.hazards()[0].fence_value, 1);
    }
}
