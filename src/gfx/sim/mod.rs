//! 模拟 GPU 后端
//!
//! 在内存中模拟设备、直接队列和交换链，用于无窗口运行和测试帧同步协议。
//!
//! # 模拟内容
//!
//! - **队列时间线**：提交按顺序排队，fence 按 [`GpuLag`] 策略完成
//! - **读写冲突**：GPU 完成时比较上传堆内容与提交时的快照
//! - **状态校验**：执行时检查每个屏障的前状态与资源的实际状态一致
//! - **设备丢失**：在指定的 Present 上报告设备被移除
//! - **引用计数**：每个对象持有一个计数，按设备代际统计

mod command;
mod monitor;
mod objects;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::core::config::Config;
use crate::core::error::{GraphicsError, Result};
use crate::gfx::backend::{
    Backend, BufferDesc, ComputePipelineDesc, Format, GraphicsPipelineDesc, HeapType, PipelineKind,
    ResourceView, TextureDesc,
};
use crate::renderer::descriptor::{CpuDescriptorHandle, HeapKind};
use crate::renderer::resource::ResourceState;

pub use command::{SimCommand, SimCommandList};
pub use monitor::{Hazard, SimMonitor};
pub use objects::{GpuLag, SimDescriptorHeap, SimFence, SimPipeline, SimResource};

use monitor::ObjectToken;
use objects::{Snapshot, Submission, Timeline, ViewRecord};

/// 模拟设备参数
#[derive(Debug, Clone)]
pub struct SimOptions {
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    pub gpu_lag: GpuLag,
    /// 交换链给出的后缓冲索引顺序，`None` 表示轮转
    pub back_buffer_order: Option<Vec<usize>>,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_count: 2,
            gpu_lag: GpuLag::Frames(1),
            back_buffer_order: None,
        }
    }
}

impl SimOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            width: config.window.width,
            height: config.window.height,
            frame_count: config.graphics.frame_count,
            gpu_lag: GpuLag::Frames(config.simulation.gpu_lag),
            back_buffer_order: None,
        }
    }
}

/// 模拟后端
pub struct SimBackend {
    options: SimOptions,
    generation: u64,
    monitor: SimMonitor,
    timeline: Arc<Mutex<Timeline>>,
    /// CPU 句柄地址 -> 视图（GPU 句柄使用同一地址）
    descriptors: Arc<Mutex<HashMap<usize, ViewRecord>>>,
    back_buffers: Vec<SimResource>,
    current: usize,
    presents: u64,
    _token: ObjectToken,
}

impl SimBackend {
    /// 创建第 `generation` 代模拟设备
    pub fn new(options: SimOptions, monitor: &SimMonitor, generation: u64) -> Result<Self> {
        if options.frame_count == 0 || options.width == 0 || options.height == 0 {
            return Err(GraphicsError::DeviceCreation(format!(
                "Invalid swap chain {}x{} with {} buffers",
                options.width, options.height, options.frame_count
            ))
            .into());
        }
        if let Some(order) = &options.back_buffer_order {
            if order.is_empty() || order.iter().any(|&i| i >= options.frame_count) {
                return Err(GraphicsError::SwapchainError(format!(
                    "Back buffer order {:?} does not fit {} buffers",
                    order, options.frame_count
                ))
                .into());
            }
        }

        let token = ObjectToken::new(monitor, generation);
        let timeline = Arc::new(Mutex::new(Timeline::new(options.gpu_lag, monitor.clone())));
        let back_buffers = Self::create_back_buffers(&options, monitor, generation);
        let current = Self::index_for_present(&options, 0);

        info!(
            generation,
            width = options.width,
            height = options.height,
            buffers = options.frame_count,
            lag = ?options.gpu_lag,
            "Simulated device created"
        );

        Ok(Self {
            options,
            generation,
            monitor: monitor.clone(),
            timeline,
            descriptors: Arc::new(Mutex::new(HashMap::new())),
            back_buffers,
            current,
            presents: 0,
            _token: token,
        })
    }

    /// 设备工厂，设备丢失后用它重建
    pub fn factory(options: SimOptions, monitor: SimMonitor) -> impl FnMut(u64) -> Result<SimBackend> + 'static {
        move |generation| SimBackend::new(options.clone(), &monitor, generation)
    }

    fn create_back_buffers(options: &SimOptions, monitor: &SimMonitor, generation: u64) -> Vec<SimResource> {
        (0..options.frame_count)
            .map(|i| {
                SimResource::new(
                    monitor,
                    generation,
                    &format!("Back Buffer {}", i),
                    0,
                    HeapType::Default,
                    Format::Rgba8Unorm,
                    ResourceState::Present,
                )
            })
            .collect()
    }

    fn index_for_present(options: &SimOptions, presents: u64) -> usize {
        match &options.back_buffer_order {
            Some(order) => order[(presents % order.len() as u64) as usize],
            None => (presents % options.frame_count as u64) as usize,
        }
    }

    pub fn monitor(&self) -> &SimMonitor {
        &self.monitor
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_removed(&self) -> bool {
        self.timeline.lock().is_removed()
    }

    /// 让 GPU 执行到 `value`（用于 `GpuLag::Manual`）
    pub fn advance_gpu(&self, value: u64) {
        self.timeline.lock().complete_through(value);
    }

    /// 让 GPU 执行完所有已 signal 的工作
    pub fn complete_all(&self) {
        self.timeline.lock().complete_all();
    }

    fn check_alive(&self) -> Result<()> {
        if self.is_removed() {
            return Err(GraphicsError::DeviceLost("The simulated device was removed".to_string()).into());
        }
        Ok(())
    }

    fn record_view(&self, dest: CpuDescriptorHandle, kind: &'static str, resource: Option<&SimResource>) {
        self.descriptors.lock().insert(
            dest.ptr,
            ViewRecord { kind, resource: resource.map(|r| r.inner.clone()) },
        );
    }
}

impl Backend for SimBackend {
    type Fence = SimFence;
    type CommandList = SimCommandList;
    type DescriptorHeap = SimDescriptorHeap;
    type Resource = SimResource;
    type Pipeline = SimPipeline;

    fn name(&self) -> &'static str {
        "Simulated GPU"
    }

    fn frame_count(&self) -> usize {
        self.options.frame_count
    }

    fn size(&self) -> (u32, u32) {
        (self.options.width, self.options.height)
    }

    fn current_back_buffer_index(&self) -> usize {
        self.current
    }

    fn back_buffer(&self, index: usize) -> Result<SimResource> {
        self.back_buffers
            .get(index)
            .map(|buffer| buffer.add_ref(&self.monitor, self.generation))
            .ok_or_else(|| GraphicsError::SwapchainError(format!("No back buffer {}", index)).into())
    }

    fn create_fence(&self, _initial_value: u64) -> Result<SimFence> {
        self.check_alive()?;
        Ok(SimFence::new(self.timeline.clone(), &self.monitor, self.generation))
    }

    fn create_command_list(&self, name: &str) -> Result<SimCommandList> {
        self.check_alive()?;
        Ok(SimCommandList::new(
            name,
            self.descriptors.clone(),
            self.timeline.clone(),
            &self.monitor,
            self.generation,
        ))
    }

    fn create_descriptor_heap(&self, kind: HeapKind, capacity: u32, shader_visible: bool) -> Result<SimDescriptorHeap> {
        self.check_alive()?;
        if shader_visible && !kind.is_shader_visible() {
            return Err(GraphicsError::ResourceCreation(format!(
                "{} heaps cannot be shader visible",
                kind.name()
            ))
            .into());
        }
        debug!(heap = kind.name(), capacity, "Descriptor heap created");
        Ok(SimDescriptorHeap::new(&self.monitor, self.generation, kind, capacity, shader_visible))
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<SimResource> {
        self.check_alive()?;
        if desc.heap == HeapType::Upload && desc.unordered_access {
            return Err(GraphicsError::ResourceCreation(format!(
                "Upload buffer '{}' cannot allow unordered access",
                desc.name
            ))
            .into());
        }
        Ok(SimResource::new(
            &self.monitor,
            self.generation,
            desc.name,
            desc.size,
            desc.heap,
            Format::Unknown,
            desc.initial_state,
        ))
    }

    fn create_texture(&self, desc: &TextureDesc<'_>) -> Result<SimResource> {
        self.check_alive()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(GraphicsError::ResourceCreation(format!("Texture '{}' has zero size", desc.name)).into());
        }
        Ok(SimResource::new(
            &self.monitor,
            self.generation,
            desc.name,
            0,
            HeapType::Default,
            desc.format,
            desc.initial_state,
        ))
    }

    fn create_view(&self, view: &ResourceView<'_, Self>, dest: CpuDescriptorHandle) -> Result<()> {
        self.check_alive()?;
        match view {
            ResourceView::ConstantBuffer { resource, size } => {
                if *size as u64 > resource.inner.size || size % 256 != 0 {
                    self.monitor.record_violation(format!(
                        "CBV of {} bytes on '{}' ({} bytes) is not 256-byte aligned or too large",
                        size, resource.inner.name, resource.inner.size
                    ));
                }
                self.record_view(dest, "CBV", Some(resource));
            }
            ResourceView::BufferSrv { resource, .. } => self.record_view(dest, "SRV", Some(resource)),
            ResourceView::BufferUav { resource, .. } => self.record_view(dest, "UAV", Some(resource)),
            ResourceView::TextureSrv(resource) => self.record_view(dest, "SRV", Some(resource)),
            ResourceView::TextureUav(resource) => self.record_view(dest, "UAV", Some(resource)),
            ResourceView::NullTextureSrv => self.record_view(dest, "SRV", None),
            ResourceView::RenderTarget(resource) => self.record_view(dest, "RTV", Some(resource)),
            ResourceView::DepthStencil(resource) => self.record_view(dest, "DSV", Some(resource)),
            ResourceView::Sampler(_) => self.record_view(dest, "Sampler", None),
        }
        Ok(())
    }

    fn create_graphics_pipeline(&self, desc: &GraphicsPipelineDesc<'_>) -> Result<SimPipeline> {
        self.check_alive()?;
        if desc.vertex_shader.is_empty() {
            return Err(GraphicsError::ShaderLoad(format!("Pipeline '{}' has no vertex shader", desc.name)).into());
        }
        if desc.hull_shader.is_some() != desc.domain_shader.is_some() {
            return Err(GraphicsError::ShaderLoad(format!(
                "Pipeline '{}' needs both hull and domain shaders",
                desc.name
            ))
            .into());
        }
        Ok(SimPipeline::new(&self.monitor, self.generation, desc.name, PipelineKind::Graphics))
    }

    fn create_compute_pipeline(&self, desc: &ComputePipelineDesc<'_>) -> Result<SimPipeline> {
        self.check_alive()?;
        if desc.compute_shader.is_empty() {
            return Err(GraphicsError::ShaderLoad(format!("Pipeline '{}' has no compute shader", desc.name)).into());
        }
        Ok(SimPipeline::new(&self.monitor, self.generation, desc.name, PipelineKind::Compute))
    }

    fn execute(&self, list: &SimCommandList) -> Result<()> {
        let mut timeline = self.timeline.lock();
        if timeline.is_removed() {
            // 设备移除后的提交被丢弃
            return Ok(());
        }

        if !list.closed {
            self.monitor.record_violation(format!("{}: executed while still open", list.name()));
        }
        for error in &list.errors {
            self.monitor.record_violation(error.clone());
        }

        for transition in &list.transitions {
            let mut state = transition.resource.state.lock();
            if *state != transition.before {
                self.monitor.record_violation(format!(
                    "'{}' transitioned from {:?} but is in {:?}",
                    transition.resource.name, transition.before, *state
                ));
            }
            *state = transition.after;
        }

        let snapshots = list
            .references
            .iter()
            .map(|resource| Snapshot { resource: resource.clone(), bytes: resource.data.lock().clone() })
            .collect();
        timeline.submit(Submission { list_id: list.id, snapshots });
        drop(timeline);

        self.monitor.record_submission(list.commands.clone());
        Ok(())
    }

    fn present(&mut self, _sync_interval: u32) -> Result<()> {
        self.check_alive()?;

        let back_buffer = &self.back_buffers[self.current];
        let state = back_buffer.gpu_state();
        if state != ResourceState::Present {
            self.monitor.record_violation(format!(
                "Presented '{}' in state {:?}",
                back_buffer.inner.name, state
            ));
        }

        if self.monitor.count_present() {
            self.timeline.lock().remove_device();
            warn!(generation = self.generation, "Simulated device removed at present");
            return Err(GraphicsError::DeviceLost("DXGI_ERROR_DEVICE_REMOVED (simulated)".to_string()).into());
        }

        self.presents += 1;
        self.current = Self::index_for_present(&self.options, self.presents);
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        self.check_alive()?;
        if self.back_buffers.iter().any(|b| Arc::strong_count(&b.inner) > 1) {
            return Err(GraphicsError::SwapchainError(
                "ResizeBuffers called while back buffers are still referenced".to_string(),
            )
            .into());
        }

        self.options.width = width;
        self.options.height = height;
        self.back_buffers = Self::create_back_buffers(&self.options, &self.monitor, self.generation);
        self.presents = 0;
        self.current = Self::index_for_present(&self.options, 0);
        debug!(width, height, "Simulated swap chain resized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::sync::GpuFence;

    #[test]
    fn test_round_robin_and_custom_order() {
        let monitor = SimMonitor::new();
        let mut backend = SimBackend::new(SimOptions::default(), &monitor, 0).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 0);
        backend.present(1).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 1);
        backend.present(1).unwrap();
        assert_eq!(backend.current_back_buffer_index(), 0);

        let options = SimOptions {
            frame_count: 3,
            back_buffer_order: Some(vec![2, 0, 0, 1]),
            ..SimOptions::default()
        };
        let mut backend = SimBackend::new(options, &monitor, 1).unwrap();
        let mut seen = vec![backend.current_back_buffer_index()];
        for _ in 0..4 {
            backend.present(1).unwrap();
            seen.push(backend.current_back_buffer_index());
        }
        assert_eq!(seen, vec![2, 0, 0, 1, 2]);
    }

    #[test]
    fn test_device_lost_at_present() {
        let monitor = SimMonitor::new();
        monitor.inject_device_lost_at(2);
        let mut backend = SimBackend::new(SimOptions::default(), &monitor, 0).unwrap();
        let fence = backend.create_fence(0).unwrap();

        backend.present(1).unwrap();
        let err = backend.present(1).unwrap_err();
        assert!(err.is_device_lost());
        assert!(backend.is_removed());
        assert_eq!(fence.completed_value(), u64::MAX);
        assert!(fence.signal(5).is_err());
        assert!(backend.create_command_list("late").is_err());
    }

    #[test]
    fn test_objects_release_with_backend() {
        let monitor = SimMonitor::new();
        {
            let backend = SimBackend::new(SimOptions::default(), &monitor, 0).unwrap();
            let _fence = backend.create_fence(0).unwrap();
            let _list = backend.create_command_list("list").unwrap();
            let _buffer = backend.create_upload_buffer("cb", 256).unwrap();
            let _bb = backend.back_buffer(0).unwrap();
            // 设备 + 2 个后缓冲 + fence + 列表 + 缓冲 + 后缓冲引用
            assert_eq!(monitor.live_objects(0), 7);
        }
        assert_eq!(monitor.live_objects(0), 0);
    }

    #[test]
    fn test_resize_requires_released_back_buffers() {
        let monitor = SimMonitor::new();
        let mut backend = SimBackend::new(SimOptions::default(), &monitor, 0).unwrap();
        let held = backend.back_buffer(0).unwrap();
        assert!(backend.resize(640, 480).is_err());
        drop(held);
        backend.resize(640, 480).unwrap();
        assert_eq!(backend.size(), (640, 480));
    }
}
